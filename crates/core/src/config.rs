//! Calculation options shared by the correlation builder and the intensity
//! post-processor.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    form_factor::FormFactor,
    lattice::{Lattice3D, LatticeError},
};

/// Serializable option set, as found in the `[options]` table of a job file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MagdynConfig {
    /// Sign σ in the pair phase `exp(-σ i 2π ⟨r_j - r_i, Q⟩)`.
    pub phase_sign: f64,
    /// Temperature in K; negative disables the Bose factor.
    pub temperature: f64,
    /// Energies (meV) below this magnitude use the cutoff in the Bose factor.
    pub bose_cutoff: f64,
    /// Form factor formula in `Q` (Å⁻¹); empty disables it.
    pub form_factor: String,
    /// Crystal lattice used to convert r.l.u. to Å⁻¹ for the form factor.
    pub lattice: Option<Lattice3D>,
    /// Tolerance for the numerical consistency checks.
    pub tolerance: f64,
}

impl Default for MagdynConfig {
    fn default() -> Self {
        Self {
            phase_sign: -1.0,
            temperature: -1.0,
            bose_cutoff: 0.025,
            form_factor: String::new(),
            lattice: None,
            tolerance: 1e-6,
        }
    }
}

/// Immutable runtime options, built once per job and shared by all Q-points.
#[derive(Debug, Clone)]
pub struct MagdynOptions {
    pub phase_sign: f64,
    pub temperature: f64,
    pub bose_cutoff: f64,
    pub form_factor: Option<FormFactor>,
    /// Columns are the reciprocal basis vectors in Å⁻¹.
    pub reciprocal_matrix: Matrix3<f64>,
    pub tolerance: f64,
}

impl Default for MagdynOptions {
    fn default() -> Self {
        Self::with_reciprocal(&MagdynConfig::default(), Matrix3::identity())
    }
}

impl MagdynOptions {
    /// Fails only when the configured lattice is degenerate.
    pub fn from_config(config: &MagdynConfig) -> Result<Self, LatticeError> {
        let reciprocal = match &config.lattice {
            Some(lattice) => lattice.reciprocal_matrix()?,
            None => Matrix3::identity(),
        };
        Ok(Self::with_reciprocal(config, reciprocal))
    }

    fn with_reciprocal(config: &MagdynConfig, reciprocal_matrix: Matrix3<f64>) -> Self {
        Self {
            phase_sign: config.phase_sign,
            temperature: config.temperature,
            bose_cutoff: config.bose_cutoff,
            form_factor: FormFactor::new(&config.form_factor),
            reciprocal_matrix,
            tolerance: config.tolerance.abs().max(f64::EPSILON),
        }
    }

    pub fn bose_enabled(&self) -> bool {
        self.temperature >= 0.0
    }

    /// `|B Q|`, the momentum-transfer magnitude in Å⁻¹.
    pub fn q_magnitude(&self, q_rlu: &Vector3<f64>) -> f64 {
        (self.reciprocal_matrix * q_rlu).norm()
    }
}

impl TryFrom<&MagdynConfig> for MagdynOptions {
    type Error = LatticeError;

    fn try_from(value: &MagdynConfig) -> Result<Self, Self::Error> {
        Self::from_config(value)
    }
}
