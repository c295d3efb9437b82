//! Crystal lattice primitives and the r.l.u. to Å⁻¹ transform.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LatticeError {
    #[error("lattice parameters give non-finite basis vectors")]
    NonFinite,

    #[error("lattice vectors are linearly dependent (cell volume {volume:e})")]
    Degenerate { volume: f64 },
}

/// Cell volumes below this fraction of `a·b·c` count as degenerate.
const VOLUME_TOLERANCE: f64 = 1e-10;

/// Direct lattice given by lattice constants (Å) and angles (degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lattice3D {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    #[serde(default = "default_angle")]
    pub alpha: f64,
    #[serde(default = "default_angle")]
    pub beta: f64,
    #[serde(default = "default_angle")]
    pub gamma: f64,
}

fn default_angle() -> f64 {
    90.0
}

impl Lattice3D {
    pub fn cubic(a: f64) -> Self {
        Self::tetragonal(a, a)
    }

    pub fn tetragonal(a: f64, c: f64) -> Self {
        Self {
            a,
            b: a,
            c,
            alpha: 90.0,
            beta: 90.0,
            gamma: 90.0,
        }
    }

    pub fn hexagonal(a: f64, c: f64) -> Self {
        Self {
            a,
            b: a,
            c,
            alpha: 90.0,
            beta: 90.0,
            gamma: 120.0,
        }
    }

    /// Real-space basis vectors as matrix columns, `a` along x and `b` in
    /// the xy plane.
    pub fn real_basis(&self) -> Matrix3<f64> {
        let (alpha, beta, gamma) = (
            self.alpha.to_radians(),
            self.beta.to_radians(),
            self.gamma.to_radians(),
        );
        let (cos_a, cos_b, cos_g) = (alpha.cos(), beta.cos(), gamma.cos());
        let sin_g = gamma.sin();
        let a1 = Vector3::new(self.a, 0.0, 0.0);
        let a2 = Vector3::new(self.b * cos_g, self.b * sin_g, 0.0);
        let c_y = (cos_a - cos_b * cos_g) / sin_g;
        let c_z = (1.0 - cos_b * cos_b - c_y * c_y).max(0.0).sqrt();
        let a3 = Vector3::new(self.c * cos_b, self.c * c_y, self.c * c_z);
        Matrix3::from_columns(&[a1, a2, a3])
    }

    /// Checks that the basis is finite and spans a cell of non-zero volume.
    pub fn validate(&self) -> Result<(), LatticeError> {
        let real = self.real_basis();
        if real.iter().any(|value| !value.is_finite()) {
            return Err(LatticeError::NonFinite);
        }
        let volume = real.determinant().abs();
        let scale = (self.a * self.b * self.c).abs();
        if volume <= VOLUME_TOLERANCE * scale {
            return Err(LatticeError::Degenerate { volume });
        }
        Ok(())
    }

    /// Reciprocal basis vectors (Å⁻¹, including 2π) as matrix columns, so
    /// that `B * q_rlu` is the Cartesian momentum transfer.
    pub fn reciprocal_matrix(&self) -> Result<Matrix3<f64>, LatticeError> {
        self.validate()?;
        let inv = self.real_basis().try_inverse().ok_or(LatticeError::Degenerate {
            volume: self.volume(),
        })?;
        Ok(inv.transpose() * (2.0 * std::f64::consts::PI))
    }

    pub fn q_to_inverse_angstrom(&self, q_rlu: &Vector3<f64>) -> Result<Vector3<f64>, LatticeError> {
        Ok(self.reciprocal_matrix()? * q_rlu)
    }

    pub fn volume(&self) -> f64 {
        self.real_basis().determinant().abs()
    }
}
