//! Job file parsing.
//!
//! A job bundles the magnetic sites, the calculation options and, for every
//! Q-point, the Hamiltonian data and eigenpairs produced upstream. Complex
//! numbers are written as `[re, im]` pairs and matrices as lists of rows.
//!
//! # File Format
//!
//! ```toml
//! [options]
//! temperature = 10.0
//! form_factor = "0.4220 * exp(-17.684 * (Q/(4*pi))^2) + 0.5948"
//!
//! [options.lattice]
//! a = 5.0
//! b = 5.0
//! c = 5.0
//!
//! [[sites]]
//! name = "Mn1"
//! pos = [0.0, 0.0, 0.0]
//! spin_mag = 2.5
//! spin_dir = [0.0, 0.0, 1.0]
//!
//! [[q_points]]
//! q = [0.1, 0.0, 0.0]
//! hamiltonian = [[[1.0, 0.0], [0.0, 0.0]], [[0.0, 0.0], [-1.0, 0.0]]]
//! cholesky = [[[1.0, 0.0], [0.0, 0.0]], [[0.0, 0.0], [1.0, 0.0]]]
//! modes = [
//!     { energy = 1.0, vector = [[1.0, 0.0], [0.0, 0.0]] },
//!     { energy = -1.0, vector = [[0.0, 0.0], [1.0, 0.0]] },
//! ]
//!
//! [metrics]
//! enabled = true
//! output = "metrics.jsonl"
//! ```

use std::{fs, path::Path, str::FromStr};

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::{MagdynConfig, MagdynOptions},
    hamiltonian::{BundleError, EigenMode, HamiltonianBundle, sign_matrix},
    lattice::LatticeError,
    metrics::MetricsConfig,
    site::MagneticSite,
    spectrum::{QPointInput, SpectrumJob},
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error("invalid [options.lattice]: {0}")]
    DegenerateLattice(#[source] LatticeError),

    #[error("site {index} ({name:?}) needs either `u` or `spin_dir`")]
    MissingFrame { index: usize, name: String },

    #[error("Q-point {index}: {name} row {row} has {found} entries, expected {expected}")]
    RaggedMatrix {
        index: usize,
        name: &'static str,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Q-point {index}: sign diagonal has {found} entries, expected {expected}")]
    SignLength {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Q-point {index}: {source}")]
    Bundle {
        index: usize,
        #[source]
        source: BundleError,
    },
}

// ============================================================================
// Sites
// ============================================================================

/// Site entry of a job file: either explicit frame vectors or a moment
/// direction from which they are derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default)]
    pub name: String,
    pub pos: [f64; 3],
    pub spin_mag: f64,
    #[serde(default)]
    pub u: Option<[Complex64; 3]>,
    #[serde(default)]
    pub u_conj: Option<[Complex64; 3]>,
    #[serde(default)]
    pub spin_dir: Option<[f64; 3]>,
}

impl SiteConfig {
    fn into_site(self, index: usize) -> Result<MagneticSite, ConfigError> {
        match (self.u, self.spin_dir) {
            (Some(u), _) => {
                let u_conj = self.u_conj.unwrap_or_else(|| u.map(|value| value.conj()));
                Ok(MagneticSite::new(self.name, self.pos, self.spin_mag, u, u_conj))
            }
            (None, Some(dir)) => Ok(MagneticSite::from_spin_direction(
                self.name,
                self.pos,
                self.spin_mag,
                dir,
            )),
            (None, None) => Err(ConfigError::MissingFrame {
                index,
                name: self.name,
            }),
        }
    }
}

// ============================================================================
// Q-Points
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeConfig {
    pub energy: f64,
    pub vector: Vec<Complex64>,
}

/// Upstream data for one Q-point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QPointConfig {
    pub q: [f64; 3],
    pub hamiltonian: Vec<Vec<Complex64>>,
    pub cholesky: Vec<Vec<Complex64>>,
    /// Diagonal of `g`; defaults to N × (+1) followed by N × (−1).
    #[serde(default)]
    pub sign: Option<Vec<f64>>,
    pub modes: Vec<ModeConfig>,
}

impl QPointConfig {
    fn into_input(self, index: usize) -> Result<QPointInput, ConfigError> {
        let h = rows_to_matrix(index, "hamiltonian", &self.hamiltonian)?;
        let chol = rows_to_matrix(index, "cholesky", &self.cholesky)?;
        let g_sign = match self.sign {
            Some(diag) => {
                if diag.len() != h.nrows() {
                    return Err(ConfigError::SignLength {
                        index,
                        expected: h.nrows(),
                        found: diag.len(),
                    });
                }
                let entries: Vec<Complex64> =
                    diag.iter().map(|&value| Complex64::new(value, 0.0)).collect();
                DMatrix::from_diagonal(&DVector::from_vec(entries))
            }
            None => sign_matrix(h.nrows() / 2),
        };
        let hamiltonian = HamiltonianBundle::new(h, chol, g_sign)
            .map_err(|source| ConfigError::Bundle { index, source })?;
        let modes = self
            .modes
            .into_iter()
            .map(|mode| EigenMode::new(mode.energy, DVector::from_vec(mode.vector)))
            .collect();
        Ok(QPointInput {
            q: self.q,
            hamiltonian,
            modes,
        })
    }
}

fn rows_to_matrix(
    index: usize,
    name: &'static str,
    rows: &[Vec<Complex64>],
) -> Result<DMatrix<Complex64>, ConfigError> {
    let ncols = rows.first().map_or(0, Vec::len);
    if let Some((row, found)) = rows
        .iter()
        .map(Vec::len)
        .enumerate()
        .find(|&(_, len)| len != ncols)
    {
        return Err(ConfigError::RaggedMatrix {
            index,
            name,
            row,
            expected: ncols,
            found,
        });
    }
    Ok(DMatrix::from_row_iterator(
        rows.len(),
        ncols,
        rows.iter().flatten().copied(),
    ))
}

// ============================================================================
// Job Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub options: MagdynConfig,
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
    #[serde(default)]
    pub q_points: Vec<QPointConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl JobConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        text.parse()
    }

    /// Converts into a runnable job; the metrics table is not part of it.
    pub fn into_job(self) -> Result<SpectrumJob, ConfigError> {
        let options =
            MagdynOptions::from_config(&self.options).map_err(ConfigError::DegenerateLattice)?;
        let sites = self
            .sites
            .into_iter()
            .enumerate()
            .map(|(index, site)| site.into_site(index))
            .collect::<Result<Vec<_>, _>>()?;
        let q_points = self
            .q_points
            .into_iter()
            .enumerate()
            .map(|(index, point)| point.into_input(index))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SpectrumJob {
            sites,
            options,
            q_points,
        })
    }
}

impl FromStr for JobConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}

impl TryFrom<JobConfig> for SpectrumJob {
    type Error = ConfigError;

    fn try_from(value: JobConfig) -> Result<Self, Self::Error> {
        value.into_job()
    }
}
