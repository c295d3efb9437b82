//! Per-Q inputs handed over by the Hamiltonian assembly and the eigensolver.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BundleError {
    #[error("{name} must be square, got {rows}x{cols}")]
    NotSquare {
        name: &'static str,
        rows: usize,
        cols: usize,
    },

    #[error("{name} is {found}x{found} but the Hamiltonian is {expected}x{expected}")]
    SizeMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("matrix dimension {0} is odd; bosonic Hamiltonians are 2N x 2N")]
    OddDimension(usize),

    #[error("sign matrix entry ({row}, {col}) = {value} is not a ±1 diagonal entry")]
    InvalidSign {
        row: usize,
        col: usize,
        value: Complex64,
    },
}

/// `H`, its Cholesky factor and the pseudo-metric `g` for one Q-point.
#[derive(Debug, Clone, PartialEq)]
pub struct HamiltonianBundle {
    pub h: DMatrix<Complex64>,
    pub chol: DMatrix<Complex64>,
    pub g_sign: DMatrix<Complex64>,
}

/// Tolerance when checking that `g` holds exact ±1 entries.
const SIGN_TOLERANCE: f64 = 1e-9;

impl HamiltonianBundle {
    pub fn new(
        h: DMatrix<Complex64>,
        chol: DMatrix<Complex64>,
        g_sign: DMatrix<Complex64>,
    ) -> Result<Self, BundleError> {
        let bundle = Self { h, chol, g_sign };
        bundle.validate()?;
        Ok(bundle)
    }

    /// Bundle with the conventional `g = diag(+1 × N, -1 × N)`.
    pub fn with_standard_signs(
        h: DMatrix<Complex64>,
        chol: DMatrix<Complex64>,
    ) -> Result<Self, BundleError> {
        if h.nrows() % 2 != 0 {
            return Err(BundleError::OddDimension(h.nrows()));
        }
        let g_sign = sign_matrix(h.nrows() / 2);
        Self::new(h, chol, g_sign)
    }

    /// Matrix dimension 2N.
    pub fn dim(&self) -> usize {
        self.h.nrows()
    }

    /// Number of magnetic sites N.
    pub fn site_count(&self) -> usize {
        self.dim() / 2
    }

    pub fn validate(&self) -> Result<(), BundleError> {
        let dim = check_square("H", &self.h)?;
        if dim % 2 != 0 {
            return Err(BundleError::OddDimension(dim));
        }
        for (name, mat) in [("Cholesky factor", &self.chol), ("sign matrix", &self.g_sign)] {
            let found = check_square(name, mat)?;
            if found != dim {
                return Err(BundleError::SizeMismatch {
                    name,
                    expected: dim,
                    found,
                });
            }
        }
        for col in 0..dim {
            for row in 0..dim {
                let value = self.g_sign[(row, col)];
                let valid = if row == col {
                    value.im.abs() < SIGN_TOLERANCE && (value.re.abs() - 1.0).abs() < SIGN_TOLERANCE
                } else {
                    value.norm() < SIGN_TOLERANCE
                };
                if !valid {
                    return Err(BundleError::InvalidSign { row, col, value });
                }
            }
        }
        Ok(())
    }
}

fn check_square(name: &'static str, mat: &DMatrix<Complex64>) -> Result<usize, BundleError> {
    if mat.nrows() != mat.ncols() {
        return Err(BundleError::NotSquare {
            name,
            rows: mat.nrows(),
            cols: mat.ncols(),
        });
    }
    Ok(mat.nrows())
}

/// `diag(+1, …, +1, -1, …, -1)` with `n_sites` entries of each sign.
pub fn sign_matrix(n_sites: usize) -> DMatrix<Complex64> {
    let dim = 2 * n_sites;
    DMatrix::from_fn(dim, dim, |row, col| {
        if row != col {
            Complex64::new(0.0, 0.0)
        } else if row < n_sites {
            Complex64::new(1.0, 0.0)
        } else {
            Complex64::new(-1.0, 0.0)
        }
    })
}

/// One eigenpair from the external eigensolver. The energy only serves as the
/// sort key; reported energies are recomputed from the vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenMode {
    pub energy: f64,
    pub vector: DVector<Complex64>,
}

impl EigenMode {
    pub fn new(energy: f64, vector: DVector<Complex64>) -> Self {
        Self { energy, vector }
    }
}
