//! Bogoliubov transformation and per-mode spin-spin correlation tensors.
//!
//! Implements the formalism of S. Toth and B. Lake, J. Phys.: Condens. Matter
//! 27, 166002 (2015), equations (32)–(47), for a single Q-point.
//!
//! # Algorithm
//!
//! With `V` the matrix of eigenvectors sorted by descending energy:
//!
//! ```text
//! L      = V† H V                  (energies on the diagonal)
//! E½     = sqrt_diag(g L)          (square roots of the absolute energies)
//! T      = C⁻¹ V E½                (Bogoliubov transformation)
//! S_i^xy = (T† M^xy T)_ii / 2N
//! ```
//!
//! where `C` is the Cholesky factor and `M^xy` is the 2N×2N site-pair
//! correlation matrix for the Cartesian components `x`, `y`.

use std::{cmp::Ordering, f64::consts::PI, fmt};

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use num_complex::Complex64;
use serde::Serialize;
use thiserror::Error;

use crate::{
    config::MagdynOptions,
    hamiltonian::{BundleError, EigenMode, HamiltonianBundle},
    site::MagneticSite,
};

// ============================================================================
// Result Types
// ============================================================================

/// Energy, correlation tensors and weights of one mode at one Q-point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergyAndWeight {
    pub energy: f64,
    /// Full 3×3 spin-spin correlation tensor.
    pub s: Matrix3<Complex64>,
    /// `s` with the component along Q projected out.
    pub s_perp: Matrix3<Complex64>,
    pub s_sum: Complex64,
    pub s_perp_sum: Complex64,
    /// `|re tr(s)|`
    pub weight_full: f64,
    /// `|re tr(s_perp)|`
    pub weight: f64,
}

impl EnergyAndWeight {
    pub fn new(energy: f64) -> Self {
        Self {
            energy,
            s: Matrix3::zeros(),
            s_perp: Matrix3::zeros(),
            s_sum: Complex64::default(),
            s_perp_sum: Complex64::default(),
            weight_full: 0.0,
            weight: 0.0,
        }
    }
}

/// Non-fatal conditions met while building the correlations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// The Cholesky factor could not be inverted; a pseudo-inverse was used.
    SingularCholesky { q: [f64; 3] },
    /// `g V† H V` is not diagonal within tolerance.
    OffDiagonalResidue { q: [f64; 3], max_residue: f64 },
    /// A diagonal entry of `g V† H V` is negative beyond tolerance; its
    /// square root is complex.
    NegativeEnergy {
        q: [f64; 3],
        mode: usize,
        value: Complex64,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::SingularCholesky { q } => {
                write!(f, "inversion of the Cholesky factor failed at Q = {}", fmt_q(q))
            }
            Diagnostic::OffDiagonalResidue { q, max_residue } => write!(
                f,
                "eigenvectors do not diagonalize H at Q = {} (off-diagonal residue {max_residue:.3e})",
                fmt_q(q)
            ),
            Diagnostic::NegativeEnergy { q, mode, value } => write!(
                f,
                "negative energy {value} for mode {mode} at Q = {}",
                fmt_q(q)
            ),
        }
    }
}

fn fmt_q(q: &[f64; 3]) -> String {
    format!("({:.4}, {:.4}, {:.4})", q[0], q[1], q[2])
}

/// Modes in descending-energy order plus any diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Correlations {
    pub modes: Vec<EnergyAndWeight>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Correlations {
    pub fn is_degraded(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CorrelationError {
    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("Hamiltonian is {dim}x{dim} but the model has {sites} magnetic sites")]
    SiteCount { dim: usize, sites: usize },

    #[error("expected {expected} eigenmodes, got {found}")]
    ModeCount { expected: usize, found: usize },

    #[error("eigenvector {index} has length {found}, expected {expected}")]
    VectorLength {
        index: usize,
        expected: usize,
        found: usize,
    },
}

// ============================================================================
// Building Blocks
// ============================================================================

/// Mode indices sorted by descending energy estimate.
///
/// The sort is stable, so degenerate modes keep their input order.
pub fn sort_modes(energies: &[f64]) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..energies.len()).collect();
    perm.sort_by(|&a, &b| descending(energies[a], energies[b]));
    perm
}

// Adding +0.0 maps -0.0 to +0.0, so signed zeros tie and keep their order.
fn descending(a: f64, b: f64) -> Ordering {
    (b + 0.0).total_cmp(&(a + 0.0))
}

/// Phase factor `exp(-σ i 2π ⟨r_j - r_i, Q⟩)` between sites `i` and `j`.
pub fn pair_phase(site_i: &MagneticSite, site_j: &MagneticSite, q: &Vector3<f64>, phase_sign: f64) -> Complex64 {
    let arg = -phase_sign * 2.0 * PI * (site_j.position() - site_i.position()).dot(q);
    Complex64::from_polar(1.0, arg)
}

struct SiteFrames {
    u: Vec<[Complex64; 3]>,
    u_conj: Vec<[Complex64; 3]>,
    /// Row-major N×N `phase * sqrt(S_i S_j)`.
    prefactors: Vec<Complex64>,
}

impl SiteFrames {
    fn new(sites: &[MagneticSite], q: &Vector3<f64>, phase_sign: f64) -> Self {
        let n = sites.len();
        let mut prefactors = Vec::with_capacity(n * n);
        for s_i in sites {
            for s_j in sites {
                let s_mag = (s_i.spin_mag * s_j.spin_mag).sqrt();
                prefactors.push(pair_phase(s_i, s_j, q, phase_sign) * s_mag);
            }
        }
        Self {
            u: sites.iter().map(|site| site.u).collect(),
            u_conj: sites.iter().map(MagneticSite::u_conj).collect(),
            prefactors,
        }
    }

    fn len(&self) -> usize {
        self.u.len()
    }

    /// Writes the four N×N quadrants of `M^xy` into `block` (2N×2N):
    ///
    /// ```text
    /// | u_i[x] u*_j[y]   u_i[x] u_j[y]  |
    /// | u*_i[x] u*_j[y]  u*_i[x] u_j[y] |
    /// ```
    fn fill(&self, block: &mut DMatrix<Complex64>, x: usize, y: usize) {
        let n = self.len();
        for i in 0..n {
            let (u_i, uc_i) = (self.u[i][x], self.u_conj[i][x]);
            for j in 0..n {
                let (u_j, uc_j) = (self.u[j][y], self.u_conj[j][y]);
                let pre = self.prefactors[i * n + j];
                block[(i, j)] = pre * u_i * uc_j;
                block[(i, j + n)] = pre * u_i * u_j;
                block[(i + n, j)] = pre * uc_i * uc_j;
                block[(i + n, j + n)] = pre * uc_i * u_j;
            }
        }
    }
}

/// The 2N×2N site-pair correlation matrix `M^xy` for Cartesian components
/// `x` and `y`.
pub fn correlation_block_matrix(
    sites: &[MagneticSite],
    q: &Vector3<f64>,
    x: usize,
    y: usize,
    phase_sign: f64,
) -> DMatrix<Complex64> {
    let frames = SiteFrames::new(sites, q, phase_sign);
    let dim = 2 * frames.len();
    let mut block = DMatrix::zeros(dim, dim);
    frames.fill(&mut block, x, y);
    block
}

/// Inverse of the Cholesky factor; falls back to the pseudo-inverse, or to
/// zero if even that fails. The flag is false when the fallback was used.
fn invert_cholesky(chol: &DMatrix<Complex64>, tolerance: f64) -> (DMatrix<Complex64>, bool) {
    if let Some(inv) = chol.clone().try_inverse() {
        if inv.iter().all(|value| value.re.is_finite() && value.im.is_finite()) {
            return (inv, true);
        }
    }
    let dim = chol.nrows();
    let fallback = chol
        .clone()
        .pseudo_inverse(tolerance)
        .unwrap_or_else(|_| DMatrix::zeros(dim, dim));
    (fallback, false)
}

/// Principal square root of a diagonal entry of `g L`, clamping negative
/// values that are indistinguishable from zero.
fn diagonal_sqrt(value: Complex64, threshold: f64) -> (Complex64, bool) {
    if value.re < 0.0 && value.norm() <= threshold {
        return (Complex64::default(), false);
    }
    (value.sqrt(), value.re < 0.0)
}

// ============================================================================
// Correlation Builder
// ============================================================================

/// Builds the energies and correlation tensors of all 2N modes at `q`.
///
/// `eigenmodes` are the 2N eigenpairs of `(H, g)` in any order. The returned
/// modes are sorted by descending energy estimate; their energies are the
/// diagonal of `V† H V`, not the estimates. A singular Cholesky factor is
/// reported as a [`Diagnostic`] and never aborts the calculation.
pub fn compute_correlations(
    sites: &[MagneticSite],
    bundle: &HamiltonianBundle,
    q: &Vector3<f64>,
    eigenmodes: &[EigenMode],
    options: &MagdynOptions,
) -> Result<Correlations, CorrelationError> {
    let n = sites.len();
    if n == 0 {
        return Ok(Correlations::default());
    }
    bundle.validate()?;
    let dim = 2 * n;
    if bundle.dim() != dim {
        return Err(CorrelationError::SiteCount {
            dim: bundle.dim(),
            sites: n,
        });
    }
    if eigenmodes.len() != dim {
        return Err(CorrelationError::ModeCount {
            expected: dim,
            found: eigenmodes.len(),
        });
    }
    if let Some((index, mode)) = eigenmodes
        .iter()
        .enumerate()
        .find(|(_, mode)| mode.vector.len() != dim)
    {
        return Err(CorrelationError::VectorLength {
            index,
            expected: dim,
            found: mode.vector.len(),
        });
    }

    let q_arr = [q.x, q.y, q.z];
    let mut diagnostics = Vec::new();

    let estimates: Vec<f64> = eigenmodes.iter().map(|mode| mode.energy).collect();
    let columns: Vec<DVector<Complex64>> = sort_modes(&estimates)
        .into_iter()
        .map(|idx| eigenmodes[idx].vector.clone())
        .collect();
    let evec = DMatrix::from_columns(&columns);

    // equation (32): energies, then square roots of their absolute values
    let energy_mat = evec.adjoint() * &bundle.h * &evec;
    let mut e_sqrt = &bundle.g_sign * &energy_mat;

    let scale = (0..dim)
        .map(|i| e_sqrt[(i, i)].norm())
        .fold(1.0_f64, f64::max);
    let threshold = options.tolerance * scale;
    let max_residue = (0..dim)
        .flat_map(|row| (0..dim).filter(move |&col| col != row).map(move |col| (row, col)))
        .map(|(row, col)| e_sqrt[(row, col)].norm())
        .fold(0.0_f64, f64::max);
    if max_residue > threshold {
        let diag = Diagnostic::OffDiagonalResidue {
            q: q_arr,
            max_residue,
        };
        log::warn!("{diag}");
        diagnostics.push(diag);
    }
    for i in 0..dim {
        let value = e_sqrt[(i, i)];
        let (root, negative) = diagonal_sqrt(value, threshold);
        if negative {
            let diag = Diagnostic::NegativeEnergy {
                q: q_arr,
                mode: i,
                value,
            };
            log::warn!("{diag}");
            diagnostics.push(diag);
        }
        e_sqrt[(i, i)] = root;
    }

    let (chol_inv, inv_ok) = invert_cholesky(&bundle.chol, options.tolerance);
    if !inv_ok {
        let diag = Diagnostic::SingularCholesky { q: q_arr };
        log::warn!("{diag}");
        diagnostics.push(diag);
    }

    // equation (34)
    let trafo = chol_inv * &evec * &e_sqrt;
    let trafo_herm = trafo.adjoint();

    let mut modes: Vec<EnergyAndWeight> = (0..dim)
        .map(|i| EnergyAndWeight::new(energy_mat[(i, i)].re))
        .collect();

    // equations (44) and (47)
    let frames = SiteFrames::new(sites, q, options.phase_sign);
    let mut block = DMatrix::zeros(dim, dim);
    let norm = Complex64::new(dim as f64, 0.0);
    for x in 0..3 {
        for y in 0..3 {
            frames.fill(&mut block, x, y);
            let m_trafo = &trafo_herm * &block * &trafo;
            for (i, mode) in modes.iter_mut().enumerate() {
                mode.s[(x, y)] += m_trafo[(i, i)] / norm;
            }
        }
    }

    Ok(Correlations { modes, diagnostics })
}
