//! Magnetic sites as seen by the correlation builder.

use nalgebra::{Matrix3, Vector3};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// One magnetic site with its precomputed local-frame vectors.
///
/// `u` and `u_conj` span the plane perpendicular to the ordered moment,
/// already rotated into the global frame. `pos` is in the same coordinates
/// as the Q vectors handed to the calculation (usually fractional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagneticSite {
    #[serde(default)]
    pub name: String,
    pub pos: [f64; 3],
    pub spin_mag: f64,
    pub u: [Complex64; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    u_conj: Option<[Complex64; 3]>,
}

impl MagneticSite {
    pub fn new(
        name: impl Into<String>,
        pos: [f64; 3],
        spin_mag: f64,
        u: [Complex64; 3],
        u_conj: [Complex64; 3],
    ) -> Self {
        Self {
            name: name.into(),
            pos,
            spin_mag,
            u,
            u_conj: Some(u_conj),
        }
    }

    /// Builds the local frame for a moment along `dir`: with `R` the rotation
    /// taking ẑ onto `dir`, `u = R x̂ + i R ŷ` and `u* = conj(u)`.
    pub fn from_spin_direction(
        name: impl Into<String>,
        pos: [f64; 3],
        spin_mag: f64,
        dir: [f64; 3],
    ) -> Self {
        let rot = rotation_from_z(&Vector3::from(dir));
        let (rx, ry) = (rot.column(0), rot.column(1));
        let u = [0usize, 1, 2].map(|k| Complex64::new(rx[k], ry[k]));
        let u_conj = u.map(|value| value.conj());
        Self::new(name, pos, spin_mag, u, u_conj)
    }

    /// Conjugate frame vector; defaults to the element-wise conjugate of `u`.
    pub fn u_conj(&self) -> [Complex64; 3] {
        self.u_conj.unwrap_or_else(|| self.u.map(|value| value.conj()))
    }

    pub fn position(&self) -> Vector3<f64> {
        Vector3::from(self.pos)
    }
}

/// Rotation matrix taking ẑ onto the direction of `dir` (Rodrigues).
fn rotation_from_z(dir: &Vector3<f64>) -> Matrix3<f64> {
    let z = Vector3::z();
    let norm = dir.norm();
    if norm == 0.0 {
        return Matrix3::identity();
    }
    let target = dir / norm;
    let cos = z.dot(&target);
    if cos > 1.0 - 1e-12 {
        return Matrix3::identity();
    }
    if cos < -1.0 + 1e-12 {
        // π about x̂
        return Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0);
    }
    let axis = z.cross(&target);
    let sin = axis.norm();
    let k = axis / sin;
    let k_cross = Matrix3::new(0.0, -k.z, k.y, k.z, 0.0, -k.x, -k.y, k.x, 0.0);
    Matrix3::identity() + k_cross * sin + k_cross * k_cross * (1.0 - cos)
}
