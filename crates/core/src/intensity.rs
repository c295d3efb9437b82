//! Thermal population, form factor and neutron projector.
//!
//! Only spin components perpendicular to the momentum transfer scatter
//! neutrons (Shirane 2002, eq. 2.64), so the post-processor sandwiches each
//! correlation tensor between the projector onto the plane orthogonal to Q.

use nalgebra::{Matrix3, Vector3};
use num_complex::Complex64;

use crate::{config::MagdynOptions, correlation::EnergyAndWeight, units::bose_cutoff};

/// Orthogonal projector `1 - Q Q† / |Q|²` onto the plane perpendicular to `q`.
///
/// For `|q|` below `tolerance` there is no direction to remove and the
/// identity is returned.
pub fn ortho_projector(q: &Vector3<f64>, tolerance: f64) -> Matrix3<Complex64> {
    let norm_sq = q.norm_squared();
    if norm_sq.sqrt() < tolerance {
        return Matrix3::identity();
    }
    let outer = q * q.transpose() / norm_sq;
    (Matrix3::identity() - outer).map(|value| Complex64::new(value, 0.0))
}

/// Applies Bose factor, form factor and projector to every mode in place and
/// fills in the traces and weights.
pub fn apply_weights(q: &Vector3<f64>, modes: &mut [EnergyAndWeight], options: &MagdynOptions) {
    let proj = ortho_projector(q, options.tolerance);
    let form_factor = options
        .form_factor
        .as_ref()
        .map(|ff| ff.evaluate(options.q_magnitude(q)));

    for mode in modes.iter_mut() {
        if options.bose_enabled() {
            let bose = bose_cutoff(mode.energy, options.temperature, options.bose_cutoff);
            mode.s *= Complex64::new(bose, 0.0);
        }

        if let Some(ff) = form_factor {
            mode.s *= Complex64::new(ff, 0.0);
        }

        mode.s_perp = proj * mode.s * proj;

        mode.s_sum = mode.s.trace();
        mode.s_perp_sum = mode.s_perp.trace();
        mode.weight_full = mode.s_sum.re.abs();
        mode.weight = mode.s_perp_sum.re.abs();
    }
}
