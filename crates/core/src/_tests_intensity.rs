#![cfg(test)]

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use num_complex::Complex64;

use super::config::{MagdynConfig, MagdynOptions};
use super::correlation::{EnergyAndWeight, compute_correlations};
use super::hamiltonian::{EigenMode, HamiltonianBundle};
use super::intensity::{apply_weights, ortho_projector};
use super::lattice::Lattice3D;
use super::site::MagneticSite;

const TOL: f64 = 1e-12;

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn sample_tensor() -> Matrix3<Complex64> {
    Matrix3::new(
        c(0.7, 0.0),
        c(0.1, -0.3),
        c(0.05, 0.2),
        c(0.1, 0.3),
        c(0.4, 0.0),
        c(-0.2, 0.1),
        c(0.05, -0.2),
        c(-0.2, -0.1),
        c(0.25, 0.0),
    )
}

fn mode_with(energy: f64, s: Matrix3<Complex64>) -> EnergyAndWeight {
    let mut mode = EnergyAndWeight::new(energy);
    mode.s = s;
    mode
}

fn max_diff(a: &Matrix3<Complex64>, b: &Matrix3<Complex64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).norm()).fold(0.0, f64::max)
}

/// Single-site ferromagnet with the moment along z, solved at Q = 0.
fn ferromagnet_modes() -> Vec<EnergyAndWeight> {
    let site = MagneticSite::from_spin_direction("Fe", [0.0; 3], 1.0, [0.0, 0.0, 1.0]);
    let h = DMatrix::from_diagonal(&DVector::from_vec(vec![c(2.0, 0.0), c(-2.0, 0.0)]));
    let chol = DMatrix::from_diagonal_element(2, 2, c(2f64.sqrt(), 0.0));
    let bundle = HamiltonianBundle::with_standard_signs(h, chol).unwrap();
    let modes = [
        EigenMode::new(2.0, DVector::from_vec(vec![c(1.0, 0.0), c(0.0, 0.0)])),
        EigenMode::new(-2.0, DVector::from_vec(vec![c(0.0, 0.0), c(1.0, 0.0)])),
    ];
    compute_correlations(
        &[site],
        &bundle,
        &Vector3::zeros(),
        &modes,
        &MagdynOptions::default(),
    )
    .unwrap()
    .modes
}

#[test]
fn projector_is_idempotent_and_removes_q() {
    let q = Vector3::new(0.3, -1.2, 0.7);
    let proj = ortho_projector(&q, 1e-6);
    assert!(max_diff(&(proj * proj), &proj) < TOL);
    assert!(max_diff(&proj.adjoint(), &proj) < TOL);
    let along_q = proj * q.map(|v| c(v, 0.0));
    assert!(along_q.iter().all(|v| v.norm() < TOL));
    assert!((proj.trace().re - 2.0).abs() < TOL);
}

#[test]
fn zero_q_projector_is_identity() {
    assert_eq!(ortho_projector(&Vector3::zeros(), 1e-6), Matrix3::identity());
    assert_eq!(ortho_projector(&Vector3::new(1e-9, 0.0, 0.0), 1e-6), Matrix3::identity());
}

#[test]
fn disabled_factors_leave_tensor_untouched() {
    let options = MagdynOptions::default();
    assert!(!options.bose_enabled());
    assert!(options.form_factor.is_none());

    let mut modes = vec![mode_with(1.0, sample_tensor()), mode_with(-1.0, sample_tensor())];
    apply_weights(&Vector3::new(0.0, 0.0, 1.0), &mut modes, &options);
    for mode in &modes {
        assert_eq!(mode.s, sample_tensor());
        assert!((mode.s_sum - c(1.35, 0.0)).norm() < TOL);
        assert!((mode.weight_full - 1.35).abs() < TOL);
        // Q along z removes the zz component only
        assert!((mode.weight - 1.1).abs() < TOL);
    }
}

#[test]
fn weights_match_traces() {
    let options = MagdynOptions::default();
    let mut modes = vec![mode_with(0.5, -sample_tensor())];
    apply_weights(&Vector3::new(1.0, 1.0, 0.0), &mut modes, &options);
    let mode = &modes[0];
    assert!((mode.s_sum - mode.s.trace()).norm() < TOL);
    assert!((mode.s_perp_sum - mode.s_perp.trace()).norm() < TOL);
    assert!((mode.weight_full - mode.s_sum.re.abs()).abs() < TOL);
    assert!((mode.weight - mode.s_perp_sum.re.abs()).abs() < TOL);
    assert!(mode.weight > 0.0);
}

#[test]
fn zero_temperature_suppresses_negative_energy_modes() {
    let options = MagdynOptions::from_config(&MagdynConfig {
        temperature: 0.0,
        ..MagdynConfig::default()
    })
    .unwrap();
    let mut modes = vec![mode_with(1.0, sample_tensor()), mode_with(-1.0, sample_tensor())];
    apply_weights(&Vector3::zeros(), &mut modes, &options);
    assert_eq!(modes[0].s, sample_tensor());
    assert_eq!(modes[1].s, Matrix3::zeros());
    assert_eq!(modes[1].weight, 0.0);
}

#[test]
fn finite_temperature_obeys_detailed_balance() {
    let options = MagdynOptions::from_config(&MagdynConfig {
        temperature: 50.0,
        ..MagdynConfig::default()
    })
    .unwrap();
    let s = sample_tensor();
    let mut modes = vec![mode_with(2.0, s), mode_with(-2.0, s)];
    apply_weights(&Vector3::zeros(), &mut modes, &options);
    let ratio = modes[1].weight_full / modes[0].weight_full;
    let expected = (-2.0 / (super::units::K_B_MEV_PER_K * 50.0)).exp();
    assert!((ratio - expected).abs() < 1e-9);
}

#[test]
fn form_factor_scales_with_q_in_inverse_angstrom() {
    let options = MagdynOptions::from_config(&MagdynConfig {
        form_factor: "exp(-Q^2)".into(),
        lattice: Some(Lattice3D::cubic(2.0 * std::f64::consts::PI)),
        ..MagdynConfig::default()
    })
    .unwrap();
    // cubic a = 2π gives |B Q| = |Q|
    let q = Vector3::new(0.0, 0.0, 0.5);
    let mut modes = vec![mode_with(1.0, sample_tensor())];
    apply_weights(&q, &mut modes, &options);
    let scale = (-0.25f64).exp();
    assert!(max_diff(&modes[0].s, &(sample_tensor() * c(scale, 0.0))) < 1e-12);
}

#[test]
fn unparsable_form_factor_zeroes_intensity() {
    let options = MagdynOptions::from_config(&MagdynConfig {
        form_factor: "exp(".into(),
        ..MagdynConfig::default()
    })
    .unwrap();
    let mut modes = vec![mode_with(1.0, sample_tensor())];
    apply_weights(&Vector3::new(0.1, 0.0, 0.0), &mut modes, &options);
    assert_eq!(modes[0].s, Matrix3::zeros());
    assert_eq!(modes[0].weight_full, 0.0);
}

#[test]
fn ferromagnet_weights_depend_on_q_direction() {
    let options = MagdynOptions::default();
    // u = x̂ + iŷ, so S_0 = [[1, -i, 0], [i, 1, 0], [0, 0, 0]] / 2
    let mut along_z = ferromagnet_modes();
    apply_weights(&Vector3::new(0.0, 0.0, 1.0), &mut along_z, &options);
    assert!((along_z[0].weight - 1.0).abs() < TOL);
    assert!((along_z[0].weight_full - 1.0).abs() < TOL);

    // Q along x leaves only the yy component
    let mut along_x = ferromagnet_modes();
    apply_weights(&Vector3::new(1.0, 0.0, 0.0), &mut along_x, &options);
    assert!((along_x[0].weight - 0.5).abs() < TOL);
    assert!((along_x[1].weight - 0.5).abs() < TOL);
    assert!((along_x[0].weight_full - 1.0).abs() < TOL);

    let mut at_origin = ferromagnet_modes();
    apply_weights(&Vector3::zeros(), &mut at_origin, &options);
    assert!(max_diff(&at_origin[0].s_perp, &at_origin[0].s) < TOL);
}

#[test]
fn computed_modes_satisfy_trace_identity() {
    let options = MagdynOptions::default();
    let mut modes = ferromagnet_modes();
    apply_weights(&Vector3::new(0.4, -0.3, 0.8), &mut modes, &options);
    for mode in &modes {
        let diag_sum = mode.s[(0, 0)] + mode.s[(1, 1)] + mode.s[(2, 2)];
        assert!((mode.s_sum - diag_sum).norm() < TOL);
        let perp_sum = mode.s_perp[(0, 0)] + mode.s_perp[(1, 1)] + mode.s_perp[(2, 2)];
        assert!((mode.s_perp_sum - perp_sum).norm() < TOL);
        assert!((mode.weight_full - diag_sum.re.abs()).abs() < TOL);
        assert!(mode.weight <= mode.weight_full + TOL);
    }
    assert!((modes[0].s_sum - c(1.0, 0.0)).norm() < TOL);
}
