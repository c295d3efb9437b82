#![cfg(test)]

use nalgebra::{DMatrix, DVector, Matrix3};
use num_complex::Complex64;

use super::config::{MagdynConfig, MagdynOptions};
use super::correlation::CorrelationError;
use super::hamiltonian::{EigenMode, HamiltonianBundle};
use super::lattice::Lattice3D;
use super::metrics::{MetricsConfig, MetricsFormat};
use super::site::MagneticSite;
use super::spectrum::{
    QPointInput, SpectrumError, SpectrumJob, accumulate_distances, run, run_parallel,
    run_with_metrics,
};

fn c(re: f64) -> Complex64 {
    Complex64::new(re, 0.0)
}

/// One-site ferromagnet with dispersion `1 + h²`.
fn ferromagnet_point(h: f64) -> QPointInput {
    let energy = 1.0 + h * h;
    let bundle = HamiltonianBundle::with_standard_signs(
        DMatrix::from_diagonal(&DVector::from_vec(vec![c(energy), c(-energy)])),
        DMatrix::from_diagonal_element(2, 2, c(energy.sqrt())),
    )
    .unwrap();
    QPointInput {
        q: [h, 0.0, 0.0],
        hamiltonian: bundle,
        modes: vec![
            EigenMode::new(energy, DVector::from_vec(vec![c(1.0), c(0.0)])),
            EigenMode::new(-energy, DVector::from_vec(vec![c(0.0), c(1.0)])),
        ],
    }
}

fn ferromagnet_job(n_points: usize, options: MagdynOptions) -> SpectrumJob {
    SpectrumJob {
        sites: vec![MagneticSite::from_spin_direction(
            "Fe",
            [0.0; 3],
            1.0,
            [0.0, 0.0, 1.0],
        )],
        options,
        q_points: (0..n_points)
            .map(|i| ferromagnet_point(i as f64 / n_points as f64))
            .collect(),
    }
}

#[test]
fn sweep_reports_every_q_point_in_order() {
    let job = ferromagnet_job(5, MagdynOptions::default());
    let result = run(&job).unwrap();
    assert_eq!(result.points.len(), 5);
    assert_eq!(result.q_points.len(), 5);
    for (idx, point) in result.points.iter().enumerate() {
        let h = idx as f64 / 5.0;
        assert_eq!(point.q, [h, 0.0, 0.0]);
        assert_eq!(point.modes.len(), 2);
        assert!((point.modes[0].energy - (1.0 + h * h)).abs() < 1e-12);
        assert!(point.modes[0].energy > point.modes[1].energy);
        assert_eq!(point.distance, result.distances[idx]);
    }
    assert_eq!(result.degraded_count(), 0);
}

#[test]
fn parallel_sweep_matches_sequential() {
    let job = ferromagnet_job(16, MagdynOptions::default());
    let sequential = run(&job).unwrap();
    let parallel = run_parallel(&job, Some(3), None).unwrap();
    assert_eq!(sequential, parallel);
    let default_pool = run_parallel(&job, None, None).unwrap();
    assert_eq!(sequential, default_pool);
}

#[test]
fn distances_use_reciprocal_metric() {
    let path = [[0.0, 0.0, 0.0], [0.5, 0.0, 0.0], [0.5, 0.5, 0.0]];
    let flat = accumulate_distances(&path, &Matrix3::identity());
    assert_eq!(flat, vec![0.0, 0.5, 1.0]);

    let lattice = Lattice3D::tetragonal(2.0, 5.0);
    let scaled = accumulate_distances(&path, &lattice.reciprocal_matrix().unwrap());
    let step = std::f64::consts::PI / 2.0;
    assert!((scaled[1] - step).abs() < 1e-12);
    assert!((scaled[2] - 2.0 * step).abs() < 1e-12);

    assert!(accumulate_distances(&[], &Matrix3::identity()).is_empty());
}

#[test]
fn failing_q_point_names_its_index() {
    let mut job = ferromagnet_job(3, MagdynOptions::default());
    job.q_points[1].modes.pop();
    let err = run(&job).unwrap_err();
    match err {
        SpectrumError::Correlation { index, source, .. } => {
            assert_eq!(index, 1);
            assert_eq!(
                source,
                CorrelationError::ModeCount {
                    expected: 2,
                    found: 1
                }
            );
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(matches!(
        run_parallel(&job, Some(2), None),
        Err(SpectrumError::Correlation { index: 1, .. })
    ));
}

#[test]
fn degraded_points_are_kept_with_diagnostics() {
    let mut job = ferromagnet_job(2, MagdynOptions::default());
    job.q_points[0].hamiltonian.chol = DMatrix::zeros(2, 2);
    let result = run(&job).unwrap();
    assert_eq!(result.points.len(), 2);
    assert_eq!(result.degraded_count(), 1);
    assert!(!result.points[0].diagnostics.is_empty());
    assert!(result.points[1].diagnostics.is_empty());
}

#[test]
fn thermal_options_flow_through_the_sweep() {
    let options = MagdynOptions::from_config(&MagdynConfig {
        temperature: 0.0,
        ..MagdynConfig::default()
    })
    .unwrap();
    let result = run(&ferromagnet_job(3, options)).unwrap();
    for point in &result.points {
        assert!(point.modes[0].weight_full > 0.0);
        assert_eq!(point.modes[1].weight_full, 0.0);
    }
}

#[test]
fn metrics_record_one_line_per_stage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sweep.jsonl");
    let recorder = MetricsConfig {
        enabled: true,
        output: Some(path.clone()),
        format: MetricsFormat::JsonLines,
    }
    .build_recorder()
    .unwrap()
    .unwrap();

    let job = ferromagnet_job(4, MagdynOptions::default());
    run_with_metrics(&job, Some(&recorder)).unwrap();
    run_parallel(&job, Some(2), Some(&recorder)).unwrap();
    drop(recorder);

    let text = std::fs::read_to_string(&path).unwrap();
    let events: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(events.len(), 2 * (4 + 2));
    assert_eq!(events[0]["event"], "pipeline_start");
    assert_eq!(events[0]["threads"], 1);
    assert_eq!(events[1]["event"], "q_point_solve");
    assert_eq!(events[1]["modes"], 2);
    assert_eq!(events[5]["event"], "pipeline_done");
    assert_eq!(events[5]["total_q"], 4);
    let solved = events
        .iter()
        .filter(|event| event["event"] == "q_point_solve")
        .count();
    assert_eq!(solved, 8);
}
