//! Q-sweep orchestration: correlations and weights for every Q-point of a job.

use std::time::Instant;

use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use crate::{
    config::MagdynOptions,
    correlation::{CorrelationError, Correlations, Diagnostic, EnergyAndWeight, compute_correlations},
    hamiltonian::{EigenMode, HamiltonianBundle},
    intensity::apply_weights,
    metrics::{MetricsEvent, MetricsRecorder},
    site::MagneticSite,
};

/// Externally computed Hamiltonian and eigenpairs at one Q-point (r.l.u.).
#[derive(Debug, Clone)]
pub struct QPointInput {
    pub q: [f64; 3],
    pub hamiltonian: HamiltonianBundle,
    pub modes: Vec<EigenMode>,
}

#[derive(Debug, Clone)]
pub struct SpectrumJob {
    pub sites: Vec<MagneticSite>,
    pub options: MagdynOptions,
    pub q_points: Vec<QPointInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QPointSpectrum {
    pub q: [f64; 3],
    pub distance: f64,
    pub modes: Vec<EnergyAndWeight>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrumResult {
    pub q_points: Vec<[f64; 3]>,
    /// Cumulative path length, in Å⁻¹ when a lattice is configured.
    pub distances: Vec<f64>,
    pub points: Vec<QPointSpectrum>,
}

impl SpectrumResult {
    /// Number of Q-points that recorded at least one diagnostic.
    pub fn degraded_count(&self) -> usize {
        self.points
            .iter()
            .filter(|point| !point.diagnostics.is_empty())
            .count()
    }
}

#[derive(Debug, Error)]
pub enum SpectrumError {
    #[error("failed to create thread pool: {0}")]
    ThreadPool(String),

    #[error("Q-point #{index} ({h}, {k}, {l}): {source}")]
    Correlation {
        index: usize,
        h: f64,
        k: f64,
        l: f64,
        #[source]
        source: CorrelationError,
    },
}

/// Correlations with Bose factor, form factor and projector applied.
pub fn solve_point(
    sites: &[MagneticSite],
    options: &MagdynOptions,
    input: &QPointInput,
) -> Result<Correlations, CorrelationError> {
    let q = Vector3::from(input.q);
    let mut correlations = compute_correlations(sites, &input.hamiltonian, &q, &input.modes, options)?;
    apply_weights(&q, &mut correlations.modes, options);
    Ok(correlations)
}

pub fn run(job: &SpectrumJob) -> Result<SpectrumResult, SpectrumError> {
    run_with_metrics(job, None)
}

pub fn run_with_metrics(
    job: &SpectrumJob,
    metrics: Option<&MetricsRecorder>,
) -> Result<SpectrumResult, SpectrumError> {
    let pipeline_start = Instant::now();
    announce(job, 1, metrics);
    let q_points = q_list(job);
    let distances = accumulate_distances(&q_points, &job.options.reciprocal_matrix);

    let points = job
        .q_points
        .iter()
        .enumerate()
        .map(|(idx, input)| solve_indexed(job, idx, input, distances[idx], metrics))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(finish(job, q_points, distances, points, pipeline_start, metrics))
}

/// Same as [`run_with_metrics`] but distributes Q-points over a rayon pool.
///
/// `threads = None` lets rayon pick the thread count. Results keep the input
/// order.
pub fn run_parallel(
    job: &SpectrumJob,
    threads: Option<usize>,
    metrics: Option<&MetricsRecorder>,
) -> Result<SpectrumResult, SpectrumError> {
    let pipeline_start = Instant::now();
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    let pool = builder
        .build()
        .map_err(|e| SpectrumError::ThreadPool(e.to_string()))?;

    announce(job, pool.current_num_threads(), metrics);
    let q_points = q_list(job);
    let distances = accumulate_distances(&q_points, &job.options.reciprocal_matrix);

    let points = pool.install(|| {
        job.q_points
            .par_iter()
            .enumerate()
            .map(|(idx, input)| solve_indexed(job, idx, input, distances[idx], metrics))
            .collect::<Result<Vec<_>, _>>()
    })?;

    Ok(finish(job, q_points, distances, points, pipeline_start, metrics))
}

fn q_list(job: &SpectrumJob) -> Vec<[f64; 3]> {
    job.q_points.iter().map(|input| input.q).collect()
}

fn announce(job: &SpectrumJob, threads: usize, metrics: Option<&MetricsRecorder>) {
    let form_factor = job.options.form_factor.as_ref().map(|ff| ff.formula());
    log::info!(
        "[setup] sites={} q_points={} threads={} temperature={} form_factor={}",
        job.sites.len(),
        job.q_points.len(),
        threads,
        job.options.temperature,
        form_factor.unwrap_or("none"),
    );
    if let Some(recorder) = metrics {
        recorder.emit(MetricsEvent::PipelineStart {
            sites: job.sites.len(),
            q_points: job.q_points.len(),
            temperature: job.options.temperature,
            form_factor,
            threads,
        });
    }
}

fn solve_indexed(
    job: &SpectrumJob,
    idx: usize,
    input: &QPointInput,
    distance: f64,
    metrics: Option<&MetricsRecorder>,
) -> Result<QPointSpectrum, SpectrumError> {
    let [h, k, l] = input.q;
    let timer = Instant::now();
    let correlations = solve_point(&job.sites, &job.options, input).map_err(|source| {
        log::error!("[solve] q#{idx:03} failed: {source}");
        SpectrumError::Correlation {
            index: idx,
            h,
            k,
            l,
            source,
        }
    })?;
    let elapsed = timer.elapsed();

    let energies: Vec<f64> = correlations.modes.iter().map(|mode| mode.energy).collect();
    log::debug!(
        "[solve] q#{idx:03} q=({h:+.3},{k:+.3},{l:+.3}) modes={} {} diagnostics={} elapsed={elapsed:.2?}",
        correlations.modes.len(),
        format_energy_summary(&energies),
        correlations.diagnostics.len(),
    );
    if let Some(recorder) = metrics {
        recorder.emit(MetricsEvent::QPointSolve {
            q_index: idx,
            h,
            k,
            l,
            distance,
            modes: correlations.modes.len(),
            diagnostics: correlations.diagnostics.len(),
            duration_ms: elapsed.as_secs_f64() * 1000.0,
        });
    }

    Ok(QPointSpectrum {
        q: input.q,
        distance,
        modes: correlations.modes,
        diagnostics: correlations.diagnostics,
    })
}

fn finish(
    job: &SpectrumJob,
    q_points: Vec<[f64; 3]>,
    distances: Vec<f64>,
    points: Vec<QPointSpectrum>,
    pipeline_start: Instant,
    metrics: Option<&MetricsRecorder>,
) -> SpectrumResult {
    let result = SpectrumResult {
        q_points,
        distances,
        points,
    };
    let degraded = result.degraded_count();
    if degraded > 0 {
        log::warn!(
            "{degraded} of {} Q-points finished with diagnostics",
            job.q_points.len()
        );
    }
    log::info!(
        "[done] solved {} Q-points in {:.2?}",
        job.q_points.len(),
        pipeline_start.elapsed()
    );
    if let Some(recorder) = metrics {
        recorder.emit(MetricsEvent::PipelineDone {
            total_q: job.q_points.len(),
            degraded_q: degraded,
            duration_ms: pipeline_start.elapsed().as_secs_f64() * 1000.0,
        });
    }
    result
}

fn format_energy_summary(values: &[f64]) -> String {
    let formatted: Vec<String> = values
        .iter()
        .map(|&value| {
            let abs = value.abs();
            if abs == 0.0 || (1e-3..=1e2).contains(&abs) {
                format!("{value:+.3}")
            } else {
                format!("{value:+.2e}")
            }
        })
        .collect();
    format!("energies=[{}]", formatted.join(" "))
}

/// Cumulative distance along the Q-path, measured with `reciprocal`.
pub(crate) fn accumulate_distances(q_points: &[[f64; 3]], reciprocal: &Matrix3<f64>) -> Vec<f64> {
    if q_points.is_empty() {
        return Vec::new();
    }
    let mut distances = Vec::with_capacity(q_points.len());
    let mut total = 0.0;
    distances.push(0.0);
    for pair in q_points.windows(2) {
        let step = Vector3::from(pair[1]) - Vector3::from(pair[0]);
        total += (reciprocal * step).norm();
        distances.push(total);
    }
    distances
}
