//! Synthetic accuracy benchmark for the detection methods.
//!
//! A seeded series with a slow trend, a sinusoid, Gaussian noise and a known
//! set of injected spikes is run through every method and through the
//! configured pipeline. Detections are matched against the injected indices
//! with a small tolerance.

use std::collections::BTreeSet;
use std::f64::consts::PI;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{ConfigError, DetectionConfig};
use crate::detect::{DetectionPipeline, DetectorKind, DetectorStrategy, Flag};

/// Index tolerance used when matching detections to injected spikes.
pub const DEFAULT_TOLERANCE: usize = 5;

const NOISE_SIGMA: f64 = 0.05;
const SEASON_AMPLITUDE: f64 = 0.1;
const SEASON_PERIOD: f64 = 100.0;
const EDGE_MARGIN: usize = 100;

/// A generated series and the indices of its injected spikes.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSeries {
    pub values: Vec<f64>,
    pub spikes: Vec<usize>,
}

/// Generate `n` points with up to `spikes` distinct injected spikes.
///
/// Spikes land at least 100 points from either end (a quarter of the series
/// for short ones) and add 0.3..0.5 before clipping to [0, 1].
pub fn synthetic_series(n: usize, spikes: usize, seed: u64) -> SyntheticSeries {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut values: Vec<f64> = (0..n)
        .map(|i| {
            let trend = if n > 1 {
                0.5 + 0.1 * i as f64 / (n - 1) as f64
            } else {
                0.5
            };
            let season = SEASON_AMPLITUDE * (2.0 * PI * i as f64 / SEASON_PERIOD).sin();
            trend + season + NOISE_SIGMA * gaussian(&mut rng)
        })
        .collect();

    let margin = EDGE_MARGIN.min(n / 4);
    let span = n.saturating_sub(2 * margin);
    let mut chosen = BTreeSet::new();
    while chosen.len() < spikes.min(span) {
        chosen.insert(rng.gen_range(margin..margin + span));
    }
    for &idx in &chosen {
        values[idx] += rng.gen_range(0.3..0.5);
    }

    for v in &mut values {
        *v = v.clamp(0.0, 1.0);
    }

    SyntheticSeries {
        values,
        spikes: chosen.into_iter().collect(),
    }
}

// Box-Muller; 1 - u keeps the log argument in (0, 1].
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Accuracy of one detection run against the injected spikes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Share of detections that matched no injected spike.
    pub false_positive_rate: f64,
}

/// Match `detected` against `truth`, each injected spike claiming at most one
/// detection within `tolerance` indices (the nearest unclaimed one).
pub fn evaluate(truth: &[usize], detected: &[usize], tolerance: usize) -> Evaluation {
    let mut unclaimed: BTreeSet<usize> = detected.iter().copied().collect();
    let detected_count = unclaimed.len();
    let mut true_positives = 0;

    for &t in truth.iter().collect::<BTreeSet<_>>() {
        let lo = t.saturating_sub(tolerance);
        let hi = t.saturating_add(tolerance);
        let nearest = unclaimed
            .range(lo..=hi)
            .copied()
            .min_by_key(|&d| (d.abs_diff(t), d));
        if let Some(d) = nearest {
            unclaimed.remove(&d);
            true_positives += 1;
        }
    }

    let truth_count = truth.iter().collect::<BTreeSet<_>>().len();
    let false_positives = unclaimed.len();
    let false_negatives = truth_count - true_positives;

    let ratio = |num: usize, den: usize| if den > 0 { num as f64 / den as f64 } else { 0.0 };
    let precision = ratio(true_positives, detected_count);
    let recall = ratio(true_positives, truth_count);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    Evaluation {
        true_positives,
        false_positives,
        false_negatives,
        precision,
        recall,
        f1,
        false_positive_rate: ratio(false_positives, detected_count),
    }
}

/// One row of a benchmark report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodResult {
    /// Method name, or the pipeline description for the combined row.
    pub method: String,
    pub detected: usize,
    pub evaluation: Evaluation,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkReport {
    pub points: usize,
    pub injected: usize,
    pub seed: u64,
    pub tolerance: usize,
    pub results: Vec<MethodResult>,
}

/// Run every method, then the configured pipeline, over one synthetic series.
pub fn run(
    config: &DetectionConfig,
    points: usize,
    spikes: usize,
    seed: u64,
) -> Result<BenchmarkReport, ConfigError> {
    let series = synthetic_series(points, spikes, seed);
    info!(
        points,
        injected = series.spikes.len(),
        seed,
        "running spike benchmark"
    );

    let mut results = Vec::with_capacity(DetectorKind::ALL.len() + 1);
    for kind in DetectorKind::ALL {
        let detector = DetectorStrategy::new(kind, config)?;
        results.push(measure(kind.to_string(), &series, |v| detector.detect(v)));
    }

    let pipeline = DetectionPipeline::from_config(config)?;
    if matches!(pipeline, DetectionPipeline::Hybrid(_)) {
        results.push(measure(pipeline.describe(), &series, |v| pipeline.detect(v)));
    }

    Ok(BenchmarkReport {
        points,
        injected: series.spikes.len(),
        seed,
        tolerance: DEFAULT_TOLERANCE,
        results,
    })
}

fn measure<F>(method: String, series: &SyntheticSeries, detect: F) -> MethodResult
where
    F: Fn(&[f64]) -> Vec<Flag>,
{
    let start = Instant::now();
    let flags = detect(&series.values);
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    let indices: Vec<usize> = flags.iter().map(|f| f.index).collect();
    let evaluation = evaluate(&series.spikes, &indices, DEFAULT_TOLERANCE);
    debug!(
        %method,
        detected = indices.len(),
        precision = evaluation.precision,
        recall = evaluation.recall,
        elapsed_ms,
        "benchmark method complete"
    );

    MethodResult {
        method,
        detected: indices.len(),
        evaluation,
        elapsed_ms,
    }
}
