//! Robust statistics primitives shared by every detector.
//!
//! Everything here is a pure function over a slice. Degenerate inputs (empty
//! slices, flat series) come back as `None` or [`StatsError::Undefined`] so the
//! detectors can turn them into "no anomaly" instead of failing.

use statrs::distribution::{ContinuousCDF, StudentsT};
use thiserror::Error;

/// Consistency constant that makes the MAD estimate the standard deviation
/// of normally distributed data.
pub const MAD_SCALE: f64 = 1.4826;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StatsError {
    #[error("statistic undefined: {0}")]
    Undefined(&'static str),
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    v
}

fn median_of_sorted(sorted: &[f64]) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Order-statistic median. Even counts average the two central values.
pub fn median(values: &[f64]) -> Option<f64> {
    median_of_sorted(&sorted(values))
}

/// Median absolute deviation, scaled by [`MAD_SCALE`].
pub fn mad(values: &[f64]) -> Option<f64> {
    let center = median(values)?;
    let deviations: Vec<f64> = values.iter().map(|&x| (x - center).abs()).collect();
    median(&deviations).map(|m| m * MAD_SCALE)
}

/// Mean and population standard deviation.
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let sum_sq_diff: f64 = values.iter().map(|&x| (x - mean).powi(2)).sum();
    Some((mean, (sum_sq_diff / n).sqrt()))
}

/// Z = (x - mean) / stddev. A flat series has no defined score.
pub fn standard_score(x: f64, mean: f64, stddev: f64) -> Result<f64, StatsError> {
    if stddev == 0.0 || !stddev.is_finite() {
        return Err(StatsError::Undefined("standard deviation is zero"));
    }
    Ok((x - mean) / stddev)
}

/// Percentile with linear interpolation between closest ranks.
/// `pct` is on the 0..=100 scale.
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=100.0).contains(&pct) {
        return None;
    }
    let sorted = sorted(values);
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Critical value λ for iteration `i` (1-based) of a generalized ESD test on a
/// sample of `n` points.
///
/// With `m = n - i + 1` points still in play:
/// `λ = (m - 1) t / sqrt((m - 2 + t²) m)` where `t` is the Student-t quantile
/// at `1 - alpha / 2m` with `m - 2` degrees of freedom.
pub fn esd_critical_value(n: usize, i: usize, alpha: f64) -> Result<f64, StatsError> {
    if i == 0 || i > n {
        return Err(StatsError::Undefined("ESD iteration out of range"));
    }
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(StatsError::Undefined("ESD alpha outside (0, 1)"));
    }
    let m = (n - i + 1) as f64;
    if m < 3.0 {
        return Err(StatsError::Undefined("ESD needs at least 3 points"));
    }
    let df = m - 2.0;
    let dist = StudentsT::new(0.0, 1.0, df)
        .map_err(|_| StatsError::Undefined("invalid Student-t parameters"))?;
    let t = dist.inverse_cdf(1.0 - alpha / (2.0 * m));
    Ok((m - 1.0) * t / ((df + t * t) * m).sqrt())
}
