//! Seasonal-hybrid ESD.
//!
//! The series is split into a robust level (rolling median) and a residual.
//! A generalized ESD test then peels off the most extreme residual one at a
//! time, scoring with median/MAD of whatever remains, until the next candidate
//! is no longer significant or the anomaly budget is spent. Working on
//! residuals means a slow drift is absorbed by the level instead of being
//! reported as one long anomaly.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigError;
use crate::detect::{DetectorKind, Flag};
use crate::stats;

/// Default rolling-median period when none is configured.
pub const DEFAULT_PERIOD: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeasonalEsdConfig {
    /// Rolling-median window. `None` uses min(len, 24).
    pub period: Option<usize>,
    /// Significance level of each ESD step.
    pub alpha: f64,
    /// Largest share of the window that may be flagged.
    pub max_anomaly_fraction: f64,
}

impl Default for SeasonalEsdConfig {
    fn default() -> Self {
        Self {
            period: None,
            alpha: 0.05,
            max_anomaly_fraction: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeasonalEsdDetector {
    period: Option<usize>,
    alpha: f64,
    max_anomaly_fraction: f64,
}

impl SeasonalEsdDetector {
    pub fn new(config: SeasonalEsdConfig) -> Result<Self, ConfigError> {
        if config.period == Some(0) {
            return Err(ConfigError::OutOfRange {
                field: "seasonal_hybrid_esd.period",
                expected: "at least 1",
                value: 0.0,
            });
        }
        if !(config.alpha > 0.0 && config.alpha < 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "seasonal_hybrid_esd.alpha",
                expected: "within (0, 1)",
                value: config.alpha,
            });
        }
        if !(config.max_anomaly_fraction > 0.0 && config.max_anomaly_fraction <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "seasonal_hybrid_esd.max_anomaly_fraction",
                expected: "within (0, 1]",
                value: config.max_anomaly_fraction,
            });
        }
        Ok(Self {
            period: config.period,
            alpha: config.alpha,
            max_anomaly_fraction: config.max_anomaly_fraction,
        })
    }

    /// Upper bound on flags for a series of `n` points.
    pub fn max_anomalies(&self, n: usize) -> usize {
        (self.max_anomaly_fraction * n as f64).ceil() as usize
    }

    pub fn detect(&self, values: &[f64]) -> Vec<Flag> {
        let n = values.len();
        if n < 3 {
            return Vec::new();
        }

        let period = self.period.unwrap_or(DEFAULT_PERIOD).min(n);
        let trend = rolling_median(values, period);
        let residuals: Vec<f64> = values.iter().zip(&trend).map(|(v, t)| v - t).collect();

        let budget = self.max_anomalies(n);
        let mut remaining: Vec<usize> = (0..n).collect();
        let mut flags = Vec::new();
        let mut iteration = 1;

        while flags.len() < budget && remaining.len() >= 3 {
            let current: Vec<f64> = remaining.iter().map(|&i| residuals[i]).collect();
            let (Some(center), Some(scale)) = (stats::median(&current), stats::mad(&current)) else {
                break;
            };
            if scale <= 0.0 {
                break;
            }

            // Strict > keeps the lowest index on ties
            let mut best = (0, f64::NEG_INFINITY);
            for (pos, r) in current.iter().enumerate() {
                let score = (r - center).abs() / scale;
                if score > best.1 {
                    best = (pos, score);
                }
            }

            let Ok(critical) = stats::esd_critical_value(n, iteration, self.alpha) else {
                break;
            };
            if best.1 <= critical {
                break;
            }

            let index = remaining.remove(best.0);
            flags.push(Flag {
                index,
                score: best.1,
                threshold: critical,
                method: DetectorKind::SeasonalHybridEsd,
            });
            iteration += 1;
        }

        debug!(
            points = n,
            period,
            iterations = iteration - 1,
            flagged = flags.len(),
            budget,
            "seasonal-hybrid ESD scan"
        );

        flags.sort_by_key(|f| f.index);
        flags
    }
}

/// Median of a `period`-wide window centred on each point, shifted inward at
/// the edges so every window holds exactly `period` points.
fn rolling_median(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let period = period.clamp(1, n.max(1));
    (0..n)
        .map(|i| {
            let end = (i.saturating_sub(period / 2) + period).min(n);
            let start = end - period;
            stats::median(&values[start..end]).unwrap_or(values[i])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy_drift(n: usize) -> Vec<f64> {
        // deterministic pseudo-noise in [-0.03, 0.03] on top of a slow ramp
        (0..n)
            .map(|i| {
                let noise = (((i * 7919) % 61) as f64 / 60.0 - 0.5) * 0.06;
                0.2 + 0.002 * i as f64 + noise
            })
            .collect()
    }

    #[test]
    fn test_rolling_median_edges_keep_full_window() {
        let values: Vec<f64> = (0..10).map(|v| v as f64).collect();
        let trend = rolling_median(&values, 4);
        // first window [0..4) -> 1.5, last window [6..10) -> 7.5
        assert_eq!(trend[0], 1.5);
        assert_eq!(trend[9], 7.5);
        assert_eq!(trend[5], 4.5);
    }

    #[test]
    fn test_finds_spikes_on_drifting_series() {
        let mut values = noisy_drift(200);
        values[60] += 0.5;
        values[140] -= 0.5;
        let detector = SeasonalEsdDetector::new(SeasonalEsdConfig::default()).unwrap();
        let indices: Vec<usize> = detector.detect(&values).iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![60, 140]);
    }

    #[test]
    fn test_drift_alone_is_not_an_anomaly() {
        let values = noisy_drift(200);
        let detector = SeasonalEsdDetector::new(SeasonalEsdConfig::default()).unwrap();
        assert!(detector.detect(&values).is_empty());
    }

    #[test]
    fn test_never_exceeds_anomaly_budget() {
        let detector = SeasonalEsdDetector::new(SeasonalEsdConfig::default()).unwrap();
        for n in [5usize, 17, 50, 123, 400] {
            let mut values = noisy_drift(n);
            // a third of the series is wildly off
            for i in (0..n).step_by(3) {
                values[i] += 10.0 + i as f64;
            }
            let flags = detector.detect(&values);
            assert!(
                flags.len() <= detector.max_anomalies(n),
                "n={} flagged {} > {}",
                n,
                flags.len(),
                detector.max_anomalies(n)
            );
        }
    }

    #[test]
    fn test_deterministic() {
        let mut values = noisy_drift(300);
        values[10] += 1.0;
        values[150] += 0.4;
        values[151] += 0.4;
        let detector = SeasonalEsdDetector::new(SeasonalEsdConfig::default()).unwrap();
        let first = detector.detect(&values);
        let second = detector.detect(&values);
        assert_eq!(first, second);
    }

    #[test]
    fn test_scores_beat_their_critical_values() {
        let mut values = noisy_drift(120);
        values[30] += 0.6;
        let detector = SeasonalEsdDetector::new(SeasonalEsdConfig::default()).unwrap();
        for flag in detector.detect(&values) {
            assert!(flag.score > flag.threshold);
        }
    }

    #[test]
    fn test_zero_mad_residuals_yield_nothing() {
        // Not flat, but every residual except one is exactly zero
        let mut values = vec![0.5; 60];
        values[30] = 0.9;
        let detector = SeasonalEsdDetector::new(SeasonalEsdConfig::default()).unwrap();
        assert!(detector.detect(&values).is_empty());

        let mut tail = vec![0.5; 59];
        tail.push(0.9);
        assert!(detector.detect(&tail).is_empty());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let bad = [
            SeasonalEsdConfig {
                max_anomaly_fraction: 0.0,
                ..Default::default()
            },
            SeasonalEsdConfig {
                max_anomaly_fraction: 1.5,
                ..Default::default()
            },
            SeasonalEsdConfig {
                alpha: 0.0,
                ..Default::default()
            },
            SeasonalEsdConfig {
                period: Some(0),
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(SeasonalEsdDetector::new(config).is_err());
        }
    }
}
