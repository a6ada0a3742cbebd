use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{require_positive, ConfigError};
use crate::detect::{DetectorKind, Flag};
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovingAverageConfig {
    /// Number of trailing points in the moving average.
    pub window: usize,
    /// Allowed deviation, in standard deviations of the trailing window.
    pub threshold: f64,
}

impl Default for MovingAverageConfig {
    fn default() -> Self {
        Self {
            window: 5,
            threshold: 2.0,
        }
    }
}

/// Deviation from a trailing moving average.
#[derive(Debug, Clone)]
pub struct MovingAverageDetector {
    window: usize,
    threshold: f64,
}

impl MovingAverageDetector {
    pub fn new(config: MovingAverageConfig) -> Result<Self, ConfigError> {
        if config.window == 0 {
            return Err(ConfigError::OutOfRange {
                field: "moving_average.window",
                expected: "at least 1",
                value: 0.0,
            });
        }
        require_positive("moving_average.threshold", config.threshold)?;
        Ok(Self {
            window: config.window,
            threshold: config.threshold,
        })
    }

    pub fn detect(&self, values: &[f64]) -> Vec<Flag> {
        let k = self.window;
        let mut flags = Vec::new();

        for i in k..values.len() {
            let trailing = &values[i - k..i];
            let Some((mean, std)) = stats::mean_std(trailing) else {
                continue;
            };
            // A flat trailing window has no defined deviation
            let Ok(z) = stats::standard_score(values[i], mean, std) else {
                continue;
            };
            if z.abs() > self.threshold {
                flags.push(Flag {
                    index: i,
                    score: z.abs(),
                    threshold: self.threshold,
                    method: DetectorKind::MovingAverage,
                });
            }
        }

        debug!(points = values.len(), window = k, flagged = flags.len(), "moving-average scan");
        flags
    }
}
