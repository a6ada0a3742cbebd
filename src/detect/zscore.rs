use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{require_positive, ConfigError};
use crate::detect::{DetectorKind, Flag};
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZScoreConfig {
    /// Flag points whose |z| exceeds this many standard deviations.
    pub threshold: f64,
}

impl Default for ZScoreConfig {
    fn default() -> Self {
        Self { threshold: 2.0 }
    }
}

/// Global mean/stddev thresholding.
#[derive(Debug, Clone)]
pub struct ZScoreDetector {
    threshold: f64,
}

impl ZScoreDetector {
    pub fn new(config: ZScoreConfig) -> Result<Self, ConfigError> {
        require_positive("z_score.threshold", config.threshold)?;
        Ok(Self {
            threshold: config.threshold,
        })
    }

    pub fn detect(&self, values: &[f64]) -> Vec<Flag> {
        let Some((mean, std)) = stats::mean_std(values) else {
            return Vec::new();
        };

        let mut flags = Vec::new();
        for (index, &value) in values.iter().enumerate() {
            // Flat series: nothing is anomalous
            let Ok(z) = stats::standard_score(value, mean, std) else {
                return Vec::new();
            };
            if z.abs() > self.threshold {
                flags.push(Flag {
                    index,
                    score: z.abs(),
                    threshold: self.threshold,
                    method: DetectorKind::ZScore,
                });
            }
        }

        debug!(points = values.len(), flagged = flags.len(), mean, std, "z-score scan");
        flags
    }
}
