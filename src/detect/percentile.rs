use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigError;
use crate::detect::{DetectorKind, Flag};
use crate::stats;

/// Whether the cutoff is computed over raw values or their magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Only unusually high values are spikes.
    #[default]
    Raw,
    /// Unusually large values of either sign are spikes.
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PercentileConfig {
    /// Cutoff percentile on the 0..=100 scale.
    pub percentile: f64,
    pub polarity: Polarity,
}

impl Default for PercentileConfig {
    fn default() -> Self {
        Self {
            percentile: 95.0,
            polarity: Polarity::Raw,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PercentileDetector {
    percentile: f64,
    polarity: Polarity,
}

impl PercentileDetector {
    pub fn new(config: PercentileConfig) -> Result<Self, ConfigError> {
        if !(0.0..=100.0).contains(&config.percentile) {
            return Err(ConfigError::OutOfRange {
                field: "percentile.percentile",
                expected: "within [0, 100]",
                value: config.percentile,
            });
        }
        Ok(Self {
            percentile: config.percentile,
            polarity: config.polarity,
        })
    }

    pub fn detect(&self, values: &[f64]) -> Vec<Flag> {
        let magnitudes: Vec<f64> = match self.polarity {
            Polarity::Raw => values.to_vec(),
            Polarity::Absolute => values.iter().map(|v| v.abs()).collect(),
        };
        let (Some(cutoff), Some(center)) = (
            stats::percentile(&magnitudes, self.percentile),
            stats::median(&magnitudes),
        ) else {
            return Vec::new();
        };
        // Cutoff on the median collapses the spread; floor it at rounding noise
        let spread = (cutoff - center).max(f64::EPSILON * cutoff.abs().max(1.0));

        let flags: Vec<Flag> = magnitudes
            .iter()
            .enumerate()
            .filter(|(_, &m)| m > cutoff)
            .map(|(index, &m)| Flag {
                index,
                score: m - cutoff,
                threshold: spread,
                method: DetectorKind::Percentile,
            })
            .collect();

        debug!(points = values.len(), cutoff, flagged = flags.len(), "percentile scan");
        flags
    }
}
