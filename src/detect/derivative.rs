use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{require_positive, ConfigError};
use crate::detect::{DetectorKind, Flag};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivativeConfig {
    /// Smallest step between consecutive points that counts as a spike.
    pub sensitivity: f64,
}

impl Default for DerivativeConfig {
    fn default() -> Self {
        Self { sensitivity: 0.1 }
    }
}

/// First-difference thresholding.
#[derive(Debug, Clone)]
pub struct DerivativeDetector {
    sensitivity: f64,
}

impl DerivativeDetector {
    pub fn new(config: DerivativeConfig) -> Result<Self, ConfigError> {
        require_positive("derivative.sensitivity", config.sensitivity)?;
        Ok(Self {
            sensitivity: config.sensitivity,
        })
    }

    pub fn detect(&self, values: &[f64]) -> Vec<Flag> {
        let flags: Vec<Flag> = values
            .windows(2)
            .enumerate()
            .filter_map(|(i, pair)| {
                let diff = (pair[1] - pair[0]).abs();
                (diff > self.sensitivity).then_some(Flag {
                    index: i + 1,
                    score: diff,
                    threshold: self.sensitivity,
                    method: DetectorKind::Derivative,
                })
            })
            .collect();

        debug!(points = values.len(), flagged = flags.len(), "derivative scan");
        flags
    }
}
