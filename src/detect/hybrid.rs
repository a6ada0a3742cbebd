//! Primary + secondary detector merge.
//!
//! The primary method decides what is a spike. The secondary only adds points
//! the primary missed entirely, at a reduced score, and never reports a second
//! copy of an event the primary already found next door.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigError;
use crate::detect::{DetectorStrategy, Flag};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridConfig {
    /// Secondary flags within this many indices of a primary flag are dropped.
    pub proximity: usize,
    /// Multiplier applied to scores of secondary-only flags.
    pub secondary_weight: f64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            proximity: 1,
            secondary_weight: 0.8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HybridCombiner {
    primary: DetectorStrategy,
    secondary: DetectorStrategy,
    proximity: usize,
    secondary_weight: f64,
}

impl HybridCombiner {
    pub fn new(
        primary: DetectorStrategy,
        secondary: DetectorStrategy,
        config: HybridConfig,
    ) -> Result<Self, ConfigError> {
        if !(config.secondary_weight > 0.0 && config.secondary_weight <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "hybrid.secondary_weight",
                expected: "within (0, 1]",
                value: config.secondary_weight,
            });
        }
        Ok(Self {
            primary,
            secondary,
            proximity: config.proximity,
            secondary_weight: config.secondary_weight,
        })
    }

    pub fn primary(&self) -> &DetectorStrategy {
        &self.primary
    }

    pub fn secondary(&self) -> &DetectorStrategy {
        &self.secondary
    }

    /// Run both detectors over `values` and merge, highest score first.
    pub fn detect(&self, values: &[f64]) -> Vec<Flag> {
        let primary = self.primary.detect(values);
        let secondary = self.secondary.detect(values);
        self.merge(primary, secondary)
    }

    /// Merge already-computed primary and secondary flags.
    pub fn merge(&self, primary: Vec<Flag>, secondary: Vec<Flag>) -> Vec<Flag> {
        let claimed: BTreeSet<usize> = primary.iter().map(|f| f.index).collect();
        let primary_count = primary.len();
        let mut merged = primary;

        for flag in secondary {
            let lo = flag.index.saturating_sub(self.proximity);
            let hi = flag.index.saturating_add(self.proximity);
            if claimed.range(lo..=hi).next().is_some() {
                continue;
            }
            merged.push(Flag {
                score: flag.score * self.secondary_weight,
                ..flag
            });
        }

        debug!(
            primary = primary_count,
            added = merged.len() - primary_count,
            "hybrid merge"
        );

        merged.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
        merged
    }
}
