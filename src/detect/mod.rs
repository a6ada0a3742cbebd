//! Spike detectors and the pipeline that runs them over a window snapshot.

pub mod derivative;
pub mod hybrid;
pub mod moving_average;
pub mod percentile;
pub mod seasonal_esd;
pub mod zscore;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, DetectionConfig};

pub use self::derivative::{DerivativeConfig, DerivativeDetector};
pub use self::hybrid::{HybridCombiner, HybridConfig};
pub use self::moving_average::{MovingAverageConfig, MovingAverageDetector};
pub use self::percentile::{PercentileConfig, PercentileDetector, Polarity};
pub use self::seasonal_esd::{SeasonalEsdConfig, SeasonalEsdDetector};
pub use self::zscore::{ZScoreConfig, ZScoreDetector};

/// Identifies which method produced a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    ZScore,
    MovingAverage,
    Percentile,
    Derivative,
    SeasonalHybridEsd,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 5] = [
        DetectorKind::ZScore,
        DetectorKind::MovingAverage,
        DetectorKind::Percentile,
        DetectorKind::Derivative,
        DetectorKind::SeasonalHybridEsd,
    ];
}

impl std::fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorKind::ZScore => write!(f, "z_score"),
            DetectorKind::MovingAverage => write!(f, "moving_average"),
            DetectorKind::Percentile => write!(f, "percentile"),
            DetectorKind::Derivative => write!(f, "derivative"),
            DetectorKind::SeasonalHybridEsd => write!(f, "seasonal_hybrid_esd"),
        }
    }
}

/// Severity levels for detected spikes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Bucket a score by how far it exceeds the threshold it was tested
    /// against.
    pub fn from_score(score: f64, threshold: f64) -> Self {
        if threshold <= 0.0 || !threshold.is_finite() {
            return Severity::High;
        }
        let ratio = score / threshold;
        if ratio >= 2.5 {
            Severity::High
        } else if ratio >= 1.5 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// A flagged index in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Flag {
    pub index: usize,
    pub score: f64,
    /// The critical level `score` was compared against, in the same units.
    pub threshold: f64,
    pub method: DetectorKind,
}

impl Flag {
    pub fn severity(&self) -> Severity {
        Severity::from_score(self.score, self.threshold)
    }
}

/// One of the five detection methods, carrying its validated configuration.
#[derive(Debug, Clone)]
pub enum DetectorStrategy {
    ZScore(ZScoreDetector),
    MovingAverage(MovingAverageDetector),
    Percentile(PercentileDetector),
    Derivative(DerivativeDetector),
    SeasonalHybridEsd(SeasonalEsdDetector),
}

impl DetectorStrategy {
    /// Build the detector for `kind` from its section of `config`.
    pub fn new(kind: DetectorKind, config: &DetectionConfig) -> Result<Self, ConfigError> {
        Ok(match kind {
            DetectorKind::ZScore => Self::ZScore(ZScoreDetector::new(config.z_score)?),
            DetectorKind::MovingAverage => {
                Self::MovingAverage(MovingAverageDetector::new(config.moving_average)?)
            }
            DetectorKind::Percentile => Self::Percentile(PercentileDetector::new(config.percentile)?),
            DetectorKind::Derivative => Self::Derivative(DerivativeDetector::new(config.derivative)?),
            DetectorKind::SeasonalHybridEsd => {
                Self::SeasonalHybridEsd(SeasonalEsdDetector::new(config.seasonal_hybrid_esd)?)
            }
        })
    }

    pub fn kind(&self) -> DetectorKind {
        match self {
            Self::ZScore(_) => DetectorKind::ZScore,
            Self::MovingAverage(_) => DetectorKind::MovingAverage,
            Self::Percentile(_) => DetectorKind::Percentile,
            Self::Derivative(_) => DetectorKind::Derivative,
            Self::SeasonalHybridEsd(_) => DetectorKind::SeasonalHybridEsd,
        }
    }

    /// Flag anomalous indices in `values`, ordered by index.
    ///
    /// Fewer than two points, or a series with no variation, yields nothing.
    pub fn detect(&self, values: &[f64]) -> Vec<Flag> {
        if values.len() < 2 || is_flat(values) {
            return Vec::new();
        }
        match self {
            Self::ZScore(d) => d.detect(values),
            Self::MovingAverage(d) => d.detect(values),
            Self::Percentile(d) => d.detect(values),
            Self::Derivative(d) => d.detect(values),
            Self::SeasonalHybridEsd(d) => d.detect(values),
        }
    }
}

fn is_flat(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] == w[1])
}

/// What the engine runs on every trigger: one detector, or a primary and
/// secondary pair merged by [`HybridCombiner`].
#[derive(Debug, Clone)]
pub enum DetectionPipeline {
    Single(DetectorStrategy),
    Hybrid(HybridCombiner),
}

impl DetectionPipeline {
    pub fn from_config(config: &DetectionConfig) -> Result<Self, ConfigError> {
        let primary = DetectorStrategy::new(config.method, config)?;
        Ok(match config.secondary {
            Some(kind) => {
                let secondary = DetectorStrategy::new(kind, config)?;
                Self::Hybrid(HybridCombiner::new(primary, secondary, config.hybrid)?)
            }
            None => Self::Single(primary),
        })
    }

    pub fn detect(&self, values: &[f64]) -> Vec<Flag> {
        match self {
            Self::Single(d) => d.detect(values),
            Self::Hybrid(h) => h.detect(values),
        }
    }

    /// Like [`DetectionPipeline::detect`], also returning how long each
    /// method took. A hybrid pipeline times primary and secondary separately.
    pub fn detect_timed(&self, values: &[f64]) -> (Vec<Flag>, Vec<(DetectorKind, Duration)>) {
        match self {
            Self::Single(d) => {
                let (flags, elapsed) = timed(d, values);
                (flags, vec![(d.kind(), elapsed)])
            }
            Self::Hybrid(h) => {
                let (primary, primary_elapsed) = timed(h.primary(), values);
                let (secondary, secondary_elapsed) = timed(h.secondary(), values);
                let timings = vec![
                    (h.primary().kind(), primary_elapsed),
                    (h.secondary().kind(), secondary_elapsed),
                ];
                (h.merge(primary, secondary), timings)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Single(d) => d.kind().to_string(),
            Self::Hybrid(h) => format!("{}+{}", h.primary().kind(), h.secondary().kind()),
        }
    }
}

fn timed(detector: &DetectorStrategy, values: &[f64]) -> (Vec<Flag>, Duration) {
    let start = Instant::now();
    let flags = detector.detect(values);
    (flags, start.elapsed())
}
