//! TOML configuration for the spike engine.
//!
//! Every section has compiled-in defaults, so an empty file (or no file at
//! all) yields a working engine. Values are validated once at load time and
//! again when an engine is built from them; nothing is clamped.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::detect::{
    DerivativeConfig, DetectionPipeline, DetectorKind, DetectorStrategy, HybridConfig,
    MovingAverageConfig, PercentileConfig, SeasonalEsdConfig, ZScoreConfig,
};
use crate::window::RetentionPolicy;

/// Environment variable naming a config file to load.
pub const CONFIG_ENV: &str = "SPIKEWATCH_CONFIG";

/// System-wide config location, tried after [`CONFIG_ENV`].
pub const SYSTEM_CONFIG_PATH: &str = "/etc/spikewatch/spikewatch.toml";

/// Shortest allowed periodic trigger cadence.
pub const MIN_CADENCE_SECS: u64 = 30;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: f64,
    },
}

/// Reject zero, negative and non-finite values.
pub(crate) fn require_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            expected: "a positive finite number",
            value,
        })
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load and validate configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded engine configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path in the `SPIKEWATCH_CONFIG` environment variable.
    /// 2. `/etc/spikewatch/spikewatch.toml`.
    /// 3. Compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SPIKEWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Check every section, including method sections the pipeline does not
    /// currently select.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window.validate()?;
        self.detection.validate()?;
        self.trigger.validate()?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }
}

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Observations older than this, relative to the newest, are evicted.
    pub time_window_hours: u32,
    /// Hard cap on observations per keyword; 0 means no cap.
    pub max_observations: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            time_window_hours: 24,
            max_observations: 10_000,
        }
    }
}

impl WindowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.time_window_hours == 0 {
            return Err(ConfigError::OutOfRange {
                field: "window.time_window_hours",
                expected: "at least 1",
                value: 0.0,
            });
        }
        Ok(())
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age: Duration::hours(i64::from(self.time_window_hours)),
            max_len: (self.max_observations > 0).then_some(self.max_observations),
        }
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Method selection plus per-method tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Primary method.
    pub method: DetectorKind,
    /// Optional secondary method; when set, results are merged by the
    /// hybrid combiner.
    pub secondary: Option<DetectorKind>,
    pub z_score: ZScoreConfig,
    pub moving_average: MovingAverageConfig,
    pub percentile: PercentileConfig,
    pub derivative: DerivativeConfig,
    pub seasonal_hybrid_esd: SeasonalEsdConfig,
    pub hybrid: HybridConfig,
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in DetectorKind::ALL {
            DetectorStrategy::new(kind, self)?;
        }
        DetectionPipeline::from_config(self)?;
        Ok(())
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            method: DetectorKind::SeasonalHybridEsd,
            secondary: None,
            z_score: ZScoreConfig::default(),
            moving_average: MovingAverageConfig::default(),
            percentile: PercentileConfig::default(),
            derivative: DerivativeConfig::default(),
            seasonal_hybrid_esd: SeasonalEsdConfig::default(),
            hybrid: HybridConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Detection runs when the external scheduler fires.
    #[default]
    Periodic,
    /// Detection runs for a keyword right after each ingest.
    OnIngest,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub mode: TriggerMode,
    /// Periodic cadence in seconds (minimum 30).
    pub cadence_secs: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            mode: TriggerMode::Periodic,
            cadence_secs: MIN_CADENCE_SECS,
        }
    }
}

impl TriggerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cadence_secs < MIN_CADENCE_SECS {
            return Err(ConfigError::OutOfRange {
                field: "trigger.cadence_secs",
                expected: "at least 30",
                value: self.cadence_secs as f64,
            });
        }
        Ok(())
    }

    pub fn cadence(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cadence_secs)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
