//! spikewatch -- Spike detection for per-keyword sentiment time series.
//!
//! Observations are pushed per keyword into bounded sliding windows. On each
//! trigger the configured detection pipeline scans a snapshot of every window
//! and the flagged points are registered as spike events, queryable by keyword
//! and time range.

pub mod benchmark;
pub mod config;
pub mod detect;
pub mod engine;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod window;

pub use config::{ConfigError, EngineConfig};
pub use detect::{DetectorKind, Severity};
pub use engine::{EngineError, MethodTiming, SpikeEngine, TriggerReport};
pub use registry::{SpikeEvent, SpikeInterval, SpikeQuery, SpikeRegistry};
pub use window::{Observation, SeriesWindow, Snapshot, WindowError};
