//! Per-keyword spike engine: owns every keyword's window, runs the configured
//! detection pipeline over snapshots, and feeds the registry.

mod timing;

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, EngineConfig, TriggerMode};
use crate::detect::{DetectionPipeline, Flag};
use crate::registry::{SpikeEvent, SpikeQuery, SpikeRegistry};
use crate::window::{Observation, RetentionPolicy, SeriesWindow, Snapshot, WindowError};

pub use self::timing::MethodTiming;
use self::timing::DetectionTimings;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("keyword '{keyword}': {source}")]
    Window {
        keyword: String,
        #[source]
        source: WindowError,
    },

    #[error("no observations ingested for keyword '{0}'")]
    UnknownKeyword(String),
}

/// Outcome of one trigger across all keywords.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TriggerReport {
    pub keywords_scanned: usize,
    pub spikes_registered: usize,
    pub failures: usize,
    /// Wall-clock time of the whole trigger.
    pub elapsed_ms: f64,
}

type SharedWindow = Arc<Mutex<SeriesWindow>>;

/// The detection engine.
///
/// Windows live in a keyword-indexed map; the map lock is held only to look
/// up or create a window, and each window has its own lock so keywords never
/// contend with each other. Detection runs on a snapshot with no lock held.
pub struct SpikeEngine {
    pipeline: DetectionPipeline,
    retention: RetentionPolicy,
    mode: TriggerMode,
    windows: RwLock<HashMap<String, SharedWindow>>,
    registry: Arc<SpikeRegistry>,
    timings: DetectionTimings,
}

impl SpikeEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        Self::with_registry(config, Arc::new(SpikeRegistry::new()))
    }

    /// Build an engine that registers into an existing registry.
    pub fn with_registry(
        config: &EngineConfig,
        registry: Arc<SpikeRegistry>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let pipeline = DetectionPipeline::from_config(&config.detection)?;
        info!(
            pipeline = %pipeline.describe(),
            window_hours = config.window.time_window_hours,
            max_observations = config.window.max_observations,
            mode = ?config.trigger.mode,
            "spike engine ready"
        );
        Ok(Self {
            pipeline,
            retention: config.window.retention(),
            mode: config.trigger.mode,
            windows: RwLock::new(HashMap::new()),
            registry,
            timings: DetectionTimings::default(),
        })
    }

    /// Push one scored observation for `keyword`.
    ///
    /// In `on_ingest` mode this also runs detection for the keyword and
    /// returns the events it registered; in `periodic` mode it returns an
    /// empty list and detection waits for [`SpikeEngine::trigger`].
    pub fn ingest(
        &self,
        keyword: &str,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<Vec<SpikeEvent>, EngineError> {
        let window = self.window_or_insert(keyword);
        lock(&window)
            .push(Observation::new(timestamp, value))
            .map_err(|source| EngineError::Window {
                keyword: keyword.to_string(),
                source,
            })?;

        match self.mode {
            TriggerMode::OnIngest => self.detect_keyword(keyword),
            TriggerMode::Periodic => Ok(Vec::new()),
        }
    }

    /// Run detection over `keyword`'s current window and register the result.
    pub fn detect_keyword(&self, keyword: &str) -> Result<Vec<SpikeEvent>, EngineError> {
        let snapshot = self
            .snapshot(keyword)
            .ok_or_else(|| EngineError::UnknownKeyword(keyword.to_string()))?;

        let start = Instant::now();
        let (flags, method_times) = self.pipeline.detect_timed(&snapshot.values());
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        for (method, elapsed) in method_times {
            self.timings.record(method, elapsed);
        }

        let events = to_events(keyword, &snapshot, &flags);
        let registered = self.registry.register_all(keyword, &events);

        debug!(
            %keyword,
            points = snapshot.len(),
            flagged = flags.len(),
            registered,
            elapsed_ms,
            "detection run complete"
        );
        Ok(events)
    }

    /// Run detection for every keyword with data. A failing keyword is
    /// logged and counted without affecting the others.
    pub fn trigger(&self) -> TriggerReport {
        let start = Instant::now();
        let mut report = TriggerReport::default();
        for keyword in self.keywords() {
            report.keywords_scanned += 1;
            match self.detect_keyword(&keyword) {
                Ok(events) => report.spikes_registered += events.len(),
                Err(e) => {
                    warn!(%keyword, error = %e, "detection failed");
                    report.failures += 1;
                }
            }
        }
        report.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!(
            keywords = report.keywords_scanned,
            spikes = report.spikes_registered,
            failures = report.failures,
            elapsed_ms = report.elapsed_ms,
            "trigger complete"
        );
        report
    }

    /// Keywords with at least one observation in their window, sorted.
    pub fn keywords(&self) -> Vec<String> {
        let windows = self.windows.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = windows
            .iter()
            .filter(|(_, w)| !lock(w).is_empty())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn snapshot(&self, keyword: &str) -> Option<Snapshot> {
        let window = self.window(keyword)?;
        let snapshot = lock(&window).snapshot();
        Some(snapshot)
    }

    pub fn query(&self, keyword: &str, range: RangeInclusive<DateTime<Utc>>) -> SpikeQuery {
        self.registry.query(keyword, range)
    }

    pub fn count(&self, keyword: &str) -> usize {
        self.registry.count(keyword)
    }

    /// Detection run times per method since the engine was built.
    pub fn timings(&self) -> Vec<MethodTiming> {
        self.timings.summary()
    }

    pub fn registry(&self) -> &Arc<SpikeRegistry> {
        &self.registry
    }

    pub fn mode(&self) -> TriggerMode {
        self.mode
    }

    fn window(&self, keyword: &str) -> Option<SharedWindow> {
        let windows = self.windows.read().unwrap_or_else(|e| e.into_inner());
        windows.get(keyword).cloned()
    }

    fn window_or_insert(&self, keyword: &str) -> SharedWindow {
        if let Some(window) = self.window(keyword) {
            return window;
        }
        let mut windows = self.windows.write().unwrap_or_else(|e| e.into_inner());
        windows
            .entry(keyword.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SeriesWindow::new(self.retention))))
            .clone()
    }
}

// A panic mid-push cannot leave a window half-updated, so a poisoned lock is
// still safe to use.
fn lock(window: &Mutex<SeriesWindow>) -> MutexGuard<'_, SeriesWindow> {
    window.lock().unwrap_or_else(|e| e.into_inner())
}

fn to_events(keyword: &str, snapshot: &Snapshot, flags: &[Flag]) -> Vec<SpikeEvent> {
    flags
        .iter()
        .filter_map(|flag| {
            let observation = snapshot.get(flag.index)?;
            Some(SpikeEvent {
                keyword: keyword.to_string(),
                timestamp: observation.timestamp,
                value: observation.value,
                deviation_score: flag.score,
                method: flag.method,
                severity: flag.severity(),
            })
        })
        .collect()
}
