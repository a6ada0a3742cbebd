//! Detection run times per method, accumulated over the engine's lifetime.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::detect::DetectorKind;

/// Run-time summary for one method.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodTiming {
    pub method: DetectorKind,
    pub runs: u64,
    pub mean_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    runs: u64,
    total_ms: f64,
    max_ms: f64,
}

#[derive(Debug, Default)]
pub(crate) struct DetectionTimings {
    methods: Mutex<BTreeMap<DetectorKind, Accumulator>>,
}

impl DetectionTimings {
    pub(crate) fn record(&self, method: DetectorKind, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut methods = self.methods.lock().unwrap_or_else(|e| e.into_inner());
        let acc = methods.entry(method).or_default();
        acc.runs += 1;
        acc.total_ms += ms;
        acc.max_ms = acc.max_ms.max(ms);
    }

    /// One entry per method that has run at least once, in method order.
    pub(crate) fn summary(&self) -> Vec<MethodTiming> {
        let methods = self.methods.lock().unwrap_or_else(|e| e.into_inner());
        methods
            .iter()
            .map(|(&method, acc)| MethodTiming {
                method,
                runs: acc.runs,
                mean_ms: acc.total_ms / acc.runs as f64,
                max_ms: acc.max_ms,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_tracks_count_mean_and_max() {
        let timings = DetectionTimings::default();
        assert!(timings.summary().is_empty());

        timings.record(DetectorKind::ZScore, Duration::from_millis(2));
        timings.record(DetectorKind::ZScore, Duration::from_millis(6));
        timings.record(DetectorKind::SeasonalHybridEsd, Duration::from_millis(10));

        let summary = timings.summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].method, DetectorKind::ZScore);
        assert_eq!(summary[0].runs, 2);
        assert!((summary[0].mean_ms - 4.0).abs() < 1e-9);
        assert!((summary[0].max_ms - 6.0).abs() < 1e-9);
        assert_eq!(summary[1].method, DetectorKind::SeasonalHybridEsd);
        assert_eq!(summary[1].runs, 1);
    }
}
