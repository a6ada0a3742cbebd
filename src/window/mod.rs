//! Per-keyword bounded observation buffer.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WindowError {
    #[error("observation at {attempted} is older than latest stored observation at {latest}")]
    OutOfOrder {
        latest: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    #[error("observation value {0} is not finite")]
    NonFinite(f64),
}

/// A single scored point in a keyword's series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Observation {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Which observations a window keeps. Both limits apply; whichever binds
/// first evicts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub max_len: Option<usize>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::hours(24),
            max_len: Some(10_000),
        }
    }
}

/// Ordered observations for one keyword.
///
/// Timestamps are strictly increasing. Pushing at the latest timestamp
/// replaces that observation, pushing earlier than it is rejected.
#[derive(Debug, Clone)]
pub struct SeriesWindow {
    observations: VecDeque<Observation>,
    retention: RetentionPolicy,
}

impl SeriesWindow {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            observations: VecDeque::new(),
            retention,
        }
    }

    pub fn push(&mut self, observation: Observation) -> Result<(), WindowError> {
        if !observation.value.is_finite() {
            return Err(WindowError::NonFinite(observation.value));
        }

        if let Some(last) = self.observations.back_mut() {
            if observation.timestamp < last.timestamp {
                return Err(WindowError::OutOfOrder {
                    latest: last.timestamp,
                    attempted: observation.timestamp,
                });
            }
            if observation.timestamp == last.timestamp {
                last.value = observation.value;
                return Ok(());
            }
        }

        self.observations.push_back(observation);
        self.evict();
        Ok(())
    }

    fn evict(&mut self) {
        let Some(newest) = self.observations.back().map(|o| o.timestamp) else {
            return;
        };
        let cutoff = newest - self.retention.max_age;
        while self
            .observations
            .front()
            .is_some_and(|o| o.timestamp < cutoff)
        {
            self.observations.pop_front();
        }
        if let Some(max_len) = self.retention.max_len {
            while self.observations.len() > max_len {
                self.observations.pop_front();
            }
        }
    }

    /// Copy of the current contents for a detection run.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            observations: self.observations.iter().copied().collect(),
        }
    }

    pub fn latest(&self) -> Option<&Observation> {
        self.observations.back()
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

impl Default for SeriesWindow {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

/// Immutable ordered copy of a window's observations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    observations: Vec<Observation>,
}

impl Snapshot {
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn values(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.value).collect()
    }

    pub fn get(&self, index: usize) -> Option<&Observation> {
        self.observations.get(index)
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_retains_last_24_hours() {
        let mut window = SeriesWindow::default();
        // 100 observations across 48h, 1728s apart
        for k in 0..100 {
            let ts = t0() + Duration::seconds(k * 1728);
            window.push(Observation::new(ts, k as f64)).unwrap();
        }
        // cutoff = 99 * 1728 - 86400 = 49 * 1728
        assert_eq!(window.len(), 51);
        let snap = window.snapshot();
        assert_eq!(snap.observations()[0].timestamp, t0() + Duration::seconds(49 * 1728));
        assert_eq!(snap.observations()[50].timestamp, t0() + Duration::seconds(99 * 1728));
    }

    #[test]
    fn test_count_cap_binds_first() {
        let mut window = SeriesWindow::new(RetentionPolicy {
            max_age: Duration::hours(24),
            max_len: Some(10),
        });
        for k in 0..25 {
            window
                .push(Observation::new(t0() + Duration::minutes(k), k as f64))
                .unwrap();
        }
        assert_eq!(window.len(), 10);
        assert_eq!(window.snapshot().values()[0], 15.0);
    }

    #[test]
    fn test_out_of_order_rejected_without_mutation() {
        let mut window = SeriesWindow::default();
        window.push(Observation::new(t0(), 0.1)).unwrap();
        window
            .push(Observation::new(t0() + Duration::minutes(5), 0.2))
            .unwrap();
        let before = window.snapshot();

        let err = window
            .push(Observation::new(t0() + Duration::minutes(1), 0.9))
            .unwrap_err();
        assert_eq!(
            err,
            WindowError::OutOfOrder {
                latest: t0() + Duration::minutes(5),
                attempted: t0() + Duration::minutes(1),
            }
        );
        assert_eq!(window.snapshot(), before);
    }

    #[test]
    fn test_same_timestamp_overwrites() {
        let mut window = SeriesWindow::default();
        window.push(Observation::new(t0(), 0.1)).unwrap();
        window.push(Observation::new(t0(), 0.7)).unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window.latest().map(|o| o.value), Some(0.7));
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut window = SeriesWindow::default();
        assert!(matches!(
            window.push(Observation::new(t0(), f64::NAN)),
            Err(WindowError::NonFinite(_))
        ));
        assert!(window.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut window = SeriesWindow::default();
        window.push(Observation::new(t0(), 1.0)).unwrap();
        let snap = window.snapshot();
        window
            .push(Observation::new(t0() + Duration::minutes(1), 2.0))
            .unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(window.len(), 2);
    }
}
