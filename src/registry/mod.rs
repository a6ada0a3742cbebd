//! Registered spike events, keyed by keyword and timestamp.
//!
//! Each keyword owns a timestamp-ordered map held behind an `Arc`. Writers
//! take the keyword's shard lock and update copy-on-write; readers clone the
//! `Arc` and iterate without holding any lock, so a query result stays valid
//! (and restartable) while new detections keep landing.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::detect::{DetectorKind, Severity};

/// A detected spike, as handed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeEvent {
    pub keyword: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub deviation_score: f64,
    pub method: DetectorKind,
    pub severity: Severity,
}

/// Consecutive spikes of one keyword merged into a dated interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpikeInterval {
    pub keyword: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub peak_timestamp: DateTime<Utc>,
    pub peak_score: f64,
    pub peak_severity: Severity,
    pub events: usize,
}

type EventMap = BTreeMap<DateTime<Utc>, SpikeEvent>;

#[derive(Debug, Default)]
pub struct SpikeRegistry {
    keywords: DashMap<String, Arc<EventMap>>,
}

impl SpikeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert by (keyword, timestamp). Returns the event it replaced.
    pub fn register(&self, event: SpikeEvent) -> Option<SpikeEvent> {
        let mut entry = self.keywords.entry(event.keyword.clone()).or_default();
        let previous = Arc::make_mut(entry.value_mut()).insert(event.timestamp, event);
        previous
    }

    /// Upsert a batch for one keyword under a single write section.
    /// Events whose keyword differs from `keyword` are skipped.
    pub fn register_all(&self, keyword: &str, events: &[SpikeEvent]) -> usize {
        if events.is_empty() {
            return 0;
        }
        let mut entry = self.keywords.entry(keyword.to_string()).or_default();
        let map = Arc::make_mut(entry.value_mut());
        let mut registered = 0;
        for event in events.iter().filter(|e| e.keyword == keyword) {
            map.insert(event.timestamp, event.clone());
            registered += 1;
        }
        registered
    }

    /// Events of `keyword` whose timestamp lies in `range` (inclusive).
    pub fn query(&self, keyword: &str, range: RangeInclusive<DateTime<Utc>>) -> SpikeQuery {
        SpikeQuery {
            events: self.keywords.get(keyword).map(|e| Arc::clone(e.value())),
            range,
        }
    }

    pub fn count(&self, keyword: &str) -> usize {
        self.keywords.get(keyword).map_or(0, |e| e.len())
    }

    /// Keywords with at least one registered event, sorted.
    pub fn keywords(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .keywords
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// The `limit` newest events across every keyword, newest first.
    pub fn recent(&self, limit: usize) -> Vec<SpikeEvent> {
        let snapshots: Vec<Arc<EventMap>> =
            self.keywords.iter().map(|e| Arc::clone(e.value())).collect();
        let mut events: Vec<SpikeEvent> = snapshots
            .iter()
            .flat_map(|m| m.values().rev().take(limit))
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.keyword.cmp(&b.keyword))
        });
        events.truncate(limit);
        events
    }
}

/// Restartable, timestamp-ordered view over one keyword's events in a range.
#[derive(Debug, Clone)]
pub struct SpikeQuery {
    events: Option<Arc<EventMap>>,
    range: RangeInclusive<DateTime<Utc>>,
}

impl SpikeQuery {
    pub fn iter(&self) -> impl Iterator<Item = &SpikeEvent> + '_ {
        // BTreeMap::range panics on an inverted range
        let valid = self.range.start() <= self.range.end();
        self.events
            .iter()
            .filter(move |_| valid)
            .flat_map(move |m| m.range(self.range.clone()))
            .map(|(_, event)| event)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn to_vec(&self) -> Vec<SpikeEvent> {
        self.iter().cloned().collect()
    }

    /// Merge events no more than `max_gap` apart into intervals.
    pub fn intervals(&self, max_gap: Duration) -> Vec<SpikeInterval> {
        let mut intervals: Vec<SpikeInterval> = Vec::new();
        for event in self.iter() {
            if let Some(current) = intervals.last_mut() {
                if event.timestamp - current.end <= max_gap {
                    current.end = event.timestamp;
                    current.events += 1;
                    if event.deviation_score > current.peak_score {
                        current.peak_score = event.deviation_score;
                        current.peak_timestamp = event.timestamp;
                        current.peak_severity = event.severity;
                    }
                    continue;
                }
            }
            intervals.push(SpikeInterval {
                keyword: event.keyword.clone(),
                start: event.timestamp,
                end: event.timestamp,
                peak_timestamp: event.timestamp,
                peak_score: event.deviation_score,
                peak_severity: event.severity,
                events: 1,
            });
        }
        intervals
    }
}

impl<'a> IntoIterator for &'a SpikeQuery {
    type Item = &'a SpikeEvent;
    type IntoIter = Box<dyn Iterator<Item = &'a SpikeEvent> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn event(keyword: &str, minute: i64, score: f64) -> SpikeEvent {
        SpikeEvent {
            keyword: keyword.to_string(),
            timestamp: at(minute),
            value: 0.9,
            deviation_score: score,
            method: DetectorKind::SeasonalHybridEsd,
            severity: Severity::Medium,
        }
    }

    #[test]
    fn test_register_then_query_round_trip() {
        let registry = SpikeRegistry::new();
        let e = event("bitcoin", 10, 5.0);
        assert!(registry.register(e.clone()).is_none());

        let found = registry.query("bitcoin", at(0)..=at(20)).to_vec();
        assert_eq!(found, vec![e]);
    }

    #[test]
    fn test_same_timestamp_overwrites() {
        let registry = SpikeRegistry::new();
        registry.register(event("bitcoin", 10, 5.0));
        let replaced = registry.register(event("bitcoin", 10, 7.5));

        assert_eq!(replaced.map(|e| e.deviation_score), Some(5.0));
        assert_eq!(registry.count("bitcoin"), 1);
        let found = registry.query("bitcoin", at(10)..=at(10)).to_vec();
        assert_eq!(found[0].deviation_score, 7.5);
    }

    #[test]
    fn test_query_is_inclusive_ordered_and_restartable() {
        let registry = SpikeRegistry::new();
        for minute in [30, 10, 20, 40] {
            registry.register(event("election", minute, 3.0));
        }
        let query = registry.query("election", at(10)..=at(30));
        let first: Vec<DateTime<Utc>> = query.iter().map(|e| e.timestamp).collect();
        let second: Vec<DateTime<Utc>> = (&query).into_iter().map(|e| e.timestamp).collect();
        assert_eq!(first, vec![at(10), at(20), at(30)]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_query_survives_later_writes() {
        let registry = SpikeRegistry::new();
        registry.register(event("ai", 1, 3.0));
        let query = registry.query("ai", at(0)..=at(100));
        registry.register(event("ai", 2, 3.0));
        assert_eq!(query.len(), 1);
        assert_eq!(registry.query("ai", at(0)..=at(100)).len(), 2);
    }

    #[test]
    fn test_query_edge_cases() {
        let registry = SpikeRegistry::new();
        registry.register(event("ai", 5, 3.0));
        assert!(registry.query("unknown", at(0)..=at(10)).is_empty());
        assert!(registry.query("ai", at(10)..=at(0)).is_empty());
        assert_eq!(registry.count("unknown"), 0);
    }

    #[test]
    fn test_keywords_are_isolated() {
        let registry = SpikeRegistry::new();
        registry.register(event("a", 1, 3.0));
        registry.register(event("b", 1, 4.0));
        assert_eq!(registry.count("a"), 1);
        assert_eq!(registry.count("b"), 1);
        assert_eq!(registry.keywords(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_register_all_skips_foreign_keywords() {
        let registry = SpikeRegistry::new();
        let batch = vec![event("a", 1, 3.0), event("b", 2, 3.0), event("a", 3, 3.0)];
        assert_eq!(registry.register_all("a", &batch), 2);
        assert_eq!(registry.count("a"), 2);
        assert_eq!(registry.count("b"), 0);
    }

    #[test]
    fn test_recent_newest_first() {
        let registry = SpikeRegistry::new();
        registry.register(event("a", 1, 3.0));
        registry.register(event("b", 5, 3.0));
        registry.register(event("a", 9, 3.0));
        let recent = registry.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].timestamp, at(9));
        assert_eq!(recent[1].timestamp, at(5));
    }

    #[test]
    fn test_intervals_merge_nearby_events() {
        let registry = SpikeRegistry::new();
        registry.register(event("a", 0, 3.0));
        registry.register(event("a", 5, 6.0));
        registry.register(event("a", 8, 4.0));
        registry.register(event("a", 60, 3.5));

        let intervals = registry
            .query("a", at(0)..=at(120))
            .intervals(Duration::minutes(10));
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].start, at(0));
        assert_eq!(intervals[0].end, at(8));
        assert_eq!(intervals[0].events, 3);
        assert_eq!(intervals[0].peak_timestamp, at(5));
        assert_eq!(intervals[1].events, 1);
    }

    #[test]
    fn test_concurrent_upserts() {
        let registry = SpikeRegistry::new();
        std::thread::scope(|s| {
            for worker in 0..4 {
                let registry = &registry;
                s.spawn(move || {
                    let keyword = format!("kw{}", worker % 2);
                    for minute in 0..250 {
                        registry.register(event(&keyword, minute, worker as f64));
                    }
                });
            }
        });
        assert_eq!(registry.count("kw0"), 250);
        assert_eq!(registry.count("kw1"), 250);
    }
}
