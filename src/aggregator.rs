//! Multi-source metric aggregation
//!
//! Each observation context reports under its own source id. The aggregator keeps
//! only the latest snapshot per source, evicts entries whose TTL has passed, and
//! averages the live entries field by field on every tick.

use crate::config::DEFAULT_AGGREGATE_TTL_SECONDS;
use crate::normalizer::MetricNormalizer;
use crate::types::{MetricField, MetricSnapshot};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Latest contribution of one source
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateWindowEntry {
    pub source_id: String,
    pub metrics: MetricSnapshot,
    pub received_at: DateTime<Utc>,
}

/// Keyed, TTL-evicting snapshot aggregator
#[derive(Debug, Clone)]
pub struct MetricAggregator {
    entries: HashMap<String, AggregateWindowEntry>,
    ttl: Duration,
}

impl Default for MetricAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_AGGREGATE_TTL_SECONDS)
    }
}

impl MetricAggregator {
    pub fn new(ttl_seconds: u32) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: Duration::seconds(i64::from(ttl_seconds)),
        }
    }

    /// Upsert the latest snapshot for `source_id`
    pub fn record(&mut self, source_id: &str, snapshot: MetricSnapshot, now: DateTime<Utc>) {
        let sanitized = MetricNormalizer::sanitize(snapshot);
        self.entries.insert(
            source_id.to_string(),
            AggregateWindowEntry {
                source_id: source_id.to_string(),
                metrics: sanitized.snapshot,
                received_at: now,
            },
        );
    }

    /// Drop entries older than the TTL, returning how many were removed
    pub fn evict_stale(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| now - entry.received_at <= ttl);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, live = self.entries.len(), "evicted stale sources");
        }
        evicted
    }

    /// Evict, then average all live entries; `None` when no source is live
    pub fn compute_aggregate(&mut self, now: DateTime<Utc>) -> Option<MetricSnapshot> {
        self.evict_stale(now);
        if self.entries.is_empty() {
            return None;
        }

        let count = self.entries.len() as f64;
        let mut aggregate = MetricSnapshot::zeroed(now);
        for field in MetricField::ALL {
            let sum: f64 = self.entries.values().map(|e| e.metrics.get(field)).sum();
            aggregate.set(field, sum / count);
        }
        Some(aggregate)
    }

    /// Source ids that would survive eviction at `now`
    pub fn live_sources(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .values()
            .filter(|e| now - e.received_at <= self.ttl)
            .map(|e| e.source_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn remove_source(&mut self, source_id: &str) -> bool {
        self.entries.remove(source_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Cloneable handle for producers running on other threads.
///
/// `record` and `compute_aggregate` each hold the lock for their whole duration, so
/// an aggregation never observes a half-written entry.
#[derive(Debug, Clone, Default)]
pub struct SharedAggregator {
    inner: Arc<Mutex<MetricAggregator>>,
}

impl SharedAggregator {
    pub fn new(aggregator: MetricAggregator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(aggregator)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricAggregator> {
        // A panicked producer cannot leave an entry half-written; keep going
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, source_id: &str, snapshot: MetricSnapshot, now: DateTime<Utc>) {
        self.lock().record(source_id, snapshot, now);
    }

    pub fn compute_aggregate(&self, now: DateTime<Utc>) -> Option<MetricSnapshot> {
        self.lock().compute_aggregate(now)
    }

    pub fn live_sources(&self, now: DateTime<Utc>) -> Vec<String> {
        self.lock().live_sources(now)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
