//! Resilience counters
//!
//! A flat map of monotonically increasing counters keyed
//! `"{pipeline}.{event}"`, e.g. `global.requests.success` or
//! `journals.recommend.circuit_breaker.opened`. Counters are only cleared by
//! [`ResilienceMetrics::clear`], which also advances the reset epoch so
//! consumers of snapshots can tell a restart from a quiet period.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Event names recorded by the pipeline and its strategies
pub mod events {
    pub const REQUESTS_TOTAL: &str = "requests.total";
    pub const REQUESTS_SUCCESS: &str = "requests.success";
    pub const REQUESTS_FAILURE: &str = "requests.failure";
    pub const REQUESTS_CANCELLED: &str = "requests.cancelled";

    pub const TIMEOUT_TRIGGERED: &str = "timeout.triggered";

    pub const RATE_LIMIT_REJECTED: &str = "rate_limit.rejected";
    pub const RATE_LIMIT_QUEUED: &str = "rate_limit.queued";

    pub const CIRCUIT_OPENED: &str = "circuit_breaker.opened";
    pub const CIRCUIT_CLOSED: &str = "circuit_breaker.closed";
    pub const CIRCUIT_HALF_OPENED: &str = "circuit_breaker.half_opened";
    pub const CIRCUIT_REJECTED: &str = "circuit_breaker.rejected";

    pub const RETRY_ATTEMPT: &str = "retry.attempts";
    pub const RETRY_EXHAUSTED: &str = "retry.exhausted";

    pub const ALL: [&str; 13] = [
        REQUESTS_TOTAL,
        REQUESTS_SUCCESS,
        REQUESTS_FAILURE,
        REQUESTS_CANCELLED,
        TIMEOUT_TRIGGERED,
        RATE_LIMIT_REJECTED,
        RATE_LIMIT_QUEUED,
        CIRCUIT_OPENED,
        CIRCUIT_CLOSED,
        CIRCUIT_HALF_OPENED,
        CIRCUIT_REJECTED,
        RETRY_ATTEMPT,
        RETRY_EXHAUSTED,
    ];
}

#[derive(Debug, Default)]
pub struct ResilienceMetrics {
    counters: DashMap<String, AtomicU64>,
    /// Odd while a clear is in progress
    epoch: AtomicU64,
}

impl ResilienceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, pipeline: &str, event: &str) {
        let key = format!("{}.{}", pipeline, event);
        if let Some(counter) = self.counters.get(&key) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Current value of a full key, 0 when never incremented
    pub fn get(&self, key: &str) -> u64 {
        self.counters
            .get(key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Point-in-time copy of every counter, sorted by key
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }

    /// Reset epoch and a snapshot taken entirely within it
    pub fn snapshot_with_epoch(&self) -> (u64, BTreeMap<String, u64>) {
        loop {
            let before = self.epoch.load(Ordering::Acquire);
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let snapshot = self.snapshot();
            if self.epoch.load(Ordering::Acquire) == before {
                return (before / 2, snapshot);
            }
        }
    }

    /// Number of completed clears
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire) / 2
    }

    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.counters.clear();
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }
}

/// Split a counter key into its pipeline name and event.
///
/// Pipeline names may contain dots themselves, so the event is matched
/// against the known event names. Unknown events yield `None`.
pub fn split_key(key: &str) -> Option<(&str, &'static str)> {
    events::ALL.iter().find_map(|event| {
        let pipeline = key.strip_suffix(event)?.strip_suffix('.')?;
        (!pipeline.is_empty()).then_some((pipeline, *event))
    })
}

/// A pipeline's handle on the shared counters
#[derive(Debug, Clone)]
pub(crate) struct Telemetry {
    pipeline: Arc<str>,
    metrics: Arc<ResilienceMetrics>,
}

impl Telemetry {
    pub(crate) fn new(pipeline: &str, metrics: Arc<ResilienceMetrics>) -> Self {
        Self {
            pipeline: pipeline.into(),
            metrics,
        }
    }

    pub(crate) fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub(crate) fn record(&self, event: &str) {
        self.metrics.increment(&self.pipeline, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_and_snapshot() {
        let metrics = ResilienceMetrics::new();
        metrics.increment("global", events::REQUESTS_SUCCESS);
        metrics.increment("global", events::REQUESTS_SUCCESS);
        metrics.increment("journals.recommend", events::RATE_LIMIT_REJECTED);

        assert_eq!(metrics.get("global.requests.success"), 2);
        assert_eq!(metrics.get("journals.recommend.rate_limit.rejected"), 1);
        assert_eq!(metrics.get("global.requests.failure"), 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.keys().next().map(String::as_str),
            Some("global.requests.success")
        );

        assert_eq!(metrics.epoch(), 0);
        metrics.clear();
        assert!(metrics.snapshot().is_empty());
        assert_eq!(metrics.epoch(), 1);

        metrics.increment("global", events::REQUESTS_TOTAL);
        let (epoch, snapshot) = metrics.snapshot_with_epoch();
        assert_eq!(epoch, 1);
        assert_eq!(snapshot["global.requests.total"], 1);
    }

    #[test]
    fn test_split_key() {
        assert_eq!(
            split_key("journals.recommend.circuit_breaker.opened"),
            Some(("journals.recommend", events::CIRCUIT_OPENED))
        );
        assert_eq!(
            split_key("global.requests.total"),
            Some(("global", events::REQUESTS_TOTAL))
        );
        assert_eq!(split_key("requests.total"), None);
        assert_eq!(split_key("global.unknown"), None);
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(ResilienceMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.increment("global", events::REQUESTS_TOTAL);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.get("global.requests.total"), 8000);
    }
}
