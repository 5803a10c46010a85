//! Prometheus export of resilience counters
//!
//! The resilience module keeps its own flat counters. The exporter mirrors
//! them into an `IntCounterVec` labelled by pipeline and event, plus a gauge
//! for the breaker state of every pipeline it has seen.

use parking_lot::Mutex;
use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use manuscripta_resilience::{CircuitState, ResilienceModule, split_key};

use crate::error::Result;

pub const EVENTS_METRIC: &str = "manuscripta_resilience_events_total";
pub const CIRCUIT_STATE_METRIC: &str = "manuscripta_circuit_breaker_state";

/// Gauge value of a breaker state
pub fn circuit_state_value(state: CircuitState) -> i64 {
    match state {
        CircuitState::Closed => 0,
        CircuitState::Open => 1,
        CircuitState::HalfOpen => 2,
    }
}

pub struct PrometheusExporter {
    registry: Registry,
    events: IntCounterVec,
    circuit_state: IntGaugeVec,
    exported: Mutex<Exported>,
}

/// What the Prometheus counters already account for
#[derive(Debug, Default)]
struct Exported {
    /// Source reset epoch of `values`
    epoch: Option<u64>,
    /// Last value exported per (pipeline, event)
    values: HashMap<(String, String), u64>,
}

impl PrometheusExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let events = IntCounterVec::new(
            Opts::new(EVENTS_METRIC, "Resilience pipeline events"),
            &["pipeline", "event"],
        )?;
        let circuit_state = IntGaugeVec::new(
            Opts::new(
                CIRCUIT_STATE_METRIC,
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            ),
            &["pipeline"],
        )?;

        registry.register(Box::new(events.clone()))?;
        registry.register(Box::new(circuit_state.clone()))?;

        Ok(Self {
            registry,
            events,
            circuit_state,
            exported: Mutex::new(Exported::default()),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Add what a counter snapshot gained since the last sync.
    ///
    /// The Prometheus counters only grow. When `epoch` differs from the one
    /// last seen, the source was reset in between, so every value in the
    /// snapshot counts as new and keys absent from it simply stop growing.
    /// Keys with an unknown event are skipped.
    pub fn sync_snapshot(&self, epoch: u64, snapshot: &BTreeMap<String, u64>) {
        let mut exported = self.exported.lock();
        if exported.epoch != Some(epoch) {
            if exported.epoch.is_some() {
                debug!(epoch, "Resilience counters were reset since the last sync");
            }
            exported.epoch = Some(epoch);
            exported.values.clear();
        }

        for (key, value) in snapshot {
            let Some((pipeline, event)) = split_key(key) else {
                debug!(key = %key, "Skipping unknown resilience counter");
                continue;
            };
            let last = exported
                .values
                .entry((pipeline.to_string(), event.to_string()))
                .or_insert(0);
            let delta = value.saturating_sub(*last);
            if delta > 0 {
                self.events
                    .with_label_values(&[pipeline, event])
                    .inc_by(delta);
            }
            *last = (*last).max(*value);
        }
    }

    /// Pull counters and breaker states from a live module
    pub fn sync(&self, module: &ResilienceModule) -> Result<()> {
        let (epoch, snapshot) = module.metrics_with_epoch()?;
        self.sync_snapshot(epoch, &snapshot);

        let pipelines: Vec<String> = {
            let exported = self.exported.lock();
            let mut names: Vec<String> =
                exported.values.keys().map(|(p, _)| p.clone()).collect();
            names.sort();
            names.dedup();
            names
        };
        for pipeline in pipelines {
            if let Some(state) = module.circuit_state(&pipeline) {
                self.circuit_state
                    .with_label_values(&[pipeline.as_str()])
                    .set(circuit_state_value(state));
            }
        }
        Ok(())
    }

    /// Text exposition format of everything registered
    pub fn render(&self) -> Result<String> {
        let families = self.registry.gather();
        Ok(TextEncoder::new().encode_to_string(&families)?)
    }
}

impl std::fmt::Debug for PrometheusExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusExporter")
            .field("exported", &self.exported.lock().values.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_value(exporter: &PrometheusExporter, pipeline: &str, event: &str) -> u64 {
        exporter
            .events
            .with_label_values(&[pipeline, event])
            .get()
    }

    fn snapshot(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_sync_applies_deltas() {
        let exporter = PrometheusExporter::new().unwrap();
        exporter.sync_snapshot(
            0,
            &snapshot(&[
                ("global.requests.total", 3),
                ("journals.recommend.retry.attempts", 2),
            ]),
        );
        exporter.sync_snapshot(
            0,
            &snapshot(&[
                ("global.requests.total", 5),
                ("journals.recommend.retry.attempts", 2),
            ]),
        );

        assert_eq!(counter_value(&exporter, "global", "requests.total"), 5);
        assert_eq!(
            counter_value(&exporter, "journals.recommend", "retry.attempts"),
            2
        );
    }

    #[test]
    fn test_reset_counts_regrown_values_in_full() {
        let exporter = PrometheusExporter::new().unwrap();
        exporter.sync_snapshot(
            0,
            &snapshot(&[
                ("global.requests.failure", 3),
                ("global.retry.attempts", 4),
            ]),
        );
        // Reset, then 5 new failures and no retries before the next sync
        exporter.sync_snapshot(1, &snapshot(&[("global.requests.failure", 5)]));
        assert_eq!(counter_value(&exporter, "global", "requests.failure"), 8);
        assert_eq!(counter_value(&exporter, "global", "retry.attempts"), 4);

        exporter.sync_snapshot(1, &snapshot(&[("global.retry.attempts", 1)]));
        assert_eq!(counter_value(&exporter, "global", "retry.attempts"), 5);
    }

    #[test]
    fn test_unknown_keys_are_skipped() {
        let exporter = PrometheusExporter::new().unwrap();
        exporter.sync_snapshot(0, &snapshot(&[("global.mystery", 4)]));
        assert!(!exporter.render().unwrap().contains("mystery"));
    }

    #[test]
    fn test_render_text_format() {
        let exporter = PrometheusExporter::new().unwrap();
        exporter.sync_snapshot(0, &snapshot(&[("global.timeout.triggered", 1)]));

        let text = exporter.render().unwrap();
        assert!(text.contains(EVENTS_METRIC));
        assert!(text.contains(r#"event="timeout.triggered""#));
        assert!(text.contains(r#"pipeline="global""#));
    }

    #[test]
    fn test_circuit_state_values() {
        assert_eq!(circuit_state_value(CircuitState::Closed), 0);
        assert_eq!(circuit_state_value(CircuitState::Open), 1);
        assert_eq!(circuit_state_value(CircuitState::HalfOpen), 2);
    }
}
