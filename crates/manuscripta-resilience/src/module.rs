//! Resilience module
//!
//! Owns the global pipeline and the lazily built named pipelines, one per
//! endpoint. This is the entry point the HTTP layer calls.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use manuscripta_core::HttpResponse;

use crate::circuit_breaker::CircuitState;
use crate::error::{ResilienceError, Result};
use crate::metrics::ResilienceMetrics;
use crate::options::ResilienceOptions;
use crate::pipeline::Pipeline;
use crate::strategy::Outcome;

/// Name of the pipeline used by [`ResilienceModule::execute`]
pub const GLOBAL_PIPELINE: &str = "global";

#[derive(Debug)]
struct NamedPipeline {
    generation: u64,
    pipeline: Arc<Pipeline>,
}

#[derive(Debug)]
pub struct ResilienceModule {
    options: RwLock<ResilienceOptions>,
    global: RwLock<Arc<Pipeline>>,
    named: DashMap<String, NamedPipeline>,
    /// Bumped whenever the global options change; named pipelines built
    /// under an older generation are rebuilt on next use
    generation: AtomicU64,
    metrics: Arc<ResilienceMetrics>,
    disposed: AtomicBool,
}

impl ResilienceModule {
    pub fn new(options: ResilienceOptions) -> Result<Self> {
        let metrics = Arc::new(ResilienceMetrics::new());
        let global = Pipeline::build(GLOBAL_PIPELINE, &options, Arc::clone(&metrics))?;
        Ok(Self {
            options: RwLock::new(options),
            global: RwLock::new(Arc::new(global)),
            named: DashMap::new(),
            generation: AtomicU64::new(0),
            metrics,
            disposed: AtomicBool::new(false),
        })
    }

    /// Current global options
    pub fn options(&self) -> Result<ResilienceOptions> {
        self.ensure_active()?;
        Ok(self.options.read().clone())
    }

    /// Run `operation` through the global pipeline
    pub async fn execute<F, Fut>(
        &self,
        operation: F,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync,
        Fut: Future<Output = Outcome> + Send,
    {
        self.ensure_active()?;
        let pipeline = Arc::clone(&*self.global.read());
        pipeline.execute(operation, cancel).await
    }

    /// Run `operation` through the pipeline named `endpoint`.
    ///
    /// The pipeline is built on first use, from `custom_options` when given
    /// and from the global options otherwise, then cached. Later calls reuse
    /// it regardless of the options they pass.
    pub async fn execute_named<F, Fut>(
        &self,
        endpoint: &str,
        custom_options: Option<&ResilienceOptions>,
        operation: F,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync,
        Fut: Future<Output = Outcome> + Send,
    {
        self.ensure_active()?;
        let pipeline = self.pipeline(endpoint, custom_options)?;
        pipeline.execute(operation, cancel).await
    }

    /// Cached pipeline for `endpoint`, built when missing or stale
    pub fn pipeline(
        &self,
        endpoint: &str,
        custom_options: Option<&ResilienceOptions>,
    ) -> Result<Arc<Pipeline>> {
        self.ensure_active()?;
        let generation = self.generation.load(Ordering::Acquire);
        if let Some(hit) = self
            .named
            .get(endpoint)
            .filter(|n| n.generation == generation)
            .map(|n| Arc::clone(&n.pipeline))
        {
            return Ok(hit);
        }

        // Read before taking the map entry so the two locks never nest
        let options = match custom_options {
            Some(custom) => custom.clone(),
            None => self.options.read().clone(),
        };

        match self.named.entry(endpoint.to_string()) {
            Entry::Occupied(occupied) if occupied.get().generation == generation => {
                Ok(Arc::clone(&occupied.get().pipeline))
            }
            Entry::Occupied(mut occupied) => {
                let pipeline = self.build_named(endpoint, &options)?;
                occupied.insert(NamedPipeline {
                    generation,
                    pipeline: Arc::clone(&pipeline),
                });
                Ok(pipeline)
            }
            Entry::Vacant(vacant) => {
                let pipeline = self.build_named(endpoint, &options)?;
                vacant.insert(NamedPipeline {
                    generation,
                    pipeline: Arc::clone(&pipeline),
                });
                Ok(pipeline)
            }
        }
    }

    fn build_named(&self, endpoint: &str, options: &ResilienceOptions) -> Result<Arc<Pipeline>> {
        let pipeline = Pipeline::build(endpoint, options, Arc::clone(&self.metrics))?;
        Ok(Arc::new(pipeline))
    }

    /// Replace the global options.
    ///
    /// The global pipeline is rebuilt and every named pipeline is dropped,
    /// custom overrides included; they apply again only when passed to the
    /// next `execute_named` call for that endpoint.
    pub fn update_configuration(&self, options: ResilienceOptions) -> Result<()> {
        self.ensure_active()?;
        let global = Pipeline::build(GLOBAL_PIPELINE, &options, Arc::clone(&self.metrics))?;

        *self.options.write() = options;
        *self.global.write() = Arc::new(global);
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.named.clear();
        info!("Resilience configuration updated, named pipelines dropped");
        Ok(())
    }

    /// Snapshot of every counter
    pub fn metrics(&self) -> Result<BTreeMap<String, u64>> {
        self.ensure_active()?;
        Ok(self.metrics.snapshot())
    }

    /// Snapshot of every counter with the reset epoch it belongs to. The
    /// epoch advances on every [`reset`](Self::reset).
    pub fn metrics_with_epoch(&self) -> Result<(u64, BTreeMap<String, u64>)> {
        self.ensure_active()?;
        Ok(self.metrics.snapshot_with_epoch())
    }

    /// Drop named pipelines, clear metrics and rebuild the global pipeline
    pub fn reset(&self) -> Result<()> {
        self.ensure_active()?;
        let options = self.options.read().clone();
        let global = Pipeline::build(GLOBAL_PIPELINE, &options, Arc::clone(&self.metrics))?;

        *self.global.write() = Arc::new(global);
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.named.clear();
        self.metrics.clear();
        info!("Resilience module reset");
        Ok(())
    }

    /// Circuit state of a pipeline; `None` when it has no breaker or has not
    /// been built
    pub fn circuit_state(&self, endpoint: &str) -> Option<CircuitState> {
        if endpoint == GLOBAL_PIPELINE {
            return self.global.read().circuit_state();
        }
        self.named.get(endpoint)?.pipeline.circuit_state()
    }

    pub fn pipeline_count(&self) -> usize {
        self.named.len()
    }

    /// Release the module. Idempotent; afterwards every operation fails
    /// with `ResilienceError::Disposed`.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.named.clear();
        debug!("Resilience module disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_disposed() {
            Err(ResilienceError::Disposed)
        } else {
            Ok(())
        }
    }
}
