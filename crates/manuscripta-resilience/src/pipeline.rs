//! Compiled pipelines
//!
//! A [`Pipeline`] is built once from a [`ResilienceOptions`] value and is
//! immutable afterwards. Reconfiguration replaces pipelines wholesale.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use manuscripta_core::HttpResponse;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerStrategy, CircuitState};
use crate::error::{Result, Stage, is_transient_status};
use crate::metrics::{ResilienceMetrics, Telemetry, events};
use crate::options::ResilienceOptions;
use crate::rate_limiter::RateLimiterStrategy;
use crate::retry::RetryStrategy;
use crate::strategy::{Next, Operation, Outcome, Strategy};
use crate::timeout::TimeoutStrategy;

/// Timeout → RateLimit → CircuitBreaker → Retry → operation, with disabled
/// stages left out
#[derive(Debug)]
pub struct Pipeline {
    strategies: Vec<Box<dyn Strategy>>,
    breaker: Option<Arc<CircuitBreaker>>,
    telemetry: Telemetry,
}

impl Pipeline {
    pub fn build(
        name: &str,
        options: &ResilienceOptions,
        metrics: Arc<ResilienceMetrics>,
    ) -> Result<Self> {
        options.validate()?;
        let telemetry = Telemetry::new(name, metrics);
        let mut strategies: Vec<Box<dyn Strategy>> = Vec::with_capacity(4);

        if options.timeout.enabled {
            strategies.push(Box::new(TimeoutStrategy::new(
                options.timeout.timeout,
                telemetry.clone(),
            )));
        }
        if options.rate_limiting.enabled {
            strategies.push(Box::new(RateLimiterStrategy::new(
                &options.rate_limiting,
                telemetry.clone(),
            )));
        }
        let breaker = options.circuit_breaker.enabled.then(|| {
            Arc::new(CircuitBreaker::new(
                options.circuit_breaker.clone(),
                telemetry.clone(),
            ))
        });
        if let Some(breaker) = &breaker {
            strategies.push(Box::new(CircuitBreakerStrategy::new(
                Arc::clone(breaker),
                telemetry.clone(),
            )));
        }
        if options.retry.enabled {
            strategies.push(Box::new(RetryStrategy::new(
                options.retry.clone(),
                telemetry.clone(),
            )));
        }

        let pipeline = Self {
            strategies,
            breaker,
            telemetry,
        };
        debug!(pipeline = name, stages = ?pipeline.stages(), "Built resilience pipeline");
        Ok(pipeline)
    }

    pub fn name(&self) -> &str {
        self.telemetry.pipeline()
    }

    /// Enabled stages, outermost first
    pub fn stages(&self) -> Vec<Stage> {
        self.strategies.iter().map(|s| s.stage()).collect()
    }

    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.breaker.as_ref().map(|b| b.state())
    }

    /// Run `operation` through every stage.
    ///
    /// `operation` is called once per attempt with the caller's token.
    pub async fn execute<F, Fut>(
        &self,
        operation: F,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync,
        Fut: Future<Output = Outcome> + Send,
    {
        let operation = &operation;
        let erased = move |cancel| Box::pin(operation(cancel)) as BoxFuture<'_, Outcome>;
        self.execute_erased(&erased, cancel).await
    }

    async fn execute_erased<'a>(
        &'a self,
        operation: &'a Operation<'a>,
        cancel: &'a CancellationToken,
    ) -> Result<HttpResponse> {
        self.telemetry.record(events::REQUESTS_TOTAL);
        let outcome = Next::new(&self.strategies, operation, cancel).run().await;

        let event = match &outcome {
            Ok(response) if !is_transient_status(response.status) => events::REQUESTS_SUCCESS,
            Err(e) if e.is_cancelled() => events::REQUESTS_CANCELLED,
            _ => events::REQUESTS_FAILURE,
        };
        self.telemetry.record(event);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_operation_may_borrow_caller_state() {
        let mut options = ResilienceOptions::default();
        options.retry.delay = Duration::from_millis(1);
        options.retry.use_jitter = false;
        let pipeline =
            Pipeline::build("manuscripts.get", &options, Arc::new(ResilienceMetrics::new()))
                .unwrap();
        assert_eq!(pipeline.stages().len(), 4);

        let attempts = AtomicU32::new(0);
        let statuses = [503u16, 200];
        let response = pipeline
            .execute(
                |_| {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) as usize;
                    let status = statuses[n.min(1)];
                    async move { Ok(HttpResponse::from_status(status)) }
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
