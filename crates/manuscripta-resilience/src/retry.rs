//! Retry stage
//!
//! Re-runs the inner chain on transient outcomes: connect and timeout
//! transport failures, or responses with a 5xx, 408 or 429 status. Anything
//! else, a 404 or a configuration error for instance, is returned after the
//! first attempt.

use futures::future::BoxFuture;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

use manuscripta_core::retry_after::retry_after_duration;

use crate::error::{CancelStage, ResilienceError, Stage};
use crate::metrics::{Telemetry, events};
use crate::options::{BackoffType, RetryOptions};
use crate::strategy::{Next, Outcome, Strategy, is_transient_outcome};

#[derive(Debug)]
pub struct RetryStrategy {
    options: RetryOptions,
    telemetry: Telemetry,
}

impl RetryStrategy {
    pub(crate) fn new(options: RetryOptions, telemetry: Telemetry) -> Self {
        Self { options, telemetry }
    }

    /// Delay before the `retry`-th retry (1-based), jitter not applied.
    ///
    /// Constant: `delay`; linear: `delay * n`; exponential:
    /// `delay * 2^(n-1)`. Capped at `max_delay`.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let delay = self.options.delay;
        let computed = match self.options.backoff {
            BackoffType::Constant => delay,
            BackoffType::Linear => delay.saturating_mul(retry),
            BackoffType::Exponential => {
                let factor = 2u32.saturating_pow(retry.saturating_sub(1));
                delay.saturating_mul(factor)
            }
        };
        computed.min(self.options.max_delay)
    }

    fn delay_for(&self, retry: u32, outcome: &Outcome) -> Duration {
        let mut delay = self.base_delay(retry);
        if self.options.use_jitter && !delay.is_zero() {
            let factor: f64 = rand::rng().random_range(0.8..=1.2);
            delay = delay.mul_f64(factor);
        }

        // A server asking for a longer pause wins, within max_delay
        if let Ok(response) = outcome {
            if let Some(requested) = response
                .header("retry-after")
                .and_then(retry_after_duration)
            {
                delay = delay.max(requested.min(self.options.max_delay));
            }
        }
        delay
    }
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Ok(response) => format!("status {}", response.status.as_u16()),
        Err(e) => e.to_string(),
    }
}

impl Strategy for RetryStrategy {
    fn stage(&self) -> Stage {
        Stage::Retry
    }

    fn execute<'a>(&'a self, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let cancel = next.cancel_token();
            let pipeline = self.telemetry.pipeline();
            let mut retries = 0u32;

            loop {
                let outcome = next.run().await;
                if !is_transient_outcome(&outcome) {
                    if retries > 0 {
                        debug!(pipeline, retries, "Operation settled after retries");
                    }
                    return outcome;
                }

                if retries >= self.options.max_attempts {
                    self.telemetry.record(events::RETRY_EXHAUSTED);
                    warn!(
                        pipeline,
                        attempts = retries + 1,
                        last = %describe(&outcome),
                        "Retries exhausted"
                    );
                    let last = match outcome {
                        Ok(response) => ResilienceError::Status(response.status),
                        Err(e) => e,
                    };
                    return Err(ResilienceError::RetriesExhausted {
                        attempts: retries + 1,
                        last: Box::new(last),
                    });
                }

                retries += 1;
                let delay = self.delay_for(retries, &outcome);
                self.telemetry.record(events::RETRY_ATTEMPT);
                warn!(
                    pipeline,
                    retry = retries,
                    max_retries = self.options.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    cause = %describe(&outcome),
                    "Transient failure, retrying"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(ResilienceError::Cancelled {
                            stage: CancelStage::RetryDelay,
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ResilienceMetrics;
    use std::sync::Arc;

    fn strategy(backoff: BackoffType, use_jitter: bool) -> RetryStrategy {
        let options = RetryOptions {
            enabled: true,
            max_attempts: 5,
            delay: Duration::from_millis(100),
            backoff,
            use_jitter,
            max_delay: Duration::from_secs(1),
        };
        RetryStrategy::new(
            options,
            Telemetry::new("test", Arc::new(ResilienceMetrics::new())),
        )
    }

    #[test]
    fn test_constant_backoff() {
        let s = strategy(BackoffType::Constant, false);
        assert_eq!(s.base_delay(1), Duration::from_millis(100));
        assert_eq!(s.base_delay(4), Duration::from_millis(100));
    }

    #[test]
    fn test_linear_backoff() {
        let s = strategy(BackoffType::Linear, false);
        assert_eq!(s.base_delay(1), Duration::from_millis(100));
        assert_eq!(s.base_delay(3), Duration::from_millis(300));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let s = strategy(BackoffType::Exponential, false);
        assert_eq!(s.base_delay(1), Duration::from_millis(100));
        assert_eq!(s.base_delay(2), Duration::from_millis(200));
        assert_eq!(s.base_delay(3), Duration::from_millis(400));
        assert_eq!(s.base_delay(5), Duration::from_secs(1));
        assert_eq!(s.base_delay(64), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let s = strategy(BackoffType::Constant, true);
        let outcome: Outcome = Err(ResilienceError::Status(http::StatusCode::BAD_GATEWAY));
        for _ in 0..200 {
            let delay = s.delay_for(1, &outcome);
            assert!(delay >= Duration::from_millis(80), "{:?}", delay);
            assert!(delay <= Duration::from_millis(120), "{:?}", delay);
        }
    }

    #[test]
    fn test_retry_after_header_extends_delay() {
        let s = strategy(BackoffType::Constant, false);
        let response = manuscripta_core::HttpResponse::from_status(429).with_header("retry-after", "2");
        // Requested 2s, capped at max_delay
        assert_eq!(s.delay_for(1, &Ok(response)), Duration::from_secs(1));

        let response = manuscripta_core::HttpResponse::from_status(503).with_header("retry-after", "0");
        assert_eq!(s.delay_for(1, &Ok(response)), Duration::from_millis(100));
    }
}
