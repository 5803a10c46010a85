//! Timeout stage
//!
//! Bounds the whole remainder of the chain, retries and their delays
//! included. When the deadline passes the inner future is dropped.

use futures::future::BoxFuture;
use std::time::Duration;
use tracing::warn;

use crate::error::{ResilienceError, Stage};
use crate::metrics::{Telemetry, events};
use crate::strategy::{Next, Outcome, Strategy};

#[derive(Debug)]
pub struct TimeoutStrategy {
    timeout: Duration,
    telemetry: Telemetry,
}

impl TimeoutStrategy {
    pub(crate) fn new(timeout: Duration, telemetry: Telemetry) -> Self {
        Self { timeout, telemetry }
    }
}

impl Strategy for TimeoutStrategy {
    fn stage(&self) -> Stage {
        Stage::Timeout
    }

    fn execute<'a>(&'a self, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, next.run()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.telemetry.record(events::TIMEOUT_TRIGGERED);
                    warn!(
                        pipeline = self.telemetry.pipeline(),
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Operation timed out"
                    );
                    Err(ResilienceError::Timeout {
                        pipeline: self.telemetry.pipeline().to_string(),
                        timeout: self.timeout,
                    })
                }
            }
        })
    }
}
