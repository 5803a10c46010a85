//! The strategy chain
//!
//! A pipeline is a slice of [`Strategy`] values. Each strategy receives a
//! [`Next`] handle for the rest of the chain and decides whether, when and
//! how often to run it. The end of the chain is the wrapped operation.

use futures::future::BoxFuture;
use std::fmt;
use tokio_util::sync::CancellationToken;

use manuscripta_core::{HttpResponse, TransportError};

use crate::error::{CancelStage, ResilienceError, Stage, is_transient_status};

/// What one pass through (part of) the chain produces
pub type Outcome = Result<HttpResponse, ResilienceError>;

/// The wrapped operation, type-erased.
///
/// It receives the caller's cancellation token and is invoked once per
/// attempt, so it must be safe to call repeatedly.
pub type Operation<'a> = dyn Fn(CancellationToken) -> BoxFuture<'a, Outcome> + Send + Sync + 'a;

pub trait Strategy: Send + Sync + fmt::Debug {
    fn stage(&self) -> Stage;

    fn execute<'a>(&'a self, next: Next<'a>) -> BoxFuture<'a, Outcome>;
}

/// The remainder of the chain after the current strategy
#[derive(Clone, Copy)]
pub struct Next<'a> {
    remaining: &'a [Box<dyn Strategy>],
    operation: &'a Operation<'a>,
    cancel: &'a CancellationToken,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        strategies: &'a [Box<dyn Strategy>],
        operation: &'a Operation<'a>,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            remaining: strategies,
            operation,
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &'a CancellationToken {
        self.cancel
    }

    /// Run the rest of the chain once
    pub fn run(self) -> BoxFuture<'a, Outcome> {
        match self.remaining.split_first() {
            Some((strategy, rest)) => strategy.execute(Next {
                remaining: rest,
                ..self
            }),
            None => invoke(self.operation, self.cancel),
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.remaining)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

fn invoke<'a>(operation: &'a Operation<'a>, cancel: &'a CancellationToken) -> BoxFuture<'a, Outcome> {
    Box::pin(async move {
        let cancelled = || ResilienceError::Cancelled {
            stage: CancelStage::Operation,
        };
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled()),
            outcome = operation(cancel.clone()) => match outcome {
                Err(ResilienceError::Transport(TransportError::Cancelled)) => Err(cancelled()),
                other => other,
            },
        }
    })
}

/// Whether an outcome is a transient failure: a retryable error, or a
/// response with a 5xx, 408 or 429 status
pub fn is_transient_outcome(outcome: &Outcome) -> bool {
    match outcome {
        Ok(response) => is_transient_status(response.status),
        Err(e) => e.is_transient(),
    }
}
