//! Error types for the resilience pipeline
//!
//! Every failure produced by a strategy names the stage that produced it, so
//! callers can tell a local rejection (rate limit, open circuit) apart from a
//! failed upstream call.

use http::StatusCode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use manuscripta_core::TransportError;

/// Pipeline stage that produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Timeout,
    RateLimiter,
    CircuitBreaker,
    Retry,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Timeout => "timeout",
            Stage::RateLimiter => "rate_limit",
            Stage::CircuitBreaker => "circuit_breaker",
            Stage::Retry => "retry",
        };
        f.write_str(name)
    }
}

/// Where a cancellation was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelStage {
    /// While waiting for a rate limiter permit
    RateLimiterQueue,
    /// While sleeping between retries
    RetryDelay,
    /// While the wrapped operation was running
    Operation,
}

impl fmt::Display for CancelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CancelStage::RateLimiterQueue => "rate limiter queue",
            CancelStage::RetryDelay => "retry delay",
            CancelStage::Operation => "operation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ResilienceError {
    #[error("Operation in pipeline '{pipeline}' timed out after {timeout:?}")]
    Timeout { pipeline: String, timeout: Duration },

    #[error("Rate limit exceeded for pipeline '{pipeline}'")]
    RateLimited {
        pipeline: String,
        retry_after: Option<Duration>,
    },

    #[error("Circuit breaker for pipeline '{pipeline}' is open")]
    CircuitOpen { pipeline: String, remaining: Duration },

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ResilienceError>,
    },

    /// Final upstream status once retries are exhausted
    #[error("Upstream responded with status {0}")]
    Status(StatusCode),

    #[error("Operation cancelled during {stage}")]
    Cancelled { stage: CancelStage },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Failure raised by the operation itself, e.g. a configuration error
    #[error(transparent)]
    Operation(#[from] manuscripta_core::Error),

    #[error("Invalid resilience options: {0}")]
    InvalidOptions(String),

    #[error("Resilience module has been disposed")]
    Disposed,
}

impl ResilienceError {
    /// Stage that produced this error, when it came from a strategy
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ResilienceError::Timeout { .. } => Some(Stage::Timeout),
            ResilienceError::RateLimited { .. } => Some(Stage::RateLimiter),
            ResilienceError::CircuitOpen { .. } => Some(Stage::CircuitBreaker),
            ResilienceError::RetriesExhausted { .. } => Some(Stage::Retry),
            _ => None,
        }
    }

    /// Whether the failure is worth retrying and counts toward the breaker
    pub fn is_transient(&self) -> bool {
        match self {
            ResilienceError::Transport(e) => e.is_transient(),
            ResilienceError::Status(status) => is_transient_status(*status),
            ResilienceError::RetriesExhausted { .. } => true,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResilienceError::Cancelled { .. })
    }

    /// Configuration errors raised by the operation are never retried
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, ResilienceError::Operation(e) if e.is_configuration_error())
    }
}

/// 5xx, 408 Request Timeout and 429 Too Many Requests are transient
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

pub type Result<T> = std::result::Result<T, ResilienceError>;
