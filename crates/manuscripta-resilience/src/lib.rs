//! Manuscripta Resilience
//!
//! Composable policies around outbound calls, applied outermost first:
//! - Timeout: bounds the whole call, retries included
//! - Rate limiting: sliding window with an optional wait queue
//! - Circuit breaking: failure-ratio breaker with a single half-open trial
//! - Retry: constant, linear or exponential backoff with optional jitter
//!
//! [`ResilienceModule`] caches one [`Pipeline`] per endpoint name and keeps
//! flat counters of what every stage did.

pub mod circuit_breaker;
pub mod error;
pub mod metrics;
pub mod module;
pub mod options;
pub mod pipeline;
pub mod rate_limiter;
pub mod retry;
pub mod strategy;
pub mod timeout;

pub use circuit_breaker::CircuitState;
pub use error::{CancelStage, ResilienceError, Result, Stage, is_transient_status};
pub use metrics::{ResilienceMetrics, events, split_key};
pub use module::{GLOBAL_PIPELINE, ResilienceModule};
pub use options::{
    BackoffType, CircuitBreakerOptions, RateLimitingOptions, ResilienceOptions, RetryOptions,
    TimeoutOptions,
};
pub use pipeline::Pipeline;
pub use strategy::{Outcome, Strategy};
