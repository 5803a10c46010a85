//! Resilience options
//!
//! One `ResilienceOptions` value compiles into one pipeline. Durations are
//! (de)serialized as milliseconds so they read naturally in YAML and TOML
//! configuration files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use manuscripta_core::SdkConfig;

use crate::error::{ResilienceError, Result};

/// Options for every stage of a pipeline
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResilienceOptions {
    #[serde(default)]
    pub rate_limiting: RateLimitingOptions,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerOptions,

    #[serde(default)]
    pub retry: RetryOptions,

    #[serde(default)]
    pub timeout: TimeoutOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitingOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Permits available per window
    #[serde(default = "default_permit_limit")]
    pub permit_limit: u32,

    #[serde(default = "default_window", rename = "window_ms", with = "duration_ms")]
    pub window: Duration,

    #[serde(default = "default_segments_per_window")]
    pub segments_per_window: u32,

    /// Callers allowed to wait for a permit; 0 rejects immediately
    #[serde(default)]
    pub queue_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Share of failed calls in the sampling window that opens the circuit
    #[serde(default = "default_failure_ratio")]
    pub failure_ratio: f64,

    /// Calls needed in the sampling window before the ratio is considered
    #[serde(default = "default_minimum_throughput")]
    pub minimum_throughput: u32,

    #[serde(
        default = "default_sampling_duration",
        rename = "sampling_duration_ms",
        with = "duration_ms"
    )]
    pub sampling_duration: Duration,

    #[serde(
        default = "default_break_duration",
        rename = "break_duration_ms",
        with = "duration_ms"
    )]
    pub break_duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffType {
    Constant,
    Linear,
    #[default]
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Retries after the first attempt
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_delay", rename = "delay_ms", with = "duration_ms")]
    pub delay: Duration,

    #[serde(default, rename = "backoff_type")]
    pub backoff: BackoffType,

    #[serde(default = "default_true")]
    pub use_jitter: bool,

    /// Upper bound for a single computed delay
    #[serde(default = "default_max_delay", rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_timeout", rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

fn default_true() -> bool {
    true
}

fn default_permit_limit() -> u32 {
    100
}

fn default_window() -> Duration {
    Duration::from_secs(1)
}

fn default_segments_per_window() -> u32 {
    10
}

fn default_failure_ratio() -> f64 {
    0.5
}

fn default_minimum_throughput() -> u32 {
    10
}

fn default_sampling_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_break_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for RateLimitingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            permit_limit: default_permit_limit(),
            window: default_window(),
            segments_per_window: default_segments_per_window(),
            queue_limit: 0,
        }
    }
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_ratio: default_failure_ratio(),
            minimum_throughput: default_minimum_throughput(),
            sampling_duration: default_sampling_duration(),
            break_duration: default_break_duration(),
        }
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            delay: default_delay(),
            backoff: BackoffType::default(),
            use_jitter: true,
            max_delay: default_max_delay(),
        }
    }
}

impl Default for TimeoutOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: default_timeout(),
        }
    }
}

impl ResilienceOptions {
    /// Options seeded from the SDK defaults: request timeout, retry count and
    /// retry delay come from the config, everything else keeps its default.
    pub fn from_sdk_config(config: &SdkConfig) -> Self {
        let mut options = Self::default();
        options.timeout.timeout = Duration::from_secs(config.timeout_seconds);
        options.retry.max_attempts = config.max_retry_attempts;
        options.retry.delay = Duration::from_millis(config.retry_delay_ms);
        options
    }

    /// Check the options can be compiled into a pipeline.
    ///
    /// Disabled stages are not checked.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;
        if rl.enabled {
            if rl.permit_limit == 0 {
                return invalid("rate_limiting.permit_limit must be greater than 0");
            }
            if rl.segments_per_window == 0 {
                return invalid("rate_limiting.segments_per_window must be at least 1");
            }
            if rl.window.is_zero() {
                return invalid("rate_limiting.window must be greater than 0");
            }
        }

        let cb = &self.circuit_breaker;
        if cb.enabled {
            if !(cb.failure_ratio > 0.0 && cb.failure_ratio <= 1.0) {
                return invalid("circuit_breaker.failure_ratio must be in (0, 1]");
            }
            if cb.minimum_throughput == 0 {
                return invalid("circuit_breaker.minimum_throughput must be at least 1");
            }
            if cb.sampling_duration.is_zero() || cb.break_duration.is_zero() {
                return invalid("circuit_breaker durations must be greater than 0");
            }
        }

        if self.timeout.enabled && self.timeout.timeout.is_zero() {
            return invalid("timeout.timeout must be greater than 0");
        }

        Ok(())
    }
}

fn invalid(message: &str) -> Result<()> {
    Err(ResilienceError::InvalidOptions(message.to_string()))
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
