//! Error types for the Manuscripta client

use thiserror::Error;

use manuscripta_resilience::ResilienceError;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The API answered with a non-success status
    #[error("API error {status}: {message}")]
    Api {
        status: u16,
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// Input rejected before any request was sent
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Core(manuscripta_core::Error),

    #[error(transparent)]
    Resilience(ResilienceError),

    #[error("Webhook error: {0}")]
    Webhook(String),
}

impl ClientError {
    /// Missing tenant, missing API key or invalid configuration
    pub fn is_configuration_error(&self) -> bool {
        match self {
            ClientError::Core(e) => e.is_configuration_error(),
            _ => false,
        }
    }

    /// Retry-After hint carried by rate limit responses or rejections
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ClientError::Api {
                retry_after_secs, ..
            } => *retry_after_secs,
            ClientError::Resilience(ResilienceError::RateLimited { retry_after, .. }) => {
                retry_after.map(|d| d.as_secs())
            }
            _ => None,
        }
    }
}

impl From<manuscripta_core::Error> for ClientError {
    fn from(error: manuscripta_core::Error) -> Self {
        ClientError::Core(error)
    }
}

/// Failures raised by the operation itself surface unwrapped, so a missing
/// tenant reads as a configuration error rather than a pipeline failure.
impl From<ResilienceError> for ClientError {
    fn from(error: ResilienceError) -> Self {
        match error {
            ResilienceError::Operation(inner) => ClientError::Core(inner),
            other => ClientError::Resilience(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
