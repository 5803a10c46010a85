use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error(transparent)]
    Resilience(#[from] manuscripta_resilience::ResilienceError),

    #[error("Invalid log filter '{directive}': {message}")]
    Filter { directive: String, message: String },

    #[error("Failed to install subscriber: {0}")]
    Subscriber(String),
}

pub type Result<T> = std::result::Result<T, ObservabilityError>;
