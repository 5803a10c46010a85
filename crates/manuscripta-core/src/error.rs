//! Error types for Manuscripta Core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Multi-tenancy errors
    #[error("Invalid tenant: {0}")]
    InvalidTenant(String),

    #[error("No tenant context available")]
    NoTenantContext,

    #[error("No tenant scope is active on the current task")]
    NoTenantScope,

    #[error("Tenant '{organization_code}' has no API key configured")]
    MissingApiKey { organization_code: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration not found")]
    ConfigNotFound,

    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error stems from missing or invalid configuration.
    ///
    /// Configuration errors are fatal to the current call and never retried.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Error::NoTenantContext
                | Error::MissingApiKey { .. }
                | Error::Config(_)
                | Error::ConfigNotFound
                | Error::ConfigValidation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
