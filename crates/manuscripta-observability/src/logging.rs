//! Logging initialization
//!
//! `RUST_LOG`, when set, wins over the configured level so operators can
//! raise verbosity for a single module without touching the config file.

use tracing_subscriber::EnvFilter;

use manuscripta_core::LoggingConfig;

use crate::error::{ObservabilityError, Result};

/// Noisy dependencies kept at `warn` unless `RUST_LOG` says otherwise
const QUIET_TARGETS: [&str; 3] = ["hyper_util=warn", "reqwest=warn", "rustls=warn"];

/// Filter for the configured level
pub fn filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let level = config.level.trim().to_lowercase();
    let mut filter = EnvFilter::try_new(&level).map_err(|e| ObservabilityError::Filter {
        directive: level.clone(),
        message: e.to_string(),
    })?;
    for target in QUIET_TARGETS {
        match target.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => tracing::warn!("Failed to set {} log filter: {}", target, e),
        }
    }
    Ok(filter)
}

/// Install the global subscriber.
///
/// Fails when a subscriber is already installed or the level does not parse.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if config.json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.with_target(false).try_init()
    };
    installed.map_err(|e| ObservabilityError::Subscriber(e.to_string()))
}
