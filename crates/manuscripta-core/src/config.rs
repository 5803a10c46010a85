//! SDK configuration
//!
//! `SdkConfig` is the global default configuration every tenant falls back
//! to. It can be loaded from a YAML or TOML file (chosen by extension) and
//! overridden by `MANUSCRIPTA_*` environment variables.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use url::Url;

use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.manuscripta.io/v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Largest manuscript upload accepted, in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_true")]
    pub validate_ssl: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            timeout_seconds: default_timeout_seconds(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            max_file_size: default_max_file_size(),
            validate_ssl: true,
            user_agent: default_user_agent(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl SdkConfig {
    /// Load configuration from a YAML or TOML file
    ///
    /// # Errors
    /// - `Error::ConfigNotFound` if the file doesn't exist
    /// - `Error::Config` if the file can't be parsed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        read_config_file(path)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        if let Ok(val) = std::env::var("MANUSCRIPTA_API_KEY") {
            self.api_key = Some(val);
        }

        if let Ok(val) = std::env::var("MANUSCRIPTA_BASE_URL") {
            self.base_url = val;
        }

        if let Ok(val) = std::env::var("MANUSCRIPTA_TIMEOUT_SECONDS") {
            match val.parse::<u64>() {
                Ok(secs) => self.timeout_seconds = secs,
                Err(_) => warn!(value = %val, "Ignoring invalid MANUSCRIPTA_TIMEOUT_SECONDS"),
            }
        }

        if let Ok(val) = std::env::var("MANUSCRIPTA_MAX_RETRY_ATTEMPTS") {
            match val.parse::<u32>() {
                Ok(attempts) => self.max_retry_attempts = attempts,
                Err(_) => warn!(value = %val, "Ignoring invalid MANUSCRIPTA_MAX_RETRY_ATTEMPTS"),
            }
        }

        if let Ok(val) = std::env::var("MANUSCRIPTA_RETRY_DELAY_MS") {
            match val.parse::<u64>() {
                Ok(ms) => self.retry_delay_ms = ms,
                Err(_) => warn!(value = %val, "Ignoring invalid MANUSCRIPTA_RETRY_DELAY_MS"),
            }
        }

        if let Ok(val) = std::env::var("MANUSCRIPTA_USER_AGENT") {
            self.user_agent = val;
        }

        if let Ok(val) = std::env::var("MANUSCRIPTA_VALIDATE_SSL") {
            if let Ok(enabled) = val.parse::<bool>() {
                self.validate_ssl = enabled;
            }
        }

        if let Ok(val) = std::env::var("MANUSCRIPTA_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Check that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            Error::ConfigValidation(format!("Invalid base_url '{}': {}", self.base_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::ConfigValidation(format!(
                "base_url must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.timeout_seconds == 0 {
            return Err(Error::ConfigValidation(
                "timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(Error::ConfigValidation(
                "user_agent must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_home(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

/// Read and parse a YAML or TOML config file into any deserializable type
pub fn read_config_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = expand_home(path)?;
    if !path.exists() {
        return Err(Error::ConfigNotFound);
    }

    let contents = std::fs::read_to_string(&path).map_err(|e| {
        error!("Failed to read config file: {}", e);
        Error::Io(e)
    })?;

    let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
        toml::from_str(&contents).map_err(|e| {
            error!("Failed to parse TOML config: {}", e);
            Error::Config(format!("Invalid TOML: {}", e))
        })?
    } else {
        // Default to YAML
        serde_yaml::from_str(&contents).map_err(|e| {
            error!("Failed to parse YAML config: {}", e);
            Error::Config(format!("Invalid YAML: {}", e))
        })?
    };

    debug!(path = %path.display(), "Loaded config file");
    Ok(config)
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}

fn default_user_agent() -> String {
    format!("manuscripta-rs/{}", env!("CARGO_PKG_VERSION"))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
