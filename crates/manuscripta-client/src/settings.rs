//! Client settings file
//!
//! The SDK defaults sit at the top level of the file, next to optional
//! `resilience` options and per-endpoint overrides:
//!
//! ```yaml
//! api_key: "global-key"
//! base_url: "https://api.manuscripta.io/v1"
//! timeout_seconds: 30
//! resilience:
//!   retry:
//!     max_attempts: 2
//! endpoints:
//!   journals.recommend:
//!     timeout:
//!       timeout_ms: 60000
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use manuscripta_core::SdkConfig;
use manuscripta_core::config::read_config_file;
use manuscripta_resilience::ResilienceOptions;

use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(flatten)]
    pub sdk: SdkConfig,

    /// Global pipeline options; derived from the SDK defaults when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resilience: Option<ResilienceOptions>,

    /// Options for individual endpoints, keyed like `journals.recommend`
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub endpoints: HashMap<String, ResilienceOptions>,
}

impl ClientSettings {
    pub fn new(sdk: SdkConfig) -> Self {
        Self {
            sdk,
            ..Default::default()
        }
    }

    /// Load settings from a YAML or TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(read_config_file(path)?)
    }

    /// Apply `MANUSCRIPTA_*` environment overrides to the SDK defaults
    pub fn merge_env(&mut self) {
        self.sdk.merge_env();
    }

    /// Global resilience options in effect
    pub fn resilience_options(&self) -> ResilienceOptions {
        self.resilience
            .clone()
            .unwrap_or_else(|| ResilienceOptions::from_sdk_config(&self.sdk))
    }

    pub fn validate(&self) -> Result<()> {
        self.sdk.validate()?;
        self.resilience_options().validate()?;
        for options in self.endpoints.values() {
            options.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_load_yaml_with_endpoint_overrides() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
api_key: "global-key"
base_url: "https://api.example.com/v1"
timeout_seconds: 12
endpoints:
  journals.recommend:
    timeout:
      timeout_ms: 60000
"#
        )
        .unwrap();

        let settings = ClientSettings::from_file(file.path()).unwrap();
        assert_eq!(settings.sdk.api_key.as_deref(), Some("global-key"));
        assert!(settings.resilience.is_none());
        assert_eq!(
            settings.resilience_options().timeout.timeout,
            Duration::from_secs(12)
        );
        assert_eq!(
            settings.endpoints["journals.recommend"].timeout.timeout,
            Duration::from_secs(60)
        );
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_toml_with_resilience_section() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
base_url = "https://api.example.com/v1"

[resilience.retry]
max_attempts = 1
backoff_type = "constant"
"#
        )
        .unwrap();

        let settings = ClientSettings::from_file(file.path()).unwrap();
        let options = settings.resilience_options();
        assert_eq!(options.retry.max_attempts, 1);
        assert!(options.rate_limiting.enabled);
    }

    #[test]
    fn test_invalid_endpoint_options_fail_validation() {
        let mut settings = ClientSettings::default();
        let mut broken = ResilienceOptions::default();
        broken.rate_limiting.permit_limit = 0;
        settings.endpoints.insert("manuscripts.get".to_string(), broken);
        assert!(settings.validate().is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_env_overrides_file_and_derived_pipeline() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "api_key: file-key\ntimeout_seconds: 30\nretry_delay_ms: 200").unwrap();

        unsafe {
            std::env::set_var("MANUSCRIPTA_API_KEY", "env-key");
            std::env::set_var("MANUSCRIPTA_TIMEOUT_SECONDS", "7");
        }
        let mut settings = ClientSettings::from_file(file.path()).unwrap();
        settings.merge_env();
        unsafe {
            std::env::remove_var("MANUSCRIPTA_API_KEY");
            std::env::remove_var("MANUSCRIPTA_TIMEOUT_SECONDS");
        }

        assert_eq!(settings.sdk.api_key.as_deref(), Some("env-key"));
        let options = settings.resilience_options();
        assert_eq!(options.timeout.timeout, Duration::from_secs(7));
        assert_eq!(options.retry.delay, Duration::from_millis(200));
    }
}
