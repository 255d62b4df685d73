//! Orchestration settings file
//!
//! ```yaml
//! poll_interval_secs: 10
//! deadline_minutes: 90
//! max_transient_failures: 5
//! sub_entity_failures: warn
//! debug: false
//! task_concurrency: 4
//! task_retry:
//!   max_attempts: 3
//!   initial_delay_secs: 1
//!   max_delay_secs: 30
//!   backoff_multiplier: 2.0
//! hub:
//!   base_url: https://console.example.com
//!   project: defaultproject
//! ```

use crate::error::{ConfigError, Result};
use cpflow_cloud::{FailurePolicy, Options, RetryConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Raw settings as written in `cpflow.yaml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub poll_interval_secs: Option<u64>,
    pub deadline_minutes: Option<u64>,
    pub max_transient_failures: Option<u32>,
    pub sub_entity_failures: Option<FailurePolicy>,
    pub debug: Option<bool>,
    pub task_concurrency: Option<usize>,
    pub task_retry: Option<RetrySettings>,
    pub hub: Option<HubSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: Option<u32>,
    pub initial_delay_secs: Option<u64>,
    pub max_delay_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

/// Where the hub lives. Credentials never go in this file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubSettings {
    pub base_url: String,
    #[serde(default)]
    pub project: Option<String>,
}

impl Settings {
    /// Parse settings from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        // an empty file is valid and means "all defaults"
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply the settings on top of [`Options::default`] and validate the result
    pub fn into_options(self) -> Result<Options> {
        let mut options = Options::default();

        if let Some(secs) = self.poll_interval_secs {
            options.poll_interval = Duration::from_secs(secs);
        }
        if let Some(minutes) = self.deadline_minutes {
            options.deadline = Duration::from_secs(minutes.saturating_mul(60));
        }
        if let Some(max) = self.max_transient_failures {
            options.max_transient_failures = max;
        }
        if let Some(policy) = self.sub_entity_failures {
            options.sub_entity_failures = policy;
        }
        if let Some(debug) = self.debug {
            options.debug = debug;
        }
        if let Some(concurrency) = self.task_concurrency {
            options.task_concurrency = concurrency;
        }
        if let Some(retry) = self.task_retry {
            options.task_retry = retry.apply(options.task_retry);
        }

        options
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(options)
    }
}

impl RetrySettings {
    fn apply(self, mut retry: RetryConfig) -> RetryConfig {
        if let Some(attempts) = self.max_attempts {
            retry.max_attempts = attempts;
        }
        if let Some(secs) = self.initial_delay_secs {
            retry.initial_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = self.max_delay_secs {
            retry.max_delay = Duration::from_secs(secs);
        }
        if let Some(multiplier) = self.backoff_multiplier {
            retry.backoff_multiplier = multiplier;
        }
        retry
    }
}

/// Read and parse a settings file
pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let settings = Settings::from_yaml(&content)?;
    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}
