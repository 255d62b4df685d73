//! Orchestration options

use crate::error::{CloudError, Result};
use crate::provider::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do when declared sub-entities fail while the overall operation
/// reports success
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Fail the operation (default)
    #[default]
    Abort,
    /// Report the failures as warnings and succeed
    Warn,
}

impl FailurePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "abort" | "error" => Some(Self::Abort),
            "warn" | "warning" => Some(Self::Warn),
            _ => None,
        }
    }
}

/// Options threaded through one [`Orchestrator`](crate::Orchestrator)
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Time between two status reads
    pub poll_interval: Duration,

    /// Overall deadline of one poll phase
    pub deadline: Duration,

    /// The poll loop gives up as `Fatal` once this many status reads fail in a row
    pub max_transient_failures: u32,

    pub sub_entity_failures: FailurePolicy,

    /// Log full snapshots on every tick
    pub debug: bool,

    /// Upper bound on concurrently running task-group members
    pub task_concurrency: usize,

    pub task_retry: RetryConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            deadline: Duration::from_secs(60 * 60),
            max_transient_failures: 5,
            sub_entity_failures: FailurePolicy::Abort,
            debug: false,
            task_concurrency: 8,
            task_retry: RetryConfig::default(),
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_max_transient_failures(mut self, max: u32) -> Self {
        self.max_transient_failures = max;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.sub_entity_failures = policy;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_task_concurrency(mut self, concurrency: usize) -> Self {
        self.task_concurrency = concurrency;
        self
    }

    pub fn with_task_retry(mut self, retry: RetryConfig) -> Self {
        self.task_retry = retry;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(CloudError::InvalidConfig(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.deadline.is_zero() {
            return Err(CloudError::InvalidConfig(
                "deadline must be greater than zero".to_string(),
            ));
        }
        if self.task_concurrency == 0 {
            return Err(CloudError::InvalidConfig(
                "task concurrency must be at least 1".to_string(),
            ));
        }
        if self.task_retry.max_attempts == 0 {
            return Err(CloudError::InvalidConfig(
                "task retry needs at least one attempt".to_string(),
            ));
        }
        Ok(())
    }
}
