//! Control-plane collaborator contract

use crate::error::Result;
use crate::status::StatusSnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote control-plane abstraction
///
/// The engine consumes an already-authenticated implementation of this trait
/// and never builds request payloads itself. Implementations are shared
/// read-only across concurrent task-group members.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Returns the control-plane name (e.g., "hub")
    fn name(&self) -> &str;

    /// Submit a desired-state change.
    ///
    /// Idempotent: an already-satisfied request yields a no-op handle.
    async fn submit(&self, request: &SubmitRequest) -> Result<Handle>;

    /// Read the current status of a submitted operation. Read-only.
    async fn get_status(&self, handle: &Handle) -> Result<StatusSnapshot>;

    /// Request deletion of a resource
    async fn delete(&self, resource: &ResourceRef) -> Result<()>;

    /// Look a resource up. `None` means the remote system does not know it.
    async fn lookup(&self, resource: &ResourceRef) -> Result<Option<StatusSnapshot>>;
}

/// Identity of a remote resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource kind (e.g., "cluster", "workload-identity")
    pub kind: String,

    /// Project the resource lives in
    pub project: String,

    /// Resource name
    pub name: String,
}

impl ResourceRef {
    pub fn new(
        kind: impl Into<String>,
        project: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            project: project.into(),
            name: name.into(),
        }
    }

    /// Get the full resource key (kind:project:name)
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.kind, self.project, self.name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.project, self.name)
    }
}

/// Ready-made request; payloads are built by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub resource: ResourceRef,

    /// Remote request payload
    pub payload: serde_json::Value,
}

impl SubmitRequest {
    pub fn new(resource: ResourceRef, payload: serde_json::Value) -> Self {
        Self { resource, payload }
    }
}

/// Identifier of one submitted operation (a taskset or job).
///
/// A handle without an id is the no-op sentinel: the remote system decided
/// nothing needed to change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    resource: ResourceRef,
    id: Option<String>,
}

impl Handle {
    pub fn issued(resource: ResourceRef, id: impl Into<String>) -> Self {
        Self {
            resource,
            id: Some(id.into()),
        }
    }

    pub fn noop(resource: ResourceRef) -> Self {
        Self { resource, id: None }
    }

    pub fn is_noop(&self) -> bool {
        self.id.is_none()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}", id),
            None => write!(f, "no-op"),
        }
    }
}

/// Retry configuration for task-group members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: std::time::Duration,

    /// Maximum delay between retries
    pub max_delay: std::time::Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// No retries: one attempt only
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed), capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exp);
        let max = self.max_delay.as_secs_f64();

        if !secs.is_finite() || secs < 0.0 || secs > max {
            self.max_delay
        } else {
            std::time::Duration::from_secs_f64(secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: std::time::Duration::from_secs(1),
            max_delay: std::time::Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}
