//! cpflow orchestration engine
//!
//! Drives long-running desired-state changes against a remote control
//! plane: submit a request, poll the resulting operation on a fixed cadence
//! until it reaches a terminal state, and report exactly which declared
//! sub-entities failed and why.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  Orchestrator                   │
//! │        apply / apply_phased / delete / wait     │
//! └──────┬──────────────┬──────────────┬────────────┘
//!        │              │              │
//! ┌──────▼──────┐ ┌─────▼──────┐ ┌─────▼──────────┐
//! │  TaskGroup  │ │  PollLoop  │ │  StateManager  │
//! │  (phases)   │ │ (deadline) │ │ (.cpflow/)     │
//! └─────────────┘ └─────┬──────┘ └────────────────┘
//!                       │
//!         ┌─────────────▼─────────────┐
//!         │ classify ──▶ aggregate    │
//!         │ (StatusSnapshot + Desired)│
//!         └─────────────┬─────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────┐
//! │        trait ControlPlane { submit, ... }       │
//! │           (cpflow-hub implements it)            │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod aggregate;
pub mod classify;
pub mod desired;
pub mod error;
pub mod options;
pub mod orchestrator;
pub mod poll;
pub mod provider;
pub mod state;
pub mod status;
pub mod task_group;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-exports
pub use aggregate::{EntityFailure, aggregate, render_report};
pub use classify::{OperationState, classify, is_partial_failure};
pub use desired::{DesiredSpec, EntityKey, SubEntityRef};
pub use error::{CloudError, Result};
pub use options::{FailurePolicy, Options};
pub use orchestrator::{Orchestrator, Phase};
pub use poll::{Deadline, Observation, PollLoop, PollOutcome, PollResult};
pub use provider::{ControlPlane, Handle, ResourceRef, RetryConfig, SubmitRequest};
pub use state::{GlobalState, ResourceRecord, StateLock, StateManager};
pub use status::{Condition, StatusSnapshot, SubEntityStatus, TaskStatus};
pub use task_group::{GroupReport, GroupTask, TaskFailure, TaskGroup};
pub use tokio_util::sync::CancellationToken;
