//! Orchestrator
//!
//! Composes submission, optional intermediate task-group phases, the poll
//! loop, classification and failure aggregation into one call that always
//! produces a [`PollResult`].

use crate::aggregate::{EntityFailure, aggregate};
use crate::classify::{OperationState, classify, is_partial_failure};
use crate::desired::DesiredSpec;
use crate::error::Result;
use crate::options::{FailurePolicy, Options};
use crate::poll::{Deadline, PollLoop, PollOutcome, PollResult};
use crate::provider::{ControlPlane, Handle, ResourceRef, SubmitRequest};
use crate::state::StateManager;
use crate::task_group::{GroupTask, TaskGroup};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A named set of independent remote sub-operations run between submission
/// and the final poll (e.g. approving every node of a cluster)
#[derive(Debug, Clone)]
pub struct Phase {
    name: String,
    /// Entity type failed members are reported under
    entity_type: String,
    tasks: Vec<GroupTask>,
}

impl Phase {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            tasks: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: GroupTask) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_tasks(mut self, tasks: impl IntoIterator<Item = GroupTask>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn tasks(&self) -> &[GroupTask] {
        &self.tasks
    }
}

/// Drives desired-state changes against one control plane
pub struct Orchestrator<P: ControlPlane + ?Sized> {
    plane: Arc<P>,
    options: Options,
    state: Option<StateManager>,
}

impl<P: ControlPlane + ?Sized> Orchestrator<P> {
    pub fn new(plane: Arc<P>, options: Options) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            plane,
            options,
            state: None,
        })
    }

    /// Record the outcome of every run in local state
    pub fn with_state(mut self, manager: StateManager) -> Self {
        self.state = Some(manager);
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn plane(&self) -> &Arc<P> {
        &self.plane
    }

    /// Submit `request` and poll it to a terminal state.
    pub async fn apply(
        &self,
        desired: &DesiredSpec,
        request: &SubmitRequest,
        cancel: &CancellationToken,
    ) -> PollResult {
        self.apply_phased(desired, request, Vec::new(), cancel).await
    }

    /// Submit `request`, run each phase to completion in order, then poll the
    /// submitted operation to a terminal state.
    ///
    /// A no-op submission skips both the phases and the poll. Under
    /// [`FailurePolicy::Abort`] the first phase with a failing member ends the
    /// run as `Failed`; under [`FailurePolicy::Warn`] its failures become
    /// warnings and the run continues. One deadline covers the phases and the
    /// poll; when it fires during a phase, the members still running are
    /// aborted and the run ends as `TimedOut`.
    pub async fn apply_phased(
        &self,
        desired: &DesiredSpec,
        request: &SubmitRequest,
        phases: Vec<Phase>,
        cancel: &CancellationToken,
    ) -> PollResult {
        let resource = &request.resource;
        let deadline = Deadline::after(self.options.deadline).with_token(cancel.clone());
        tracing::info!(plane = self.plane.name(), resource = %resource, "submitting");

        let handle = match self.plane.submit(request).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(resource = %resource, "submission failed: {}", e);
                let result = PollResult::new(
                    OperationState::Fatal,
                    vec![EntityFailure::new(
                        resource.name.clone(),
                        resource.kind.clone(),
                        format!("submission failed: {}", e),
                    )],
                    Vec::new(),
                    None,
                );
                self.record(resource, None, &result).await;
                return result;
            }
        };

        if handle.is_noop() {
            tracing::info!(resource = %resource, "already in the desired state, nothing to do");
            let result = PollResult::new(OperationState::Complete, Vec::new(), Vec::new(), None);
            self.record(resource, Some(&handle), &result).await;
            return result;
        }
        tracing::info!(resource = %resource, handle = %handle, "submitted");

        let mut warnings = Vec::new();
        let group = TaskGroup::from_options(&self.options);
        for phase in phases {
            tracing::info!(phase = %phase.name, tasks = phase.tasks.len(), "running phase");
            let report = tokio::select! {
                biased;
                report = group.run(phase.tasks) => report,
                _ = deadline.expired() => {
                    tracing::warn!(phase = %phase.name, "deadline fired during phase, aborting its tasks");
                    let result = PollResult::new(
                        OperationState::TimedOut,
                        vec![EntityFailure::overall(format!(
                            "phase {} did not finish before the deadline",
                            phase.name
                        ))],
                        warnings,
                        None,
                    );
                    self.record(resource, Some(&handle), &result).await;
                    return result;
                }
            };
            if report.is_success() {
                continue;
            }

            let failures = report.entity_failures(&phase.entity_type);
            match self.options.sub_entity_failures {
                FailurePolicy::Abort => {
                    tracing::error!(
                        phase = %phase.name,
                        failed = failures.len(),
                        "phase failed, aborting"
                    );
                    let result =
                        PollResult::new(OperationState::Failed, failures, warnings, None);
                    self.record(resource, Some(&handle), &result).await;
                    return result;
                }
                FailurePolicy::Warn => {
                    tracing::warn!(
                        phase = %phase.name,
                        failed = failures.len(),
                        "phase had failures, continuing"
                    );
                    warnings.extend(failures);
                }
            }
        }

        let result = self.poll_handle(&handle, desired, &deadline, warnings).await;
        self.record(resource, Some(&handle), &result).await;
        result
    }

    /// Poll an already-submitted operation, e.g. one recorded in local state
    /// by a run that timed out.
    pub async fn wait(
        &self,
        handle: &Handle,
        desired: &DesiredSpec,
        cancel: &CancellationToken,
    ) -> PollResult {
        let deadline = Deadline::after(self.options.deadline).with_token(cancel.clone());
        let result = self.poll_handle(handle, desired, &deadline, Vec::new()).await;
        self.record(handle.resource(), Some(handle), &result).await;
        result
    }

    /// Request deletion of `resource` and poll until the remote system no
    /// longer knows it.
    pub async fn delete(&self, resource: &ResourceRef, cancel: &CancellationToken) -> PollResult {
        tracing::info!(plane = self.plane.name(), resource = %resource, "deleting");

        if let Err(e) = self.plane.delete(resource).await {
            if e.is_not_found() {
                tracing::info!(resource = %resource, "already gone");
                let result =
                    PollResult::new(OperationState::Complete, Vec::new(), Vec::new(), None);
                self.forget(resource).await;
                return result;
            }

            tracing::error!(resource = %resource, "deletion request failed: {}", e);
            let result = PollResult::new(
                OperationState::Fatal,
                vec![EntityFailure::new(
                    resource.name.clone(),
                    resource.kind.clone(),
                    format!("deletion request failed: {}", e),
                )],
                Vec::new(),
                None,
            );
            self.record(resource, None, &result).await;
            return result;
        }

        let deadline = Deadline::after(self.options.deadline).with_token(cancel.clone());
        let plane = &*self.plane;
        let outcome = PollLoop::from_options(&self.options)
            .run(&deadline, move || async move {
                match plane.lookup(resource).await {
                    Ok(None) => Ok((OperationState::Complete, None)),
                    Err(e) if e.is_not_found() => Ok((OperationState::Complete, None)),
                    Ok(Some(snapshot)) => {
                        let state = if snapshot.condition.is_failure() {
                            OperationState::Failed
                        } else {
                            OperationState::InProgress
                        };
                        Ok((state, Some(snapshot)))
                    }
                    Err(e) => Err(e),
                }
            })
            .await;

        let result = self.conclude(outcome, &DesiredSpec::new(), Vec::new());
        if result.state() == OperationState::Complete {
            self.forget(resource).await;
        } else {
            self.record(resource, None, &result).await;
        }
        result
    }

    async fn poll_handle(
        &self,
        handle: &Handle,
        desired: &DesiredSpec,
        deadline: &Deadline,
        warnings: Vec<EntityFailure>,
    ) -> PollResult {
        if handle.is_noop() {
            return PollResult::new(OperationState::Complete, Vec::new(), warnings, None);
        }

        let plane = &*self.plane;
        let outcome = PollLoop::from_options(&self.options)
            .run(deadline, move || async move {
                plane
                    .get_status(handle)
                    .await
                    .map(|snapshot| (classify(&snapshot, desired), Some(snapshot)))
            })
            .await;

        tracing::info!(
            handle = %handle,
            state = %outcome.state,
            polls = outcome.polls,
            "poll finished"
        );
        self.conclude(outcome, desired, warnings)
    }

    /// Turn a raw poll outcome into a report
    fn conclude(
        &self,
        outcome: PollOutcome,
        desired: &DesiredSpec,
        mut warnings: Vec<EntityFailure>,
    ) -> PollResult {
        let snapshot = outcome.last_snapshot;
        match outcome.state {
            OperationState::Failed => {
                let failures = match &snapshot {
                    Some(snapshot) => aggregate(desired, snapshot),
                    None => vec![EntityFailure::overall("failed without a reported reason")],
                };

                let downgrade = self.options.sub_entity_failures == FailurePolicy::Warn
                    && snapshot
                        .as_ref()
                        .is_some_and(|s| is_partial_failure(s, desired));
                if downgrade {
                    tracing::warn!(
                        failed = failures.len(),
                        "sub-entity failures reported as warnings"
                    );
                    warnings.extend(failures);
                    PollResult::new(OperationState::Complete, Vec::new(), warnings, snapshot)
                } else {
                    PollResult::new(OperationState::Failed, failures, warnings, snapshot)
                }
            }
            OperationState::Fatal => {
                let reason = outcome
                    .last_error
                    .unwrap_or_else(|| "status endpoint unavailable".to_string());
                PollResult::new(
                    OperationState::Fatal,
                    vec![EntityFailure::overall(format!(
                        "status reads kept failing: {}",
                        reason
                    ))],
                    warnings,
                    snapshot,
                )
            }
            OperationState::TimedOut | OperationState::InProgress => PollResult::new(
                OperationState::TimedOut,
                vec![EntityFailure::overall(
                    "did not reach a terminal state before the deadline",
                )],
                warnings,
                snapshot,
            ),
            state @ (OperationState::Skipped | OperationState::Cancelled) => {
                if let Some(reason) = snapshot.as_ref().and_then(|s| s.reason.clone()) {
                    warnings.push(EntityFailure::overall(reason));
                }
                PollResult::new(state, Vec::new(), warnings, snapshot)
            }
            OperationState::Complete => {
                PollResult::new(OperationState::Complete, Vec::new(), warnings, snapshot)
            }
        }
    }

    async fn record(&self, resource: &ResourceRef, handle: Option<&Handle>, result: &PollResult) {
        let Some(manager) = &self.state else {
            return;
        };
        if let Err(e) = manager.record(resource, handle, result).await {
            tracing::warn!(resource = %resource, "failed to record state: {}", e);
        }
    }

    async fn forget(&self, resource: &ResourceRef) {
        let Some(manager) = &self.state else {
            return;
        };
        if let Err(e) = manager.forget(resource).await {
            tracing::warn!(resource = %resource, "failed to update state: {}", e);
        }
    }
}
