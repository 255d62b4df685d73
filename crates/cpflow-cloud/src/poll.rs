//! Poll loop
//!
//! Drives repeated status reads on a fixed cadence until one reports a
//! terminal [`OperationState`], the deadline fires, or the status endpoint
//! keeps failing. One loop is a single sequential control flow: tick, read,
//! classify, maybe loop again.

use crate::aggregate::{EntityFailure, render_report};
use crate::classify::OperationState;
use crate::error::{CloudError, Result};
use crate::options::Options;
use crate::status::StatusSnapshot;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Externally supplied stop signal: an optional instant plus a cancellation token
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Option<Instant>,
    token: CancellationToken,
}

impl Deadline {
    /// Deadline `after` from now
    pub fn after(after: Duration) -> Self {
        Self {
            at: Some(Instant::now() + after),
            token: CancellationToken::new(),
        }
    }

    /// Deadline that only fires when `token` is cancelled
    pub fn from_token(token: CancellationToken) -> Self {
        Self { at: None, token }
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancelled, or strictly past the deadline instant
    fn is_overdue(&self) -> bool {
        self.token.is_cancelled() || self.at.is_some_and(|at| Instant::now() > at)
    }

    /// Resolves once the deadline passes or the token is cancelled
    pub async fn expired(&self) {
        match self.at {
            Some(at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {}
                    _ = self.token.cancelled() => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}

/// What one status read observed on one tick
pub type Observation = (OperationState, Option<StatusSnapshot>);

/// Raw outcome of a poll loop, before failure aggregation
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub state: OperationState,
    pub last_snapshot: Option<StatusSnapshot>,
    /// Last transport error, set when the loop ended as `Fatal`
    pub last_error: Option<String>,
    /// Number of status reads performed
    pub polls: u32,
}

/// Fixed-cadence poll loop
#[derive(Debug, Clone)]
pub struct PollLoop {
    interval: Duration,
    max_transient_failures: u32,
    debug: bool,
}

const MIN_INTERVAL: Duration = Duration::from_millis(1);

impl PollLoop {
    /// A zero interval is raised to one millisecond and a zero failure
    /// threshold to one.
    pub fn new(interval: Duration, max_transient_failures: u32) -> Self {
        Self {
            interval: interval.max(MIN_INTERVAL),
            max_transient_failures: max_transient_failures.max(1),
            debug: false,
        }
    }

    pub fn from_options(options: &Options) -> Self {
        let mut poll = Self::new(options.poll_interval, options.max_transient_failures);
        poll.debug = options.debug;
        poll
    }

    /// Call `read` once per interval until it reports a terminal state.
    ///
    /// The first read happens one interval after entry. Read errors are
    /// transient until `max_transient_failures` of them happen in a row,
    /// which ends the loop as `Fatal`. A tick due exactly at the deadline
    /// still reads. A read still in flight when the deadline passes is
    /// abandoned, and a read that completes after cancellation is
    /// discarded; both end the loop as `TimedOut`.
    pub async fn run<F, Fut>(&self, deadline: &Deadline, mut read: F) -> PollOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation>>,
    {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot: Option<StatusSnapshot> = None;
        let mut consecutive_failures = 0u32;
        let mut polls = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = ticker.tick() => {}
                _ = deadline.expired() => {
                    tracing::debug!(polls, "deadline fired between ticks");
                    return timed_out(last_snapshot, polls);
                }
            }
            if deadline.is_overdue() {
                tracing::debug!(polls, "tick came due after the deadline");
                return timed_out(last_snapshot, polls);
            }

            polls += 1;
            let observed = tokio::select! {
                biased;
                observed = read() => observed,
                _ = deadline.expired() => {
                    tracing::debug!(polls, "abandoning status read still in flight at the deadline");
                    return timed_out(last_snapshot, polls);
                }
            };

            if deadline.is_cancelled() {
                tracing::debug!(polls, "discarding status read completed after cancellation");
                return timed_out(last_snapshot, polls);
            }

            match observed {
                Ok((state, snapshot)) => {
                    consecutive_failures = 0;
                    if let Some(snapshot) = snapshot {
                        if self.debug {
                            tracing::debug!(attempt = polls, ?snapshot, "status snapshot");
                        } else {
                            tracing::debug!(attempt = polls, condition = %snapshot.condition, "status snapshot");
                        }
                        last_snapshot = Some(snapshot);
                    }

                    if state.is_terminal() {
                        tracing::debug!(attempt = polls, %state, "terminal state reached");
                        return PollOutcome {
                            state,
                            last_snapshot,
                            last_error: None,
                            polls,
                        };
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        attempt = polls,
                        consecutive_failures,
                        "status read failed: {}",
                        e
                    );
                    if consecutive_failures >= self.max_transient_failures {
                        tracing::error!(
                            consecutive_failures,
                            "giving up after consecutive status read failures"
                        );
                        return PollOutcome {
                            state: OperationState::Fatal,
                            last_snapshot,
                            last_error: Some(e.to_string()),
                            polls,
                        };
                    }
                }
            }
        }
    }
}

fn timed_out(last_snapshot: Option<StatusSnapshot>, polls: u32) -> PollOutcome {
    PollOutcome {
        state: OperationState::TimedOut,
        last_snapshot,
        last_error: None,
        polls,
    }
}

/// Terminal output of one orchestration run. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct PollResult {
    state: OperationState,
    errors: Vec<EntityFailure>,
    warnings: Vec<EntityFailure>,
    last_snapshot: Option<StatusSnapshot>,
}

impl PollResult {
    pub(crate) fn new(
        state: OperationState,
        errors: Vec<EntityFailure>,
        warnings: Vec<EntityFailure>,
        last_snapshot: Option<StatusSnapshot>,
    ) -> Self {
        Self {
            state,
            errors,
            warnings,
            last_snapshot,
        }
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    /// Aggregated failures; empty for successful runs
    pub fn errors(&self) -> &[EntityFailure] {
        &self.errors
    }

    /// Failures downgraded by [`FailurePolicy::Warn`](crate::FailurePolicy::Warn)
    /// or reported by a task group that was allowed to continue
    pub fn warnings(&self) -> &[EntityFailure] {
        &self.warnings
    }

    pub fn last_snapshot(&self) -> Option<&StatusSnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.state.is_success()
    }

    /// Human-readable report
    pub fn render(&self) -> String {
        let mut out = format!("operation {}", self.state);
        if !self.errors.is_empty() {
            out.push_str(":\n");
            out.push_str(&render_report(&self.errors));
        }
        if !self.warnings.is_empty() {
            out.push_str("\nwarnings:\n");
            out.push_str(&render_report(&self.warnings));
        }
        out
    }

    /// Indented JSON report
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// `Ok` for complete, skipped and cancelled runs; `Err` otherwise
    pub fn into_result(self) -> Result<PollResult> {
        match self.state {
            OperationState::Complete | OperationState::Skipped | OperationState::Cancelled => {
                Ok(self)
            }
            OperationState::TimedOut => Err(CloudError::Timeout(self.render())),
            OperationState::Failed | OperationState::Fatal | OperationState::InProgress => {
                Err(CloudError::ApiError(self.render()))
            }
        }
    }
}
