//! Bounded task group
//!
//! Runs independent remote sub-operations (per-node approve, per-node
//! configure, ...) concurrently and joins all of them before returning.
//! A failing member never cancels its siblings: every member runs to
//! completion and every failure is reported.

use crate::aggregate::EntityFailure;
use crate::error::Result;
use crate::options::Options;
use crate::provider::RetryConfig;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// One named, retryable member of a task group
#[derive(Clone)]
pub struct GroupTask {
    name: String,
    run: TaskFn,
}

impl GroupTask {
    /// `f` is called once per attempt
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move || Box::pin(f())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for GroupTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupTask").field("name", &self.name).finish()
    }
}

/// Failure of one member after its retries ran out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub name: String,
    pub reason: String,
    pub attempts: u32,
}

/// Joined outcome of a task group, in submission order
#[derive(Debug, Clone, Default)]
pub struct GroupReport {
    pub succeeded: Vec<String>,
    pub failures: Vec<TaskFailure>,
}

impl GroupReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures as report entries of the given entity type
    pub fn entity_failures(&self, entity_type: &str) -> Vec<EntityFailure> {
        self.failures
            .iter()
            .map(|f| EntityFailure::new(f.name.clone(), entity_type, f.reason.clone()))
            .collect()
    }
}

type MemberOutcome = std::result::Result<u32, (String, u32)>;

/// Fan-out/join executor with a concurrency cap
#[derive(Debug, Clone)]
pub struct TaskGroup {
    concurrency: usize,
    retry: RetryConfig,
}

impl TaskGroup {
    pub fn new(concurrency: usize, retry: RetryConfig) -> Self {
        Self {
            concurrency: concurrency.max(1),
            retry,
        }
    }

    pub fn from_options(options: &Options) -> Self {
        Self::new(options.task_concurrency, options.task_retry.clone())
    }

    /// Run every task and wait for all of them.
    ///
    /// Dropping the returned future aborts every member still running.
    pub async fn run(&self, tasks: Vec<GroupTask>) -> GroupReport {
        let names: Vec<String> = tasks.iter().map(|t| t.name.clone()).collect();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();

        for (index, task) in tasks.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let retry = self.retry.clone();
            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, Err(("task group closed".to_string(), 0)));
                };
                (index, run_with_retry(&task, &retry).await)
            });
        }

        let mut outcomes: Vec<Option<MemberOutcome>> = vec![None; names.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => tracing::warn!("task group member aborted: {}", e),
            }
        }

        let mut report = GroupReport::default();
        for (name, outcome) in names.into_iter().zip(outcomes) {
            match outcome {
                Some(Ok(attempts)) => {
                    tracing::debug!(task = %name, attempts, "task group member succeeded");
                    report.succeeded.push(name);
                }
                Some(Err((reason, attempts))) => {
                    tracing::warn!(task = %name, attempts, "task group member failed: {}", reason);
                    report.failures.push(TaskFailure {
                        name,
                        reason,
                        attempts,
                    });
                }
                None => report.failures.push(TaskFailure {
                    name,
                    reason: "task did not complete".to_string(),
                    attempts: 0,
                }),
            }
        }

        tracing::info!(
            succeeded = report.succeeded.len(),
            failed = report.failures.len(),
            "task group joined"
        );
        report
    }
}

async fn run_with_retry(task: &GroupTask, retry: &RetryConfig) -> MemberOutcome {
    let attempts = retry.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 0..attempts {
        match AssertUnwindSafe((task.run)()).catch_unwind().await {
            Ok(Ok(())) => return Ok(attempt + 1),
            Ok(Err(e)) => last_error = e.to_string(),
            // a panicking member is not retried
            Err(panic) => {
                return Err((
                    format!("task panicked: {}", panic_message(panic.as_ref())),
                    attempt + 1,
                ));
            }
        }

        if attempt + 1 < attempts {
            let delay = retry.delay_for_attempt(attempt);
            tracing::debug!(task = %task.name, attempt = attempt + 1, ?delay, "retrying: {}", last_error);
            tokio::time::sleep(delay).await;
        }
    }

    Err((last_error, attempts))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
