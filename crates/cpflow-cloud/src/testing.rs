//! Scripted control plane for tests
//!
//! Replays queued status snapshots and errors and counts every call, so
//! orchestration flows can be driven deterministically under paused time.

use crate::error::{CloudError, Result};
use crate::provider::{ControlPlane, Handle, ResourceRef, SubmitRequest};
use crate::status::StatusSnapshot;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Project used by [`ScriptedControlPlane::request`]
pub const TEST_PROJECT: &str = "defaultproject";

/// Error to replay
#[derive(Debug, Clone)]
pub enum ScriptedError {
    NotFound(String),
    Api(String),
    Transport(String),
}

impl ScriptedError {
    fn into_error(self) -> CloudError {
        match self {
            ScriptedError::NotFound(m) => CloudError::ResourceNotFound(m),
            ScriptedError::Api(m) => CloudError::ApiError(m),
            ScriptedError::Transport(m) => CloudError::Transport(m),
        }
    }
}

#[derive(Debug, Clone)]
enum StatusStep {
    Snapshot(StatusSnapshot),
    Error(ScriptedError),
}

#[derive(Debug, Clone)]
enum LookupStep {
    Found(StatusSnapshot),
    Gone,
    Error(ScriptedError),
}

/// In-memory [`ControlPlane`].
///
/// Status and lookup scripts are consumed front to back; the last step
/// repeats forever. Resubmitting a resource with an unchanged payload yields
/// a no-op handle.
#[derive(Debug, Default)]
pub struct ScriptedControlPlane {
    always_noop: bool,
    submit_error: Option<ScriptedError>,
    delete_error: Option<ScriptedError>,
    read_delay: Duration,
    statuses: Mutex<VecDeque<StatusStep>>,
    lookups: Mutex<VecDeque<LookupStep>>,
    submitted: Mutex<HashMap<String, serde_json::Value>>,
    submits: AtomicU32,
    status_reads: AtomicU32,
    lookup_calls: AtomicU32,
    deletes: AtomicU32,
}

impl ScriptedControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// A request for `kind`/`name` in [`TEST_PROJECT`]
    pub fn request(kind: &str, name: &str) -> SubmitRequest {
        SubmitRequest::new(
            ResourceRef::new(kind, TEST_PROJECT, name),
            serde_json::json!({ "name": name }),
        )
    }

    /// Every submission is already satisfied
    pub fn with_noop_submit(mut self) -> Self {
        self.always_noop = true;
        self
    }

    pub fn with_submit_error(mut self, error: ScriptedError) -> Self {
        self.submit_error = Some(error);
        self
    }

    pub fn with_delete_error(mut self, error: ScriptedError) -> Self {
        self.delete_error = Some(error);
        self
    }

    /// Every status read and lookup takes this long
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn with_status(mut self, snapshot: StatusSnapshot) -> Self {
        self.statuses.get_mut().push_back(StatusStep::Snapshot(snapshot));
        self
    }

    pub fn with_statuses(mut self, snapshots: impl IntoIterator<Item = StatusSnapshot>) -> Self {
        self.statuses
            .get_mut()
            .extend(snapshots.into_iter().map(StatusStep::Snapshot));
        self
    }

    pub fn with_status_error(mut self, error: ScriptedError) -> Self {
        self.statuses.get_mut().push_back(StatusStep::Error(error));
        self
    }

    /// Queue a lookup result; `None` means the resource is gone
    pub fn with_lookup(mut self, snapshot: Option<StatusSnapshot>) -> Self {
        let step = match snapshot {
            Some(snapshot) => LookupStep::Found(snapshot),
            None => LookupStep::Gone,
        };
        self.lookups.get_mut().push_back(step);
        self
    }

    pub fn with_lookup_error(mut self, error: ScriptedError) -> Self {
        self.lookups.get_mut().push_back(LookupStep::Error(error));
        self
    }

    pub fn submit_count(&self) -> u32 {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn status_reads(&self) -> u32 {
        self.status_reads.load(Ordering::SeqCst)
    }

    pub fn lookup_count(&self) -> u32 {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }

    fn next<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    async fn delay(&self) {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
    }
}

#[async_trait]
impl ControlPlane for ScriptedControlPlane {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<Handle> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = &self.submit_error {
            return Err(error.clone().into_error());
        }
        if self.always_noop {
            return Ok(Handle::noop(request.resource.clone()));
        }

        let mut submitted = self.submitted.lock().await;
        let key = request.resource.key();
        if submitted.get(&key) == Some(&request.payload) {
            return Ok(Handle::noop(request.resource.clone()));
        }
        submitted.insert(key, request.payload.clone());
        Ok(Handle::issued(request.resource.clone(), format!("ts-{:04}", n)))
    }

    async fn get_status(&self, _handle: &Handle) -> Result<StatusSnapshot> {
        self.status_reads.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let step = Self::next(&mut *self.statuses.lock().await);
        match step {
            Some(StatusStep::Snapshot(snapshot)) => Ok(snapshot),
            Some(StatusStep::Error(error)) => Err(error.into_error()),
            None => Err(CloudError::ApiError("no scripted status".to_string())),
        }
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.delete_error {
            return Err(error.clone().into_error());
        }
        self.submitted.lock().await.remove(&resource.key());
        Ok(())
    }

    async fn lookup(&self, _resource: &ResourceRef) -> Result<Option<StatusSnapshot>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let step = Self::next(&mut *self.lookups.lock().await);
        match step {
            Some(LookupStep::Found(snapshot)) => Ok(Some(snapshot)),
            Some(LookupStep::Error(error)) => Err(error.into_error()),
            Some(LookupStep::Gone) | None => Ok(None),
        }
    }
}
