//! Local state for orchestrated resources
//!
//! Manages the `.cpflow/state.json` file which records, per resource, the
//! last handle issued by the control plane and the outcome of the last run.

use crate::aggregate::EntityFailure;
use crate::classify::OperationState;
use crate::error::{CloudError, Result};
use crate::poll::PollResult;
use crate::provider::{Handle, ResourceRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".cpflow";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// All recorded resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    /// State file version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Records indexed by kind:project:name
    pub resources: HashMap<String, ResourceRecord>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            resources: HashMap::new(),
        }
    }
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records of one resource kind
    pub fn records_of_kind(&self, kind: &str) -> Vec<&ResourceRecord> {
        self.resources
            .values()
            .filter(|r| r.resource.kind == kind)
            .collect()
    }

    /// Add or update a record
    pub fn set_record(&mut self, record: ResourceRecord) {
        self.resources.insert(record.resource.key(), record);
        self.updated_at = Utc::now();
    }

    /// Remove a record
    pub fn remove_record(&mut self, resource: &ResourceRef) -> Option<ResourceRecord> {
        let result = self.resources.remove(&resource.key());
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    pub fn get_record(&self, resource: &ResourceRef) -> Option<&ResourceRecord> {
        self.resources.get(&resource.key())
    }
}

/// Last known outcome for one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource: ResourceRef,

    /// Id of the last handle issued; `None` after a no-op or failed submission
    pub handle: Option<String>,

    pub state: OperationState,

    #[serde(default)]
    pub failures: Vec<EntityFailure>,

    #[serde(default)]
    pub warnings: Vec<EntityFailure>,

    pub updated_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn from_result(resource: &ResourceRef, handle: Option<&Handle>, result: &PollResult) -> Self {
        Self {
            resource: resource.clone(),
            handle: handle.and_then(|h| h.id()).map(str::to_string),
            state: result.state(),
            failures: result.errors().to_vec(),
            warnings: result.warnings().to_vec(),
            updated_at: Utc::now(),
        }
    }

    /// A run that ended without a terminal verdict from the remote system
    /// can be resumed by polling the recorded handle again
    pub fn is_resumable(&self) -> bool {
        self.handle.is_some() && self.state == OperationState::TimedOut
    }

    /// Handle to resume polling with
    pub fn handle(&self) -> Option<Handle> {
        self.handle
            .as_ref()
            .map(|id| Handle::issued(self.resource.clone(), id.clone()))
    }
}

/// State manager for reading/writing state files
#[derive(Debug, Clone)]
pub struct StateManager {
    /// Project root directory
    project_root: PathBuf,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
        }
    }

    fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(STATE_BACKUP)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load the current state
    pub async fn load(&self) -> Result<GlobalState> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("State file not found, returning empty state");
            return Ok(GlobalState::new());
        }

        let content = fs::read_to_string(&path).await?;
        let state: GlobalState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!("Loaded state with {} resources", state.resources.len());
        Ok(state)
    }

    /// Save the state, keeping the previous file as a backup
    pub async fn save(&self, state: &GlobalState) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let backup = self.backup_path();

        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
        }

        let content = serde_json::to_string_pretty(state)?;
        fs::write(&path, content).await?;

        tracing::debug!("Saved state with {} resources", state.resources.len());
        Ok(())
    }

    /// Record the outcome of a run under the state lock
    pub async fn record(
        &self,
        resource: &ResourceRef,
        handle: Option<&Handle>,
        result: &PollResult,
    ) -> Result<()> {
        let lock = self.acquire_lock().await?;
        let mut state = self.load().await?;
        state.set_record(ResourceRecord::from_result(resource, handle, result));
        self.save(&state).await?;
        lock.release().await
    }

    /// Drop the record of a resource that no longer exists remotely
    pub async fn forget(&self, resource: &ResourceRef) -> Result<()> {
        let lock = self.acquire_lock().await?;
        let mut state = self.load().await?;
        if state.remove_record(resource).is_some() {
            self.save(&state).await?;
        }
        lock.release().await
    }

    /// Acquire a lock for exclusive access
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            // Locks older than an hour are considered stale
            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < 1 {
                return Err(CloudError::LockError(format!(
                    "State is locked by {} since {}",
                    lock_info.holder, lock_info.acquired_at
                )));
            }

            tracing::warn!("Removing stale lock from {}", lock_info.holder);
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&lock_info)?;
        fs::write(&lock_path, content).await?;

        tracing::debug!("Acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for state lock
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
