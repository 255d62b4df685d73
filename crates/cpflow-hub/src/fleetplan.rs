//! Fleet-plan jobs
//!
//! Executing a fleet plan starts a named job. Jobs cannot be deleted; a
//! teardown only drops the local record.

use crate::client::{HubClient, project_path};
use async_trait::async_trait;
use cpflow_cloud::{
    CloudError, Condition, ControlPlane, Handle, ResourceRef, Result, StatusSnapshot,
    SubmitRequest,
};
use serde::Deserialize;

pub const KIND: &str = "fleet-plan";

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    metadata: JobMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct JobMetadata {
    #[serde(default)]
    name: String,
}

/// Job status document
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    #[serde(default)]
    job_status: JobStatus,
}

#[derive(Debug, Default, Deserialize)]
struct JobStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    reason: String,
}

/// Fleet-plan jobs use their own lower-case vocabulary; anything
/// unrecognised means the job is still running.
pub fn condition_from_job(status: &str) -> Condition {
    match status.trim().to_ascii_lowercase().as_str() {
        "success" => Condition::Complete,
        "fail" | "completed_with_failures" => Condition::Failed,
        "skipped" => Condition::Skipped,
        "cancelled" => Condition::Cancelled,
        _ => Condition::InProgress,
    }
}

pub fn snapshot_from_job(response: &JobStatusResponse) -> StatusSnapshot {
    let job = &response.job_status;
    let snapshot = StatusSnapshot::new(condition_from_job(&job.status));
    if job.reason.trim().is_empty() {
        snapshot
    } else {
        snapshot.with_reason(job.reason.clone())
    }
}

#[derive(Debug, Clone)]
pub struct FleetPlanPlane {
    client: HubClient,
}

impl FleetPlanPlane {
    pub fn new(client: HubClient) -> Self {
        Self { client }
    }

    fn plan_path(resource: &ResourceRef) -> String {
        format!("{}/fleetplans/{}", project_path(&resource.project), resource.name)
    }
}

#[async_trait]
impl ControlPlane for FleetPlanPlane {
    fn name(&self) -> &str {
        "hub-fleet-plan"
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<Handle> {
        let resource = &request.resource;
        let path = format!("{}/execute", Self::plan_path(resource));
        let response: ExecuteResponse = self.client.post_json(&path, &request.payload).await?;

        let job = response.metadata.name.trim();
        if job.is_empty() {
            return Err(CloudError::InvalidStatus(format!(
                "execution of fleet plan {} returned no job name",
                resource.name
            )));
        }

        tracing::debug!(plan = %resource.name, job, "fleet plan job started");
        Ok(Handle::issued(resource.clone(), job))
    }

    async fn get_status(&self, handle: &Handle) -> Result<StatusSnapshot> {
        let Some(job) = handle.id() else {
            return Ok(StatusSnapshot::new(Condition::Complete));
        };
        let path = format!("{}/jobs/{}/status", Self::plan_path(handle.resource()), job);
        let response: JobStatusResponse = self.client.get_json(&path).await?;
        Ok(snapshot_from_job(&response))
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<()> {
        tracing::info!(
            plan = %resource.name,
            "fleet plan jobs cannot be deleted remotely, dropping local record only"
        );
        Ok(())
    }

    async fn lookup(&self, _resource: &ResourceRef) -> Result<Option<StatusSnapshot>> {
        Ok(None)
    }
}
