//! Managed clusters
//!
//! A cluster apply starts a taskset. The taskset reaching `STATUS_COMPLETE`
//! only means provisioning finished; the cluster conditions say whether it
//! became ready and whether blueprint sync went through.

use crate::client::{HubClient, project_path};
use crate::error::HubError;
use crate::vocab::condition_from;
use async_trait::async_trait;
use cpflow_cloud::{
    Condition, ControlPlane, DesiredSpec, EntityKey, Handle, ResourceRef, Result, StatusSnapshot,
    SubEntityStatus, SubmitRequest, TaskStatus,
};
use serde::Deserialize;

pub const KIND: &str = "cluster";
pub const CONDITION_TYPE: &str = "condition";
pub const CLUSTER_READY: &str = "ClusterReady";

/// Conditions that must not fail for a cluster apply to count as done
pub const BLUEPRINT_SYNC_CONDITIONS: [&str; 4] = [
    "ClusterRegister",
    "ClusterCheckIn",
    "ClusterNamespaceSync",
    "ClusterBlueprintSync",
];

// ============ API Types ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyResponse {
    #[serde(default, alias = "taskset_id")]
    taskset_id: String,
}

/// Taskset progress document
#[derive(Debug, Default, Deserialize)]
pub struct TasksetStatusResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    operations: Vec<Option<Operation>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Operation {
    #[serde(default)]
    operation: String,
    #[serde(default)]
    resource_name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    title: String,
}

/// Cluster document
#[derive(Debug, Default, Deserialize)]
pub struct ClusterResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    conditions: Vec<ClusterCondition>,
}

#[derive(Debug, Deserialize)]
struct ClusterCondition {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    reason: String,
}

// ============ Parsing ============

/// Build a snapshot from a taskset and the cluster it belongs to.
pub fn snapshot_from(taskset: &TasksetStatusResponse, cluster: &ClusterResponse) -> StatusSnapshot {
    let mut snapshot = StatusSnapshot::new(condition_from(&taskset.status));

    for op in taskset.operations.iter().flatten() {
        snapshot = snapshot.with_task(operation_task(op));
    }
    for condition in &cluster.conditions {
        snapshot = snapshot.with_sub_entity(condition_entity(condition));
    }
    // Clusters only list the sync conditions they went through. An unlisted
    // one has not failed.
    for name in BLUEPRINT_SYNC_CONDITIONS {
        if !cluster.conditions.iter().any(|c| c.kind == name) {
            tracing::debug!(condition = name, "sync condition not reported");
            snapshot = snapshot.with_sub_entity(SubEntityStatus::new(
                name,
                CONDITION_TYPE,
                Condition::Pending,
            ));
        }
    }

    if snapshot.condition == Condition::Complete && !is_ready(cluster) && !sync_failed(cluster) {
        tracing::debug!("provisioning complete, waiting for the cluster to become ready");
        snapshot.condition = Condition::InProgress;
    }

    snapshot
}

fn operation_task(op: &Operation) -> TaskStatus {
    let name = if op.resource_name.is_empty() {
        op.operation.clone()
    } else {
        format!("{}/{}", op.operation, op.resource_name)
    };

    match op.error.as_ref().filter(|e| !e.title.trim().is_empty()) {
        Some(error) => TaskStatus::new(name, Condition::Failed).with_reason(error.title.clone()),
        None => TaskStatus::new(name, condition_from(&op.status)),
    }
}

fn condition_entity(condition: &ClusterCondition) -> SubEntityStatus {
    let entity = SubEntityStatus::new(
        condition.kind.clone(),
        CONDITION_TYPE,
        condition_from(&condition.status),
    );
    if condition.reason.trim().is_empty() {
        entity
    } else {
        entity.with_reason(condition.reason.clone())
    }
}

fn is_ready(cluster: &ClusterResponse) -> bool {
    cluster
        .conditions
        .iter()
        .any(|c| c.kind == CLUSTER_READY && condition_from(&c.status) == Condition::Complete)
}

fn sync_failed(cluster: &ClusterResponse) -> bool {
    cluster.conditions.iter().any(|c| {
        BLUEPRINT_SYNC_CONDITIONS.iter().any(|name| *name == c.kind)
            && condition_from(&c.status) == Condition::Failed
    })
}

/// Declares the blueprint-sync conditions, so a cluster that turns ready
/// while blueprint sync failed is reported as failed. Conditions the cluster
/// does not list are filled in as pending by [`snapshot_from`].
pub fn desired_spec() -> DesiredSpec {
    BLUEPRINT_SYNC_CONDITIONS
        .iter()
        .map(|c| EntityKey::new(*c, CONDITION_TYPE))
        .collect()
}

// ============ Control plane ============

#[derive(Debug, Clone)]
pub struct ClusterPlane {
    client: HubClient,
}

impl ClusterPlane {
    pub fn new(client: HubClient) -> Self {
        Self { client }
    }

    fn clusters_path(project: &str) -> String {
        format!("{}/clusters", project_path(project))
    }

    fn cluster_path(resource: &ResourceRef) -> String {
        format!("{}/{}", Self::clusters_path(&resource.project), resource.name)
    }
}

#[async_trait]
impl ControlPlane for ClusterPlane {
    fn name(&self) -> &str {
        "hub-cluster"
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<Handle> {
        let resource = &request.resource;
        let response: ApplyResponse = self
            .client
            .post_json(&Self::clusters_path(&resource.project), &request.payload)
            .await?;

        let id = response.taskset_id.trim();
        if id.is_empty() {
            tracing::debug!(cluster = %resource.name, "no taskset started");
            return Ok(Handle::noop(resource.clone()));
        }

        tracing::debug!(cluster = %resource.name, taskset = id, "taskset started");
        Ok(Handle::issued(resource.clone(), id))
    }

    async fn get_status(&self, handle: &Handle) -> Result<StatusSnapshot> {
        let Some(id) = handle.id() else {
            return Ok(StatusSnapshot::new(Condition::Complete));
        };
        let cluster_path = Self::cluster_path(handle.resource());

        let taskset: TasksetStatusResponse = self
            .client
            .get_json(&format!("{}/tasksets/{}", cluster_path, id))
            .await?;
        let cluster: ClusterResponse = self.client.get_json(&cluster_path).await?;

        Ok(snapshot_from(&taskset, &cluster))
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<()> {
        self.client.delete(&Self::cluster_path(resource)).await?;
        Ok(())
    }

    async fn lookup(&self, resource: &ResourceRef) -> Result<Option<StatusSnapshot>> {
        let cluster: ClusterResponse = match self.client.get_json(&Self::cluster_path(resource)).await {
            Ok(cluster) => cluster,
            Err(HubError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot = cluster
            .conditions
            .iter()
            .fold(StatusSnapshot::new(condition_from(&cluster.status)), |s, c| {
                s.with_sub_entity(condition_entity(c))
            });
        Ok(Some(snapshot))
    }
}
