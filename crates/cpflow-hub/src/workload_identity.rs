//! AKS workload identities
//!
//! Applying an identity starts a taskset on its cluster. Progress is read
//! from the cluster status: the taskset itself, plus the edge resources that
//! carry per-identity, per-role-assignment and per-service-account results.

use crate::client::{HubClient, project_path};
use crate::error::HubError;
use crate::vocab::condition_from;
use async_trait::async_trait;
use cpflow_cloud::{
    Condition, ControlPlane, DesiredSpec, Handle, ResourceRef, Result, StatusSnapshot,
    SubEntityStatus, SubmitRequest, TaskStatus,
};
use serde::Deserialize;

pub const KIND: &str = "workload-identity";

/// Taskset id the hub returns when the identity is already up to date
pub const NOOP_TASKSET_ID: &str = "0lk5wke";

pub const IDENTITY_TYPE: &str = "workloadIdentity";
pub const ROLE_ASSIGNMENT_TYPE: &str = "roleAssignment";
pub const SERVICE_ACCOUNT_TYPE: &str = "serviceAccount";

const EDGE_RESOURCE_TYPE: &str = "AksWorkloadIdentity";

// ============ API Types ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyResponse {
    #[serde(default)]
    taskset_id: String,
}

/// Cluster status document
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatusResponse {
    #[serde(default)]
    status: ClusterStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterStatus {
    #[serde(default)]
    last_tasksets: Vec<Taskset>,
    #[serde(default)]
    aks: Option<AksStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Taskset {
    taskset_id: String,
    #[serde(default)]
    taskset_status: String,
    #[serde(default)]
    taskset_operations: Vec<TasksetOperation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TasksetOperation {
    #[serde(default)]
    operation_name: String,
    #[serde(default)]
    error_summary: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AksStatus {
    #[serde(default)]
    edge_resources: Vec<EdgeResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EdgeResource {
    name: String,
    #[serde(default)]
    edge_resource_type: String,
    #[serde(default)]
    provision_status: String,
    #[serde(default)]
    provision_status_reason: String,
    #[serde(default)]
    aks_workload_identity_status: Option<IdentityStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityStatus {
    #[serde(default)]
    role_assignments_status: Vec<ProvisionStatus>,
    #[serde(default)]
    service_accounts_status: Vec<ProvisionStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionStatus {
    name: String,
    #[serde(default)]
    provision_status: String,
    #[serde(default)]
    provision_status_reason: String,
}

#[derive(Debug, Default, Deserialize)]
struct IdentityList {
    #[serde(default)]
    items: Vec<IdentityItem>,
}

#[derive(Debug, Deserialize)]
struct IdentityItem {
    spec: IdentitySpec,
}

#[derive(Debug, Deserialize)]
struct IdentitySpec {
    metadata: IdentityMetadata,
}

#[derive(Debug, Deserialize)]
struct IdentityMetadata {
    name: String,
}

// ============ Parsing ============

/// Build a snapshot of identity `identity` for taskset `taskset_id` from a
/// cluster status document.
///
/// A taskset the cluster does not list yet is reported as `Submitted`. Edge
/// resources of other identities on the same cluster are left out.
pub fn snapshot_from_status(
    status: &ClusterStatusResponse,
    identity: &str,
    taskset_id: &str,
) -> StatusSnapshot {
    let Some(taskset) = status
        .status
        .last_tasksets
        .iter()
        .find(|t| t.taskset_id == taskset_id)
    else {
        return StatusSnapshot::new(Condition::Submitted);
    };

    let mut snapshot = StatusSnapshot::new(condition_from(&taskset.taskset_status));

    for op in &taskset.taskset_operations {
        if op.error_summary.trim().is_empty() {
            continue;
        }
        let name = if op.operation_name.is_empty() {
            "operation"
        } else {
            op.operation_name.as_str()
        };
        snapshot = snapshot
            .with_task(TaskStatus::new(name, Condition::Failed).with_reason(op.error_summary.clone()));
    }

    let edge_resources = status
        .status
        .aks
        .as_ref()
        .map(|a| a.edge_resources.as_slice())
        .unwrap_or_default();
    for er in edge_resources
        .iter()
        .filter(|er| er.edge_resource_type == EDGE_RESOURCE_TYPE && er.name == identity)
    {
        snapshot = snapshot.with_sub_entity(identity_entity(er));
    }

    snapshot
}

fn identity_entity(er: &EdgeResource) -> SubEntityStatus {
    let mut entity = status_entity(
        &er.name,
        IDENTITY_TYPE,
        &er.provision_status,
        &er.provision_status_reason,
    );

    if let Some(children) = &er.aks_workload_identity_status {
        for ra in &children.role_assignments_status {
            entity = entity.with_child(status_entity(
                &ra.name,
                ROLE_ASSIGNMENT_TYPE,
                &ra.provision_status,
                &ra.provision_status_reason,
            ));
        }
        for sa in &children.service_accounts_status {
            entity = entity.with_child(status_entity(
                &sa.name,
                SERVICE_ACCOUNT_TYPE,
                &sa.provision_status,
                &sa.provision_status_reason,
            ));
        }
    }

    entity
}

fn status_entity(name: &str, entity_type: &str, status: &str, reason: &str) -> SubEntityStatus {
    let entity = SubEntityStatus::new(name, entity_type, condition_from(status));
    if reason.trim().is_empty() {
        entity
    } else {
        entity.with_reason(reason)
    }
}

/// Declared sub-entities of one identity
pub fn desired_spec<R, S>(name: &str, role_assignments: R, service_accounts: S) -> DesiredSpec
where
    R: IntoIterator,
    R::Item: Into<String>,
    S: IntoIterator,
    S::Item: Into<String>,
{
    let mut desired = DesiredSpec::new().with_sub_entity(name, IDENTITY_TYPE);
    for ra in role_assignments {
        desired = desired.with_sub_entity(ra, ROLE_ASSIGNMENT_TYPE);
    }
    for sa in service_accounts {
        desired = desired.with_sub_entity(sa, SERVICE_ACCOUNT_TYPE);
    }
    desired
}

// ============ Control plane ============

/// Workload identities of one cluster
#[derive(Debug, Clone)]
pub struct WorkloadIdentityPlane {
    client: HubClient,
    cluster: String,
}

impl WorkloadIdentityPlane {
    pub fn new(client: HubClient, cluster: impl Into<String>) -> Self {
        Self {
            client,
            cluster: cluster.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    fn cluster_path(&self, project: &str) -> String {
        format!("{}/clusters/{}", project_path(project), self.cluster)
    }

    fn identities_path(&self, project: &str) -> String {
        format!("{}/aksworkloadidentities", self.cluster_path(project))
    }
}

#[async_trait]
impl ControlPlane for WorkloadIdentityPlane {
    fn name(&self) -> &str {
        "hub-workload-identity"
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<Handle> {
        let resource = &request.resource;
        let response: ApplyResponse = self
            .client
            .post_json(&self.identities_path(&resource.project), &request.payload)
            .await?;

        let id = response.taskset_id.trim();
        if id.is_empty() || id == NOOP_TASKSET_ID {
            tracing::debug!(identity = %resource.name, "no taskset started");
            return Ok(Handle::noop(resource.clone()));
        }

        tracing::debug!(identity = %resource.name, taskset = id, "taskset started");
        Ok(Handle::issued(resource.clone(), id))
    }

    async fn get_status(&self, handle: &Handle) -> Result<StatusSnapshot> {
        let Some(id) = handle.id() else {
            return Ok(StatusSnapshot::new(Condition::Complete));
        };
        let path = format!("{}/status", self.cluster_path(&handle.resource().project));
        let status: ClusterStatusResponse = self.client.get_json(&path).await?;
        Ok(snapshot_from_status(&status, &handle.resource().name, id))
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<()> {
        let path = format!("{}/{}", self.identities_path(&resource.project), resource.name);
        self.client.delete(&path).await?;
        Ok(())
    }

    /// Present while the cluster still lists the identity
    async fn lookup(&self, resource: &ResourceRef) -> Result<Option<StatusSnapshot>> {
        let list: IdentityList = match self
            .client
            .get_json(&self.identities_path(&resource.project))
            .await
        {
            Ok(list) => list,
            Err(HubError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let listed = list
            .items
            .iter()
            .any(|item| item.spec.metadata.name == resource.name);
        Ok(listed.then(|| StatusSnapshot::new(Condition::Complete)))
    }
}
