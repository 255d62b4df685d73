//! Node approval and configuration for upstream clusters
//!
//! Nodes of an upstream cluster register with the hub on their own. Before
//! the cluster provision is polled, every registered node has to be approved
//! (unless the cluster auto-approves) and configured with the roles declared
//! for its hostname, and then the provision is started. Approval and
//! configuration fan out over the nodes as task-group phases; the provision
//! is a single-task phase.

use crate::client::{HubClient, project_path};
use crate::cluster::KIND as CLUSTER_KIND;
use cpflow_cloud::{CloudError, GroupTask, Phase, ResourceRef, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const NODE_TYPE: &str = "node";
pub const APPROVE_PHASE: &str = "approve-nodes";
pub const CONFIGURE_PHASE: &str = "configure-nodes";
pub const PROVISION_PHASE: &str = "provision-nodes";

/// Node list of one cluster
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeList {
    #[serde(default)]
    pub auto_approve_nodes: bool,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub approved: bool,
}

impl Node {
    /// Hostname, or the node id for nodes that did not report one
    pub fn display_name(&self) -> &str {
        if self.hostname.is_empty() {
            &self.id
        } else {
            &self.hostname
        }
    }
}

#[derive(Debug, Serialize)]
struct NodeConfig {
    roles: Vec<String>,
}

/// Builds the node phases of an upstream cluster apply
#[derive(Debug, Clone)]
pub struct NodeSetup {
    client: HubClient,
}

impl NodeSetup {
    pub fn new(client: HubClient) -> Self {
        Self { client }
    }

    fn cluster_path(cluster: &ResourceRef) -> String {
        format!("{}/clusters/{}", project_path(&cluster.project), cluster.name)
    }

    fn node_path(cluster: &ResourceRef, node: &Node) -> String {
        format!("{}/nodes/{}", Self::cluster_path(cluster), node.id)
    }

    pub async fn list(&self, cluster: &ResourceRef) -> Result<NodeList> {
        let path = format!("{}/nodes", Self::cluster_path(cluster));
        Ok(self.client.get_json(&path).await?)
    }

    /// Fetch the registered nodes and build the phases for them.
    ///
    /// `roles` maps hostnames to the roles their node gets; nodes with no
    /// entry are approved but left unconfigured.
    pub async fn phases(
        &self,
        cluster: &ResourceRef,
        roles: &HashMap<String, Vec<String>>,
    ) -> Result<Vec<Phase>> {
        let list = self.list(cluster).await?;
        tracing::debug!(
            cluster = %cluster.name,
            nodes = list.nodes.len(),
            auto_approve = list.auto_approve_nodes,
            "building node phases"
        );
        Ok(self.phases_for(cluster, &list, roles))
    }

    /// Phases for an already fetched node list, in run order
    pub fn phases_for(
        &self,
        cluster: &ResourceRef,
        list: &NodeList,
        roles: &HashMap<String, Vec<String>>,
    ) -> Vec<Phase> {
        let mut phases = Vec::new();

        if !list.auto_approve_nodes {
            let approve = list
                .nodes
                .iter()
                .filter(|node| !node.approved)
                .map(|node| self.approve_task(cluster, node));
            let phase = Phase::new(APPROVE_PHASE, NODE_TYPE).with_tasks(approve);
            if !phase.is_empty() {
                phases.push(phase);
            }
        }

        let configure = list.nodes.iter().filter_map(|node| {
            roles
                .get(&node.hostname)
                .map(|roles| self.configure_task(cluster, node, roles.clone()))
        });
        let phase = Phase::new(CONFIGURE_PHASE, NODE_TYPE).with_tasks(configure);
        if !phase.is_empty() {
            phases.push(phase);
        }

        phases.push(Phase::new(PROVISION_PHASE, CLUSTER_KIND).with_task(self.provision_task(cluster)));
        phases
    }

    fn approve_task(&self, cluster: &ResourceRef, node: &Node) -> GroupTask {
        let client = self.client.clone();
        let path = format!("{}/approve", Self::node_path(cluster, node));
        GroupTask::new(node.display_name(), move || {
            let client = client.clone();
            let path = path.clone();
            async move {
                client
                    .post(&path, &serde_json::json!({}))
                    .await
                    .map_err(CloudError::from)
            }
        })
    }

    /// Approval can lag behind the approve call, so an unapproved node fails
    /// the attempt and is retried with backoff.
    fn configure_task(&self, cluster: &ResourceRef, node: &Node, roles: Vec<String>) -> GroupTask {
        let client = self.client.clone();
        let path = Self::node_path(cluster, node);
        GroupTask::new(node.display_name(), move || {
            let client = client.clone();
            let path = path.clone();
            let config = NodeConfig {
                roles: roles.clone(),
            };
            async move {
                let current: Node = client.get_json(&path).await.map_err(CloudError::from)?;
                if !current.approved {
                    return Err(CloudError::ApiError(format!(
                        "node {} is not approved yet",
                        current.display_name()
                    )));
                }
                client
                    .post(&format!("{}/config", path), &config)
                    .await
                    .map_err(CloudError::from)
            }
        })
    }

    fn provision_task(&self, cluster: &ResourceRef) -> GroupTask {
        let client = self.client.clone();
        let path = format!("{}/provision", Self::cluster_path(cluster));
        GroupTask::new(cluster.name.clone(), move || {
            let client = client.clone();
            let path = path.clone();
            async move {
                client
                    .post(&path, &serde_json::json!({}))
                    .await
                    .map_err(CloudError::from)
            }
        })
    }
}
