//! Hub control-plane adapters for cpflow
//!
//! This crate implements the `ControlPlane` trait of `cpflow-cloud` for the
//! resource kinds the hub manages. Each adapter turns the hub's payloads into
//! `StatusSnapshot`s; everything else (polling, classification, failure
//! reports) lives in the engine.
//!
//! # Resource kinds
//!
//! - **Workload identities**: AKS identities with role assignments and
//!   service accounts, tracked through the cluster's tasksets
//! - **Clusters**: provisioning tasksets plus readiness and blueprint-sync
//!   conditions
//! - **Fleet plans**: plan executions tracked as jobs
//! - **Upstream cluster nodes**: approve, configure and provision phases run
//!   between the cluster submit and its final poll
//!
//! # Example
//!
//! ```ignore
//! use cpflow_cloud::{CancellationToken, Orchestrator, SubmitRequest};
//! use cpflow_hub::{HubClient, WorkloadIdentityPlane, workload_identity};
//! use std::sync::Arc;
//!
//! let settings = cpflow_config::find_config_file().and_then(cpflow_config::load_settings)?;
//! // `http` already carries the API key as a default header
//! let client = HubClient::from_settings(http, settings.hub.as_ref().ok_or("no hub configured")?)?;
//! let request = SubmitRequest::new(client.resource(workload_identity::KIND, "wi-1"), payload);
//! let plane = Arc::new(WorkloadIdentityPlane::new(client, "aks-prod-1"));
//! let orchestrator = Orchestrator::new(plane, settings.into_options()?)?;
//!
//! let desired = workload_identity::desired_spec("wi-1", ["rbac-1"], ["sa-1"]);
//! let result = orchestrator.apply(&desired, &request, &CancellationToken::new()).await;
//! println!("{}", result.render());
//! ```

pub mod client;
pub mod cluster;
pub mod error;
pub mod fleetplan;
pub mod nodes;
pub mod vocab;
pub mod workload_identity;

pub use client::HubClient;
pub use cluster::ClusterPlane;
pub use error::{HubError, Result};
pub use fleetplan::FleetPlanPlane;
pub use nodes::NodeSetup;
pub use vocab::condition_from;
pub use workload_identity::WorkloadIdentityPlane;
