//! Failure aggregation
//!
//! Correlates the caller's declared sub-entities with the failing nodes of a
//! snapshot and flattens them into a list of [`EntityFailure`]s.

use crate::desired::{DesiredSpec, EntityKey};
use crate::status::{StatusSnapshot, SubEntityStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Reason recorded for a declared entity the remote system does not report
pub const NOT_FOUND_REASON: &str = "not found in remote system";

/// Entity type of the synthetic entry emitted when no entity-level detail exists
pub const OVERALL_ENTITY_TYPE: &str = "operation";

const UNKNOWN_REASON: &str = "failed without a reported reason";

/// One unit of the aggregated failure report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityFailure {
    pub entity_name: String,
    pub entity_type: String,
    pub reason: String,
}

impl EntityFailure {
    pub fn new(
        entity_name: impl Into<String>,
        entity_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            entity_name: entity_name.into(),
            entity_type: entity_type.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(key: &EntityKey) -> Self {
        Self::new(key.name.clone(), key.entity_type.clone(), NOT_FOUND_REASON)
    }

    /// Synthetic entry describing the operation as a whole
    pub fn overall(reason: impl Into<String>) -> Self {
        Self::new("overall", OVERALL_ENTITY_TYPE, reason)
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_name.clone(), self.entity_type.clone())
    }
}

impl fmt::Display for EntityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\": {}", self.entity_type, self.entity_name, self.reason)
    }
}

/// Build the failure report for a snapshot classified as failed.
///
/// Only declared entities are reported. Declared entities missing from the
/// snapshot are reported as not found. The result is de-duplicated by key in
/// first-seen order and is never empty: without entity-level detail a single
/// synthetic entry carries the overall failure reason.
pub fn aggregate(desired: &DesiredSpec, snapshot: &StatusSnapshot) -> Vec<EntityFailure> {
    let declared = desired.declared_keys();
    let mut seen: HashSet<EntityKey> = HashSet::new();
    let mut present: HashSet<EntityKey> = HashSet::new();
    let mut failures = Vec::new();

    snapshot.visit_entities(|node| {
        let key = node.key();
        if !declared.contains(&key) {
            return;
        }
        present.insert(key.clone());
        if node.condition.is_failure() && seen.insert(key) {
            failures.push(EntityFailure::new(
                node.name.clone(),
                node.entity_type.clone(),
                effective_reason(node),
            ));
        }
    });

    for key in desired.sub_entities() {
        if !present.contains(key) && seen.insert(key.clone()) {
            failures.push(EntityFailure::not_found(key));
        }
    }

    if failures.is_empty() {
        let reason = snapshot
            .failure_reason()
            .unwrap_or_else(|| UNKNOWN_REASON.to_string());
        failures.push(EntityFailure::overall(reason));
    }

    failures
}

/// Reason of a failing node: its own, or the first reason found among its
/// failing descendants.
fn effective_reason(node: &SubEntityStatus) -> String {
    fn descend(node: &SubEntityStatus) -> Option<String> {
        if let Some(reason) = node.reason.as_ref().filter(|r| !r.trim().is_empty()) {
            return Some(reason.clone());
        }
        node.children
            .iter()
            .filter(|c| c.condition.is_failure())
            .find_map(descend)
    }

    descend(node).unwrap_or_else(|| UNKNOWN_REASON.to_string())
}

/// Render failures as one line per entity
pub fn render_report(failures: &[EntityFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("  - {}", f))
        .collect::<Vec<_>>()
        .join("\n")
}
