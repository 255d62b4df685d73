//! Typed view of a remote status payload
//!
//! A [`StatusSnapshot`] is one polled read of the remote system. It holds the
//! overall [`Condition`], the task list of the submitted operation and a tree
//! of sub-entities. Resource-kind adapters build snapshots from raw payloads;
//! nothing past that boundary looks at remote strings.

use crate::desired::EntityKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote condition of an operation, a task or a sub-entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Submitted,
    InProgress,
    Pending,
    Complete,
    Failed,
    Skipped,
    Cancelled,
}

impl Condition {
    pub fn is_failure(&self) -> bool {
        matches!(self, Condition::Failed)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Submitted => write!(f, "submitted"),
            Condition::InProgress => write!(f, "in_progress"),
            Condition::Pending => write!(f, "pending"),
            Condition::Complete => write!(f, "complete"),
            Condition::Failed => write!(f, "failed"),
            Condition::Skipped => write!(f, "skipped"),
            Condition::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Status of one task of the submitted operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub name: String,
    pub condition: Condition,
    /// Free-text reason reported by the remote system
    pub reason: Option<String>,
    /// Sub-entities touched by this task
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SubEntityStatus>,
}

impl TaskStatus {
    pub fn new(name: impl Into<String>, condition: Condition) -> Self {
        Self {
            name: name.into(),
            condition,
            reason: None,
            children: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_child(mut self, child: SubEntityStatus) -> Self {
        self.children.push(child);
        self
    }
}

/// Remote-observed condition of a nested entity.
///
/// Nesting is arbitrary: a workload identity holds role assignments, an
/// operation holds components, a component holds the failing step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubEntityStatus {
    pub name: String,
    pub entity_type: String,
    pub condition: Condition,
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SubEntityStatus>,
}

impl SubEntityStatus {
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        condition: Condition,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            condition,
            reason: None,
            children: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_child(mut self, child: SubEntityStatus) -> Self {
        self.children.push(child);
        self
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.name.clone(), self.entity_type.clone())
    }

    fn matches(&self, key: &EntityKey) -> bool {
        self.name == key.name && self.entity_type == key.entity_type
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a SubEntityStatus)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }
}

/// One point-in-time read of the remote system's view of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub condition: Condition,
    /// Overall reason, if the remote system reported one
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_entities: Vec<SubEntityStatus>,
}

impl StatusSnapshot {
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            reason: None,
            tasks: Vec::new(),
            sub_entities: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_task(mut self, task: TaskStatus) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_sub_entity(mut self, entity: SubEntityStatus) -> Self {
        self.sub_entities.push(entity);
        self
    }

    /// Visit every sub-entity node, depth first.
    ///
    /// Top-level sub-entities come first, then the children of each task, so
    /// the visiting order is stable for a given payload.
    pub fn visit_entities<'a>(&'a self, mut f: impl FnMut(&'a SubEntityStatus)) {
        for entity in &self.sub_entities {
            entity.visit(&mut f);
        }
        for task in &self.tasks {
            for child in &task.children {
                child.visit(&mut f);
            }
        }
    }

    /// All nodes carrying the given key, in visiting order
    pub fn find_all(&self, key: &EntityKey) -> Vec<&SubEntityStatus> {
        let mut found = Vec::new();
        self.visit_entities(|node| {
            if node.matches(key) {
                found.push(node);
            }
        });
        found
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        !self.find_all(key).is_empty()
    }

    /// Best available explanation for an overall failure.
    ///
    /// The overall reason wins; otherwise the reasons of failing tasks are
    /// joined in task order.
    pub fn failure_reason(&self) -> Option<String> {
        if let Some(reason) = self.reason.as_ref().filter(|r| !r.trim().is_empty()) {
            return Some(reason.clone());
        }

        let task_reasons: Vec<&str> = self
            .tasks
            .iter()
            .filter(|t| t.condition.is_failure())
            .filter_map(|t| t.reason.as_deref())
            .filter(|r| !r.trim().is_empty())
            .collect();

        if task_reasons.is_empty() {
            None
        } else {
            Some(task_reasons.join("; "))
        }
    }
}
