//! Caller-declared target state

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Identity of a nested entity: name plus entity type.
///
/// Two entities with the same name but different types (a role assignment
/// and a service account both called `reader`) are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub name: String,
    pub entity_type: String,
}

impl EntityKey {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.name)
    }
}

/// A nested resource the caller declared (role assignment, service account, node, ...)
pub type SubEntityRef = EntityKey;

/// Desired state of one orchestration run.
///
/// Only the declared sub-entities matter to the engine; the request payload
/// itself travels separately in a [`SubmitRequest`](crate::SubmitRequest).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredSpec {
    sub_entities: Vec<SubEntityRef>,
}

impl DesiredSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a sub-entity. Duplicate declarations are ignored.
    pub fn with_sub_entity(mut self, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        self.declare(SubEntityRef::new(name, entity_type));
        self
    }

    pub fn declare(&mut self, entity: SubEntityRef) {
        if !self.sub_entities.contains(&entity) {
            self.sub_entities.push(entity);
        }
    }

    /// Declared sub-entities in declaration order
    pub fn sub_entities(&self) -> &[SubEntityRef] {
        &self.sub_entities
    }

    pub fn declared_keys(&self) -> HashSet<&EntityKey> {
        self.sub_entities.iter().collect()
    }

    pub fn is_declared(&self, key: &EntityKey) -> bool {
        self.sub_entities.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.sub_entities.is_empty()
    }
}

impl FromIterator<SubEntityRef> for DesiredSpec {
    fn from_iter<I: IntoIterator<Item = SubEntityRef>>(iter: I) -> Self {
        let mut spec = DesiredSpec::new();
        for entity in iter {
            spec.declare(entity);
        }
        spec
    }
}
