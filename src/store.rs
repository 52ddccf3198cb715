//! `EntityStore` – local mirror of server-authoritative room state.
//!
//! The store subscribes to the mutation channel and is the **only** writer of
//! the canonical `entity -> components` map. Everyone else gets a read-only
//! handle. Because the store subscribes first and delivery is synchronous and
//! ordered, any later subscriber observing a mutation already sees the store
//! with that mutation applied.

use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::bus::{Channel, Subscription};
use crate::components::Component;
use crate::error::Result;
use crate::types::{Components, EntityId};

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateOperation {
    Create,
    Update,
    Delete,
}

/// One entity change, carrying the entity's bag as it was before the change.
///
/// * `create`: `components` is the full bag, `previous` is empty.
/// * `update`: `components` is the partial bag to merge, `previous` is the
///   stored bag before the merge (empty for unknown entities).
/// * `delete`: `components` is the server's last known bag, `previous` is
///   the stored bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMutation {
    pub operation: StateOperation,
    pub entity_id: EntityId,
    pub components: Components,
    pub previous: Components,
}

impl StateMutation {
    pub fn create(entity_id: impl Into<EntityId>, components: Components) -> Self {
        Self {
            operation: StateOperation::Create,
            entity_id: entity_id.into(),
            components,
            previous: Components::new(),
        }
    }

    pub fn update(entity_id: impl Into<EntityId>, components: Components, previous: Components) -> Self {
        Self {
            operation: StateOperation::Update,
            entity_id: entity_id.into(),
            components,
            previous,
        }
    }

    pub fn delete(entity_id: impl Into<EntityId>, components: Components, previous: Components) -> Self {
        Self {
            operation: StateOperation::Delete,
            entity_id: entity_id.into(),
            components,
            previous,
        }
    }

    pub fn is(&self, op: StateOperation) -> bool {
        self.operation == op
    }

    /// True if `name` is present (even as `null`) in the new or previous bag.
    pub fn component_exists(&self, name: &str) -> bool {
        self.components.contains_key(name) || self.previous.contains_key(name)
    }

    /// True if `name` equals `value` in the new or previous bag.
    pub fn component_equals(&self, name: &str, value: &Value) -> bool {
        self.components.get(name) == Some(value) || self.previous.get(name) == Some(value)
    }

    /// Decode component `C` from this mutation's bag, if present.
    pub fn component<C: Component>(&self) -> Option<Result<C>> {
        self.components.get(C::NAME).map(C::decode)
    }

    /// Decode component `C` from the pre-mutation bag, if present.
    pub fn previous_component<C: Component>(&self) -> Option<Result<C>> {
        self.previous.get(C::NAME).map(C::decode)
    }

    /// The bag this entity has after the mutation is applied.
    pub fn merged(&self) -> Option<Components> {
        match self.operation {
            StateOperation::Create => Some(self.components.clone()),
            StateOperation::Update => {
                let mut merged = self.previous.clone();
                merged.extend(self.components.clone());
                Some(merged)
            }
            StateOperation::Delete => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Shared handle to the room's entity map.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    entities: Arc<RwLock<HashMap<EntityId, Components>>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe the store to `mutations`. Must be the first subscriber.
    pub fn attach(&self, mutations: &Channel<StateMutation>) -> Subscription {
        let store = self.clone();
        mutations.subscribe(move |m| store.apply(m))
    }

    /// Apply one mutation under a single write lock.
    pub(crate) fn apply(&self, m: &StateMutation) {
        let mut entities = self.entities.write();
        match m.operation {
            StateOperation::Create => {
                entities.insert(m.entity_id.clone(), m.components.clone());
            }
            StateOperation::Update => {
                let bag = entities.entry(m.entity_id.clone()).or_default();
                for (k, v) in &m.components {
                    bag.insert(k.clone(), v.clone());
                }
            }
            StateOperation::Delete => {
                if entities.remove(&m.entity_id).is_none() {
                    debug!("[store] delete of unknown entity '{}'", m.entity_id);
                }
            }
        }
    }

    pub fn get(&self, entity_id: &str) -> Option<Components> {
        self.entities.read().get(entity_id).cloned()
    }

    pub fn component(&self, entity_id: &str, name: &str) -> Option<Value> {
        self.entities
            .read()
            .get(entity_id)
            .and_then(|bag| bag.get(name).cloned())
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.entities.read().contains_key(entity_id)
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entity ids, sorted.
    pub fn ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = self.entities.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self) -> HashMap<EntityId, Components> {
        self.entities.read().clone()
    }

    /// Drop all state (room exit / reload).
    pub fn clear(&self) {
        self.entities.write().clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
