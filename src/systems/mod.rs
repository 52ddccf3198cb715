//! Reactive systems – the downstream consumers of `state_mutations`.
//!
//! Every system follows the same contract: it declares a [`MutationFilter`]
//! (operation kinds, plus "the new or previous bag contains component X"),
//! and reacts to matching mutations through the engine capability surface.
//! Systems never see each other or the store's representation, so they can
//! be added or removed without touching the reconciler.
//!
//! | System         | Ops                    | Component      | Effect                           |
//! |----------------|------------------------|----------------|----------------------------------|
//! | `mesh_builder` | create, delete         | `mesh_builder` | create box/sphere, dispose       |
//! | `position`     | create, update         | `position`     | move node                        |
//! | `color`        | create, update         | `color`        | tint node                        |
//! | `material`     | create                 | `material`     | grid material                    |
//! | `holdable`     | create, update         | `holdable`     | maintain `holdable` tag          |
//! | `teleportable` | create, update, delete | `teleportable` | maintain `teleportable` tag      |
//! | `parent`       | all                    | –              | (deferred) parenting             |
//! | `avatar`       | all                    | `avatar`       | remote avatars, own camera snap  |
//!
//! Registration order is delivery order. The store must already be attached
//! to the channel, and `mesh_builder` must precede the systems that decorate
//! nodes it creates.

use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::{Channel, SubscriptionGroup};
use crate::error::Result;
use crate::store::{StateMutation, StateOperation};

pub mod avatar;
pub mod color;
pub mod material;
pub mod mesh;
pub mod parent;
pub mod position;
pub mod tags;

pub use avatar::AvatarSystem;
pub use color::ColorSystem;
pub use material::MaterialSystem;
pub use mesh::MeshBuilderSystem;
pub use parent::ParentSystem;
pub use position::PositionSystem;
pub use tags::TagSystem;

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MutationFilter {
    ops: Vec<StateOperation>,
    component: Option<&'static str>,
    value: Option<Value>,
}

impl MutationFilter {
    pub fn on(ops: &[StateOperation]) -> Self {
        Self {
            ops: ops.to_vec(),
            component: None,
            value: None,
        }
    }

    pub fn any() -> Self {
        Self::on(&[StateOperation::Create, StateOperation::Update, StateOperation::Delete])
    }

    /// Require `name` in the mutation's new or previous bag.
    pub fn with_component(mut self, name: &'static str) -> Self {
        self.component = Some(name);
        self
    }

    /// Require `name` to equal `value` in the new or previous bag.
    pub fn with_value(mut self, name: &'static str, value: Value) -> Self {
        self.component = Some(name);
        self.value = Some(value);
        self
    }

    pub fn matches(&self, m: &StateMutation) -> bool {
        if !self.ops.contains(&m.operation) {
            return false;
        }
        match (self.component, &self.value) {
            (None, _) => true,
            (Some(name), None) => m.component_exists(name),
            (Some(name), Some(value)) => m.component_equals(name, value),
        }
    }
}

// ---------------------------------------------------------------------------
// System trait
// ---------------------------------------------------------------------------

pub trait ReactiveSystem: Send + Sync {
    fn name(&self) -> &'static str;

    fn filter(&self) -> MutationFilter;

    /// Handle one matching mutation. Errors are logged by the registry and
    /// never reach the bus.
    fn on_mutation(&self, m: &StateMutation) -> Result<()>;

    /// Periodic housekeeping, driven by the session tick.
    fn on_tick(&self, _now: Duration) {}
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SystemRegistry {
    systems: Vec<Arc<dyn ReactiveSystem>>,
    subs: SubscriptionGroup,
}

impl SystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `system` to `mutations`, after every system registered so far.
    pub fn register(&mut self, mutations: &Channel<StateMutation>, system: Arc<dyn ReactiveSystem>) {
        let filter = system.filter();
        let handler = system.clone();
        self.subs.add(mutations.subscribe(move |m| {
            if filter.matches(m) {
                dispatch(handler.as_ref(), m);
            }
        }));
        self.systems.push(system);
    }

    pub fn tick(&self, now: Duration) {
        for system in &self.systems {
            system.on_tick(now);
        }
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.systems.iter().map(|s| s.name()).collect()
    }

    pub fn cancel_all(&self) {
        self.subs.cancel_all();
    }
}

fn dispatch(system: &dyn ReactiveSystem, m: &StateMutation) {
    if let Err(e) = system.on_mutation(m) {
        if e.is_missing_referent() {
            debug!("[{}] skipping {:?} '{}': {}", system.name(), m.operation, m.entity_id, e);
        } else {
            warn!("[{}] {:?} '{}' failed: {}", system.name(), m.operation, m.entity_id, e);
        }
    }
}

/// Fail with a missing referent unless `node` exists.
pub(crate) fn require_node(scene: &dyn crate::scene::SceneGraph, node: &str) -> Result<()> {
    if scene.has_node(node) {
        Ok(())
    } else {
        Err(crate::error::Error::MissingReferent(node.to_string()))
    }
}
