//! Applies `parent` components to the scene graph.
//!
//! A child may arrive before its parent (snapshot order is arbitrary). Such
//! an operation is parked in a [`DeferredQueue`] under the parent's id and
//! replayed when that entity's `create` comes through, or dropped once
//! `parent_wait_timeout_ms` has passed. A newer `parent` value for the same
//! child supersedes anything still parked for it.

use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::{require_node, MutationFilter, ReactiveSystem};
use crate::clock::Clock;
use crate::components::Parent;
use crate::deferred::DeferredQueue;
use crate::error::Result;
use crate::scene::SceneGraph;
use crate::store::{StateMutation, StateOperation};
use crate::types::EntityId;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingParent {
    child: EntityId,
    parent: EntityId,
}

pub struct ParentSystem {
    scene: Arc<dyn SceneGraph>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    pending: Mutex<DeferredQueue<PendingParent>>,
}

impl ParentSystem {
    pub fn new(scene: Arc<dyn SceneGraph>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            scene,
            clock,
            timeout,
            pending: Mutex::new(DeferredQueue::new()),
        }
    }

    /// Parent operations still waiting for their parent entity.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    fn attach(&self, child: &str, parent: &str) -> Result<()> {
        if self.scene.parent_of(child).as_deref() == Some(parent) {
            return Ok(());
        }
        self.scene.set_parent(child, Some(parent))
    }

    fn flush_waiting_on(&self, created: &str) {
        let ready = self.pending.lock().take_ready(created);
        for op in ready {
            match self.attach(&op.child, &op.parent) {
                Ok(()) => debug!("[parent] '{}' attached to late parent '{}'", op.child, op.parent),
                Err(e) => debug!("[parent] deferred '{}' -> '{}' dropped: {}", op.child, op.parent, e),
            }
        }
    }

    fn apply(&self, child: &str, parent: Option<EntityId>) -> Result<()> {
        self.pending.lock().cancel_where(|op| op.child == child);
        require_node(self.scene.as_ref(), child)?;
        let Some(parent) = parent else {
            return self.scene.set_parent(child, None);
        };
        if self.scene.has_node(&parent) {
            return self.attach(child, &parent);
        }
        debug!("[parent] '{}' waiting for parent '{}'", child, parent);
        let deadline = self.clock.now() + self.timeout;
        self.pending.lock().defer(
            parent.clone(),
            deadline,
            PendingParent {
                child: child.to_string(),
                parent,
            },
        );
        Ok(())
    }
}

impl ReactiveSystem for ParentSystem {
    fn name(&self) -> &'static str {
        "parent"
    }

    // Every create may be a parent somebody is waiting for.
    fn filter(&self) -> MutationFilter {
        MutationFilter::any()
    }

    fn on_mutation(&self, m: &StateMutation) -> Result<()> {
        let eid = m.entity_id.as_str();
        match m.operation {
            StateOperation::Delete => {
                self.pending.lock().cancel_where(|op| op.child == eid);
                Ok(())
            }
            StateOperation::Create | StateOperation::Update => {
                if m.is(StateOperation::Create) {
                    self.flush_waiting_on(eid);
                }
                match m.component::<Parent>() {
                    Some(decoded) => self.apply(eid, decoded?.0),
                    None => Ok(()),
                }
            }
        }
    }

    fn on_tick(&self, now: Duration) {
        let expired = self.pending.lock().expire(now);
        for (awaiting, op) in expired {
            info!(
                "[parent] gave up attaching '{}': parent '{}' never appeared",
                op.child, awaiting
            );
        }
    }
}
