//! DiffReconciler – turns inbound entity payloads into [`StateMutation`]s.
//!
//! A batch is planned in full before anything is published: each entry's
//! `previous` is read from the store as it stood before the batch, overlaid
//! with the entries already planned in the same batch (which only matters when
//! one entity appears more than once). Entries are processed creates →
//! updates → deletes.
//!
//! Unknown entities in `updates`/`deletes` are not an error: `previous` is
//! empty and the mutation is applied anyway. A bag that is not an object is
//! logged and skipped without affecting the rest of the batch.

use log::{debug, warn};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::bus::{Channel, Subscription};
use crate::protocol::{EntitiesDiff, EntityPayload, InboundMessage};
use crate::store::{EntityStore, StateMutation, StateOperation};
use crate::types::{Components, EntityId};

#[derive(Debug, Clone)]
pub struct DiffReconciler {
    store: EntityStore,
    mutations: Channel<StateMutation>,
}

impl DiffReconciler {
    pub fn new(store: EntityStore, mutations: Channel<StateMutation>) -> Self {
        Self { store, mutations }
    }

    /// Consume decoded inbound messages from `inbound`.
    pub fn attach(&self, inbound: &Channel<InboundMessage>) -> Subscription {
        let reconciler = self.clone();
        inbound.subscribe(move |msg| {
            reconciler.handle(msg);
        })
    }

    /// Returns the number of mutations published.
    pub fn handle(&self, msg: &InboundMessage) -> usize {
        match msg {
            InboundMessage::EntitiesState(payload) => self.apply_snapshot(payload),
            InboundMessage::EntitiesDiff(diff) => self.apply_diff(diff),
            InboundMessage::ServerEvent(_) => 0,
        }
    }

    pub fn apply_snapshot(&self, payload: &EntityPayload) -> usize {
        self.publish(self.plan_snapshot(payload))
    }

    pub fn apply_diff(&self, diff: &EntitiesDiff) -> usize {
        self.publish(self.plan_diff(diff))
    }

    /// Every snapshot entry becomes a `create` with an empty `previous`;
    /// entities the store holds but the snapshot lacks are deleted after.
    pub fn plan_snapshot(&self, payload: &EntityPayload) -> Vec<StateMutation> {
        let mut plan = Vec::with_capacity(payload.len());
        let mut live: HashSet<&str> = HashSet::with_capacity(payload.len());

        for (eid, raw) in payload {
            live.insert(eid.as_str());
            if let Some(bag) = entity_bag(eid, raw) {
                plan.push(StateMutation::create(eid.clone(), bag));
            }
        }

        for eid in self.store.ids() {
            if !live.contains(eid.as_str()) {
                let previous = self.store.get(&eid).unwrap_or_default();
                debug!("[reconciler] '{}' absent from snapshot, deleting", eid);
                plan.push(StateMutation::delete(eid, previous.clone(), previous));
            }
        }
        plan
    }

    pub fn plan_diff(&self, diff: &EntitiesDiff) -> Vec<StateMutation> {
        let mut overlay = Overlay::new(&self.store);
        let mut plan =
            Vec::with_capacity(diff.creates.len() + diff.updates.len() + diff.deletes.len());

        let sections = [
            (StateOperation::Create, &diff.creates),
            (StateOperation::Update, &diff.updates),
            (StateOperation::Delete, &diff.deletes),
        ];
        for (op, entries) in sections {
            for (eid, raw) in entries {
                let Some(bag) = entity_bag(eid, raw) else {
                    continue;
                };
                let m = match op {
                    StateOperation::Create => StateMutation::create(eid.clone(), bag),
                    StateOperation::Update => {
                        StateMutation::update(eid.clone(), bag, overlay.current(eid))
                    }
                    StateOperation::Delete => {
                        StateMutation::delete(eid.clone(), bag, overlay.current(eid))
                    }
                };
                overlay.stage(&m);
                plan.push(m);
            }
        }
        plan
    }

    fn publish(&self, plan: Vec<StateMutation>) -> usize {
        let n = plan.len();
        for m in plan {
            self.mutations.publish(m);
        }
        n
    }
}

/// Validate one entity's bag. `null` is accepted as an empty bag.
fn entity_bag(eid: &str, raw: &Value) -> Option<Components> {
    match raw {
        Value::Object(bag) => Some(bag.clone()),
        Value::Null => Some(Components::new()),
        other => {
            warn!(
                "[reconciler] skipping '{}': component bag is not an object ({})",
                eid, other
            );
            None
        }
    }
}

/// Store view with the batch's already-planned mutations layered on top.
struct Overlay<'a> {
    store: &'a EntityStore,
    staged: HashMap<EntityId, Option<Components>>,
}

impl<'a> Overlay<'a> {
    fn new(store: &'a EntityStore) -> Self {
        Self {
            store,
            staged: HashMap::new(),
        }
    }

    fn current(&self, eid: &str) -> Components {
        match self.staged.get(eid) {
            Some(staged) => staged.clone().unwrap_or_default(),
            None => self.store.get(eid).unwrap_or_default(),
        }
    }

    fn stage(&mut self, m: &StateMutation) {
        self.staged.insert(m.entity_id.clone(), m.merged());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
