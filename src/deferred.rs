//! Operations waiting for an entity that does not exist yet.
//!
//! A snapshot may list a child before its parent. Instead of retrying on a
//! timer, the operation is parked under the id it is waiting for and handed
//! back when that id's `create` arrives. Anything still parked at its
//! deadline is dropped by [`DeferredQueue::expire`].

use std::time::Duration;

use crate::types::EntityId;

#[derive(Debug, Clone)]
struct Parked<T> {
    awaiting: EntityId,
    deadline: Duration,
    op: T,
}

#[derive(Debug, Clone)]
pub struct DeferredQueue<T> {
    parked: Vec<Parked<T>>,
}

impl<T> Default for DeferredQueue<T> {
    fn default() -> Self {
        Self { parked: Vec::new() }
    }
}

impl<T> DeferredQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `op` until `awaiting` is created or `deadline` passes.
    pub fn defer(&mut self, awaiting: impl Into<EntityId>, deadline: Duration, op: T) {
        self.parked.push(Parked {
            awaiting: awaiting.into(),
            deadline,
            op,
        });
    }

    /// Remove and return every op waiting on `created`, in the order they
    /// were deferred.
    pub fn take_ready(&mut self, created: &str) -> Vec<T> {
        self.drain(|p| p.awaiting == created)
            .map(|p| p.op)
            .collect()
    }

    /// Drop every op matching `pred`. Returns how many were dropped.
    pub fn cancel_where(&mut self, pred: impl Fn(&T) -> bool) -> usize {
        self.drain(|p| pred(&p.op)).count()
    }

    /// Remove ops whose deadline is at or before `now`, returning them with
    /// the id they were still waiting for.
    pub fn expire(&mut self, now: Duration) -> Vec<(EntityId, T)> {
        self.drain(|p| p.deadline <= now)
            .map(|p| (p.awaiting, p.op))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.parked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }

    fn drain(&mut self, pred: impl Fn(&Parked<T>) -> bool) -> std::vec::IntoIter<Parked<T>> {
        let (hit, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.parked)
            .into_iter()
            .partition(|p| pred(p));
        self.parked = keep;
        hit.into_iter()
    }
}
