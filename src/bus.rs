//! Event bus – typed publish/subscribe channels for every cross-subsystem signal.
//!
//! ## Delivery contract
//!
//! | Property        | Behaviour                                                    |
//! |-----------------|--------------------------------------------------------------|
//! | Synchronous     | `publish` returns after every subscriber has run             |
//! | Ordered         | subscription order; value *N* fully delivered before *N+1*  |
//! | Re-entrant      | a publish from inside a handler is queued behind the current value |
//! | Isolated        | a panicking handler is logged, delivery continues            |
//! | Snapshot        | handlers added/cancelled mid-delivery take effect on the next value |
//! | Replay          | only [`Channel::latest`] channels replay their last value    |
//!
//! Channels are cheap handles (`Arc` inside); clone them into whichever
//! subsystem needs to publish or subscribe.

use log::error;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    None,
    Latest,
}

struct Subscriber<T> {
    id: u64,
    handler: Handler<T>,
}

struct ChannelInner<T> {
    name: &'static str,
    replay: Replay,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber<T>>>,
    latest: Mutex<Option<T>>,
    pending: Mutex<VecDeque<T>>,
    delivering: AtomicBool,
}

impl<T> ChannelInner<T> {
    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn insert(&self, id: u64, handler: Handler<T>) {
        self.subscribers.lock().push(Subscriber { id, handler });
    }

    fn remove(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }

    fn invoke(&self, id: u64, handler: &Handler<T>, value: &T) {
        if panic::catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
            error!(
                "[bus] subscriber #{} on '{}' panicked; continuing delivery",
                id, self.name
            );
        }
    }

    fn deliver(&self, value: &T) {
        // Snapshot so handlers may (un)subscribe without holding the lock.
        let handlers: Vec<(u64, Handler<T>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|s| (s.id, s.handler.clone()))
            .collect();
        for (id, handler) in handlers {
            self.invoke(id, &handler, value);
        }
    }
}

/// Type-erased view used by [`Subscription`] to cancel without knowing `T`.
trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: u64);
    fn is_subscribed(&self, id: u64) -> bool;
    fn channel_name(&self) -> &'static str;
}

impl<T: Send> Unsubscribe for ChannelInner<T> {
    fn unsubscribe(&self, id: u64) {
        self.remove(id);
    }

    fn is_subscribed(&self, id: u64) -> bool {
        self.subscribers.lock().iter().any(|s| s.id == id)
    }

    fn channel_name(&self) -> &'static str {
        self.name
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A named, typed channel.
pub struct Channel<T> {
    inner: Arc<ChannelInner<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("replay", &self.inner.replay)
            .field("subscribers", &self.inner.subscribers.lock().len())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Channel<T> {
    /// Plain channel: no buffering, no replay.
    pub fn new(name: &'static str) -> Self {
        Self::with_replay(name, Replay::None)
    }

    /// Latest-value channel: new subscribers immediately receive the most
    /// recently published value, if any.
    pub fn latest(name: &'static str) -> Self {
        Self::with_replay(name, Replay::Latest)
    }

    fn with_replay(name: &'static str, replay: Replay) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name,
                replay,
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(Vec::new()),
                latest: Mutex::new(None),
                pending: Mutex::new(VecDeque::new()),
                delivering: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Last published value (latest-value channels only).
    pub fn last(&self) -> Option<T> {
        self.inner.latest.lock().clone()
    }

    /// Deliver `value` to every current subscriber, in subscription order.
    pub fn publish(&self, value: T) {
        let inner = &self.inner;
        if inner.replay == Replay::Latest {
            *inner.latest.lock() = Some(value.clone());
        }
        inner.pending.lock().push_back(value);

        loop {
            // Someone further up the stack is already draining this channel.
            if inner.delivering.swap(true, Ordering::AcqRel) {
                return;
            }
            loop {
                let next = inner.pending.lock().pop_front();
                match next {
                    Some(v) => inner.deliver(&v),
                    None => break,
                }
            }
            inner.delivering.store(false, Ordering::Release);
            if inner.pending.lock().is_empty() {
                return;
            }
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.allocate_id();
        self.register(id, Arc::new(handler))
    }

    /// Single-shot subscription: `handler` runs for the first value matching
    /// `predicate`, after which the subscription removes itself.
    pub fn subscribe_once_where<P, F>(&self, predicate: P, handler: F) -> Subscription
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.allocate_id();
        let channel = Arc::downgrade(&self.inner);
        let fired = AtomicBool::new(false);
        let once: Handler<T> = Arc::new(move |value: &T| {
            if !predicate(value) || fired.swap(true, Ordering::AcqRel) {
                return;
            }
            if let Some(ch) = channel.upgrade() {
                ch.remove(id);
            }
            handler(value);
        });
        self.register(id, once)
    }

    fn register(&self, id: u64, handler: Handler<T>) -> Subscription {
        self.inner.insert(id, handler.clone());
        if self.inner.replay == Replay::Latest {
            let last = self.inner.latest.lock().clone();
            if let Some(v) = last {
                self.inner.invoke(id, &handler, &v);
            }
        }
        let channel: Weak<dyn Unsubscribe> = Arc::downgrade(&self.inner) as Weak<dyn Unsubscribe>;
        Subscription { id, channel }
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cancellation token returned by every subscribe call.
///
/// Dropping the token does **not** cancel; call [`Subscription::cancel`] or
/// park it in a [`SubscriptionGroup`].
pub struct Subscription {
    id: u64,
    channel: Weak<dyn Unsubscribe>,
}

impl Subscription {
    /// Stop future deliveries. Idempotent.
    pub fn cancel(&self) {
        if let Some(ch) = self.channel.upgrade() {
            ch.unsubscribe(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.channel
            .upgrade()
            .map_or(false, |ch| ch.is_subscribed(self.id))
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channel = self.channel.upgrade().map(|c| c.channel_name());
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channel", &channel)
            .finish()
    }
}

/// A scope of subscriptions torn down together (a hand, a room session).
/// Everything still in the group is cancelled on drop.
#[derive(Debug, Default)]
pub struct SubscriptionGroup {
    subs: Mutex<Vec<Subscription>>,
}

impl SubscriptionGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, sub: Subscription) {
        self.subs.lock().push(sub);
    }

    pub fn cancel_all(&self) {
        let subs: Vec<Subscription> = std::mem::take(&mut *self.subs.lock());
        for sub in subs {
            sub.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.subs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for SubscriptionGroup {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |v: &T| sink.lock().push(v.clone()))
    }

    #[test]
    fn delivers_in_subscription_order() {
        let ch: Channel<u32> = Channel::new("test");
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let order = order.clone();
            ch.subscribe(move |v| order.lock().push(format!("{tag}{v}")));
        }
        ch.publish(1);
        ch.publish(2);
        assert_eq!(*order.lock(), vec!["a1", "b1", "c1", "a2", "b2", "c2"]);
    }

    #[test]
    fn cancel_stops_future_delivery() {
        let ch: Channel<u32> = Channel::new("test");
        let (log, handler) = recorder();
        let sub = ch.subscribe(handler);
        ch.publish(1);
        sub.cancel();
        sub.cancel();
        ch.publish(2);
        assert_eq!(*log.lock(), vec![1]);
        assert!(!sub.is_active());
        assert_eq!(ch.subscriber_count(), 0);
    }

    #[test]
    fn plain_channel_does_not_replay() {
        let ch: Channel<u32> = Channel::new("test");
        ch.publish(7);
        let (log, handler) = recorder();
        ch.subscribe(handler);
        assert!(log.lock().is_empty());
        assert_eq!(ch.last(), None);
    }

    #[test]
    fn latest_channel_replays_last_value() {
        let ch: Channel<u32> = Channel::latest("joined");
        ch.publish(1);
        ch.publish(2);
        let (log, handler) = recorder();
        ch.subscribe(handler);
        ch.publish(3);
        assert_eq!(*log.lock(), vec![2, 3]);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let ch: Channel<u32> = Channel::new("test");
        ch.subscribe(|_| panic!("boom"));
        let (log, handler) = recorder();
        ch.subscribe(handler);
        ch.publish(1);
        ch.publish(2);
        assert_eq!(*log.lock(), vec![1, 2]);
    }

    #[test]
    fn once_fires_for_first_match_only() {
        let ch: Channel<u32> = Channel::new("test");
        let (log, handler) = recorder();
        let sub = ch.subscribe_once_where(|v| *v % 2 == 0, handler);
        for v in 1..=6 {
            ch.publish(v);
        }
        assert_eq!(*log.lock(), vec![2]);
        assert!(!sub.is_active());
    }

    #[test]
    fn reentrant_publish_is_queued_behind_current_value() {
        let ch: Channel<u32> = Channel::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let republish = ch.clone();
        let first = seen.clone();
        ch.subscribe(move |v| {
            first.lock().push(format!("first:{v}"));
            if *v == 1 {
                republish.publish(2);
            }
        });
        let second = seen.clone();
        ch.subscribe(move |v| second.lock().push(format!("second:{v}")));

        ch.publish(1);
        assert_eq!(
            *seen.lock(),
            vec!["first:1", "second:1", "first:2", "second:2"]
        );
    }

    #[test]
    fn cancel_during_delivery_does_not_affect_in_flight_value() {
        let ch: Channel<u32> = Channel::new("test");
        let (log, handler) = recorder();
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot = victim.clone();
        ch.subscribe(move |_| {
            if let Some(sub) = slot.lock().take() {
                sub.cancel();
            }
        });
        *victim.lock() = Some(ch.subscribe(handler));

        ch.publish(1);
        ch.publish(2);
        assert_eq!(*log.lock(), vec![1]);
    }

    #[test]
    fn group_cancels_everything_on_drop() {
        let ch: Channel<u32> = Channel::new("test");
        {
            let group = SubscriptionGroup::new();
            group.add(ch.subscribe(|_| {}));
            group.add(ch.subscribe(|_| {}));
            assert_eq!(ch.subscriber_count(), 2);
            assert_eq!(group.len(), 2);
        }
        assert_eq!(ch.subscriber_count(), 0);
    }
}
