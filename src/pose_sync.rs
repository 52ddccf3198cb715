//! Outbound pose sync – head and hand transforms to `i_moved`.
//!
//! Nothing is sent before the room channel is joined. After the join, the
//! first `skip_initial_head_samples` head samples are dropped (they are the
//! camera snapping back to its last known position, not real movement).
//!
//! Samples go through a trailing [`Throttle`]: the first sample opens a
//! window of `movement_sync_ms`, later samples in the window only replace the
//! pending pose, and whatever is pending when the window closes is sent.
//! At most one `i_moved` per window; a quiet hand or head does not hold the
//! send back. Coordinates are truncated toward zero to `truncate_places`
//! decimals, and a pose identical to the previous one sent is skipped.

use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::SubscriptionGroup;
use crate::context::RoomContext;
use crate::input::ControllerEvent;
use crate::protocol::{ConnectionState, IMoved, OutboundMessage, XrSessionState};
use crate::types::{HandMap, Handedness, Pose, Transform};

// ---------------------------------------------------------------------------
// Throttle
// ---------------------------------------------------------------------------

/// Trailing throttle: at most one value per window, the latest one.
#[derive(Debug, Clone)]
pub struct Throttle<T> {
    window: Duration,
    closes_at: Option<Duration>,
    pending: Option<T>,
}

impl<T> Throttle<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            closes_at: None,
            pending: None,
        }
    }

    /// Offer a sample at `now`. Returns a value only when a window that was
    /// already due is closed by this call.
    pub fn offer(&mut self, now: Duration, value: T) -> Option<T> {
        let due = self.poll(now);
        if self.closes_at.is_none() {
            self.closes_at = Some(now + self.window);
        }
        self.pending = Some(value);
        due
    }

    /// Emit the pending value if its window has closed.
    pub fn poll(&mut self, now: Duration) -> Option<T> {
        match self.closes_at {
            Some(at) if now >= at => {
                self.closes_at = None;
                self.pending.take()
            }
            _ => None,
        }
    }

    /// Drop anything pending and close the window.
    pub fn reset(&mut self) {
        self.closes_at = None;
        self.pending = None;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

// ---------------------------------------------------------------------------
// PoseSync
// ---------------------------------------------------------------------------

struct SyncState {
    joined: bool,
    skip_head: u32,
    head: Option<Transform>,
    hands: HandMap<Option<Transform>>,
    throttle: Throttle<Pose>,
    last_sent: Option<Pose>,
}

pub struct PoseSync {
    ctx: Arc<RoomContext>,
    state: Mutex<SyncState>,
}

impl PoseSync {
    pub fn new(ctx: Arc<RoomContext>) -> Arc<Self> {
        let window = Duration::from_millis(ctx.config.movement_sync_ms);
        Arc::new(Self {
            ctx,
            state: Mutex::new(SyncState {
                joined: false,
                skip_head: 0,
                head: None,
                hands: HandMap::default(),
                throttle: Throttle::new(window),
                last_sent: None,
            }),
        })
    }

    pub fn attach(self: &Arc<Self>, group: &SubscriptionGroup) {
        let channels = &self.ctx.channels;

        let this = Arc::downgrade(self);
        group.add(channels.connection.subscribe(move |state| {
            if let Some(sync) = this.upgrade() {
                sync.on_connection(state);
            }
        }));

        let this = Arc::downgrade(self);
        group.add(channels.head_pose.subscribe(move |head| {
            if let Some(sync) = this.upgrade() {
                sync.on_head(*head);
            }
        }));

        let this = Arc::downgrade(self);
        group.add(channels.hand_moved.subscribe(move |moved| {
            if let Some(sync) = this.upgrade() {
                sync.on_hand(moved.handedness, Some(moved.grip));
            }
        }));

        let this = Arc::downgrade(self);
        group.add(channels.controllers.subscribe(move |ev| {
            if let (ControllerEvent::Removed(hand), Some(sync)) = (ev, this.upgrade()) {
                sync.on_hand(*hand, None);
            }
        }));

        let this = Arc::downgrade(self);
        group.add(channels.xr_session.subscribe(move |state| {
            if let (XrSessionState::Exited, Some(sync)) = (state, this.upgrade()) {
                let mut st = sync.state.lock();
                st.hands = HandMap::default();
            }
        }));
    }

    /// Send the pending pose if its throttle window has closed. Returns
    /// whether an `i_moved` went out.
    pub fn flush_due(&self) -> bool {
        let now = self.ctx.clock.now();
        let due = self.state.lock().throttle.poll(now);
        match due {
            Some(pose) => self.send(pose),
            None => false,
        }
    }

    fn on_connection(&self, state: &ConnectionState) {
        let mut st = self.state.lock();
        match state {
            ConnectionState::Joined if !st.joined => {
                info!("[pose_sync] channel joined; pose sync enabled");
                st.joined = true;
                st.skip_head = self.ctx.config.skip_initial_head_samples;
            }
            ConnectionState::Joined => {}
            _ if st.joined => {
                debug!("[pose_sync] channel no longer joined; pose sync paused");
                st.joined = false;
                st.throttle.reset();
            }
            _ => {}
        }
    }

    fn on_head(&self, head: Transform) {
        {
            let mut st = self.state.lock();
            if !st.joined {
                return;
            }
            if st.skip_head > 0 {
                st.skip_head -= 1;
                return;
            }
            st.head = Some(head);
        }
        self.offer();
    }

    fn on_hand(&self, hand: Handedness, grip: Option<Transform>) {
        let joined = {
            let mut st = self.state.lock();
            st.hands[hand] = grip;
            st.joined
        };
        if joined && grip.is_some() {
            self.offer();
        }
    }

    fn offer(&self) {
        let now = self.ctx.clock.now();
        let places = self.ctx.config.truncate_places;
        let due = {
            let mut st = self.state.lock();
            // A pose always carries a head.
            let Some(head) = st.head else {
                return;
            };
            let pose = Pose {
                head: head.to_pose_array(places),
                left: st.hands.left.map(|t| t.to_pose_array(places)),
                right: st.hands.right.map(|t| t.to_pose_array(places)),
            };
            st.throttle.offer(now, pose)
        };
        if let Some(pose) = due {
            self.send(pose);
        }
    }

    fn send(&self, pose: Pose) -> bool {
        {
            let mut st = self.state.lock();
            if !st.joined || st.last_sent.as_ref() == Some(&pose) {
                return false;
            }
            st.last_sent = Some(pose.clone());
        }
        self.ctx
            .channels
            .outbound
            .publish(OutboundMessage::Moved(IMoved { pose }));
        true
    }
}
