//! Grab/release state machine, one per hand.
//!
//! ```text
//!            squeeze ↓ + holdable in reach
//!   Idle ─────────────────────────────────────► Holding(target)
//!    ▲   parent target to <hand>_grip, send user_picked_up  │
//!    │                                                      │
//!    └──────────────────────────────────────────────────────┘
//!      squeeze ↑ (same hand)      → unparent, send user_released
//!      user_pickup_rejected       → restore previous parent, silent
//!      controller removed         → unparent, send user_released
//! ```
//!
//! The pickup is optimistic: the target is parented locally before the
//! server has seen anything. The release listener is a single-shot
//! subscription scoped to the holding hand, so a hand never has two, and an
//! edge on the other hand never releases this one.
//!
//! On release the parent is only cleared (and the release sent) if the
//! target still hangs off this hand's grip. If something else reparented it
//! in the meantime, e.g. a server `parent` update, the release is swallowed.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

use crate::bus::{Subscription, SubscriptionGroup};
use crate::context::RoomContext;
use crate::input::ControllerEvent;
use crate::protocol::{InteractionPayload, OutboundMessage};
use crate::scene::HOLDABLE_TAG;
use crate::types::{EntityId, HandMap, Handedness, Sphere};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrabState {
    Idle,
    Holding(EntityId),
}

struct Hold {
    target: EntityId,
    /// Parent the target had before pickup, restored on rejection.
    previous_parent: Option<EntityId>,
    release: Subscription,
}

pub struct GrabController {
    ctx: Arc<RoomContext>,
    hands: Mutex<HandMap<Option<Hold>>>,
}

impl GrabController {
    pub fn new(ctx: Arc<RoomContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            hands: Mutex::new(HandMap::default()),
        })
    }

    /// Start listening for squeeze edges, pickup rejections and controller
    /// removal. The subscriptions land in `group`.
    pub fn attach(self: &Arc<Self>, group: &SubscriptionGroup) {
        let channels = &self.ctx.channels;

        let this = Arc::downgrade(self);
        group.add(channels.button_changes.subscribe(move |change| {
            if change.is_squeeze_edge(change.handedness, true) {
                if let Some(grab) = this.upgrade() {
                    grab.on_press(change.handedness);
                }
            }
        }));

        let this = Arc::downgrade(self);
        group.add(channels.inbound.subscribe(move |msg| {
            if let (Some(rejection), Some(grab)) = (msg.as_pickup_rejection(), this.upgrade()) {
                grab.on_rejected(&rejection);
            }
        }));

        let this = Arc::downgrade(self);
        group.add(channels.controllers.subscribe(move |ev| {
            if let (ControllerEvent::Removed(hand), Some(grab)) = (ev, this.upgrade()) {
                grab.on_controller_removed(*hand);
            }
        }));
    }

    pub fn state(&self, hand: Handedness) -> GrabState {
        match &self.hands.lock()[hand] {
            Some(hold) => GrabState::Holding(hold.target.clone()),
            None => GrabState::Idle,
        }
    }

    pub fn holding_count(&self) -> usize {
        self.hands.lock().iter().filter(|(_, h)| h.is_some()).count()
    }

    /// Forget every hold without touching the scene or the server (room exit).
    pub fn reset(&self) {
        let mut hands = self.hands.lock();
        for hand in Handedness::BOTH {
            if let Some(hold) = hands[hand].take() {
                hold.release.cancel();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn on_press(self: &Arc<Self>, hand: Handedness) {
        if self.hands.lock()[hand].is_some() {
            debug!("[grab] {} hand already holding; ignoring squeeze", hand);
            return;
        }
        let Some(grip) = self.ctx.grips.get(hand) else {
            debug!("[grab] {} hand has no grip yet", hand);
            return;
        };
        let scene = &self.ctx.scene;
        let volume = Sphere::new(grip.position, self.ctx.config.detection_radius);
        let Some(target) = scene.find_intersecting(&volume, HOLDABLE_TAG).into_iter().next() else {
            debug!("[grab] nothing holdable near {} hand at {}", hand, grip.position);
            return;
        };

        let previous_parent = scene.parent_of(&target);
        if let Err(e) = scene.set_parent(&target, Some(hand.grip_node())) {
            warn!("[grab] cannot attach '{}' to {} hand: {}", target, hand, e);
            return;
        }

        let this = Arc::downgrade(self);
        let release = self.ctx.channels.button_changes.subscribe_once_where(
            move |change| change.is_squeeze_edge(hand, false),
            move |_| release_hand(&this, hand),
        );
        self.hands.lock()[hand] = Some(Hold {
            target: target.clone(),
            previous_parent,
            release,
        });

        info!("[grab] {} hand picked up '{}'", hand, target);
        self.ctx
            .channels
            .outbound
            .publish(OutboundMessage::picked_up(target, self.ctx.user_id.clone(), hand));
    }

    fn on_release(&self, hand: Handedness) {
        let Some(hold) = self.hands.lock()[hand].take() else {
            return;
        };
        self.let_go(hand, hold);
    }

    fn on_controller_removed(&self, hand: Handedness) {
        let Some(hold) = self.hands.lock()[hand].take() else {
            return;
        };
        hold.release.cancel();
        info!("[grab] {} controller removed while holding '{}'", hand, hold.target);
        self.let_go(hand, hold);
    }

    fn on_rejected(&self, rejection: &InteractionPayload) {
        if rejection.user_id != self.ctx.user_id {
            return;
        }
        let hand = rejection.hand;
        let hold = {
            let mut hands = self.hands.lock();
            let pending = hands[hand]
                .as_ref()
                .map_or(false, |hold| hold.target == rejection.target_id);
            if pending {
                hands[hand].take()
            } else {
                None
            }
        };
        let Some(hold) = hold else {
            debug!("[grab] stale rejection for '{}' ({} hand)", rejection.target_id, hand);
            return;
        };
        hold.release.cancel();
        warn!("[grab] server rejected pickup of '{}'", hold.target);

        let scene = &self.ctx.scene;
        if scene.parent_of(&hold.target).as_deref() != Some(hand.grip_node()) {
            return;
        }
        let restore = hold
            .previous_parent
            .as_deref()
            .filter(|p| scene.has_node(p));
        if let Err(e) = scene.set_parent(&hold.target, restore) {
            warn!("[grab] cannot roll back '{}': {}", hold.target, e);
        }
    }

    /// Clear the parent and announce the release, unless the target has
    /// been reparented by someone else since pickup.
    fn let_go(&self, hand: Handedness, hold: Hold) {
        let scene = &self.ctx.scene;
        if scene.parent_of(&hold.target).as_deref() != Some(hand.grip_node()) {
            debug!("[grab] '{}' was reparented elsewhere; no release sent", hold.target);
            return;
        }
        if let Err(e) = scene.set_parent(&hold.target, None) {
            warn!("[grab] cannot detach '{}': {}", hold.target, e);
        }
        info!("[grab] {} hand released '{}'", hand, hold.target);
        self.ctx
            .channels
            .outbound
            .publish(OutboundMessage::released(hold.target, self.ctx.user_id.clone(), hand));
    }
}

fn release_hand(grab: &Weak<GrabController>, hand: Handedness) {
    if let Some(grab) = grab.upgrade() {
        grab.on_release(hand);
    }
}
