//! RoomSession – one joined room, fully wired.
//!
//! The session owns the [`RoomContext`] and connects every component to its
//! channels in an order that matters:
//!
//! 1. The store subscribes to `state_mutations` first, so every system sees
//!    the store with the current mutation already applied.
//! 2. Reactive systems follow in registry order (`mesh_builder` before the
//!    systems that decorate its nodes, `parent` after all of them).
//! 3. On `controllers`, the grab controller runs before grip-node disposal,
//!    so a hand removed mid-hold can still see its target on the grip.
//!
//! XR entry is gated on `room_entered`: an `Entered` that arrives before the
//! room is entered is ignored. `Exited` always goes through.
//!
//! The transport feeds [`RoomSession::receive`] and drains outbound messages
//! through [`RoomSession::on_outbound`]. [`RoomSession::tick`] drives the
//! throttle and deferred-parent timeouts from the session clock.

use log::{debug, info, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::bus::SubscriptionGroup;
use crate::clock::Clock;
use crate::context::RoomContext;
use crate::error::{Error, Result};
use crate::grab::{GrabController, GrabState};
use crate::input::{ControllerEvent, InputFrame, InputNormalizer};
use crate::protocol::{ConnectionState, InboundMessage, OutboundMessage, XrSessionState};
use crate::pose_sync::PoseSync;
use crate::reconciler::DiffReconciler;
use crate::scene::SceneGraph;
use crate::systems::{
    AvatarSystem, ColorSystem, MaterialSystem, MeshBuilderSystem, ParentSystem, PositionSystem,
    SystemRegistry, TagSystem,
};
use crate::types::{Handedness, RoomConfig, RoomStats};

pub struct RoomSession {
    ctx: Arc<RoomContext>,
    reconciler: DiffReconciler,
    input: Arc<InputNormalizer>,
    grab: Arc<GrabController>,
    pose_sync: Arc<PoseSync>,
    parent: Arc<ParentSystem>,
    systems: SystemRegistry,
    subs: SubscriptionGroup,
    outbound_sent: Arc<AtomicU64>,
    entered: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl RoomSession {
    pub fn new(
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        config: RoomConfig,
        clock: Arc<dyn Clock>,
        scene: Arc<dyn SceneGraph>,
    ) -> Self {
        let ctx = Arc::new(RoomContext::new(room_id, user_id, config, clock, scene));
        let channels = &ctx.channels;
        let subs = SubscriptionGroup::new();

        // 1. store, then reconciler
        subs.add(ctx.store.attach(&channels.state_mutations));
        let reconciler = DiffReconciler::new(ctx.store.clone(), channels.state_mutations.clone());
        subs.add(reconciler.attach(&channels.inbound));

        // 2. reactive systems
        let parent = Arc::new(ParentSystem::new(
            ctx.scene.clone(),
            ctx.clock.clone(),
            Duration::from_millis(ctx.config.parent_wait_timeout_ms),
        ));
        let mut systems = SystemRegistry::new();
        let mutations = &channels.state_mutations;
        systems.register(mutations, Arc::new(MeshBuilderSystem::new(ctx.scene.clone())));
        systems.register(mutations, Arc::new(PositionSystem::new(ctx.scene.clone())));
        systems.register(mutations, Arc::new(ColorSystem::new(ctx.scene.clone())));
        systems.register(mutations, Arc::new(MaterialSystem::new(ctx.scene.clone())));
        systems.register(mutations, Arc::new(TagSystem::holdable(ctx.scene.clone())));
        systems.register(mutations, Arc::new(TagSystem::teleportable(ctx.scene.clone())));
        systems.register(mutations, parent.clone());
        systems.register(
            mutations,
            Arc::new(AvatarSystem::new(
                ctx.scene.clone(),
                ctx.user_id.clone(),
                channels.camera_snap.clone(),
            )),
        );

        // 3. input, interaction, outbound
        let input = Arc::new(InputNormalizer::new(channels, ctx.grips.clone()));
        let grab = GrabController::new(ctx.clone());
        grab.attach(&subs);
        let pose_sync = PoseSync::new(ctx.clone());
        pose_sync.attach(&subs);
        subs.add(attach_grip_nodes(&ctx, Arc::downgrade(&input)));

        let outbound_sent = Arc::new(AtomicU64::new(0));
        let counter = outbound_sent.clone();
        subs.add(channels.outbound.subscribe(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        }));

        let entered = Arc::new(AtomicBool::new(false));
        let flag = entered.clone();
        subs.add(channels.room_entered.subscribe(move |yes: &bool| {
            flag.store(*yes, Ordering::Release);
        }));

        info!(
            "[session] room '{}' ready for user '{}' ({} systems)",
            ctx.room_id,
            ctx.user_id,
            systems.len()
        );

        Self {
            ctx,
            reconciler,
            input,
            grab,
            pose_sync,
            parent,
            systems,
            subs,
            outbound_sent,
            entered,
            closed: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Arc<RoomContext> {
        &self.ctx
    }

    pub fn reconciler(&self) -> &DiffReconciler {
        &self.reconciler
    }

    pub fn grab_state(&self, hand: Handedness) -> GrabState {
        self.grab.state(hand)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    /// Feed one `(event, payload)` pair from the room channel.
    pub fn receive(&self, event: &str, payload: Value) -> Result<()> {
        if self.is_closed() {
            debug!("[session] dropping '{}' after leave", event);
            return Ok(());
        }
        let msg = InboundMessage::from_wire(event, payload)?;
        self.ctx.channels.inbound.publish(msg);
        Ok(())
    }

    /// Register the transport's sink for outbound messages. Cancelled on
    /// [`RoomSession::leave`].
    pub fn on_outbound<F>(&self, sink: F)
    where
        F: Fn(&OutboundMessage) + Send + Sync + 'static,
    {
        self.subs.add(self.ctx.channels.outbound.subscribe(sink));
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn room_entered(&self) {
        info!("[session] entered room '{}'", self.ctx.room_id);
        self.ctx.channels.room_entered.publish(true);
    }

    pub fn channel_joined(&self) {
        info!("[session] joined channel for room '{}'", self.ctx.room_id);
        self.ctx.channels.connection.publish(ConnectionState::Joined);
    }

    /// The one unrecoverable failure: announce it (the UI sends the user
    /// back to the room list), tear the session down, and hand the error
    /// back to the caller.
    pub fn channel_join_failed(&self, reason: impl Into<String>) -> Error {
        let reason = reason.into();
        warn!("[session] unable to join room '{}': {}", self.ctx.room_id, reason);
        self.ctx.channels.connection.publish(ConnectionState::JoinFailed {
            reason: reason.clone(),
        });
        self.teardown();
        Error::ChannelJoinFailed(reason)
    }

    pub fn is_room_entered(&self) -> bool {
        self.entered.load(Ordering::Acquire)
    }

    /// Forward an XR session change. Entering XR needs the room to be
    /// entered first.
    pub fn set_xr_session(&self, state: XrSessionState) {
        if state == XrSessionState::Entered && !self.is_room_entered() {
            debug!(
                "[session] ignoring xr entry before room '{}' is entered",
                self.ctx.room_id
            );
            return;
        }
        info!("[session] xr session {:?}", state);
        self.ctx.channels.xr_session.publish(state);
    }

    /// Leave the room: stop every subscription of this session and discard
    /// the mirrored state. Idempotent.
    pub fn leave(&self) {
        if self.is_closed() {
            return;
        }
        info!("[session] leaving room '{}'", self.ctx.room_id);
        self.ctx.channels.connection.publish(ConnectionState::Left);
        self.teardown();
    }

    fn teardown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.grab.reset();
        for hand in Handedness::BOTH {
            self.input.controller_removed(hand);
        }
        self.subs.cancel_all();
        self.systems.cancel_all();
        self.ctx.store.clear();
        self.ctx.grips.clear();
    }

    // -----------------------------------------------------------------------
    // Input
    // -----------------------------------------------------------------------

    pub fn controller_added(&self, hand: Handedness) {
        self.input.controller_added(hand);
    }

    pub fn model_loaded(&self, hand: Handedness) {
        self.input.model_loaded(hand);
    }

    pub fn controller_removed(&self, hand: Handedness) {
        self.input.controller_removed(hand);
    }

    pub fn ingest_input(&self, frame: &InputFrame) {
        if !self.is_closed() {
            self.input.ingest(frame);
        }
    }

    // -----------------------------------------------------------------------
    // Time
    // -----------------------------------------------------------------------

    /// Flush a due pose and expire stale deferred work. Call once per frame.
    pub fn tick(&self) {
        if self.is_closed() {
            return;
        }
        let now = self.ctx.clock.now();
        self.pose_sync.flush_due();
        self.systems.tick(now);
    }

    pub fn stats(&self) -> RoomStats {
        RoomStats {
            entities: self.ctx.store.len(),
            holding: self.grab.holding_count(),
            pending_parent_ops: self.parent.pending_len(),
            outbound_sent: self.outbound_sent.load(Ordering::Relaxed),
        }
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Keep a `<hand>_grip` scene node per ready controller, following the
/// normalizer's grip updates, so grabs have a real node to parent to.
fn attach_grip_nodes(ctx: &Arc<RoomContext>, input: Weak<InputNormalizer>) -> crate::bus::Subscription {
    let scene = ctx.scene.clone();
    let hand_moved = ctx.channels.hand_moved.clone();
    let grips = ctx.grips.clone();
    ctx.channels.controllers.subscribe(move |ev| match *ev {
        ControllerEvent::Ready(hand) => {
            let node = hand.grip_node();
            if !scene.has_node(node) {
                if let Err(e) = scene.create_node(node) {
                    warn!("[session] cannot create {} grip node: {}", hand, e);
                    return;
                }
            }
            if let Some(grip) = grips.get(hand) {
                place(scene.as_ref(), node, grip);
            }
            let follow = scene.clone();
            let sub = hand_moved.subscribe(move |moved| {
                if moved.handedness == hand {
                    place(follow.as_ref(), node, moved.grip);
                }
            });
            match input.upgrade() {
                Some(input) => {
                    input.bind_to_hand(hand, sub);
                }
                None => sub.cancel(),
            }
        }
        ControllerEvent::Removed(hand) => scene.dispose(hand.grip_node()),
        ControllerEvent::Added(_) => {}
    })
}

fn place(scene: &dyn SceneGraph, node: &str, grip: crate::types::Transform) {
    let placed = scene
        .set_position(node, grip.position)
        .and_then(|_| scene.set_rotation(node, grip.rotation));
    if let Err(e) = placed {
        debug!("[session] grip node '{}' not updated: {}", node, e);
    }
}
