//! Per-room explicit state.
//!
//! One [`RoomContext`] is built per room session and handed (as an `Arc`) to
//! every component's constructor. There are no process-wide globals: two
//! sessions in one process share nothing.
//!
//! ## Channels
//!
//! | Channel           | Payload            | Replay | Published by                 |
//! |-------------------|--------------------|--------|------------------------------|
//! | `connection`      | `ConnectionState`  | latest | session lifecycle            |
//! | `room_entered`    | `bool`             | latest | session lifecycle            |
//! | `xr_session`      | `XrSessionState`   | latest | session lifecycle            |
//! | `inbound`         | `InboundMessage`   | –      | session (`receive`)          |
//! | `state_mutations` | `StateMutation`    | –      | reconciler                   |
//! | `controllers`     | `ControllerEvent`  | –      | input normalizer             |
//! | `button_changes`  | `XrButtonChange`   | –      | input normalizer             |
//! | `axes`            | `XrAxesChange`     | –      | input normalizer             |
//! | `hand_moved`      | `HandMoved`        | –      | input normalizer             |
//! | `head_pose`       | `Transform`        | latest | input normalizer             |
//! | `camera_snap`     | `Transform`        | latest | avatar system (own avatar)   |
//! | `outbound`        | `OutboundMessage`  | –      | grab controller, pose sync   |

use std::sync::Arc;

use crate::bus::Channel;
use crate::clock::Clock;
use crate::input::{ControllerEvent, HandGrips, HandMoved, XrAxesChange, XrButtonChange};
use crate::protocol::{ConnectionState, InboundMessage, OutboundMessage, XrSessionState};
use crate::scene::SceneGraph;
use crate::store::{EntityStore, StateMutation};
use crate::types::{RoomConfig, Transform};

#[derive(Debug, Clone)]
pub struct RoomChannels {
    pub connection: Channel<ConnectionState>,
    pub room_entered: Channel<bool>,
    pub xr_session: Channel<XrSessionState>,
    pub inbound: Channel<InboundMessage>,
    pub state_mutations: Channel<StateMutation>,
    pub controllers: Channel<ControllerEvent>,
    pub button_changes: Channel<XrButtonChange>,
    pub axes: Channel<XrAxesChange>,
    pub hand_moved: Channel<HandMoved>,
    pub head_pose: Channel<Transform>,
    pub camera_snap: Channel<Transform>,
    pub outbound: Channel<OutboundMessage>,
}

impl RoomChannels {
    pub fn new() -> Self {
        Self {
            connection: Channel::latest("connection"),
            room_entered: Channel::latest("room_entered"),
            xr_session: Channel::latest("xr_session"),
            inbound: Channel::new("inbound"),
            state_mutations: Channel::new("state_mutations"),
            controllers: Channel::new("controllers"),
            button_changes: Channel::new("button_changes"),
            axes: Channel::new("axes"),
            hand_moved: Channel::new("hand_moved"),
            head_pose: Channel::latest("head_pose"),
            camera_snap: Channel::latest("camera_snap"),
            outbound: Channel::new("outbound"),
        }
    }
}

impl Default for RoomChannels {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RoomContext {
    pub room_id: String,
    pub user_id: String,
    pub config: RoomConfig,
    pub channels: RoomChannels,
    /// Read-only handle; only the store's own subscription writes.
    pub store: EntityStore,
    pub grips: HandGrips,
    pub clock: Arc<dyn Clock>,
    pub scene: Arc<dyn SceneGraph>,
}

impl RoomContext {
    pub fn new(
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        config: RoomConfig,
        clock: Arc<dyn Clock>,
        scene: Arc<dyn SceneGraph>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            user_id: user_id.into(),
            config,
            channels: RoomChannels::new(),
            store: EntityStore::new(),
            grips: HandGrips::default(),
            clock,
            scene,
        }
    }
}

impl std::fmt::Debug for RoomContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomContext")
            .field("room_id", &self.room_id)
            .field("user_id", &self.user_id)
            .field("config", &self.config)
            .field("entities", &self.store.len())
            .finish()
    }
}
