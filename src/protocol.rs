//! Room channel wire protocol.
//!
//! This module owns **every message that crosses the network boundary**
//! between the room client and the server. The transport itself (socket,
//! channel join, framing) lives outside this crate; it hands us
//! `(event, payload)` pairs and takes `(event, payload)` pairs back.
//!
//! ## Events
//!
//! | Event            | Direction        | Payload                                 |
//! |------------------|------------------|-----------------------------------------|
//! | `entities_state` | server → client  | `{ entity_id: components }`             |
//! | `entities_diff`  | server → client  | `{ creates, updates, deletes }`         |
//! | `event`          | server → client  | `{ event_name, payload }` (rejections)  |
//! | `i_moved`        | client → server  | `{ pose: { head, left?, right? } }`     |
//! | `event`          | client → server  | `{ event_name, payload: { target_id, user_id, hand } }` |
//!
//! ## Design rules
//!
//! 1. Entity bags stay untyped (`serde_json::Value`) at this layer; each bag is
//!    validated per entity by the reconciler so one bad entity never fails a
//!    whole batch.
//! 2. Outbound pose coordinates are already truncated when they get here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{EntityId, Handedness, Pose};

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Raw `entity_id -> component bag` payload. Bags are checked per entity.
pub type EntityPayload = serde_json::Map<String, Value>;

/// Incremental change set pushed after the initial snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntitiesDiff {
    #[serde(default)]
    pub creates: EntityPayload,
    #[serde(default)]
    pub updates: EntityPayload,
    #[serde(default)]
    pub deletes: EntityPayload,
}

/// Payload shared by the pickup/release interaction events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionPayload {
    pub target_id: EntityId,
    pub user_id: String,
    pub hand: Handedness,
}

/// Generic `{ event_name, payload }` room event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomEvent<T> {
    pub event_name: String,
    pub payload: T,
}

/// A decoded server → client message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Full snapshot of every live entity.
    EntitiesState(EntityPayload),
    /// Incremental diff.
    EntitiesDiff(EntitiesDiff),
    /// Server interaction verdict (e.g. a rejected pickup).
    ServerEvent(RoomEvent<Value>),
}

impl InboundMessage {
    /// Decode a `(event, payload)` pair as delivered by the transport.
    pub fn from_wire(event: &str, payload: Value) -> Result<Self> {
        let decode_err = |source| Error::Payload {
            event: event.to_string(),
            source,
        };
        match event {
            events::ENTITIES_STATE => serde_json::from_value(payload)
                .map(InboundMessage::EntitiesState)
                .map_err(decode_err),
            events::ENTITIES_DIFF => serde_json::from_value(payload)
                .map(InboundMessage::EntitiesDiff)
                .map_err(decode_err),
            events::EVENT => serde_json::from_value(payload)
                .map(InboundMessage::ServerEvent)
                .map_err(decode_err),
            other => Err(Error::UnknownEvent(other.to_string())),
        }
    }

    /// If this is a pickup rejection, its interaction payload.
    pub fn as_pickup_rejection(&self) -> Option<InteractionPayload> {
        match self {
            InboundMessage::ServerEvent(ev) if ev.event_name == events::USER_PICKUP_REJECTED => {
                serde_json::from_value(ev.payload.clone()).ok()
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IMoved {
    pub pose: Pose,
}

/// A client → server message.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Throttled local pose.
    Moved(IMoved),
    /// Interaction intent (`user_picked_up` / `user_released`).
    Interaction(RoomEvent<InteractionPayload>),
}

impl OutboundMessage {
    pub fn picked_up(target_id: impl Into<EntityId>, user_id: impl Into<String>, hand: Handedness) -> Self {
        Self::interaction(events::USER_PICKED_UP, target_id, user_id, hand)
    }

    pub fn released(target_id: impl Into<EntityId>, user_id: impl Into<String>, hand: Handedness) -> Self {
        Self::interaction(events::USER_RELEASED, target_id, user_id, hand)
    }

    fn interaction(
        event_name: &str,
        target_id: impl Into<EntityId>,
        user_id: impl Into<String>,
        hand: Handedness,
    ) -> Self {
        OutboundMessage::Interaction(RoomEvent {
            event_name: event_name.to_string(),
            payload: InteractionPayload {
                target_id: target_id.into(),
                user_id: user_id.into(),
                hand,
            },
        })
    }

    /// Channel event name this message is pushed under.
    pub fn event(&self) -> &'static str {
        match self {
            OutboundMessage::Moved(_) => events::I_MOVED,
            OutboundMessage::Interaction(_) => events::EVENT,
        }
    }

    /// Serialise into the `(event, payload)` pair the transport pushes.
    pub fn to_wire(&self) -> (&'static str, Value) {
        let payload = match self {
            OutboundMessage::Moved(m) => serde_json::to_value(m),
            OutboundMessage::Interaction(ev) => serde_json::to_value(ev),
        };
        // Both payload types are plain structs of strings/numbers.
        (self.event(), payload.unwrap_or(Value::Null))
    }

    pub fn interaction_name(&self) -> Option<&str> {
        match self {
            OutboundMessage::Interaction(ev) => Some(ev.event_name.as_str()),
            OutboundMessage::Moved(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Connection / lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ConnectionState {
    Joining,
    Joined,
    JoinFailed { reason: String },
    Left,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum XrSessionState {
    Entered,
    Exited,
}

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// All channel event names used by the room protocol, as constants.
pub mod events {
    pub const ENTITIES_STATE: &str = "entities_state";
    pub const ENTITIES_DIFF: &str = "entities_diff";

    pub const I_MOVED: &str = "i_moved";
    pub const EVENT: &str = "event";

    /// `event_name` values carried inside `event`.
    pub const USER_PICKED_UP: &str = "user_picked_up";
    pub const USER_RELEASED: &str = "user_released";
    pub const USER_PICKUP_REJECTED: &str = "user_pickup_rejected";
}
