//! XR Room Client Runtime
//!
//! Client side of a multi-user shared 3D room: a local mirror of the
//! server-authoritative entity/component state, a typed event bus fanning
//! changes out to independent reactive systems, and hand-controller input
//! driving a grab/release protocol back to the server.
//!
//! ## Architecture
//!
//! ```text
//! RoomSession  (session.rs)            ← wiring, lifecycle, tick
//!   ├── RoomContext  (context.rs)      ← per-room state + RoomChannels
//!   │     ├── EntityStore  (store.rs)  ← single writer, subscribed first
//!   │     └── SceneGraph   (scene.rs)  ← engine capability surface
//!   ├── DiffReconciler  (reconciler.rs)
//!   ├── SystemRegistry  (systems/)     ← mesh, position, color, tags, parent, avatar
//!   ├── InputNormalizer (input.rs)
//!   ├── GrabController  (grab.rs)
//!   └── PoseSync        (pose_sync.rs)
//! ```
//!
//! Data flows one way through the bus:
//!
//! ```text
//! receive(event, payload) → inbound → reconciler → state_mutations → store, systems
//! ingest_input(frame) → button_changes / hand_moved / head_pose → grab, pose sync → outbound
//! ```
//!
//! Everything runs on one logical thread; delivery is synchronous and
//! ordered (see [`bus`]).

pub mod bus;
pub mod clock;
pub mod components;
pub mod context;
pub mod deferred;
pub mod error;
pub mod grab;
pub mod input;
pub mod pose_sync;
pub mod protocol;
pub mod reconciler;
pub mod scene;
pub mod session;
pub mod store;
pub mod systems;
pub mod types;

pub use bus::{Channel, Subscription, SubscriptionGroup};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{RoomChannels, RoomContext};
pub use error::{Error, Result};
pub use grab::{GrabController, GrabState};
pub use input::{ControllerEvent, HandGrips, InputFrame, InputNormalizer, XrButtonChange};
pub use pose_sync::{PoseSync, Throttle};
pub use protocol::{ConnectionState, InboundMessage, OutboundMessage, XrSessionState};
pub use reconciler::DiffReconciler;
pub use scene::{MemoryScene, SceneGraph};
pub use session::RoomSession;
pub use store::{EntityStore, StateMutation, StateOperation};
pub use types::{Handedness, Pose, RoomConfig, RoomStats, Transform, Vec3};
