//! Shared fixture for the integration tests: a session over `MemoryScene`,
//! driven by a `ManualClock`, recording everything it sends.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use xr_room::{
    clock::ManualClock,
    input::{ControlKind, ControlSample, ControllerSample, InputFrame},
    protocol::OutboundMessage,
    scene::MemoryScene,
    session::RoomSession,
    types::{Handedness, Pose, RoomConfig, Transform, Vec3},
};

pub const USER: &str = "me";

pub struct Harness {
    pub session: RoomSession,
    pub clock: Arc<ManualClock>,
    pub scene: Arc<MemoryScene>,
    pub sent: Arc<Mutex<Vec<OutboundMessage>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(RoomConfig::default())
    }

    pub fn with_config(config: RoomConfig) -> Self {
        let clock = Arc::new(ManualClock::new());
        let scene = Arc::new(MemoryScene::new());
        let session = RoomSession::new("lobby", USER, config, clock.clone(), scene.clone());
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        session.on_outbound(move |msg| sink.lock().push(msg.clone()));
        Self {
            session,
            clock,
            scene,
            sent,
        }
    }

    pub fn receive(&self, event: &str, payload: Value) {
        self.session.receive(event, payload).unwrap();
    }

    /// `(event_name, target_id, hand)` of every interaction sent so far.
    pub fn interactions(&self) -> Vec<(String, String, Handedness)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Interaction(ev) => Some((
                    ev.event_name.clone(),
                    ev.payload.target_id.clone(),
                    ev.payload.hand,
                )),
                OutboundMessage::Moved(_) => None,
            })
            .collect()
    }

    pub fn poses(&self) -> Vec<Pose> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Moved(moved) => Some(moved.pose.clone()),
                OutboundMessage::Interaction(_) => None,
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Input
    // -----------------------------------------------------------------------

    /// Connect `hand`, load its model and put its grip at `at`.
    pub fn ready_hand(&self, hand: Handedness, at: Vec3) {
        self.session.controller_added(hand);
        self.session.model_loaded(hand);
        self.move_hand(hand, at);
    }

    pub fn move_hand(&self, hand: Handedness, at: Vec3) {
        self.session.ingest_input(&InputFrame {
            head: None,
            controllers: vec![ControllerSample {
                handedness: hand,
                grip: Some(Transform::at(at)),
                controls: vec![],
            }],
        });
    }

    pub fn squeeze(&self, hand: Handedness, down: bool) {
        self.session.ingest_input(&InputFrame {
            head: None,
            controllers: vec![ControllerSample {
                handedness: hand,
                grip: None,
                controls: vec![ControlSample {
                    id: "xr-standard-squeeze".into(),
                    kind: ControlKind::Squeeze,
                    value: if down { 1.0 } else { 0.0 },
                    touched: down,
                    pressed: down,
                    axes: None,
                }],
            }],
        });
    }

    pub fn head(&self, at: Vec3) {
        self.session.ingest_input(&InputFrame {
            head: Some(Transform::at(at)),
            controllers: vec![],
        });
    }

    /// Move the clock forward and run one session tick.
    pub fn advance(&self, ms: u64) {
        self.clock.advance_ms(ms);
        self.session.tick();
    }
}
