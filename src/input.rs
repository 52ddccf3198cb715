//! Input normalizer – raw per-frame controller/head telemetry in,
//! edge-triggered events out.
//!
//! ## Controller lifecycle
//!
//! ```text
//! controller_added ──► model_loaded ──► ingest … ──► controller_removed
//!     (Added)             (Ready)      (changes)         (Removed)
//! ```
//!
//! Samples for a hand are ignored until its model has loaded; the grip
//! transform is not meaningful before that. Every subscription bound to a
//! hand with [`InputNormalizer::bind_to_hand`] is cancelled on removal, so a
//! reattached controller starts clean.
//!
//! ## Change records
//!
//! Each control's sample is compared with the previous sample of the same
//! control (a resting control for the first one). Only the fields that differ
//! are filled in on the [`XrButtonChange`]; an unchanged control emits
//! nothing.

use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::bus::{Channel, Subscription, SubscriptionGroup};
use crate::context::RoomChannels;
use crate::types::{HandMap, Handedness, Transform};

// ---------------------------------------------------------------------------
// Raw samples
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Trigger,
    Squeeze,
    Touchpad,
    Thumbstick,
    Button,
}

/// State of one discrete control in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSample {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ControlKind,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub touched: bool,
    #[serde(default)]
    pub pressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axes: Option<[f64; 2]>,
}

impl ControlSample {
    fn resting(id: &str, kind: ControlKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            value: 0.0,
            touched: false,
            pressed: false,
            axes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSample {
    pub handedness: Handedness,
    #[serde(default)]
    pub grip: Option<Transform>,
    #[serde(default)]
    pub controls: Vec<ControlSample>,
}

/// Everything the device reported for one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputFrame {
    #[serde(default)]
    pub head: Option<Transform>,
    #[serde(default)]
    pub controllers: Vec<ControllerSample>,
}

// ---------------------------------------------------------------------------
// Normalized events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Delta<T> {
    pub current: T,
    pub previous: T,
}

impl<T: PartialEq + Copy> Delta<T> {
    fn between(previous: T, current: T) -> Option<Self> {
        (previous != current).then_some(Delta { current, previous })
    }
}

/// Sparse change record for one control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XrButtonChange {
    pub handedness: Handedness,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ControlKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Delta<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touched: Option<Delta<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressed: Option<Delta<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axes: Option<Delta<[f64; 2]>>,
}

impl XrButtonChange {
    /// `Some(true)` on a press edge, `Some(false)` on a release edge.
    pub fn pressed_edge(&self) -> Option<bool> {
        self.pressed.map(|d| d.current)
    }

    pub fn is_squeeze_edge(&self, hand: Handedness, down: bool) -> bool {
        self.handedness == hand
            && self.kind == ControlKind::Squeeze
            && self.pressed_edge() == Some(down)
    }
}

/// Thumbstick movement, also carried inside [`XrButtonChange::axes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XrAxesChange {
    pub handedness: Handedness,
    pub id: String,
    pub axes: Delta<[f64; 2]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HandMoved {
    pub handedness: Handedness,
    pub grip: Transform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "hand")]
pub enum ControllerEvent {
    Added(Handedness),
    /// Model loaded; the grip transform is now meaningful.
    Ready(Handedness),
    Removed(Handedness),
}

impl ControllerEvent {
    pub fn hand(&self) -> Handedness {
        match *self {
            ControllerEvent::Added(h) | ControllerEvent::Ready(h) | ControllerEvent::Removed(h) => h,
        }
    }
}

// ---------------------------------------------------------------------------
// Grips
// ---------------------------------------------------------------------------

/// Live grip transform per hand, `None` until the hand is ready.
#[derive(Debug, Clone, Default)]
pub struct HandGrips {
    inner: Arc<RwLock<HandMap<Option<Transform>>>>,
}

impl HandGrips {
    pub fn get(&self, hand: Handedness) -> Option<Transform> {
        self.inner.read()[hand]
    }

    fn set(&self, hand: Handedness, grip: Option<Transform>) {
        self.inner.write()[hand] = grip;
    }

    pub fn clear(&self) {
        *self.inner.write() = HandMap::default();
    }
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct HandTrack {
    ready: bool,
    controls: HashMap<String, ControlSample>,
    grip: Option<Transform>,
    subs: SubscriptionGroup,
}

pub struct InputNormalizer {
    controllers: Channel<ControllerEvent>,
    button_changes: Channel<XrButtonChange>,
    axes: Channel<XrAxesChange>,
    hand_moved: Channel<HandMoved>,
    head_pose: Channel<Transform>,
    grips: HandGrips,
    hands: Mutex<HandMap<Option<HandTrack>>>,
    head: Mutex<Option<Transform>>,
}

impl InputNormalizer {
    pub fn new(channels: &RoomChannels, grips: HandGrips) -> Self {
        Self {
            controllers: channels.controllers.clone(),
            button_changes: channels.button_changes.clone(),
            axes: channels.axes.clone(),
            hand_moved: channels.hand_moved.clone(),
            head_pose: channels.head_pose.clone(),
            grips,
            hands: Mutex::new(HandMap::default()),
            head: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start tracking `hand`. A controller already tracked for that hand is
    /// removed first, with the usual `Removed` event, so holds and grip
    /// nodes tied to it are cleaned up.
    pub fn controller_added(&self, hand: Handedness) {
        let live = self.hands.lock()[hand].is_some();
        if live {
            debug!("[input] {} controller re-added; removing the previous one", hand);
            self.controller_removed(hand);
        }
        self.hands.lock()[hand] = Some(HandTrack::default());
        info!("[input] {} controller added", hand);
        self.controllers.publish(ControllerEvent::Added(hand));
    }

    pub fn model_loaded(&self, hand: Handedness) {
        let became_ready = match self.hands.lock()[hand].as_mut() {
            Some(track) if !track.ready => {
                track.ready = true;
                true
            }
            Some(_) => false,
            None => {
                debug!("[input] model loaded for unknown {} controller", hand);
                false
            }
        };
        if became_ready {
            info!("[input] {} controller ready", hand);
            self.controllers.publish(ControllerEvent::Ready(hand));
        }
    }

    pub fn controller_removed(&self, hand: Handedness) {
        let Some(track) = self.hands.lock()[hand].take() else {
            debug!("[input] removal of unknown {} controller", hand);
            return;
        };
        track.subs.cancel_all();
        self.grips.set(hand, None);
        info!("[input] {} controller removed", hand);
        self.controllers.publish(ControllerEvent::Removed(hand));
    }

    pub fn is_ready(&self, hand: Handedness) -> bool {
        self.hands.lock()[hand].as_ref().map_or(false, |t| t.ready)
    }

    /// Tie `sub` to the lifetime of `hand`'s controller. If the controller
    /// is not connected the subscription is cancelled immediately and
    /// `false` is returned.
    pub fn bind_to_hand(&self, hand: Handedness, sub: Subscription) -> bool {
        match self.hands.lock()[hand].as_ref() {
            Some(track) => {
                track.subs.add(sub);
                true
            }
            None => {
                sub.cancel();
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Samples
    // -----------------------------------------------------------------------

    pub fn ingest(&self, frame: &InputFrame) {
        if let Some(head) = frame.head {
            let changed = {
                let mut last = self.head.lock();
                let changed = *last != Some(head);
                *last = Some(head);
                changed
            };
            if changed {
                self.head_pose.publish(head);
            }
        }
        for sample in &frame.controllers {
            self.ingest_controller(sample);
        }
    }

    fn ingest_controller(&self, sample: &ControllerSample) {
        let hand = sample.handedness;
        let mut changes = Vec::new();
        let mut moved = None;
        {
            let mut hands = self.hands.lock();
            let Some(track) = hands[hand].as_mut().filter(|t| t.ready) else {
                debug!("[input] dropping sample for {} controller (not ready)", hand);
                return;
            };
            for control in &sample.controls {
                let previous = track
                    .controls
                    .get(&control.id)
                    .cloned()
                    .unwrap_or_else(|| ControlSample::resting(&control.id, control.kind));
                if let Some(change) = diff_control(hand, &previous, control) {
                    changes.push(change);
                }
                track.controls.insert(control.id.clone(), control.clone());
            }
            if let Some(grip) = sample.grip {
                if track.grip != Some(grip) {
                    track.grip = Some(grip);
                    moved = Some(grip);
                }
            }
        }

        if let Some(grip) = moved {
            self.grips.set(hand, Some(grip));
        }
        for change in changes {
            let axes = change
                .axes
                .filter(|_| change.kind == ControlKind::Thumbstick)
                .map(|axes| XrAxesChange {
                    handedness: hand,
                    id: change.id.clone(),
                    axes,
                });
            self.button_changes.publish(change);
            if let Some(axes) = axes {
                self.axes.publish(axes);
            }
        }
        if let Some(grip) = moved {
            self.hand_moved.publish(HandMoved {
                handedness: hand,
                grip,
            });
        }
    }
}

fn diff_control(hand: Handedness, previous: &ControlSample, current: &ControlSample) -> Option<XrButtonChange> {
    let axes = match current.axes {
        Some(now) => Delta::between(previous.axes.unwrap_or([0.0; 2]), now),
        None => None,
    };
    let change = XrButtonChange {
        handedness: hand,
        id: current.id.clone(),
        kind: current.kind,
        value: Delta::between(previous.value, current.value),
        touched: Delta::between(previous.touched, current.touched),
        pressed: Delta::between(previous.pressed, current.pressed),
        axes,
    };
    let any = change.value.is_some()
        || change.touched.is_some()
        || change.pressed.is_some()
        || change.axes.is_some();
    any.then_some(change)
}
