//! Core room types shared across all modules.

use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// Opaque entity identifier, unique within a room.
pub type EntityId = String;

/// A server-pushed component bag (`component name -> arbitrary value`).
///
/// `serde_json::Map` keeps keys ordered, which makes iteration over a
/// snapshot deterministic.
pub type Components = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Basic math
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn distance_squared(self, other: Self) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        dx * dx + dy * dy + dz * dz
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f64; 3]> for Vec3 {
    fn from(a: [f64; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// Rotation quaternion, `(x, y, z, w)` order on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Quat {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quat {
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.x, self.y, self.z, self.w]
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::identity()
    }
}

/// Position + rotation of a tracked node (head, grip, avatar part).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Transform {
    pub position: Vec3,
    #[serde(default)]
    pub rotation: Quat,
}

impl Transform {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn at(position: Vec3) -> Self {
        Self::new(position, Quat::identity())
    }

    /// Pack into the 7-element wire layout, truncating every component to
    /// `places` decimals.
    pub fn to_pose_array(&self, places: u32) -> PoseArray {
        let p = self.position;
        let r = self.rotation;
        [p.x, p.y, p.z, r.x, r.y, r.z, r.w].map(|v| truncate(v, places))
    }

    /// Inverse of [`Transform::to_pose_array`] (no truncation).
    pub fn from_pose_array(a: &PoseArray) -> Self {
        Self::new(Vec3::new(a[0], a[1], a[2]), Quat::new(a[3], a[4], a[5], a[6]))
    }
}

/// Sphere used as a spatial detection volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f64,
}

impl Sphere {
    pub fn new(center: Vec3, radius: f64) -> Self {
        Self { center, radius }
    }
}

/// Truncate `value` to `places` decimals, toward zero (no rounding).
///
/// `truncate(1.23456, 2) == 1.23`, `truncate(-1.239, 2) == -1.23`.
///
/// Works on the decimal value, not its binary approximation: `1.13 * 100`
/// is `112.99999999999999`, which still truncates to `1.13`.
pub fn truncate(value: f64, places: u32) -> f64 {
    let shift = 10f64.powi(places as i32);
    let scaled = value * shift;
    let nearest = scaled.round();
    let cut = if (scaled - nearest).abs() < 1e-9 * scaled.abs().max(1.0) {
        nearest
    } else {
        scaled.trunc()
    };
    cut / shift
}

// ---------------------------------------------------------------------------
// Hands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub const BOTH: [Handedness; 2] = [Handedness::Left, Handedness::Right];

    pub fn as_str(self) -> &'static str {
        match self {
            Handedness::Left => "left",
            Handedness::Right => "right",
        }
    }

    /// Scene node id of this hand's grip.
    pub fn grip_node(self) -> &'static str {
        match self {
            Handedness::Left => "left_grip",
            Handedness::Right => "right_grip",
        }
    }

    pub fn other(self) -> Self {
        match self {
            Handedness::Left => Handedness::Right,
            Handedness::Right => Handedness::Left,
        }
    }
}

impl std::fmt::Display for Handedness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed two-slot storage indexed by [`Handedness`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandMap<T> {
    pub left: T,
    pub right: T,
}

impl<T> HandMap<T> {
    pub fn new(left: T, right: T) -> Self {
        Self { left, right }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handedness, &T)> {
        [(Handedness::Left, &self.left), (Handedness::Right, &self.right)].into_iter()
    }
}

impl<T> Index<Handedness> for HandMap<T> {
    type Output = T;

    fn index(&self, hand: Handedness) -> &T {
        match hand {
            Handedness::Left => &self.left,
            Handedness::Right => &self.right,
        }
    }
}

impl<T> IndexMut<Handedness> for HandMap<T> {
    fn index_mut(&mut self, hand: Handedness) -> &mut T {
        match hand {
            Handedness::Left => &mut self.left,
            Handedness::Right => &mut self.right,
        }
    }
}

// ---------------------------------------------------------------------------
// Pose
// ---------------------------------------------------------------------------

/// 3 position components followed by a `(x, y, z, w)` quaternion.
pub type PoseArray = [f64; 7];

/// Head + optional hand poses, as sent in `i_moved` and stored in avatar
/// components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pose {
    pub head: PoseArray,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<PoseArray>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<PoseArray>,
}

impl Pose {
    pub fn hand(&self, hand: Handedness) -> Option<&PoseArray> {
        match hand {
            Handedness::Left => self.left.as_ref(),
            Handedness::Right => self.right.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stats & config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomStats {
    pub entities: usize,
    pub holding: usize,
    pub pending_parent_ops: usize,
    pub outbound_sent: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Minimum interval between two `i_moved` pushes (throttle window).
    pub movement_sync_ms: u64,
    /// Decimal places kept when truncating outbound pose coordinates.
    pub truncate_places: u32,
    /// Head samples dropped right after joining (camera snap feedback).
    pub skip_initial_head_samples: u32,
    /// Radius of the grab detection sphere around a grip.
    pub detection_radius: f64,
    /// How long a parent operation may wait for its parent entity.
    pub parent_wait_timeout_ms: u64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            movement_sync_ms: 50,
            truncate_places: 2,
            skip_initial_head_samples: 3,
            detection_radius: 0.2,
            parent_wait_timeout_ms: 1000,
        }
    }
}
