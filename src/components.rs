//! Typed component decoders.
//!
//! Component bags arrive untyped. Each subsystem decodes only the components
//! it cares about through [`Component::decode`], so a malformed value is
//! rejected at the boundary with a [`Error::MalformedComponent`] instead of
//! being half-interpreted downstream.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{EntityId, Pose, Vec3};

pub trait Component: Sized {
    /// Key of this component in a bag.
    const NAME: &'static str;

    fn decode(value: &Value) -> Result<Self>;
}

fn number(value: &Value, component: &'static str) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| Error::malformed(component, format!("expected a number, got {value}")))
}

fn vec3(value: &Value, component: &'static str) -> Result<[f64; 3]> {
    match value.as_array().map(Vec::as_slice) {
        Some([x, y, z]) => Ok([
            number(x, component)?,
            number(y, component)?,
            number(z, component)?,
        ]),
        _ => Err(Error::malformed(component, "expected a 3-element array")),
    }
}

/// Booleans; `null` means "explicitly off".
fn flag(value: &Value, component: &'static str) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(Error::malformed(component, format!("expected bool or null, got {other}"))),
    }
}

// ---------------------------------------------------------------------------
// Spatial
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position(pub Vec3);

impl Component for Position {
    const NAME: &'static str = "position";

    fn decode(value: &Value) -> Result<Self> {
        vec3(value, Self::NAME).map(|a| Position(Vec3::from(a)))
    }
}

/// `parent`: entity id to attach under, or `null` to detach.
#[derive(Debug, Clone, PartialEq)]
pub struct Parent(pub Option<EntityId>);

impl Component for Parent {
    const NAME: &'static str = "parent";

    fn decode(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Parent(None)),
            Value::String(id) => Ok(Parent(Some(id.clone()))),
            other => Err(Error::malformed(Self::NAME, format!("expected id or null, got {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Appearance
// ---------------------------------------------------------------------------

/// Linear RGB in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

/// `color`: `[r, g, b]` either in 0–255 or in 0–1. All-integer channels are
/// always 0–255, so `[1, 1, 1]` is near black. Fractional channels are 0–1
/// unless one of them is above 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color(pub Rgb);

impl Component for Color {
    const NAME: &'static str = "color";

    fn decode(value: &Value) -> Result<Self> {
        let [r, g, b] = vec3(value, Self::NAME)?;
        let integral = value
            .as_array()
            .is_some_and(|cs| cs.iter().all(|c| c.is_i64() || c.is_u64()));
        let scale = if integral || r > 1.0 || g > 1.0 || b > 1.0 {
            255.0
        } else {
            1.0
        };
        let channel = |c: f64| (c / scale).clamp(0.0, 1.0);
        Ok(Color(Rgb {
            r: channel(r),
            g: channel(g),
            b: channel(b),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    Grid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Material(pub MaterialKind);

impl Component for Material {
    const NAME: &'static str = "material";

    fn decode(value: &Value) -> Result<Self> {
        match value.as_str() {
            Some("grid") => Ok(Material(MaterialKind::Grid)),
            Some(other) => Err(Error::UnsupportedMaterial(other.to_string())),
            None => Err(Error::malformed(Self::NAME, "expected a material name")),
        }
    }
}

// ---------------------------------------------------------------------------
// Meshes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeshShape {
    Box { width: f64, height: f64, depth: f64 },
    Sphere { diameter: f64 },
}

impl MeshShape {
    /// Radius of a sphere enclosing the shape.
    pub fn bounding_radius(&self) -> f64 {
        match *self {
            MeshShape::Box { width, height, depth } => {
                (width * width + height * height + depth * depth).sqrt() / 2.0
            }
            MeshShape::Sphere { diameter } => diameter / 2.0,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct BoxArgs {
    size: Option<f64>,
    width: Option<f64>,
    height: Option<f64>,
    depth: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct SphereArgs {
    diameter: Option<f64>,
}

/// `mesh_builder`: `[type, args]`, e.g. `["box", {"size": 1}]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshBuilder(pub MeshShape);

impl Component for MeshBuilder {
    const NAME: &'static str = "mesh_builder";

    fn decode(value: &Value) -> Result<Self> {
        let (kind, args) = match value.as_array().map(Vec::as_slice) {
            Some([Value::String(kind)]) => (kind.as_str(), Value::Null),
            Some([Value::String(kind), args]) => (kind.as_str(), args.clone()),
            _ => return Err(Error::malformed(Self::NAME, "expected [type, args]")),
        };
        let args = if args.is_null() { Value::Object(Default::default()) } else { args };
        let bad_args = |e: serde_json::Error| Error::malformed(Self::NAME, e.to_string());

        let shape = match kind {
            "box" => {
                let a: BoxArgs = serde_json::from_value(args).map_err(bad_args)?;
                let size = a.size.unwrap_or(1.0);
                MeshShape::Box {
                    width: a.width.unwrap_or(size),
                    height: a.height.unwrap_or(size),
                    depth: a.depth.unwrap_or(size),
                }
            }
            "sphere" => {
                let a: SphereArgs = serde_json::from_value(args).map_err(bad_args)?;
                MeshShape::Sphere {
                    diameter: a.diameter.unwrap_or(1.0),
                }
            }
            other => return Err(Error::UnsupportedMesh(other.to_string())),
        };
        Ok(MeshBuilder(shape))
    }
}

// ---------------------------------------------------------------------------
// Interaction tags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holdable(pub bool);

impl Component for Holdable {
    const NAME: &'static str = "holdable";

    fn decode(value: &Value) -> Result<Self> {
        flag(value, Self::NAME).map(Holdable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Teleportable(pub bool);

impl Component for Teleportable {
    const NAME: &'static str = "teleportable";

    fn decode(value: &Value) -> Result<Self> {
        flag(value, Self::NAME).map(Teleportable)
    }
}

// ---------------------------------------------------------------------------
// Avatars
// ---------------------------------------------------------------------------

/// Marker component for user avatars; its value carries no meaning. The
/// avatar's transforms live in the sibling [`AvatarPose`] component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Avatar;

impl Component for Avatar {
    const NAME: &'static str = "avatar";

    fn decode(_value: &Value) -> Result<Self> {
        Ok(Avatar)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvatarPose(pub Pose);

impl Component for AvatarPose {
    const NAME: &'static str = "pose";

    fn decode(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map(AvatarPose)
            .map_err(|e| Error::malformed(Self::NAME, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn position_requires_three_numbers() {
        assert_eq!(
            Position::decode(&json!([1, 2.5, -3])).unwrap(),
            Position(Vec3::new(1.0, 2.5, -3.0))
        );
        assert!(Position::decode(&json!([1, 2])).is_err());
        assert!(Position::decode(&json!(["a", 2, 3])).is_err());
        assert!(Position::decode(&json!({"x": 1})).is_err());
    }

    #[test]
    fn color_accepts_both_ranges() {
        let Color(byte) = Color::decode(&json!([255, 0, 51])).unwrap();
        assert_eq!(byte, Rgb { r: 1.0, g: 0.0, b: 0.2 });
        let Color(unit) = Color::decode(&json!([0.5, 0.25, 1.0])).unwrap();
        assert_eq!(unit, Rgb { r: 0.5, g: 0.25, b: 1.0 });
    }

    #[test]
    fn integer_color_is_byte_range() {
        let Color(dark) = Color::decode(&json!([1, 1, 1])).unwrap();
        assert_eq!(dark, Rgb { r: 1.0 / 255.0, g: 1.0 / 255.0, b: 1.0 / 255.0 });
        let Color(black) = Color::decode(&json!([0, 0, 0])).unwrap();
        assert_eq!(black, Rgb { r: 0.0, g: 0.0, b: 0.0 });
        let Color(white) = Color::decode(&json!([1.0, 1.0, 1.0])).unwrap();
        assert_eq!(white, Rgb { r: 1.0, g: 1.0, b: 1.0 });
    }

    #[test]
    fn mesh_builder_box_defaults() {
        let MeshBuilder(shape) = MeshBuilder::decode(&json!(["box", {"size": 2}])).unwrap();
        assert_eq!(shape, MeshShape::Box { width: 2.0, height: 2.0, depth: 2.0 });
        let MeshBuilder(shape) = MeshBuilder::decode(&json!(["box", {"width": 0.1, "height": 0.3}])).unwrap();
        assert_eq!(shape, MeshShape::Box { width: 0.1, height: 0.3, depth: 1.0 });
        let MeshBuilder(shape) = MeshBuilder::decode(&json!(["sphere"])).unwrap();
        assert_eq!(shape, MeshShape::Sphere { diameter: 1.0 });
    }

    #[test]
    fn mesh_builder_rejects_unknown_types() {
        assert!(matches!(
            MeshBuilder::decode(&json!(["torus", {}])),
            Err(Error::UnsupportedMesh(t)) if t == "torus"
        ));
        assert!(matches!(
            MeshBuilder::decode(&json!("box")),
            Err(Error::MalformedComponent { .. })
        ));
    }

    #[test]
    fn flags_treat_null_as_off() {
        assert_eq!(Holdable::decode(&json!(true)).unwrap(), Holdable(true));
        assert_eq!(Holdable::decode(&json!(null)).unwrap(), Holdable(false));
        assert!(Teleportable::decode(&json!("yes")).is_err());
    }

    #[test]
    fn parent_decodes_id_or_null() {
        assert_eq!(Parent::decode(&json!("table")).unwrap(), Parent(Some("table".into())));
        assert_eq!(Parent::decode(&json!(null)).unwrap(), Parent(None));
        assert!(Parent::decode(&json!(3)).is_err());
    }

    #[test]
    fn avatar_pose_decodes_optional_hands() {
        let AvatarPose(pose) = AvatarPose::decode(&json!({
            "head": [0, 1.6, 0, 0, 0, 0, 1],
            "left": [0.2, 1, 0.3, 0, 0, 0, 1]
        }))
        .unwrap();
        assert_eq!(pose.head[1], 1.6);
        assert!(pose.left.is_some());
        assert!(pose.right.is_none());
        assert!(AvatarPose::decode(&json!({"head": [0, 1]})).is_err());
    }
}
