//! Rendering-engine capability surface.
//!
//! The room core never touches an engine's object model directly; it asks for
//! these capabilities by node id (node ids are entity ids, plus a few derived
//! ids such as `left_grip` or `<user>:head`). Any engine binding implements
//! [`SceneGraph`]; [`MemoryScene`] is a headless implementation used by the
//! replay binary and the tests.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use crate::components::{MaterialKind, MeshShape, Rgb};
use crate::error::{Error, Result};
use crate::types::{EntityId, Quat, Sphere, Transform, Vec3};

/// Tag maintained on nodes whose entity is holdable.
pub const HOLDABLE_TAG: &str = "holdable";
/// Tag maintained on nodes whose entity is a teleport target.
pub const TELEPORTABLE_TAG: &str = "teleportable";

pub trait SceneGraph: Send + Sync {
    fn has_node(&self, id: &str) -> bool;

    /// Create an empty transform node (grip anchors, avatar roots).
    fn create_node(&self, id: &str) -> Result<()>;

    fn create_mesh(&self, id: &str, shape: &MeshShape) -> Result<()>;

    /// Geometry of a mesh node; `None` for plain nodes and unknown ids.
    fn shape_of(&self, id: &str) -> Option<MeshShape>;

    /// Swap the geometry of an existing node. Transform, parent and tags
    /// stay as they are.
    fn set_shape(&self, id: &str, shape: &MeshShape) -> Result<()>;

    /// Remove a node. Children are detached, not removed.
    fn dispose(&self, id: &str);

    fn set_position(&self, id: &str, position: Vec3) -> Result<()>;
    fn set_rotation(&self, id: &str, rotation: Quat) -> Result<()>;
    fn set_color(&self, id: &str, color: Rgb) -> Result<()>;
    fn set_material(&self, id: &str, material: MaterialKind) -> Result<()>;

    fn add_tag(&self, id: &str, tag: &str) -> Result<()>;
    fn remove_tag(&self, id: &str, tag: &str) -> Result<()>;
    fn has_tag(&self, id: &str, tag: &str) -> bool;

    /// Attach `child` under `parent`, or detach it with `None`.
    fn set_parent(&self, child: &str, parent: Option<&str>) -> Result<()>;
    fn parent_of(&self, id: &str) -> Option<EntityId>;

    fn transform_of(&self, id: &str) -> Option<Transform>;

    /// Nodes carrying `tag` whose bounds intersect `volume`, in node
    /// creation order.
    fn find_intersecting(&self, volume: &Sphere, tag: &str) -> Vec<EntityId>;
}

// ---------------------------------------------------------------------------
// MemoryScene
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SceneNode {
    pub id: String,
    pub transform: Transform,
    pub shape: Option<MeshShape>,
    pub color: Option<Rgb>,
    pub material: Option<MaterialKind>,
    pub parent: Option<String>,
    pub tags: HashSet<String>,
}

impl SceneNode {
    fn intersects(&self, volume: &Sphere) -> bool {
        let p = self.transform.position;
        match self.shape {
            Some(MeshShape::Box { width, height, depth }) => {
                // Closest point on the box (axis aligned) to the sphere center.
                let c = volume.center;
                let clamp = |v: f64, center: f64, half: f64| v.clamp(center - half, center + half);
                let closest = Vec3::new(
                    clamp(c.x, p.x, width / 2.0),
                    clamp(c.y, p.y, height / 2.0),
                    clamp(c.z, p.z, depth / 2.0),
                );
                closest.distance_squared(c) <= volume.radius * volume.radius
            }
            Some(MeshShape::Sphere { diameter }) => {
                let reach = volume.radius + diameter / 2.0;
                p.distance_squared(volume.center) <= reach * reach
            }
            None => p.distance_squared(volume.center) <= volume.radius * volume.radius,
        }
    }
}

#[derive(Debug, Default)]
struct SceneState {
    nodes: HashMap<String, SceneNode>,
    /// Creation order, for deterministic enumeration.
    order: Vec<String>,
}

impl SceneState {
    fn node_mut(&mut self, id: &str) -> Result<&mut SceneNode> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| Error::MissingReferent(id.to_string()))
    }

    fn insert(&mut self, node: SceneNode) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(Error::NodeExists(node.id));
        }
        self.order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    fn is_ancestor(&self, ancestor: &str, of: &str) -> bool {
        let mut cursor = self.nodes.get(of).and_then(|n| n.parent.clone());
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.nodes.get(&id).and_then(|n| n.parent.clone());
        }
        false
    }
}

/// Headless scene: node positions are treated as world positions and
/// parenting does not move anything.
#[derive(Debug, Default)]
pub struct MemoryScene {
    state: RwLock<SceneState>,
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: &str) -> Option<SceneNode> {
        self.state.read().nodes.get(id).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    /// Node ids carrying `tag`, in creation order.
    pub fn tagged(&self, tag: &str) -> Vec<String> {
        let st = self.state.read();
        st.order
            .iter()
            .filter(|id| st.nodes.get(*id).map_or(false, |n| n.tags.contains(tag)))
            .cloned()
            .collect()
    }
}

impl SceneGraph for MemoryScene {
    fn has_node(&self, id: &str) -> bool {
        self.state.read().nodes.contains_key(id)
    }

    fn create_node(&self, id: &str) -> Result<()> {
        self.state.write().insert(SceneNode {
            id: id.to_string(),
            ..Default::default()
        })
    }

    fn create_mesh(&self, id: &str, shape: &MeshShape) -> Result<()> {
        self.state.write().insert(SceneNode {
            id: id.to_string(),
            shape: Some(*shape),
            ..Default::default()
        })
    }

    fn shape_of(&self, id: &str) -> Option<MeshShape> {
        self.state.read().nodes.get(id).and_then(|n| n.shape)
    }

    fn set_shape(&self, id: &str, shape: &MeshShape) -> Result<()> {
        self.state.write().node_mut(id)?.shape = Some(*shape);
        Ok(())
    }

    fn dispose(&self, id: &str) {
        let mut st = self.state.write();
        if st.nodes.remove(id).is_none() {
            return;
        }
        st.order.retain(|n| n != id);
        for node in st.nodes.values_mut() {
            if node.parent.as_deref() == Some(id) {
                node.parent = None;
            }
        }
    }

    fn set_position(&self, id: &str, position: Vec3) -> Result<()> {
        self.state.write().node_mut(id)?.transform.position = position;
        Ok(())
    }

    fn set_rotation(&self, id: &str, rotation: Quat) -> Result<()> {
        self.state.write().node_mut(id)?.transform.rotation = rotation;
        Ok(())
    }

    fn set_color(&self, id: &str, color: Rgb) -> Result<()> {
        self.state.write().node_mut(id)?.color = Some(color);
        Ok(())
    }

    fn set_material(&self, id: &str, material: MaterialKind) -> Result<()> {
        self.state.write().node_mut(id)?.material = Some(material);
        Ok(())
    }

    fn add_tag(&self, id: &str, tag: &str) -> Result<()> {
        self.state.write().node_mut(id)?.tags.insert(tag.to_string());
        Ok(())
    }

    fn remove_tag(&self, id: &str, tag: &str) -> Result<()> {
        self.state.write().node_mut(id)?.tags.remove(tag);
        Ok(())
    }

    fn has_tag(&self, id: &str, tag: &str) -> bool {
        self.state
            .read()
            .nodes
            .get(id)
            .map_or(false, |n| n.tags.contains(tag))
    }

    fn set_parent(&self, child: &str, parent: Option<&str>) -> Result<()> {
        let mut st = self.state.write();
        if let Some(parent) = parent {
            if !st.nodes.contains_key(parent) {
                return Err(Error::MissingReferent(parent.to_string()));
            }
            if parent == child || st.is_ancestor(child, parent) {
                return Err(Error::ParentCycle {
                    child: child.to_string(),
                    parent: parent.to_string(),
                });
            }
        }
        st.node_mut(child)?.parent = parent.map(str::to_string);
        Ok(())
    }

    fn parent_of(&self, id: &str) -> Option<EntityId> {
        self.state.read().nodes.get(id).and_then(|n| n.parent.clone())
    }

    fn transform_of(&self, id: &str) -> Option<Transform> {
        self.state.read().nodes.get(id).map(|n| n.transform)
    }

    fn find_intersecting(&self, volume: &Sphere, tag: &str) -> Vec<EntityId> {
        let st = self.state.read();
        st.order
            .iter()
            .filter_map(|id| st.nodes.get(id))
            .filter(|n| n.tags.contains(tag) && n.intersects(volume))
            .map(|n| n.id.clone())
            .collect()
    }
}
