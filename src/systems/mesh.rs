//! Creates a render node for every entity with a `mesh_builder` and
//! disposes it when the entity goes away.

use log::debug;
use std::sync::Arc;

use super::{MutationFilter, ReactiveSystem};
use crate::components::{Component, MeshBuilder};
use crate::error::Result;
use crate::scene::SceneGraph;
use crate::store::{StateMutation, StateOperation};

pub struct MeshBuilderSystem {
    scene: Arc<dyn SceneGraph>,
}

impl MeshBuilderSystem {
    pub fn new(scene: Arc<dyn SceneGraph>) -> Self {
        Self { scene }
    }
}

impl ReactiveSystem for MeshBuilderSystem {
    fn name(&self) -> &'static str {
        "mesh_builder"
    }

    fn filter(&self) -> MutationFilter {
        MutationFilter::on(&[StateOperation::Create, StateOperation::Delete])
            .with_component(MeshBuilder::NAME)
    }

    fn on_mutation(&self, m: &StateMutation) -> Result<()> {
        let eid = m.entity_id.as_str();
        if m.is(StateOperation::Delete) {
            self.scene.dispose(eid);
            return Ok(());
        }
        let Some(decoded) = m.component::<MeshBuilder>() else {
            return Ok(());
        };
        let MeshBuilder(shape) = decoded?;
        // A repeated snapshot re-creates every entity; keep the existing node
        // and only swap its geometry when the shape changed.
        if !self.scene.has_node(eid) {
            return self.scene.create_mesh(eid, &shape);
        }
        if self.scene.shape_of(eid) == Some(shape) {
            debug!("[mesh_builder] '{}' already has a node", eid);
            return Ok(());
        }
        debug!("[mesh_builder] reshaping '{}' to {:?}", eid, shape);
        self.scene.set_shape(eid, &shape)
    }
}
