use std::sync::Arc;

use super::{require_node, MutationFilter, ReactiveSystem};
use crate::components::{Component, Material};
use crate::error::Result;
use crate::scene::SceneGraph;
use crate::store::{StateMutation, StateOperation};

/// Applies named materials (only `grid` so far) at creation.
pub struct MaterialSystem {
    scene: Arc<dyn SceneGraph>,
}

impl MaterialSystem {
    pub fn new(scene: Arc<dyn SceneGraph>) -> Self {
        Self { scene }
    }
}

impl ReactiveSystem for MaterialSystem {
    fn name(&self) -> &'static str {
        "material"
    }

    fn filter(&self) -> MutationFilter {
        MutationFilter::on(&[StateOperation::Create]).with_component(Material::NAME)
    }

    fn on_mutation(&self, m: &StateMutation) -> Result<()> {
        let Some(decoded) = m.component::<Material>() else {
            return Ok(());
        };
        let Material(kind) = decoded?;
        require_node(self.scene.as_ref(), &m.entity_id)?;
        self.scene.set_material(&m.entity_id, kind)
    }
}
