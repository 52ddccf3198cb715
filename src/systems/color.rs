use std::sync::Arc;

use super::{require_node, MutationFilter, ReactiveSystem};
use crate::components::{Color, Component};
use crate::error::Result;
use crate::scene::SceneGraph;
use crate::store::{StateMutation, StateOperation};

/// Applies `color` to the entity's node.
pub struct ColorSystem {
    scene: Arc<dyn SceneGraph>,
}

impl ColorSystem {
    pub fn new(scene: Arc<dyn SceneGraph>) -> Self {
        Self { scene }
    }
}

impl ReactiveSystem for ColorSystem {
    fn name(&self) -> &'static str {
        "color"
    }

    fn filter(&self) -> MutationFilter {
        MutationFilter::on(&[StateOperation::Create, StateOperation::Update]).with_component(Color::NAME)
    }

    fn on_mutation(&self, m: &StateMutation) -> Result<()> {
        let Some(decoded) = m.component::<Color>() else {
            return Ok(());
        };
        let Color(rgb) = decoded?;
        require_node(self.scene.as_ref(), &m.entity_id)?;
        self.scene.set_color(&m.entity_id, rgb)
    }
}
