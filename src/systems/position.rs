use std::sync::Arc;

use super::{require_node, MutationFilter, ReactiveSystem};
use crate::components::{Component, Position};
use crate::error::Result;
use crate::scene::SceneGraph;
use crate::store::{StateMutation, StateOperation};

/// Moves nodes to their entity's `position`.
pub struct PositionSystem {
    scene: Arc<dyn SceneGraph>,
}

impl PositionSystem {
    pub fn new(scene: Arc<dyn SceneGraph>) -> Self {
        Self { scene }
    }
}

impl ReactiveSystem for PositionSystem {
    fn name(&self) -> &'static str {
        "position"
    }

    fn filter(&self) -> MutationFilter {
        MutationFilter::on(&[StateOperation::Create, StateOperation::Update])
            .with_component(Position::NAME)
    }

    fn on_mutation(&self, m: &StateMutation) -> Result<()> {
        let Some(decoded) = m.component::<Position>() else {
            return Ok(());
        };
        let Position(at) = decoded?;
        require_node(self.scene.as_ref(), &m.entity_id)?;
        self.scene.set_position(&m.entity_id, at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::MemoryScene;
    use crate::types::Vec3;
    use serde_json::json;

    #[test]
    fn update_moves_existing_node_only() {
        let scene = Arc::new(MemoryScene::new());
        scene.create_node("e1").unwrap();
        let sys = PositionSystem::new(scene.clone());

        let moved = json!({"position": [1, 2, 3]}).as_object().cloned().unwrap();
        sys.on_mutation(&StateMutation::update("e1", moved.clone(), Default::default()))
            .unwrap();
        assert_eq!(scene.transform_of("e1").unwrap().position, Vec3::new(1.0, 2.0, 3.0));

        let err = sys
            .on_mutation(&StateMutation::create("ghost", moved))
            .unwrap_err();
        assert!(err.is_missing_referent());
    }
}
