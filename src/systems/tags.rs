//! Scene tags mirroring boolean components.
//!
//! The grab controller finds holdable things by tag, and a teleport feature
//! would find floors the same way, so neither has to consult the store.

use serde_json::Value;
use std::sync::Arc;

use super::{require_node, MutationFilter, ReactiveSystem};
use crate::components::{Component, Holdable, Teleportable};
use crate::error::Result;
use crate::scene::{SceneGraph, HOLDABLE_TAG, TELEPORTABLE_TAG};
use crate::store::{StateMutation, StateOperation};

type FlagDecoder = fn(&Value) -> Result<bool>;

pub struct TagSystem {
    name: &'static str,
    component: &'static str,
    tag: &'static str,
    decode: FlagDecoder,
    untag_on_delete: bool,
    scene: Arc<dyn SceneGraph>,
}

impl TagSystem {
    pub fn holdable(scene: Arc<dyn SceneGraph>) -> Self {
        Self {
            name: "holdable",
            component: Holdable::NAME,
            tag: HOLDABLE_TAG,
            decode: |v| Holdable::decode(v).map(|Holdable(on)| on),
            untag_on_delete: false,
            scene,
        }
    }

    pub fn teleportable(scene: Arc<dyn SceneGraph>) -> Self {
        Self {
            name: "teleportable",
            component: Teleportable::NAME,
            tag: TELEPORTABLE_TAG,
            decode: |v| Teleportable::decode(v).map(|Teleportable(on)| on),
            untag_on_delete: true,
            scene,
        }
    }
}

impl ReactiveSystem for TagSystem {
    fn name(&self) -> &'static str {
        self.name
    }

    fn filter(&self) -> MutationFilter {
        let ops: &[StateOperation] = if self.untag_on_delete {
            &[StateOperation::Create, StateOperation::Update, StateOperation::Delete]
        } else {
            &[StateOperation::Create, StateOperation::Update]
        };
        MutationFilter::on(ops).with_component(self.component)
    }

    fn on_mutation(&self, m: &StateMutation) -> Result<()> {
        let eid = m.entity_id.as_str();
        if m.is(StateOperation::Delete) {
            // The node may already be gone; nothing left to untag then.
            if self.scene.has_node(eid) {
                self.scene.remove_tag(eid, self.tag)?;
            }
            return Ok(());
        }
        let Some(raw) = m.components.get(self.component) else {
            return Ok(());
        };
        let on = (self.decode)(raw)?;
        require_node(self.scene.as_ref(), eid)?;
        if on {
            self.scene.add_tag(eid, self.tag)
        } else {
            self.scene.remove_tag(eid, self.tag)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::MemoryScene;
    use crate::types::Components;
    use serde_json::json;

    fn bag(v: Value) -> Components {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn holdable_follows_component_value() {
        let scene = Arc::new(MemoryScene::new());
        scene.create_node("cup").unwrap();
        let sys = TagSystem::holdable(scene.clone());

        sys.on_mutation(&StateMutation::create("cup", bag(json!({"holdable": true})))).unwrap();
        assert!(scene.has_tag("cup", HOLDABLE_TAG));

        sys.on_mutation(&StateMutation::update(
            "cup",
            bag(json!({"holdable": null})),
            bag(json!({"holdable": true})),
        ))
        .unwrap();
        assert!(!scene.has_tag("cup", HOLDABLE_TAG));
    }

    #[test]
    fn teleportable_untags_on_delete_only() {
        let scene = Arc::new(MemoryScene::new());
        scene.create_node("floor").unwrap();
        let holdable = TagSystem::holdable(scene.clone());
        let floor = TagSystem::teleportable(scene.clone());

        let gone = StateMutation::delete("floor", Components::new(), bag(json!({"teleportable": true})));
        assert!(floor.filter().matches(&gone));
        assert!(!holdable.filter().matches(&gone));

        floor
            .on_mutation(&StateMutation::create("floor", bag(json!({"teleportable": true}))))
            .unwrap();
        assert_eq!(scene.tagged(TELEPORTABLE_TAG), vec!["floor".to_string()]);
        floor.on_mutation(&gone).unwrap();
        assert!(scene.tagged(TELEPORTABLE_TAG).is_empty());
    }
}
