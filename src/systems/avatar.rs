//! Avatars of other users, and the camera snap for our own.
//!
//! A remote avatar is three boxes, `<user>:head`, `<user>:left` and
//! `<user>:right`, posed from the entity's `pose` component. Our own avatar
//! entity is never drawn; its pose on `create` is the last known head
//! position (or the spawn point) and goes out on `camera_snap`.

use log::debug;
use std::sync::Arc;

use super::{MutationFilter, ReactiveSystem};
use crate::bus::Channel;
use crate::components::{Avatar, AvatarPose, Component, MeshShape};
use crate::error::Result;
use crate::scene::SceneGraph;
use crate::store::{StateMutation, StateOperation};
use crate::types::{Pose, PoseArray, Transform};

const HEAD: MeshShape = MeshShape::Box {
    width: 0.15,
    height: 0.3,
    depth: 0.25,
};
const HAND: MeshShape = MeshShape::Box {
    width: 0.1,
    height: 0.1,
    depth: 0.2,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarPart {
    Head,
    Left,
    Right,
}

impl AvatarPart {
    pub const ALL: [AvatarPart; 3] = [AvatarPart::Head, AvatarPart::Left, AvatarPart::Right];

    fn shape(self) -> MeshShape {
        match self {
            AvatarPart::Head => HEAD,
            AvatarPart::Left | AvatarPart::Right => HAND,
        }
    }

    fn pose_of(self, pose: &Pose) -> Option<&PoseArray> {
        match self {
            AvatarPart::Head => Some(&pose.head),
            AvatarPart::Left => pose.left.as_ref(),
            AvatarPart::Right => pose.right.as_ref(),
        }
    }
}

/// Scene node id of one part of `user_id`'s avatar.
pub fn avatar_node(user_id: &str, part: AvatarPart) -> String {
    let suffix = match part {
        AvatarPart::Head => "head",
        AvatarPart::Left => "left",
        AvatarPart::Right => "right",
    };
    format!("{user_id}:{suffix}")
}

pub struct AvatarSystem {
    scene: Arc<dyn SceneGraph>,
    user_id: String,
    camera_snap: Channel<Transform>,
}

impl AvatarSystem {
    pub fn new(scene: Arc<dyn SceneGraph>, user_id: impl Into<String>, camera_snap: Channel<Transform>) -> Self {
        Self {
            scene,
            user_id: user_id.into(),
            camera_snap,
        }
    }

    fn ensure_nodes(&self, user: &str) -> Result<()> {
        for part in AvatarPart::ALL {
            let id = avatar_node(user, part);
            if !self.scene.has_node(&id) {
                self.scene.create_mesh(&id, &part.shape())?;
            }
        }
        Ok(())
    }

    fn pose_user(&self, user: &str, pose: &Pose) -> Result<()> {
        for part in AvatarPart::ALL {
            if let Some(a) = part.pose_of(pose) {
                let t = Transform::from_pose_array(a);
                let id = avatar_node(user, part);
                self.scene.set_position(&id, t.position)?;
                self.scene.set_rotation(&id, t.rotation)?;
            }
        }
        Ok(())
    }

    fn remove_user(&self, user: &str) {
        for part in AvatarPart::ALL {
            self.scene.dispose(&avatar_node(user, part));
        }
    }
}

impl ReactiveSystem for AvatarSystem {
    fn name(&self) -> &'static str {
        "avatar"
    }

    fn filter(&self) -> MutationFilter {
        MutationFilter::any().with_component(Avatar::NAME)
    }

    fn on_mutation(&self, m: &StateMutation) -> Result<()> {
        let user = m.entity_id.as_str();
        let pose = m.component::<AvatarPose>().transpose()?.map(|AvatarPose(p)| p);

        if user == self.user_id {
            if m.is(StateOperation::Create) {
                if let Some(pose) = pose {
                    debug!("[avatar] snapping camera to last known head pose");
                    self.camera_snap.publish(Transform::from_pose_array(&pose.head));
                }
            }
            return Ok(());
        }

        match m.operation {
            StateOperation::Delete => {
                self.remove_user(user);
                Ok(())
            }
            StateOperation::Create | StateOperation::Update => {
                self.ensure_nodes(user)?;
                match pose {
                    Some(pose) => self.pose_user(user, &pose),
                    None => Ok(()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::MemoryScene;
    use crate::types::{Components, Vec3};
    use serde_json::{json, Value};

    fn bag(v: Value) -> Components {
        v.as_object().cloned().unwrap()
    }

    fn setup() -> (Arc<MemoryScene>, Channel<Transform>, AvatarSystem) {
        let scene = Arc::new(MemoryScene::new());
        let snap = Channel::latest("camera_snap");
        let sys = AvatarSystem::new(scene.clone(), "me", snap.clone());
        (scene, snap, sys)
    }

    #[test]
    fn remote_avatar_lifecycle() {
        let (scene, _snap, sys) = setup();
        sys.on_mutation(&StateMutation::create(
            "bob",
            bag(json!({"avatar": true, "pose": {"head": [1, 1.6, 0, 0, 0, 0, 1]}})),
        ))
        .unwrap();
        assert_eq!(scene.node_count(), 3);
        assert_eq!(
            scene.transform_of("bob:head").unwrap().position,
            Vec3::new(1.0, 1.6, 0.0)
        );

        sys.on_mutation(&StateMutation::update(
            "bob",
            bag(json!({"pose": {"head": [2, 1.6, 0, 0, 0, 0, 1], "left": [2, 1, 0.3, 0, 0, 0, 1]}})),
            bag(json!({"avatar": true})),
        ))
        .unwrap();
        assert_eq!(scene.transform_of("bob:left").unwrap().position.z, 0.3);

        sys.on_mutation(&StateMutation::delete("bob", Components::new(), bag(json!({"avatar": true}))))
            .unwrap();
        assert_eq!(scene.node_count(), 0);
    }

    #[test]
    fn own_avatar_snaps_camera_instead_of_drawing() {
        let (scene, snap, sys) = setup();
        sys.on_mutation(&StateMutation::create(
            "me",
            bag(json!({"avatar": true, "pose": {"head": [3, 1.7, -2, 0, 0, 0, 1]}})),
        ))
        .unwrap();
        assert_eq!(scene.node_count(), 0);
        assert_eq!(snap.last().unwrap().position, Vec3::new(3.0, 1.7, -2.0));
    }
}
