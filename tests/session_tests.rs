//! End-to-end session behaviour: reconciliation, reactive systems, lifecycle

mod common;

#[cfg(test)]
mod tests {
    use super::common::{Harness, USER};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use xr_room::{
        components::MeshShape,
        protocol::{ConnectionState, XrSessionState},
        scene::SceneGraph,
        store::{StateMutation, StateOperation},
        types::{Transform, Vec3},
        Error,
    };

    /// Record every mutation the session publishes from now on.
    fn record_mutations(h: &Harness) -> Arc<Mutex<Vec<StateMutation>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        // Dropping the handle leaves the subscription in place.
        let _ = h
            .session
            .context()
            .channels
            .state_mutations
            .subscribe(move |m| sink.lock().push(m.clone()));
        seen
    }

    fn ops(seen: &Arc<Mutex<Vec<StateMutation>>>) -> Vec<(StateOperation, String)> {
        seen.lock()
            .iter()
            .map(|m| (m.operation, m.entity_id.clone()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    #[test]
    fn snapshot_before_join_builds_scene_silently() {
        let h = Harness::new();
        let seen = record_mutations(&h);

        h.receive(
            "entities_state",
            json!({"e1": {"position": [1, 2, 3], "mesh_builder": ["box", {"size": 1}]}}),
        );

        assert_eq!(ops(&seen), vec![(StateOperation::Create, "e1".to_string())]);
        assert!(h.session.context().store.contains("e1"));
        let node = h.scene.node("e1").expect("e1 node");
        assert_eq!(
            node.shape,
            Some(MeshShape::Box {
                width: 1.0,
                height: 1.0,
                depth: 1.0
            })
        );
        assert_eq!(node.transform.position, Vec3::new(1.0, 2.0, 3.0));
        assert!(h.sent.lock().is_empty());
    }

    #[test]
    fn repeated_snapshot_leaves_same_state() {
        let h = Harness::new();
        let snapshot = json!({"e1": {"position": [1, 2, 3], "mesh_builder": ["box", {"size": 1}]}});
        h.receive("entities_state", snapshot.clone());
        let before = h.session.context().store.snapshot();
        let seen = record_mutations(&h);

        h.receive("entities_state", snapshot);

        assert_eq!(ops(&seen), vec![(StateOperation::Create, "e1".to_string())]);
        assert_eq!(h.session.context().store.snapshot(), before);
        assert_eq!(h.scene.node_count(), 1);
        assert_eq!(
            h.scene.transform_of("e1").map(|t| t.position),
            Some(Vec3::new(1.0, 2.0, 3.0))
        );
    }

    #[test]
    fn snapshot_with_new_mesh_reshapes_node() {
        let h = Harness::new();
        h.receive(
            "entities_state",
            json!({"e1": {"position": [1, 2, 3], "mesh_builder": ["box", {"size": 1}]}}),
        );
        h.receive(
            "entities_state",
            json!({"e1": {"position": [1, 2, 3], "mesh_builder": ["sphere", {"diameter": 0.5}]}}),
        );

        let node = h.scene.node("e1").expect("e1 node");
        assert_eq!(node.shape, Some(MeshShape::Sphere { diameter: 0.5 }));
        assert_eq!(node.transform.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(h.scene.node_count(), 1);
    }

    #[test]
    fn snapshot_drops_entities_it_no_longer_lists() {
        let h = Harness::new();
        h.receive(
            "entities_state",
            json!({
                "a": {"mesh_builder": ["box", {"size": 1}]},
                "b": {"mesh_builder": ["sphere", {"diameter": 1}]}
            }),
        );
        let seen = record_mutations(&h);

        h.receive("entities_state", json!({"a": {"mesh_builder": ["box", {"size": 1}]}}));

        assert_eq!(ops(&seen), vec![(StateOperation::Delete, "b".to_string())]);
        assert!(!h.scene.has_node("b"));
        assert!(h.scene.has_node("a"));
    }

    #[test]
    fn diff_update_moves_node() {
        let h = Harness::new();
        h.receive("entities_state", json!({"e1": {"mesh_builder": ["box", {"size": 1}]}}));
        h.receive("entities_diff", json!({"updates": {"e1": {"position": [0, 4, 0]}}}));

        assert_eq!(
            h.scene.transform_of("e1").map(|t| t.position),
            Some(Vec3::new(0.0, 4.0, 0.0))
        );
        assert_eq!(
            h.session.context().store.component("e1", "position"),
            Some(json!([0, 4, 0]))
        );
    }

    #[test]
    fn unknown_event_is_an_error() {
        let h = Harness::new();
        let err = h.session.receive("presence_diff", json!({})).unwrap_err();
        assert!(matches!(err, Error::UnknownEvent(ref e) if e == "presence_diff"));
    }

    #[test]
    fn malformed_component_does_not_block_batch() {
        let h = Harness::new();
        h.receive(
            "entities_state",
            json!({
                "bad": {"mesh_builder": ["torus_knot", {}], "position": [0, 0, 0]},
                "good": {"mesh_builder": ["box", {"size": 1}], "position": [1, 0, 0]}
            }),
        );

        assert!(h.session.context().store.contains("bad"));
        assert!(!h.scene.has_node("bad"));
        assert_eq!(
            h.scene.transform_of("good").map(|t| t.position),
            Some(Vec3::new(1.0, 0.0, 0.0))
        );
    }

    // -----------------------------------------------------------------------
    // Deferred parenting
    // -----------------------------------------------------------------------

    #[test]
    fn parent_waits_for_late_entity() {
        let h = Harness::new();
        h.receive(
            "entities_state",
            json!({"cup": {"mesh_builder": ["box", {"size": 0.1}], "parent": "table"}}),
        );
        assert_eq!(h.scene.parent_of("cup"), None);
        assert_eq!(h.session.stats().pending_parent_ops, 1);

        h.advance(200);
        h.receive(
            "entities_diff",
            json!({"creates": {"table": {"mesh_builder": ["box", {"size": 1}]}}}),
        );

        assert_eq!(h.scene.parent_of("cup").as_deref(), Some("table"));
        assert_eq!(h.session.stats().pending_parent_ops, 0);
    }

    #[test]
    fn parent_wait_times_out() {
        let h = Harness::new();
        h.receive(
            "entities_state",
            json!({"cup": {"mesh_builder": ["box", {"size": 0.1}], "parent": "ghost"}}),
        );
        h.advance(999);
        assert_eq!(h.session.stats().pending_parent_ops, 1);

        h.advance(1);
        assert_eq!(h.session.stats().pending_parent_ops, 0);

        // A late parent no longer attaches anything.
        h.receive(
            "entities_diff",
            json!({"creates": {"ghost": {"mesh_builder": ["box", {"size": 1}]}}}),
        );
        assert_eq!(h.scene.parent_of("cup"), None);
    }

    #[test]
    fn null_parent_detaches() {
        let h = Harness::new();
        h.receive(
            "entities_state",
            json!({
                "a_child": {"mesh_builder": ["box", {"size": 0.1}], "parent": "z_table"},
                "z_table": {"mesh_builder": ["box", {"size": 1}]}
            }),
        );
        assert_eq!(h.scene.parent_of("a_child").as_deref(), Some("z_table"));

        h.receive("entities_diff", json!({"updates": {"a_child": {"parent": null}}}));
        assert_eq!(h.scene.parent_of("a_child"), None);
    }

    // -----------------------------------------------------------------------
    // Avatars
    // -----------------------------------------------------------------------

    #[test]
    fn own_avatar_snaps_camera() {
        let h = Harness::new();
        h.receive(
            "entities_state",
            json!({(USER): {"avatar": true, "pose": {"head": [0, 1.6, 2, 0, 0, 0, 1]}}}),
        );

        assert_eq!(
            h.session.context().channels.camera_snap.last(),
            Some(Transform::at(Vec3::new(0.0, 1.6, 2.0)))
        );
        assert!(!h.scene.has_node(&format!("{USER}:head")));
    }

    #[test]
    fn remote_avatar_follows_pose_and_leaves() {
        let h = Harness::new();
        h.receive(
            "entities_state",
            json!({"bob": {"avatar": true, "pose": {
                "head": [1, 1.7, 0, 0, 0, 0, 1],
                "right": [1.3, 1.1, -0.2, 0, 0, 0, 1]
            }}}),
        );
        assert_eq!(
            h.scene.transform_of("bob:head").map(|t| t.position),
            Some(Vec3::new(1.0, 1.7, 0.0))
        );
        assert_eq!(
            h.scene.transform_of("bob:right").map(|t| t.position),
            Some(Vec3::new(1.3, 1.1, -0.2))
        );
        assert!(h.scene.has_node("bob:left"));

        h.receive("entities_diff", json!({"deletes": {"bob": {}}}));
        assert!(!h.scene.has_node("bob:head"));
        assert!(!h.scene.has_node("bob:left"));
        assert!(!h.scene.has_node("bob:right"));
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn join_failure_tears_down() {
        let h = Harness::new();
        h.receive("entities_state", json!({"e1": {"mesh_builder": ["box", {"size": 1}]}}));

        let err = h.session.channel_join_failed("room is full");
        assert!(matches!(err, Error::ChannelJoinFailed(ref r) if r == "room is full"));
        assert_eq!(
            h.session.context().channels.connection.last(),
            Some(ConnectionState::JoinFailed {
                reason: "room is full".into()
            })
        );
        assert!(h.session.is_closed());
        assert!(h.session.context().store.is_empty());

        // Late traffic is dropped.
        h.receive("entities_state", json!({"e2": {}}));
        assert!(h.session.context().store.is_empty());
    }

    #[test]
    fn xr_entry_waits_for_room_entry() {
        let h = Harness::new();
        h.session.channel_joined();
        let channels = &h.session.context().channels;
        assert!(channels.room_entered.subscriber_count() >= 1);

        h.session.set_xr_session(XrSessionState::Entered);
        assert_eq!(channels.xr_session.last(), None);
        assert!(!h.session.is_room_entered());

        h.session.room_entered();
        assert!(h.session.is_room_entered());
        h.session.set_xr_session(XrSessionState::Entered);
        assert_eq!(channels.xr_session.last(), Some(XrSessionState::Entered));

        h.session.set_xr_session(XrSessionState::Exited);
        assert_eq!(channels.xr_session.last(), Some(XrSessionState::Exited));
    }

    #[test]
    fn leave_cancels_every_subscription() {
        let h = Harness::new();
        h.session.channel_joined();
        h.receive("entities_state", json!({"e1": {"mesh_builder": ["box", {"size": 1}]}}));

        h.session.leave();

        let channels = &h.session.context().channels;
        assert_eq!(channels.state_mutations.subscriber_count(), 0);
        assert_eq!(channels.inbound.subscriber_count(), 0);
        assert_eq!(channels.outbound.subscriber_count(), 0);
        assert_eq!(channels.controllers.subscriber_count(), 0);
        assert_eq!(channels.connection.last(), Some(ConnectionState::Left));
        assert!(h.session.context().store.is_empty());

        // Idempotent.
        h.session.leave();
        assert!(h.session.is_closed());
    }

    #[test]
    fn stats_track_session() {
        let h = Harness::new();
        h.receive(
            "entities_state",
            json!({
                "e1": {"mesh_builder": ["box", {"size": 1}]},
                "e2": {"mesh_builder": ["box", {"size": 1}], "parent": "nowhere"}
            }),
        );
        let stats = h.session.stats();
        assert_eq!(stats.entities, 2);
        assert_eq!(stats.holding, 0);
        assert_eq!(stats.pending_parent_ops, 1);
        assert_eq!(stats.outbound_sent, 0);
    }
}
