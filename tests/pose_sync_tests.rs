//! Outbound pose throttling, truncation and gating through a full RoomSession

mod common;

#[cfg(test)]
mod tests {
    use super::common::Harness;
    use xr_room::{
        protocol::XrSessionState,
        types::{Handedness, RoomConfig, Vec3},
    };

    /// Session with no head samples skipped, already joined.
    fn joined() -> Harness {
        let h = Harness::with_config(RoomConfig {
            skip_initial_head_samples: 0,
            ..RoomConfig::default()
        });
        h.session.channel_joined();
        h
    }

    // -----------------------------------------------------------------------
    // Gating
    // -----------------------------------------------------------------------

    #[test]
    fn nothing_sent_before_join() {
        let h = Harness::with_config(RoomConfig {
            skip_initial_head_samples: 0,
            ..RoomConfig::default()
        });
        h.head(Vec3::new(0.0, 1.6, 0.0));
        h.advance(100);
        h.head(Vec3::new(0.0, 1.7, 0.0));
        h.advance(100);
        assert!(h.poses().is_empty());
    }

    #[test]
    fn initial_head_samples_are_skipped() {
        let h = Harness::new();
        h.session.channel_joined();
        for y in [1.0, 1.1, 1.2] {
            h.head(Vec3::new(0.0, y, 0.0));
            h.advance(60);
        }
        assert!(h.poses().is_empty());

        h.head(Vec3::new(0.0, 1.5, 0.0));
        h.advance(60);
        let poses = h.poses();
        assert_eq!(poses.len(), 1);
        assert_eq!(poses[0].head, [0.0, 1.5, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn leaving_stops_pending_pose() {
        let h = joined();
        h.head(Vec3::new(0.0, 1.6, 0.0));
        h.session.leave();
        h.advance(100);
        assert!(h.poses().is_empty());
    }

    // -----------------------------------------------------------------------
    // Throttle
    // -----------------------------------------------------------------------

    #[test]
    fn burst_sends_latest_truncated_once() {
        let h = joined();
        h.head(Vec3::new(1.0, 1.0, 1.0));
        h.advance(10);
        h.head(Vec3::new(1.23456, -1.239, 0.5));
        h.advance(40);
        h.advance(100);

        let poses = h.poses();
        assert_eq!(poses.len(), 1);
        assert_eq!(poses[0].head, [1.23, -1.23, 0.5, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(poses[0].left, None);
        assert_eq!(poses[0].right, None);
    }

    #[test]
    fn exact_decimals_survive_truncation() {
        let h = joined();
        h.head(Vec3::new(1.13, 0.29, 4.35));
        h.advance(50);

        let poses = h.poses();
        assert_eq!(poses.len(), 1);
        assert_eq!(poses[0].head, [1.13, 0.29, 4.35, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn at_most_one_pose_per_window() {
        let h = joined();
        for i in 0..10 {
            h.head(Vec3::new(f64::from(i) * 0.1, 1.6, 0.0));
            h.advance(10);
        }
        assert_eq!(h.poses().len(), 2);
    }

    #[test]
    fn unchanged_pose_is_not_resent() {
        let h = joined();
        h.head(Vec3::new(0.0, 1.6, 0.0));
        h.advance(50);
        assert_eq!(h.poses().len(), 1);

        // Away and back within one window: the pose that goes out is the
        // one already sent.
        h.head(Vec3::new(0.0, 1.7, 0.0));
        h.advance(10);
        h.head(Vec3::new(0.0, 1.6, 0.0));
        h.advance(50);
        assert_eq!(h.poses().len(), 1);

        // Truncation collapses sub-centimetre jitter too.
        h.head(Vec3::new(0.0, 1.601, 0.0));
        h.advance(50);
        assert_eq!(h.poses().len(), 1);
    }

    // -----------------------------------------------------------------------
    // Hands
    // -----------------------------------------------------------------------

    #[test]
    fn hands_ride_along_until_xr_exit() {
        let h = joined();
        h.session.room_entered();
        h.session.set_xr_session(XrSessionState::Entered);
        h.ready_hand(Handedness::Right, Vec3::new(0.5, 1.0, 0.0));
        h.head(Vec3::new(0.0, 1.6, 0.0));
        h.advance(50);

        let poses = h.poses();
        assert_eq!(poses.len(), 1);
        assert_eq!(poses[0].right, Some([0.5, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0]));
        assert_eq!(poses[0].left, None);

        h.session.set_xr_session(XrSessionState::Exited);
        h.head(Vec3::new(0.0, 1.7, 0.0));
        h.advance(50);

        let poses = h.poses();
        assert_eq!(poses.len(), 2);
        assert_eq!(poses[1].right, None);
    }

    #[test]
    fn removed_controller_leaves_pose() {
        let h = joined();
        h.ready_hand(Handedness::Left, Vec3::new(-0.4, 1.0, 0.1));
        h.head(Vec3::new(0.0, 1.6, 0.0));
        h.advance(50);
        assert!(h.poses()[0].left.is_some());

        h.session.controller_removed(Handedness::Left);
        h.head(Vec3::new(0.0, 1.65, 0.0));
        h.advance(50);
        assert_eq!(h.poses()[1].left, None);
    }
}
