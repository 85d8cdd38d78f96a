//! Boundary to the middleware's transform system.

use crate::core::types::Pose2D;

/// Supplies the odometric pose and static sensor mounts on demand.
///
/// The driver queries this on every observation; returning `None` makes
/// it drop the observation with a warning, which is the correct behavior
/// when the transform buffer cannot resolve the requested time.
pub trait TransformSource {
    /// Pose of the robot base in the odom frame at the given time.
    fn odom_pose_at(&self, timestamp_us: u64) -> Option<Pose2D>;

    /// Mounting pose of a sensor frame relative to the robot base.
    /// Queried once per newly seen sensor frame.
    fn sensor_mount(&self, frame_id: &str) -> Option<Pose2D>;
}
