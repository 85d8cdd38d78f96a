//! Values the driver hands back for publication.
//!
//! The middleware owns the actual topics and transform broadcasting; the
//! driver returns one [`CycleOutput`] per injected observation with
//! whatever that cycle produced.

use serde::{Deserialize, Serialize};

use crate::core::types::{Covariance3, Pose2D};

/// Best pose hypothesis in the map frame with its covariance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    pub timestamp_us: u64,
    pub pose: Pose2D,
    pub covariance: Covariance3,
}

/// The map→odom correction with the time until which it stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameCorrection {
    pub map_to_odom: Pose2D,
    pub expiry_us: u64,
}

/// Deviation from an injected ground-truth pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseError {
    pub dx: f64,
    pub dy: f64,
    pub distance: f64,
    pub dyaw: f64,
    /// Markers that contributed to the producing update
    pub num_markers: usize,
}

/// Everything one observation cycle produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleOutput {
    pub pose: Option<PoseEstimate>,
    pub correction: Option<FrameCorrection>,
    pub particle_cloud: Option<Vec<Pose2D>>,
    pub pose_error: Option<PoseError>,
}

impl CycleOutput {
    /// Whether this cycle produced anything for downstream consumers.
    pub fn is_empty(&self) -> bool {
        self.pose.is_none()
            && self.correction.is_none()
            && self.particle_cloud.is_none()
            && self.pose_error.is_none()
    }
}
