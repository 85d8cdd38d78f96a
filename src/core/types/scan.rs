//! Laser scan and occupancy grid message types.
//!
//! These are the structured values the middleware injects; decoding from
//! the wire is out of scope.

use serde::{Deserialize, Serialize};

use super::pose::Pose2D;

/// Raw laser scan in polar coordinates, bearings in the sensor frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserScan {
    /// Frame the scan was taken in (selects the mounting offset)
    pub frame_id: String,
    /// Acquisition time in microseconds
    pub timestamp_us: u64,
    /// Bearing of the first beam in radians
    pub angle_min: f64,
    /// Angular spacing between consecutive beams in radians
    pub angle_increment: f64,
    /// Minimum valid range in meters
    pub range_min: f64,
    /// Maximum valid range in meters
    pub range_max: f64,
    /// Range measurements in meters (NaN = invalid)
    pub ranges: Vec<f64>,
}

impl LaserScan {
    pub fn new(
        frame_id: impl Into<String>,
        timestamp_us: u64,
        angle_min: f64,
        angle_increment: f64,
        range_min: f64,
        range_max: f64,
        ranges: Vec<f64>,
    ) -> Self {
        Self {
            frame_id: frame_id.into(),
            timestamp_us,
            angle_min,
            angle_increment,
            range_min,
            range_max,
            ranges,
        }
    }
}

/// Occupancy grid message: row-major bytes with the source's convention
/// `0 = free, 100 = occupied, anything else = unknown`.
///
/// `origin` is the world pose of the lower-left cell corner, as delivered
/// by the mapper; the map module converts it to its internal grid-center
/// convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyGrid {
    pub width: usize,
    pub height: usize,
    /// Cell edge length in meters
    pub resolution: f64,
    /// World pose of the lower-left corner of cell (0, 0)
    pub origin: Pose2D,
    /// Row-major occupancy bytes, length `width * height`
    pub data: Vec<u8>,
}
