//! Fiducial marker types: the visual map and camera detections.

use nalgebra::{Isometry3, Point3};
use serde::{Deserialize, Serialize};

/// A pixel coordinate in an undistorted camera image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelPoint {
    pub u: f64,
    pub v: f64,
}

impl PixelPoint {
    pub fn new(u: f64, v: f64) -> Self {
        Self { u, v }
    }

    pub fn distance(&self, other: &PixelPoint) -> f64 {
        let du = self.u - other.u;
        let dv = self.v - other.v;
        (du * du + dv * dv).sqrt()
    }
}

/// A map-registered fiducial: ID, context IDs, and the four planar corner
/// points in world coordinates.
///
/// Corner order is fixed: top-left, bottom-left, bottom-right, top-right,
/// as seen from the marker's front face.
#[derive(Debug, Clone)]
pub struct FiducialMarker {
    pub id: u32,
    pub map_id: i32,
    pub sector_id: i32,
    pub corners: [Point3<f64>; 4],
}

impl FiducialMarker {
    /// Build a marker from its center pose in the world and its physical
    /// dimensions. The local marker plane is z = 0 with x spanning the
    /// width and y the height.
    pub fn from_center(
        id: u32,
        map_id: i32,
        sector_id: i32,
        center: &Isometry3<f64>,
        width: f64,
        height: f64,
    ) -> Self {
        let hw = width / 2.0;
        let hh = height / 2.0;
        // Top-left, bottom-left, bottom-right, top-right
        let local = [
            Point3::new(-hw, -hh, 0.0),
            Point3::new(-hw, hh, 0.0),
            Point3::new(hw, hh, 0.0),
            Point3::new(hw, -hh, 0.0),
        ];
        let corners = [
            center * local[0],
            center * local[1],
            center * local[2],
            center * local[3],
        ];
        Self {
            id,
            map_id,
            sector_id,
            corners,
        }
    }
}

/// One detected marker: IDs, the camera that saw it, and the four observed
/// corner pixels in the same traversal order as [`FiducialMarker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerObservation {
    pub id: u32,
    pub map_id: i32,
    pub sector_id: i32,
    /// Index of the observing camera in the rig
    pub camera: usize,
    pub corners: [PixelPoint; 4],
}

/// A set of marker detections from one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerDetectionSet {
    pub frame_id: String,
    pub timestamp_us: u64,
    pub markers: Vec<MarkerObservation>,
}
