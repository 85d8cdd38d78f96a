//! Core data types for the localization engine.
//!
//! - [`Point2D`], [`Pose2D`]: planar geometry
//! - [`Covariance3`]: pose uncertainty over (x, y, yaw)
//! - [`LaserScan`], [`OccupancyGrid`]: injected sensor/map messages
//! - [`FiducialMarker`], [`MarkerObservation`], [`MarkerDetectionSet`],
//!   [`PixelPoint`]: visual marker map and detections
//! - [`InitialPose`]: operator pose estimate with a 6x6 covariance

mod covariance;
mod initial_pose;
mod marker;
mod pose;
mod scan;

pub use covariance::Covariance3;
pub use initial_pose::InitialPose;
pub use marker::{FiducialMarker, MarkerDetectionSet, MarkerObservation, PixelPoint};
pub use pose::{Point2D, Pose2D};
pub use scan::{LaserScan, OccupancyGrid};
