//! DhruvaAMCL - Adaptive Monte Carlo localization for the Dhruva robot
//!
//! Fuses a static occupancy grid, wheel odometry, 2D laser scans, and
//! fiducial-marker detections from a calibrated camera rig into a
//! particle-filter estimate of the robot's planar pose.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    engine/                          │  ← Orchestration
//! │        (update driver, publication types)           │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  algorithms/                        │  ← Core algorithms
//! │   (particle filter, motion + observation models,    │
//! │            occupancy map / likelihood field)        │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                      io/                            │  ← Boundary
//! │        (transform source, pose persistence)         │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │                 (types, math)                       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The middleware feeds the [`engine::UpdateDriver`] through plain method
//! calls (inject a scan, inject detections, inject a map or pose) and
//! publishes whatever each cycle returns. Message transport, transform
//! buffering, and marker detection live outside this crate.

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Boundary interfaces (depends on core)
// ============================================================================
pub mod io;

// ============================================================================
// Layer 3: Algorithms (depends on core)
// ============================================================================
pub mod algorithms;

// ============================================================================
// Layer 4: Orchestration (depends on all layers)
// ============================================================================
pub mod engine;

pub mod config;
pub mod error;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

pub use crate::core::math;
pub use crate::core::types::{
    Covariance3, FiducialMarker, InitialPose, LaserScan, MarkerDetectionSet, MarkerObservation,
    OccupancyGrid, PixelPoint, Point2D, Pose2D,
};
pub use config::AmclConfig;
pub use engine::{CycleOutput, FrameCorrection, PoseError, PoseEstimate, UpdateDriver};
pub use error::{AmclError, Result};
pub use io::{PoseStore, SavedPose, TomlPoseStore, TransformSource};

pub use algorithms::localization::{
    Beam, BeamData, CameraRig, Hypothesis, LaserModel, LaserModelConfig, LaserModelKind,
    MarkerModel, MarkerModelConfig, MotionModel, MotionModelConfig, OdomData, OdomModel,
    Particle, ParticleFilter, ParticleFilterConfig,
};
pub use algorithms::mapping::{CellState, OccupancyMap};
