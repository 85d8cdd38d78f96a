//! Adaptive Monte Carlo Localization.
//!
//! - [`ParticleFilter`]: KLD-adaptive sample sets with recovery injection
//! - [`KdTree`]: bucketed sample histogram for KLD sizing and clustering
//! - [`MotionModel`]: odometry pose-perturbation kernels
//! - [`LaserModel`]: likelihood-field / beam range scoring
//! - [`MarkerModel`]: fiducial reprojection scoring

mod kdtree;
mod laser_model;
mod marker_model;
mod motion_model;
mod particle_filter;

pub use kdtree::KdTree;
pub use laser_model::{Beam, BeamData, LaserModel, LaserModelConfig, LaserModelKind};
pub use marker_model::{CameraRig, MarkerModel, MarkerModelConfig};
pub use motion_model::{MotionModel, MotionModelConfig, OdomData, OdomModel};
pub use particle_filter::{Hypothesis, Particle, ParticleFilter, ParticleFilterConfig};
