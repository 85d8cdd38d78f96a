//! Configuration loading for DhruvaAMCL.
//!
//! All options load from a single TOML file with per-field defaults, so a
//! partial file only overrides what it names. Section types convert into
//! the runtime configurations of the filter and observation models.

use nalgebra::{Isometry3, Translation3, UnitQuaternion};
use serde::Deserialize;
use std::path::Path;

use crate::algorithms::localization::{
    CameraRig, LaserModelConfig, LaserModelKind, MarkerModelConfig, MotionModelConfig, OdomModel,
    ParticleFilterConfig,
};
use crate::core::types::FiducialMarker;
use crate::error::Result;

/// Main configuration structure.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AmclConfig {
    #[serde(default)]
    pub filter: FilterSection,
    #[serde(default)]
    pub odom: OdomSection,
    #[serde(default)]
    pub laser: LaserSection,
    #[serde(default)]
    pub marker: MarkerSection,
    #[serde(default)]
    pub frames: FrameSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub initial_pose: InitialPoseSection,
}

impl AmclConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

/// Particle filter bounds and update gating.
#[derive(Clone, Debug, Deserialize)]
pub struct FilterSection {
    /// Lower bound on the adaptive particle count (default: 100)
    #[serde(default = "default_min_particles")]
    pub min_particles: usize,

    /// Upper bound on the adaptive particle count (default: 5000)
    #[serde(default = "default_max_particles")]
    pub max_particles: usize,

    /// KLD bound error (default: 0.01)
    #[serde(default = "default_kld_err")]
    pub kld_err: f64,

    /// KLD bound quantile (default: 0.99)
    #[serde(default = "default_kld_z")]
    pub kld_z: f64,

    /// Translation gate before a sensor update fires, meters
    /// (default: 0.2)
    #[serde(default = "default_update_min_d")]
    pub update_min_d: f64,

    /// Rotation gate before a sensor update fires, radians
    /// (default: π/6)
    #[serde(default = "default_update_min_a")]
    pub update_min_a: f64,

    /// Camera updates between resamples (default: 2)
    #[serde(default = "default_resample_interval")]
    pub resample_interval: u32,

    /// Slow weight-average decay for recovery (default: 0.001)
    #[serde(default = "default_alpha_slow")]
    pub recovery_alpha_slow: f64,

    /// Fast weight-average decay for recovery (default: 0.1)
    #[serde(default = "default_alpha_fast")]
    pub recovery_alpha_fast: f64,

    /// Histogram bucket size along x, meters (default: 0.5)
    #[serde(default = "default_bucket_xy")]
    pub bucket_x: f64,

    /// Histogram bucket size along y, meters (default: 0.5)
    #[serde(default = "default_bucket_xy")]
    pub bucket_y: f64,

    /// Histogram bucket size along yaw, radians (default: 10°)
    #[serde(default = "default_bucket_yaw")]
    pub bucket_yaw: f64,
}

impl FilterSection {
    pub fn to_filter_config(&self) -> ParticleFilterConfig {
        let (min, max) = if self.min_particles > self.max_particles {
            log::warn!(
                "min_particles {} exceeds max_particles {}; clamping to equal",
                self.min_particles,
                self.max_particles
            );
            (self.min_particles, self.min_particles)
        } else {
            (self.min_particles, self.max_particles)
        };
        ParticleFilterConfig {
            min_particles: min,
            max_particles: max,
            kld_err: self.kld_err,
            kld_z: self.kld_z,
            alpha_slow: self.recovery_alpha_slow,
            alpha_fast: self.recovery_alpha_fast,
            bucket_x: self.bucket_x,
            bucket_y: self.bucket_y,
            bucket_yaw: self.bucket_yaw,
        }
    }
}

impl Default for FilterSection {
    fn default() -> Self {
        Self {
            min_particles: default_min_particles(),
            max_particles: default_max_particles(),
            kld_err: default_kld_err(),
            kld_z: default_kld_z(),
            update_min_d: default_update_min_d(),
            update_min_a: default_update_min_a(),
            resample_interval: default_resample_interval(),
            recovery_alpha_slow: default_alpha_slow(),
            recovery_alpha_fast: default_alpha_fast(),
            bucket_x: default_bucket_xy(),
            bucket_y: default_bucket_xy(),
            bucket_yaw: default_bucket_yaw(),
        }
    }
}

/// Odometry motion model selection and noise.
#[derive(Clone, Debug, Deserialize)]
pub struct OdomSection {
    /// One of "diff", "diff-corrected", "omni", "omni-corrected"
    /// (default: "diff")
    #[serde(default = "default_odom_model")]
    pub model_type: String,

    #[serde(default = "default_alpha")]
    pub alpha1: f64,
    #[serde(default = "default_alpha")]
    pub alpha2: f64,
    #[serde(default = "default_alpha")]
    pub alpha3: f64,
    #[serde(default = "default_alpha")]
    pub alpha4: f64,
    #[serde(default = "default_alpha")]
    pub alpha5: f64,
}

impl OdomSection {
    pub fn to_motion_config(&self) -> MotionModelConfig {
        MotionModelConfig {
            model: OdomModel::from_tag(&self.model_type),
            alpha1: self.alpha1,
            alpha2: self.alpha2,
            alpha3: self.alpha3,
            alpha4: self.alpha4,
            alpha5: self.alpha5,
        }
    }
}

impl Default for OdomSection {
    fn default() -> Self {
        Self {
            model_type: default_odom_model(),
            alpha1: default_alpha(),
            alpha2: default_alpha(),
            alpha3: default_alpha(),
            alpha4: default_alpha(),
            alpha5: default_alpha(),
        }
    }
}

/// Laser range model parameters.
#[derive(Clone, Debug, Deserialize)]
pub struct LaserSection {
    /// One of "beam", "likelihood_field", "likelihood_field_prob"
    /// (default: "likelihood_field")
    #[serde(default = "default_laser_model")]
    pub model_type: String,

    #[serde(default = "default_z_hit")]
    pub z_hit: f64,
    #[serde(default = "default_z_short")]
    pub z_short: f64,
    #[serde(default = "default_z_max")]
    pub z_max: f64,
    #[serde(default = "default_z_rand")]
    pub z_rand: f64,
    /// Standard deviation of the hit term, meters (default: 0.2)
    #[serde(default = "default_sigma_hit")]
    pub sigma_hit: f64,
    #[serde(default = "default_lambda_short")]
    pub lambda_short: f64,

    /// Likelihood field clamp distance, meters (default: 2.0)
    #[serde(default = "default_likelihood_max_dist")]
    pub likelihood_max_dist: f64,

    /// Beams scored per scan (default: 30)
    #[serde(default = "default_max_beams")]
    pub max_beams: usize,

    /// Range floor; readings below are mapped to max range. Negative
    /// disables (default: -1)
    #[serde(default = "default_range_limit")]
    pub min_range: f64,

    /// Range ceiling; negative keeps the scan's own maximum
    /// (default: -1)
    #[serde(default = "default_range_limit")]
    pub max_range: f64,

    #[serde(default)]
    pub do_beamskip: bool,
    #[serde(default = "default_beam_skip_distance")]
    pub beam_skip_distance: f64,
    #[serde(default = "default_beam_skip_threshold")]
    pub beam_skip_threshold: f64,
    #[serde(default = "default_beam_skip_error_threshold")]
    pub beam_skip_error_threshold: f64,

    /// Fusion exponent against the marker model (default: 0.5)
    #[serde(default = "default_coeff")]
    pub coeff: f64,
}

impl LaserSection {
    pub fn to_laser_config(&self) -> LaserModelConfig {
        LaserModelConfig {
            kind: LaserModelKind::from_tag(&self.model_type),
            z_hit: self.z_hit,
            z_short: self.z_short,
            z_max: self.z_max,
            z_rand: self.z_rand,
            sigma_hit: self.sigma_hit,
            lambda_short: self.lambda_short,
            max_beams: self.max_beams,
            do_beamskip: self.do_beamskip,
            beam_skip_distance: self.beam_skip_distance,
            beam_skip_threshold: self.beam_skip_threshold,
            beam_skip_error_threshold: self.beam_skip_error_threshold,
            coeff: self.coeff,
        }
    }
}

impl Default for LaserSection {
    fn default() -> Self {
        Self {
            model_type: default_laser_model(),
            z_hit: default_z_hit(),
            z_short: default_z_short(),
            z_max: default_z_max(),
            z_rand: default_z_rand(),
            sigma_hit: default_sigma_hit(),
            lambda_short: default_lambda_short(),
            likelihood_max_dist: default_likelihood_max_dist(),
            max_beams: default_max_beams(),
            min_range: default_range_limit(),
            max_range: default_range_limit(),
            do_beamskip: false,
            beam_skip_distance: default_beam_skip_distance(),
            beam_skip_threshold: default_beam_skip_threshold(),
            beam_skip_error_threshold: default_beam_skip_error_threshold(),
            coeff: default_coeff(),
        }
    }
}

/// A rigid pose given as translation plus roll/pitch/yaw, as the visual
/// map and camera extrinsics are written in configuration files.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PoseEntry {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default)]
    pub roll: f64,
    #[serde(default)]
    pub pitch: f64,
    #[serde(default)]
    pub yaw: f64,
}

impl PoseEntry {
    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::new(self.x, self.y, self.z),
            UnitQuaternion::from_euler_angles(self.roll, self.pitch, self.yaw),
        )
    }
}

/// One fiducial in the visual map: its ID triple and center pose.
#[derive(Clone, Debug, Deserialize)]
pub struct MarkerEntry {
    pub id: u32,
    #[serde(default)]
    pub map: i32,
    #[serde(default)]
    pub sector: i32,
    #[serde(flatten)]
    pub pose: PoseEntry,
}

/// Visual marker model parameters, the visual map, and the camera rig.
#[derive(Clone, Debug, Deserialize)]
pub struct MarkerSection {
    #[serde(default = "default_marker_z_hit")]
    pub z_hit: f64,
    #[serde(default = "default_marker_z_rand")]
    pub z_rand: f64,
    /// Standard deviation of the reprojection error, pixels
    /// (default: 20)
    #[serde(default = "default_marker_sigma_hit")]
    pub sigma_hit: f64,
    /// Out-of-image exponential decay per pixel (default: 0.01)
    #[serde(default = "default_marker_landa")]
    pub landa: f64,
    /// Fusion exponent against the laser model (default: 0.5)
    #[serde(default = "default_coeff")]
    pub coeff: f64,

    /// Physical marker width, meters (default: 0.2)
    #[serde(default = "default_marker_size")]
    pub marker_width: f64,
    /// Physical marker height, meters (default: 0.2)
    #[serde(default = "default_marker_size")]
    pub marker_height: f64,

    #[serde(default = "default_image_width")]
    pub image_width: f64,
    #[serde(default = "default_image_height")]
    pub image_height: f64,

    /// Expected camera count; 0 accepts whatever `camera_positions`
    /// lists (default: 0)
    #[serde(default)]
    pub num_cam: usize,

    /// Running against the simulator rather than the real robot
    #[serde(default)]
    pub simulation: bool,

    /// Marker center poses in the world frame
    #[serde(default)]
    pub marker_positions: Vec<MarkerEntry>,

    /// Camera poses in the robot base frame
    #[serde(default)]
    pub camera_positions: Vec<PoseEntry>,
}

impl MarkerSection {
    pub fn to_marker_config(&self) -> MarkerModelConfig {
        MarkerModelConfig {
            z_hit: self.z_hit,
            z_rand: self.z_rand,
            sigma_hit: self.sigma_hit,
            landa: self.landa,
            coeff: self.coeff,
        }
    }

    /// Expand marker center poses into corner sets.
    pub fn visual_map(&self) -> Vec<FiducialMarker> {
        self.marker_positions
            .iter()
            .map(|entry| {
                FiducialMarker::from_center(
                    entry.id,
                    entry.map,
                    entry.sector,
                    &entry.pose.to_isometry(),
                    self.marker_width,
                    self.marker_height,
                )
            })
            .collect()
    }

    /// Camera extrinsics inverted into base→camera transforms.
    pub fn camera_rig(&self) -> CameraRig {
        if self.num_cam != 0 && self.num_cam != self.camera_positions.len() {
            log::warn!(
                "num_cam is {} but {} camera positions are configured",
                self.num_cam,
                self.camera_positions.len()
            );
        }
        let extrinsics = self
            .camera_positions
            .iter()
            .map(|p| p.to_isometry().inverse())
            .collect();
        CameraRig::new(extrinsics, self.image_width, self.image_height)
    }
}

impl Default for MarkerSection {
    fn default() -> Self {
        Self {
            z_hit: default_marker_z_hit(),
            z_rand: default_marker_z_rand(),
            sigma_hit: default_marker_sigma_hit(),
            landa: default_marker_landa(),
            coeff: default_coeff(),
            marker_width: default_marker_size(),
            marker_height: default_marker_size(),
            image_width: default_image_width(),
            image_height: default_image_height(),
            num_cam: 0,
            simulation: false,
            marker_positions: Vec::new(),
            camera_positions: Vec::new(),
        }
    }
}

/// Coordinate frame names.
#[derive(Clone, Debug, Deserialize)]
pub struct FrameSection {
    #[serde(default = "default_odom_frame")]
    pub odom_frame_id: String,
    #[serde(default = "default_base_frame")]
    pub base_frame_id: String,
    #[serde(default = "default_global_frame")]
    pub global_frame_id: String,
}

impl Default for FrameSection {
    fn default() -> Self {
        Self {
            odom_frame_id: default_odom_frame(),
            base_frame_id: default_base_frame(),
            global_frame_id: default_global_frame(),
        }
    }
}

/// Publication and persistence pacing.
#[derive(Clone, Debug, Deserialize)]
pub struct RuntimeSection {
    /// How long a broadcast map→odom transform stays valid, seconds
    /// (default: 0.1)
    #[serde(default = "default_transform_tolerance")]
    pub transform_tolerance: f64,

    /// Broadcast the map→odom correction at all (default: true)
    #[serde(default = "default_true")]
    pub tf_broadcast: bool,

    /// Pose persistence rate, Hz; non-positive disables (default: 0.5)
    #[serde(default = "default_save_pose_rate")]
    pub save_pose_rate: f64,

    /// Particle cloud publication rate, Hz; non-positive publishes every
    /// cycle (default: -1)
    #[serde(default = "default_gui_publish_rate")]
    pub gui_publish_rate: f64,

    /// RNG seed; 0 seeds from entropy (default: 0)
    #[serde(default)]
    pub seed: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            transform_tolerance: default_transform_tolerance(),
            tf_broadcast: default_true(),
            save_pose_rate: default_save_pose_rate(),
            gui_publish_rate: default_gui_publish_rate(),
            seed: 0,
        }
    }
}

/// Startup pose belief; overridden by a persisted pose when one loads.
#[derive(Clone, Debug, Deserialize)]
pub struct InitialPoseSection {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub a: f64,
    #[serde(default = "default_init_cov_xy")]
    pub cov_xx: f64,
    #[serde(default = "default_init_cov_xy")]
    pub cov_yy: f64,
    #[serde(default = "default_init_cov_aa")]
    pub cov_aa: f64,
}

impl Default for InitialPoseSection {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            a: 0.0,
            cov_xx: default_init_cov_xy(),
            cov_yy: default_init_cov_xy(),
            cov_aa: default_init_cov_aa(),
        }
    }
}

fn default_min_particles() -> usize {
    100
}
fn default_max_particles() -> usize {
    5000
}
fn default_kld_err() -> f64 {
    0.01
}
fn default_kld_z() -> f64 {
    0.99
}
fn default_update_min_d() -> f64 {
    0.2
}
fn default_update_min_a() -> f64 {
    std::f64::consts::PI / 6.0
}
fn default_resample_interval() -> u32 {
    2
}
fn default_alpha_slow() -> f64 {
    0.001
}
fn default_alpha_fast() -> f64 {
    0.1
}
fn default_bucket_xy() -> f64 {
    0.5
}
fn default_bucket_yaw() -> f64 {
    10.0_f64.to_radians()
}
fn default_odom_model() -> String {
    "diff".to_string()
}
fn default_alpha() -> f64 {
    0.2
}
fn default_laser_model() -> String {
    "likelihood_field".to_string()
}
fn default_z_hit() -> f64 {
    0.95
}
fn default_z_short() -> f64 {
    0.1
}
fn default_z_max() -> f64 {
    0.05
}
fn default_z_rand() -> f64 {
    0.05
}
fn default_sigma_hit() -> f64 {
    0.2
}
fn default_lambda_short() -> f64 {
    0.1
}
fn default_likelihood_max_dist() -> f64 {
    2.0
}
fn default_max_beams() -> usize {
    30
}
fn default_range_limit() -> f64 {
    -1.0
}
fn default_beam_skip_distance() -> f64 {
    0.5
}
fn default_beam_skip_threshold() -> f64 {
    0.3
}
fn default_beam_skip_error_threshold() -> f64 {
    0.9
}
fn default_coeff() -> f64 {
    0.5
}
fn default_marker_z_hit() -> f64 {
    0.8
}
fn default_marker_z_rand() -> f64 {
    0.2
}
fn default_marker_sigma_hit() -> f64 {
    20.0
}
fn default_marker_landa() -> f64 {
    0.01
}
fn default_marker_size() -> f64 {
    0.2
}
fn default_image_width() -> f64 {
    640.0
}
fn default_image_height() -> f64 {
    480.0
}
fn default_odom_frame() -> String {
    "odom".to_string()
}
fn default_base_frame() -> String {
    "base_link".to_string()
}
fn default_global_frame() -> String {
    "map".to_string()
}
fn default_transform_tolerance() -> f64 {
    0.1
}
fn default_true() -> bool {
    true
}
fn default_save_pose_rate() -> f64 {
    0.5
}
fn default_gui_publish_rate() -> f64 {
    -1.0
}
fn default_init_cov_xy() -> f64 {
    0.25
}
fn default_init_cov_aa() -> f64 {
    (std::f64::consts::PI / 12.0) * (std::f64::consts::PI / 12.0)
}
