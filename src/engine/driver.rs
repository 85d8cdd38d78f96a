//! The update driver: owns the filter, map, and observation models, and
//! decides when motion and sensor evidence enter the filter.
//!
//! Laser and camera each have their own update gate with a "pose at last
//! update" and a force flag, but share one filter: motion is always
//! integrated from the pose of the last filter update regardless of which
//! sensor triggered it. The driver is single-threaded; callers serialize
//! concurrent injections with a mutex around the whole driver.

use std::collections::HashMap;
use std::sync::Arc;

use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::algorithms::localization::{
    Beam, BeamData, LaserModel, MarkerModel, MotionModel, OdomData, Particle, ParticleFilter,
};
use crate::algorithms::mapping::OccupancyMap;
use crate::config::AmclConfig;
use crate::core::math::angle_diff;
use crate::core::types::{
    Covariance3, InitialPose, LaserScan, MarkerDetectionSet, OccupancyGrid, Pose2D,
};
use crate::error::{AmclError, Result};
use crate::io::{PoseStore, SavedPose, TransformSource};

use super::outputs::{CycleOutput, FrameCorrection, PoseError, PoseEstimate};

/// Per-sensor update gate.
#[derive(Debug, Clone, Copy, Default)]
struct SensorGate {
    initialized: bool,
    last_pose: Pose2D,
    force: bool,
}

/// Orchestrates motion integration, sensor updates, resampling, and
/// publication.
pub struct UpdateDriver<T: TransformSource> {
    config: AmclConfig,
    transforms: T,
    rng: StdRng,

    map: Option<Arc<OccupancyMap>>,
    filter: Option<ParticleFilter>,
    motion: MotionModel,
    marker_model: MarkerModel,

    lasers: Vec<LaserModel>,
    lasers_update: Vec<bool>,
    frame_to_laser: HashMap<String, usize>,

    laser_gate: SensorGate,
    camera_gate: SensorGate,
    /// Odometric pose at the last filter update, either sensor
    filter_odom_pose: Option<Pose2D>,
    resample_count_cam: u32,

    latest_correction: Option<Pose2D>,
    last_published: Option<PoseEstimate>,

    pending_initial_pose: Option<(Pose2D, Covariance3)>,
    initial_pose: Pose2D,
    initial_cov: Covariance3,

    ground_truth: Option<Pose2D>,

    pose_store: Option<Box<dyn PoseStore>>,
    last_save_us: u64,
    last_cloud_us: u64,
}

impl<T: TransformSource> UpdateDriver<T> {
    pub fn new(config: AmclConfig, transforms: T) -> Self {
        let rng = if config.runtime.seed == 0 {
            StdRng::from_entropy()
        } else {
            StdRng::seed_from_u64(config.runtime.seed)
        };
        let motion = MotionModel::new(config.odom.to_motion_config());
        let marker_model = MarkerModel::new(
            config.marker.to_marker_config(),
            config.marker.visual_map(),
            config.marker.camera_rig(),
        );
        let initial_pose = Pose2D::new(
            config.initial_pose.x,
            config.initial_pose.y,
            config.initial_pose.a,
        );
        let initial_cov = Covariance3::diagonal(
            config.initial_pose.cov_xx,
            config.initial_pose.cov_yy,
            config.initial_pose.cov_aa,
        );

        Self {
            config,
            transforms,
            rng,
            map: None,
            filter: None,
            motion,
            marker_model,
            lasers: Vec::new(),
            lasers_update: Vec::new(),
            frame_to_laser: HashMap::new(),
            laser_gate: SensorGate::default(),
            camera_gate: SensorGate::default(),
            filter_odom_pose: None,
            resample_count_cam: 0,
            latest_correction: None,
            last_published: None,
            pending_initial_pose: None,
            initial_pose,
            initial_cov,
            ground_truth: None,
            pose_store: None,
            last_save_us: 0,
            last_cloud_us: 0,
        }
    }

    /// Attach a pose store and restore the persisted pose if present.
    /// NaN fields in the stored record are rejected individually.
    pub fn with_pose_store(mut self, store: Box<dyn PoseStore>) -> Self {
        match store.load() {
            Ok(Some(saved)) => self.restore_saved_pose(&saved),
            Ok(None) => {}
            Err(e) => warn!("could not read persisted pose: {}", e),
        }
        self.pose_store = Some(store);
        self
    }

    fn restore_saved_pose(&mut self, saved: &SavedPose) {
        let mut accept = |name: &str, value: f64, slot: &mut f64| {
            if value.is_nan() {
                warn!("ignoring NaN in persisted {}", name);
            } else {
                *slot = value;
            }
        };
        let mut pose = self.initial_pose;
        accept("pose x", saved.initial_pose_x, &mut pose.x);
        accept("pose y", saved.initial_pose_y, &mut pose.y);
        accept("pose yaw", saved.initial_pose_a, &mut pose.theta);
        self.initial_pose = Pose2D::new(pose.x, pose.y, pose.theta);

        let mut xx = self.initial_cov.var_x();
        let mut yy = self.initial_cov.var_y();
        let mut aa = self.initial_cov.var_theta();
        accept("covariance xx", saved.initial_cov_xx, &mut xx);
        accept("covariance yy", saved.initial_cov_yy, &mut yy);
        accept("covariance aa", saved.initial_cov_aa, &mut aa);
        self.initial_cov = Covariance3::diagonal(xx, yy, aa);
    }

    /// Replace the map atomically: all downstream structures are rebuilt
    /// before the old map is released.
    pub fn set_map(&mut self, grid: &OccupancyGrid) {
        info!(
            "received a {} x {} map @ {:.3} m/cell",
            grid.width, grid.height, grid.resolution
        );
        let map = Arc::new(OccupancyMap::from_grid(
            grid,
            self.config.laser.likelihood_max_dist,
        ));

        let mut filter = ParticleFilter::new(self.config.filter.to_filter_config());
        filter.init_gaussian(&self.initial_pose, &self.initial_cov, &mut self.rng);

        self.lasers.clear();
        self.lasers_update.clear();
        self.frame_to_laser.clear();
        self.laser_gate = SensorGate::default();
        self.camera_gate = SensorGate::default();
        self.filter_odom_pose = None;
        self.resample_count_cam = 0;

        self.filter = Some(filter);
        self.map = Some(map);

        // An initial pose that arrived before the map applies now
        self.apply_pending_initial_pose();
    }

    /// Map replacement that also applies a new initial pose (set-map
    /// service).
    pub fn set_map_with_pose(&mut self, grid: &OccupancyGrid, initial: &InitialPose) {
        self.set_map(grid);
        self.set_initial_pose(initial);
    }

    pub fn map(&self) -> Option<&Arc<OccupancyMap>> {
        self.map.as_ref()
    }

    pub fn filter(&self) -> Option<&ParticleFilter> {
        self.filter.as_ref()
    }

    /// Mutable filter access for diagnostics and tests.
    pub fn filter_mut(&mut self) -> Option<&mut ParticleFilter> {
        self.filter.as_mut()
    }

    pub fn last_published(&self) -> Option<&PoseEstimate> {
        self.last_published.as_ref()
    }

    pub fn latest_correction(&self) -> Option<Pose2D> {
        self.latest_correction
    }

    /// Record the simulator's ground-truth pose for error diagnostics.
    pub fn set_ground_truth(&mut self, pose: Pose2D) {
        self.ground_truth = Some(pose);
    }

    /// Reinitialize uniformly over free map cells (global localization
    /// service).
    pub fn global_localization(&mut self) -> Result<()> {
        let Some(map) = self.map.clone() else {
            return Ok(());
        };
        if map.free_cell_indices().is_empty() {
            return Err(AmclError::Map(
                "no free cells to draw uniform poses from".into(),
            ));
        }
        let Some(filter) = self.filter.as_mut() else {
            return Ok(());
        };
        info!("initializing with uniform distribution");
        filter.init_from_fn(&mut self.rng, |rng| {
            map.sample_free_pose(rng).unwrap_or_default()
        });
        self.laser_gate.initialized = false;
        self.camera_gate.initialized = false;
        self.filter_odom_pose = None;
        Ok(())
    }

    /// Force both sensors to run a full update on their next observation
    /// even without motion (no-motion update service).
    pub fn request_nomotion_update(&mut self) {
        self.laser_gate.force = true;
        self.camera_gate.force = true;
    }

    /// Inject an operator pose estimate. NaN fields are rejected
    /// individually; an estimate in the wrong frame is dropped.
    pub fn set_initial_pose(&mut self, initial: &InitialPose) {
        if initial.frame_id != self.config.frames.global_frame_id {
            warn!(
                "ignoring initial pose in frame {:?}; expected the global frame {:?}",
                initial.frame_id, self.config.frames.global_frame_id
            );
            return;
        }

        let mut accept = |name: &str, value: f64, slot: &mut f64| {
            if value.is_nan() {
                warn!("ignoring NaN in initial pose {}", name);
            } else {
                *slot = value;
            }
        };

        let mut pose = self.initial_pose;
        accept("x", initial.pose.x, &mut pose.x);
        accept("y", initial.pose.y, &mut pose.y);
        accept("yaw", initial.pose.theta, &mut pose.theta);
        let pose = Pose2D::new(pose.x, pose.y, pose.theta);

        // Carry over the (x, y, yaw) block of the 6-D covariance
        let mut cov = self.initial_cov;
        let mut xx = cov.get(0, 0);
        let mut xy = cov.get(0, 1);
        let mut yx = cov.get(1, 0);
        let mut yy = cov.get(1, 1);
        let mut aa = cov.get(2, 2);
        accept("covariance xx", initial.covariance[0], &mut xx);
        accept("covariance xy", initial.covariance[1], &mut xy);
        accept("covariance yx", initial.covariance[6], &mut yx);
        accept("covariance yy", initial.covariance[7], &mut yy);
        accept("covariance aa", initial.covariance[6 * 5 + 5], &mut aa);
        cov.set(0, 0, xx);
        cov.set(0, 1, xy);
        cov.set(1, 0, yx);
        cov.set(1, 1, yy);
        cov.set(2, 2, aa);

        info!(
            "setting pose: {:.3} {:.3} {:.3}",
            pose.x, pose.y, pose.theta
        );
        self.initial_pose = pose;
        self.initial_cov = cov;
        self.pending_initial_pose = Some((pose, cov));
        self.apply_pending_initial_pose();
    }

    fn apply_pending_initial_pose(&mut self) {
        if self.map.is_none() {
            return;
        }
        let Some(filter) = self.filter.as_mut() else {
            return;
        };
        if let Some((pose, cov)) = self.pending_initial_pose.take() {
            filter.init_gaussian(&pose, &cov, &mut self.rng);
            self.laser_gate.initialized = false;
            self.camera_gate.initialized = false;
            self.filter_odom_pose = None;
        }
    }

    /// Inject a laser scan.
    pub fn handle_laser_scan(&mut self, scan: &LaserScan) -> CycleOutput {
        let mut out = CycleOutput::default();
        // Observations are silently ignored until a map arrives
        let Some(map) = self.map.clone() else {
            return out;
        };

        let laser_index = match self.frame_to_laser.get(&scan.frame_id) {
            Some(&idx) => idx,
            None => {
                let Some(mount) = self.transforms.sensor_mount(&scan.frame_id) else {
                    error!(
                        "couldn't transform from {:?} to {:?}; dropping scan",
                        scan.frame_id, self.config.frames.base_frame_id
                    );
                    return out;
                };
                let mut model =
                    LaserModel::new(self.config.laser.to_laser_config(), map.clone());
                // The mounting yaw is already folded into the bearings
                model.set_laser_pose(Pose2D::new(mount.x, mount.y, 0.0));
                self.lasers.push(model);
                self.lasers_update.push(true);
                let idx = self.lasers.len() - 1;
                self.frame_to_laser.insert(scan.frame_id.clone(), idx);
                idx
            }
        };

        let Some(odom_pose) = self.transforms.odom_pose_at(scan.timestamp_us) else {
            warn!("couldn't determine odometric pose for scan; dropping it");
            return out;
        };

        let Some(mut filter) = self.filter.take() else {
            return out;
        };

        let mut force_publication = false;
        if !self.laser_gate.initialized {
            self.laser_gate = SensorGate {
                initialized: true,
                last_pose: odom_pose,
                force: false,
            };
            self.filter_odom_pose = Some(odom_pose);
            for flag in &mut self.lasers_update {
                *flag = true;
            }
            force_publication = true;
        } else {
            let gate_delta = pose_delta(&odom_pose, &self.laser_gate.last_pose);
            if self.exceeds_motion_gate(&gate_delta) || self.laser_gate.force {
                for flag in &mut self.lasers_update {
                    *flag = true;
                }
            }
            self.laser_gate.force = false;

            if self.lasers_update[laser_index] {
                let delta = self
                    .filter_odom_pose
                    .map(|p| pose_delta(&odom_pose, &p))
                    .unwrap_or_default();
                let data = OdomData {
                    pose: odom_pose,
                    delta,
                };
                filter.update_motion(&self.motion, &data, &mut self.rng);
            }
        }

        let mut resampled = false;
        if self.lasers_update[laser_index] {
            let beams = self.prepare_beams(scan);
            let model = &self.lasers[laser_index];
            filter.update_sensor(|samples| model.reweight(samples, &beams));
            self.lasers_update[laser_index] = false;

            self.laser_gate.last_pose = odom_pose;
            self.filter_odom_pose = Some(odom_pose);

            // The laser path resamples on every update
            let sample_map = map.clone();
            filter.resample(&mut self.rng, |rng| sample_map.sample_free_pose(rng));
            resampled = true;

            if self.cloud_due(scan.timestamp_us) {
                out.particle_cloud =
                    Some(filter.particles().iter().map(|p| p.pose).collect());
            }
        }

        if resampled || force_publication {
            self.publish(
                &mut out,
                &mut filter,
                &odom_pose,
                scan.timestamp_us,
                0,
                resampled,
            );
        } else {
            self.republish_correction(&mut out, scan.timestamp_us);
        }

        self.filter = Some(filter);
        self.maybe_save_pose(scan.timestamp_us);
        out
    }

    /// Inject a marker detection set.
    pub fn handle_marker_detections(&mut self, detections: &MarkerDetectionSet) -> CycleOutput {
        let mut out = CycleOutput::default();
        let Some(map) = self.map.clone() else {
            return out;
        };

        let Some(odom_pose) = self.transforms.odom_pose_at(detections.timestamp_us) else {
            warn!("couldn't determine odometric pose for detections; dropping them");
            return out;
        };

        let Some(mut filter) = self.filter.take() else {
            return out;
        };

        let mut force_publication = false;
        let mut marker_update = false;
        if !self.camera_gate.initialized {
            self.camera_gate = SensorGate {
                initialized: true,
                last_pose: odom_pose,
                force: false,
            };
            self.filter_odom_pose = Some(odom_pose);
            marker_update = true;
            force_publication = true;
            self.resample_count_cam = 0;
        } else {
            let gate_delta = pose_delta(&odom_pose, &self.camera_gate.last_pose);
            if self.exceeds_motion_gate(&gate_delta) || self.camera_gate.force {
                marker_update = true;
            }
            self.camera_gate.force = false;

            if marker_update {
                let delta = self
                    .filter_odom_pose
                    .map(|p| pose_delta(&odom_pose, &p))
                    .unwrap_or_default();
                let data = OdomData {
                    pose: odom_pose,
                    delta,
                };
                filter.update_motion(&self.motion, &data, &mut self.rng);
            }
        }

        let mut resampled = false;
        let mut updated = false;
        if marker_update {
            if !detections.markers.is_empty() {
                let model = &self.marker_model;
                filter.update_sensor(|samples| model.reweight(samples, &detections.markers));
            }
            self.camera_gate.last_pose = odom_pose;
            self.filter_odom_pose = Some(odom_pose);
            updated = true;

            // The camera path resamples every resample_interval-th update
            self.resample_count_cam += 1;
            let interval = self.config.filter.resample_interval.max(1);
            if self.resample_count_cam % interval == 0 {
                let sample_map = map.clone();
                filter.resample(&mut self.rng, |rng| sample_map.sample_free_pose(rng));
                resampled = true;
            }

            if self.cloud_due(detections.timestamp_us) {
                out.particle_cloud =
                    Some(filter.particles().iter().map(|p| p.pose).collect());
            }
        }

        if updated || force_publication {
            self.publish(
                &mut out,
                &mut filter,
                &odom_pose,
                detections.timestamp_us,
                detections.markers.len(),
                resampled,
            );
        } else {
            self.republish_correction(&mut out, detections.timestamp_us);
        }

        self.filter = Some(filter);
        self.maybe_save_pose(detections.timestamp_us);
        out
    }

    /// Persist the last estimate and release resources.
    pub fn shutdown(&mut self) {
        self.persist_pose();
    }

    fn exceeds_motion_gate(&self, delta: &Pose2D) -> bool {
        delta.x.abs() > self.config.filter.update_min_d
            || delta.y.abs() > self.config.filter.update_min_d
            || delta.theta.abs() > self.config.filter.update_min_a
    }

    /// Convert a scan into base-frame beams, applying the configured
    /// range limits. Readings at or below the floor are mapped to max
    /// range (the filter has no notion of a minimum range).
    fn prepare_beams(&self, scan: &LaserScan) -> BeamData {
        let cfg = &self.config.laser;
        let range_max = if cfg.max_range > 0.0 {
            scan.range_max.min(cfg.max_range)
        } else {
            scan.range_max
        };
        let range_min = if cfg.min_range > 0.0 {
            scan.range_min.max(cfg.min_range)
        } else {
            scan.range_min
        };

        let beams = scan
            .ranges
            .iter()
            .enumerate()
            .map(|(i, &r)| Beam {
                range: if !r.is_nan() && r <= range_min {
                    range_max
                } else {
                    r
                },
                bearing: scan.angle_min + i as f64 * scan.angle_increment,
            })
            .collect();
        BeamData { beams, range_max }
    }

    fn publish(
        &mut self,
        out: &mut CycleOutput,
        filter: &mut ParticleFilter,
        odom_pose: &Pose2D,
        timestamp_us: u64,
        num_markers: usize,
        resampled: bool,
    ) {
        if !resampled {
            if let Err(e) = filter.cluster_stats() {
                error!("couldn't compute cluster statistics: {}", e);
                return;
            }
        }

        let Some(best) = filter.best_hypothesis() else {
            error!("no hypothesis with positive weight");
            return;
        };
        let mean = best.mean;
        // Overall filter covariance rather than the winning cluster's
        let covariance = filter.set_covariance();

        let estimate = PoseEstimate {
            timestamp_us,
            pose: mean,
            covariance,
        };
        out.pose = Some(estimate.clone());

        if let Some(truth) = self.ground_truth {
            let dx = mean.x - truth.x;
            let dy = mean.y - truth.y;
            out.pose_error = Some(PoseError {
                dx,
                dy,
                distance: (dx * dx + dy * dy).sqrt(),
                dyaw: angle_diff(mean.theta, truth.theta),
                num_markers,
            });
        }

        // map→odom = map→base ∘ (odom→base)⁻¹
        let map_to_odom = mean.compose(&odom_pose.inverse());
        self.latest_correction = Some(map_to_odom);
        if self.config.runtime.tf_broadcast {
            out.correction = Some(FrameCorrection {
                map_to_odom,
                expiry_us: timestamp_us + self.tolerance_us(),
            });
        }

        self.last_published = Some(estimate);
    }

    /// Nothing changed this cycle: hand the last correction back with a
    /// fresh expiry so downstream consumers stay happy.
    fn republish_correction(&self, out: &mut CycleOutput, timestamp_us: u64) {
        if !self.config.runtime.tf_broadcast {
            return;
        }
        if let Some(map_to_odom) = self.latest_correction {
            out.correction = Some(FrameCorrection {
                map_to_odom,
                expiry_us: timestamp_us + self.tolerance_us(),
            });
        }
    }

    fn tolerance_us(&self) -> u64 {
        (self.config.runtime.transform_tolerance.max(0.0) * 1e6) as u64
    }

    fn cloud_due(&mut self, timestamp_us: u64) -> bool {
        let rate = self.config.runtime.gui_publish_rate;
        if rate <= 0.0 {
            return true;
        }
        let period_us = (1e6 / rate) as u64;
        if timestamp_us.saturating_sub(self.last_cloud_us) >= period_us {
            self.last_cloud_us = timestamp_us;
            true
        } else {
            false
        }
    }

    fn maybe_save_pose(&mut self, timestamp_us: u64) {
        let rate = self.config.runtime.save_pose_rate;
        if rate <= 0.0 || self.pose_store.is_none() {
            return;
        }
        let period_us = (1e6 / rate) as u64;
        if timestamp_us.saturating_sub(self.last_save_us) >= period_us {
            self.persist_pose();
            self.last_save_us = timestamp_us;
        }
    }

    fn persist_pose(&mut self) {
        let (Some(store), Some(estimate)) = (self.pose_store.as_mut(), &self.last_published)
        else {
            return;
        };
        let saved = SavedPose {
            initial_pose_x: estimate.pose.x,
            initial_pose_y: estimate.pose.y,
            initial_pose_a: estimate.pose.theta,
            initial_cov_xx: estimate.covariance.var_x(),
            initial_cov_yy: estimate.covariance.var_y(),
            initial_cov_aa: estimate.covariance.var_theta(),
        };
        if let Err(e) = store.save(&saved) {
            warn!("failed to persist pose: {}", e);
        }
    }

    /// Current particles, for visualization.
    pub fn particles(&self) -> &[Particle] {
        self.filter.as_ref().map_or(&[], |f| f.particles())
    }

    pub fn marker_model(&self) -> &MarkerModel {
        &self.marker_model
    }
}

/// Component-wise pose difference with wrapped yaw.
fn pose_delta(now: &Pose2D, then: &Pose2D) -> Pose2D {
    Pose2D {
        x: now.x - then.x,
        y: now.y - then.y,
        theta: angle_diff(now.theta, then.theta),
    }
}
