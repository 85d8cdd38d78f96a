//! Visual fiducial observation model.
//!
//! Every detected marker is matched against the visual map by ID, its
//! world corners are pushed through the world → base → camera chain for
//! the detecting camera, and the mean corner reprojection error in pixels
//! feeds a hit-plus-random likelihood mixture. Detections whose corners
//! land behind the camera are treated as uninformative rather than as
//! evidence against the particle.
//!
//! Projection uses the source's pinhole convention: the focal length
//! equals half the image width, with the principal point at the image
//! center.

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};

use crate::core::math::gaussian_pdf;
use crate::core::types::{FiducialMarker, MarkerObservation, PixelPoint, Pose2D};

use super::particle_filter::Particle;

/// Rigid extrinsics of every camera plus the shared image geometry.
///
/// `base_to_camera[i]` maps points expressed in the robot base frame into
/// camera `i`'s optical frame.
#[derive(Debug, Clone)]
pub struct CameraRig {
    pub base_to_camera: Vec<Isometry3<f64>>,
    pub image_width: f64,
    pub image_height: f64,
}

impl CameraRig {
    pub fn new(base_to_camera: Vec<Isometry3<f64>>, image_width: f64, image_height: f64) -> Self {
        Self {
            base_to_camera,
            image_width,
            image_height,
        }
    }

    pub fn num_cameras(&self) -> usize {
        self.base_to_camera.len()
    }

    pub fn image_diagonal(&self) -> f64 {
        (self.image_width * self.image_width + self.image_height * self.image_height).sqrt()
    }

    /// Project a camera-frame point to pixels; `None` when it lies at or
    /// behind the image plane.
    pub fn project(&self, p: &Vector3<f64>) -> Option<PixelPoint> {
        if p.z <= 0.0 {
            return None;
        }
        let f = self.image_width / 2.0;
        Some(PixelPoint::new(
            self.image_width / 2.0 + f * p.x / p.z,
            self.image_height / 2.0 + f * p.y / p.z,
        ))
    }

    /// Distance in pixels by which a point falls outside the image.
    fn out_of_bounds_distance(&self, p: &PixelPoint) -> f64 {
        let du = (-p.u).max(p.u - self.image_width).max(0.0);
        let dv = (-p.v).max(p.v - self.image_height).max(0.0);
        (du * du + dv * dv).sqrt()
    }
}

/// Scoring parameters of the marker model.
#[derive(Debug, Clone, Copy)]
pub struct MarkerModelConfig {
    /// Mixture weight of the Gaussian reprojection term.
    pub z_hit: f64,
    /// Mixture weight of the uniform term over the image diagonal.
    pub z_rand: f64,
    /// Standard deviation of the reprojection error in pixels.
    pub sigma_hit: f64,
    /// Exponential decay applied per pixel that projected corners fall
    /// outside the image bounds.
    pub landa: f64,
    /// Exponent applied to the particle's likelihood factor when fusing
    /// with other observation sources.
    pub coeff: f64,
}

impl Default for MarkerModelConfig {
    fn default() -> Self {
        Self {
            z_hit: 0.8,
            z_rand: 0.2,
            sigma_hit: 20.0,
            landa: 0.01,
            coeff: 1.0,
        }
    }
}

/// Fiducial marker observation model bound to a visual map and a rig.
#[derive(Debug, Clone)]
pub struct MarkerModel {
    config: MarkerModelConfig,
    map: Vec<FiducialMarker>,
    rig: CameraRig,
}

impl MarkerModel {
    pub fn new(config: MarkerModelConfig, map: Vec<FiducialMarker>, rig: CameraRig) -> Self {
        Self { config, map, rig }
    }

    pub fn config(&self) -> &MarkerModelConfig {
        &self.config
    }

    pub fn rig(&self) -> &CameraRig {
        &self.rig
    }

    pub fn visual_map(&self) -> &[FiducialMarker] {
        &self.map
    }

    fn find_marker(&self, id: u32) -> Option<&FiducialMarker> {
        self.map.iter().find(|m| m.id == id)
    }

    /// World → base transform for a planar pose (z = 0, yaw only).
    fn base_from_world(pose: &Pose2D) -> Isometry3<f64> {
        let base_in_world = Isometry3::from_parts(
            Translation3::new(pose.x, pose.y, 0.0),
            UnitQuaternion::from_euler_angles(0.0, 0.0, pose.theta),
        );
        base_in_world.inverse()
    }

    /// Likelihood factor of one detection for one particle.
    ///
    /// Returns 1 (uninformative) when the marker is unknown, the camera
    /// index is out of range, or any corner projects behind the camera.
    fn detection_likelihood(&self, pose: &Pose2D, obs: &MarkerObservation) -> f64 {
        let Some(fiducial) = self.find_marker(obs.id) else {
            return 1.0;
        };
        let Some(extrinsic) = self.rig.base_to_camera.get(obs.camera) else {
            log::warn!(
                "detection of marker {} names camera {} but the rig has {}",
                obs.id,
                obs.camera,
                self.rig.num_cameras()
            );
            return 1.0;
        };

        let cam_from_world = extrinsic * Self::base_from_world(pose);

        let mut err_sum = 0.0;
        let mut oob_sum = 0.0;
        for (corner, detected) in fiducial.corners.iter().zip(obs.corners.iter()) {
            let in_cam = cam_from_world * corner;
            let Some(pixel) = self.rig.project(&in_cam.coords) else {
                return 1.0;
            };
            err_sum += pixel.distance(detected);
            oob_sum += self.rig.out_of_bounds_distance(&pixel);
        }
        let err = err_sum / 4.0;
        let oob = oob_sum / 4.0;

        let c = &self.config;
        let p = c.z_hit * gaussian_pdf(err, c.sigma_hit) + c.z_rand / self.rig.image_diagonal();
        p * (-c.landa * oob).exp()
    }

    /// Reweight every particle for this detection set; returns the total
    /// weight.
    pub fn reweight(&self, samples: &mut [Particle], observations: &[MarkerObservation]) -> f64 {
        let mut total = 0.0;
        for s in samples.iter_mut() {
            let mut factor = 1.0;
            for obs in observations {
                factor *= self.detection_likelihood(&s.pose, obs);
            }
            s.weight *= factor.powf(self.config.coeff);
            total += s.weight;
        }
        total
    }

    /// Exact reprojection of a mapped marker from a given base pose, for
    /// diagnostics and tests. `None` when any corner is behind the
    /// camera.
    pub fn reproject(
        &self,
        pose: &Pose2D,
        marker_id: u32,
        camera: usize,
    ) -> Option<[PixelPoint; 4]> {
        let fiducial = self.find_marker(marker_id)?;
        let extrinsic = self.rig.base_to_camera.get(camera)?;
        let cam_from_world = extrinsic * Self::base_from_world(pose);

        let mut out = [PixelPoint::new(0.0, 0.0); 4];
        for (i, corner) in fiducial.corners.iter().enumerate() {
            out[i] = self.rig.project(&(cam_from_world * corner).coords)?;
        }
        Some(out)
    }
}
