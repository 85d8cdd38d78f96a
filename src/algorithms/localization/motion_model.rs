//! Odometry motion models for the particle filter.
//!
//! Each model consumes the measured odometric step between two wheel
//! odometry readings and perturbs every particle's pose in place with
//! noise scaled by the alpha parameters. Weights are untouched.
//!
//! The differential models decompose the step into rotation, translation,
//! rotation. The naive variant uses the raw decomposition and passes the
//! variance-shaped noise expressions straight to the sampler (source
//! convention); the corrected variant zeroes the interleaved heading when
//! the translation is too small to observe it, measures rotation noise
//! symmetrically for forward and backward motion, and samples with
//! unit-scaled spreads.
//!
//! The omnidirectional models decompose the step into a translation along
//! a body-frame direction plus a heading change; the corrected variant
//! adds lateral strafe drift proportional to the translation.

use rand::Rng;
use rand_distr::StandardNormal;

use crate::core::math::{angle_diff, normalize_angle};
use crate::core::types::Pose2D;

use super::particle_filter::Particle;

/// Which odometry kernel perturbs the particles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OdomModel {
    Diff,
    DiffCorrected,
    Omni,
    OmniCorrected,
}

impl OdomModel {
    /// Parse the configuration tag; unknown tags fall back to `Diff`
    /// with a warning, mirroring the parameter handling of the node.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "diff" => OdomModel::Diff,
            "diff-corrected" => OdomModel::DiffCorrected,
            "omni" => OdomModel::Omni,
            "omni-corrected" => OdomModel::OmniCorrected,
            other => {
                log::warn!("unknown odom model type {:?}; defaulting to diff", other);
                OdomModel::Diff
            }
        }
    }
}

/// Noise configuration for the odometry models.
///
/// - `alpha1`: rotation noise from rotation
/// - `alpha2`: rotation noise from translation
/// - `alpha3`: translation noise from translation
/// - `alpha4`: translation noise from rotation
/// - `alpha5`: strafe noise from translation (omni models only)
#[derive(Debug, Clone, Copy)]
pub struct MotionModelConfig {
    pub model: OdomModel,
    pub alpha1: f64,
    pub alpha2: f64,
    pub alpha3: f64,
    pub alpha4: f64,
    pub alpha5: f64,
}

impl Default for MotionModelConfig {
    fn default() -> Self {
        Self {
            model: OdomModel::Diff,
            alpha1: 0.2,
            alpha2: 0.2,
            alpha3: 0.2,
            alpha4: 0.2,
            alpha5: 0.2,
        }
    }
}

/// One odometric step: the new odometry pose and the delta since the last
/// filter update.
#[derive(Debug, Clone, Copy)]
pub struct OdomData {
    /// Robot pose in the odom frame at the observation time
    pub pose: Pose2D,
    /// Pose change since the last filter update (Δyaw already wrapped)
    pub delta: Pose2D,
}

/// Family of pose-perturbation kernels keyed by [`OdomModel`].
#[derive(Debug, Clone)]
pub struct MotionModel {
    config: MotionModelConfig,
}

impl MotionModel {
    pub fn new(config: MotionModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MotionModelConfig {
        &self.config
    }

    /// Apply the configured kernel to every particle.
    pub fn update<R: Rng>(&self, samples: &mut [Particle], data: &OdomData, rng: &mut R) {
        // Degenerate step: there is no motion to integrate and nothing
        // to scale noise by
        if data.delta.x.abs() < 1e-6
            && data.delta.y.abs() < 1e-6
            && data.delta.theta.abs() < 1e-6
        {
            return;
        }
        match self.config.model {
            OdomModel::Diff => self.update_diff(samples, data, rng, false),
            OdomModel::DiffCorrected => self.update_diff(samples, data, rng, true),
            OdomModel::Omni => self.update_omni(samples, data, rng, false),
            OdomModel::OmniCorrected => self.update_omni(samples, data, rng, true),
        }
    }

    fn update_diff<R: Rng>(
        &self,
        samples: &mut [Particle],
        data: &OdomData,
        rng: &mut R,
        corrected: bool,
    ) {
        let a = &self.config;
        let old_yaw = normalize_angle(data.pose.theta - data.delta.theta);
        let trans = (data.delta.x * data.delta.x + data.delta.y * data.delta.y).sqrt();

        // The corrected variant treats the interleaved heading as
        // unobservable for tiny translations; the naive one keeps the
        // raw decomposition
        let raw_rot1 = angle_diff(data.delta.y.atan2(data.delta.x), old_yaw);
        let rot1 = if corrected && trans < 0.01 {
            0.0
        } else {
            raw_rot1
        };
        let rot2 = angle_diff(data.delta.theta, rot1);

        // The corrected variant measures rotation noise symmetrically so
        // driving backward is not penalized as a half-turn
        let (rot1_mag, rot2_mag) = if corrected {
            (
                angle_diff(rot1, 0.0)
                    .abs()
                    .min(angle_diff(rot1, std::f64::consts::PI).abs()),
                angle_diff(rot2, 0.0)
                    .abs()
                    .min(angle_diff(rot2, std::f64::consts::PI).abs()),
            )
        } else {
            (rot1.abs(), rot2.abs())
        };

        let scale = |v: f64| if corrected { v.sqrt() } else { v };
        let rot1_sigma = scale(a.alpha1 * rot1_mag * rot1_mag + a.alpha2 * trans * trans);
        let trans_sigma = scale(
            a.alpha3 * trans * trans
                + a.alpha4 * rot1_mag * rot1_mag
                + a.alpha4 * rot2_mag * rot2_mag,
        );
        let rot2_sigma = scale(a.alpha1 * rot2_mag * rot2_mag + a.alpha2 * trans * trans);

        for s in samples {
            let rot1_hat = angle_diff(rot1, gaussian(rng, rot1_sigma));
            let trans_hat = trans - gaussian(rng, trans_sigma);
            let rot2_hat = angle_diff(rot2, gaussian(rng, rot2_sigma));

            let heading = s.pose.theta + rot1_hat;
            s.pose.x += trans_hat * heading.cos();
            s.pose.y += trans_hat * heading.sin();
            s.pose.theta = normalize_angle(s.pose.theta + rot1_hat + rot2_hat);
        }
    }

    fn update_omni<R: Rng>(
        &self,
        samples: &mut [Particle],
        data: &OdomData,
        rng: &mut R,
        corrected: bool,
    ) {
        let a = &self.config;
        let old_yaw = normalize_angle(data.pose.theta - data.delta.theta);
        let trans = (data.delta.x * data.delta.x + data.delta.y * data.delta.y).sqrt();
        let dyaw = data.delta.theta;
        // Displacement direction in the robot body frame
        let heading = angle_diff(data.delta.y.atan2(data.delta.x), old_yaw);

        let trans_sigma = a.alpha3 * trans + a.alpha4 * dyaw.abs();
        let dir_sigma = a.alpha1;
        let yaw_sigma = a.alpha2 * dyaw.abs() + a.alpha5 * trans;
        // Lateral drift orthogonal to the travel direction, corrected
        // variant only
        let strafe_sigma = if corrected { a.alpha5 * trans } else { 0.0 };

        for s in samples {
            let dir_hat = normalize_angle(heading + gaussian(rng, dir_sigma));
            let bearing = normalize_angle(s.pose.theta + dir_hat);
            let (sin_b, cos_b) = bearing.sin_cos();

            let trans_hat = trans + gaussian(rng, trans_sigma);
            let yaw_hat = dyaw + gaussian(rng, yaw_sigma);
            let strafe_hat = gaussian(rng, strafe_sigma);

            s.pose.x += trans_hat * cos_b + strafe_hat * sin_b;
            s.pose.y += trans_hat * sin_b - strafe_hat * cos_b;
            s.pose.theta = normalize_angle(s.pose.theta + yaw_hat);
        }
    }
}

/// Zero-mean Gaussian draw with the given scale; zero scale draws nothing.
fn gaussian<R: Rng>(rng: &mut R, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return 0.0;
    }
    rng.sample::<f64, _>(StandardNormal) * sigma
}
