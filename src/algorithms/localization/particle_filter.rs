//! Adaptive particle filter (KLD-sampling Monte Carlo Localization).
//!
//! Two sample sets are kept and alternated: resampling reads the current
//! set and writes the scratch set, then flips. The scratch set's KD-tree
//! doubles as the KLD histogram, so the new set grows only until the
//! Kullback-Leibler bound for its current bucket count is met.
//!
//! Recovery from localization failure follows Augmented MCL: slow and fast
//! running averages of the mean particle weight control the fraction of
//! samples replaced by uniformly drawn poses.

use log::warn;
use nalgebra::{Matrix3, Vector3};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::core::math::normalize_angle;
use crate::core::types::{Covariance3, Pose2D};
use crate::error::{AmclError, Result};

use super::kdtree::KdTree;
use super::motion_model::{MotionModel, OdomData};

/// A single pose hypothesis with importance weight.
#[derive(Debug, Clone, Copy)]
pub struct Particle {
    pub pose: Pose2D,
    pub weight: f64,
}

/// One mode of the particle distribution.
#[derive(Debug, Clone)]
pub struct Hypothesis {
    /// Total weight of the cluster (weights sum to 1 over the set)
    pub weight: f64,
    /// Weighted mean pose, yaw by circular mean
    pub mean: Pose2D,
    /// 3x3 pose covariance
    pub covariance: Covariance3,
}

/// Configuration for the adaptive particle filter.
#[derive(Debug, Clone, Copy)]
pub struct ParticleFilterConfig {
    /// Lower bound on the adaptive sample count.
    pub min_particles: usize,
    /// Upper bound on the adaptive sample count.
    pub max_particles: usize,
    /// KLD bound error (pop_err). Typical: 0.01.
    pub kld_err: f64,
    /// KLD bound quantile (pop_z). Typical: 0.99.
    pub kld_z: f64,
    /// Decay rate of the slow weight average. Typical: 0.001.
    pub alpha_slow: f64,
    /// Decay rate of the fast weight average. Typical: 0.1.
    pub alpha_fast: f64,
    /// Histogram bucket size along x in meters.
    pub bucket_x: f64,
    /// Histogram bucket size along y in meters.
    pub bucket_y: f64,
    /// Histogram bucket size along yaw in radians.
    pub bucket_yaw: f64,
}

impl Default for ParticleFilterConfig {
    fn default() -> Self {
        Self {
            min_particles: 100,
            max_particles: 5000,
            kld_err: 0.01,
            kld_z: 0.99,
            alpha_slow: 0.001,
            alpha_fast: 0.1,
            bucket_x: 0.5,
            bucket_y: 0.5,
            bucket_yaw: 10.0_f64.to_radians(),
        }
    }
}

#[derive(Debug)]
struct SampleSet {
    samples: Vec<Particle>,
    kdtree: KdTree,
    clusters: Vec<Hypothesis>,
    mean: Pose2D,
    covariance: Covariance3,
}

impl SampleSet {
    fn new(config: &ParticleFilterConfig) -> Self {
        Self {
            samples: Vec::with_capacity(config.max_particles),
            kdtree: KdTree::new(config.bucket_x, config.bucket_y, config.bucket_yaw),
            clusters: Vec::new(),
            mean: Pose2D::identity(),
            covariance: Covariance3::zeros(),
        }
    }
}

/// Adaptive Monte Carlo particle filter.
#[derive(Debug)]
pub struct ParticleFilter {
    config: ParticleFilterConfig,
    sets: [SampleSet; 2],
    current: usize,
    w_slow: f64,
    w_fast: f64,
}

impl ParticleFilter {
    pub fn new(config: ParticleFilterConfig) -> Self {
        Self {
            sets: [SampleSet::new(&config), SampleSet::new(&config)],
            config,
            current: 0,
            w_slow: 0.0,
            w_fast: 0.0,
        }
    }

    pub fn config(&self) -> &ParticleFilterConfig {
        &self.config
    }

    /// Current samples.
    pub fn particles(&self) -> &[Particle] {
        &self.sets[self.current].samples
    }

    pub fn sample_count(&self) -> usize {
        self.sets[self.current].samples.len()
    }

    /// Whole-set weighted mean pose (valid after cluster statistics).
    pub fn set_mean(&self) -> Pose2D {
        self.sets[self.current].mean
    }

    /// Whole-set covariance (valid after cluster statistics).
    pub fn set_covariance(&self) -> Covariance3 {
        self.sets[self.current].covariance
    }

    /// Slow and fast running weight averages.
    pub fn recovery_averages(&self) -> (f64, f64) {
        (self.w_slow, self.w_fast)
    }

    /// Overwrite the recovery averages (diagnostics and tests).
    pub fn set_recovery_averages(&mut self, slow: f64, fast: f64) {
        self.w_slow = slow;
        self.w_fast = fast;
    }

    /// Initialize from a Gaussian with the given mean and covariance,
    /// sized to `min_particles`.
    pub fn init_gaussian<R: Rng>(&mut self, mean: &Pose2D, cov: &Covariance3, rng: &mut R) {
        let n = self.config.min_particles;
        let sampler = GaussianPoseSampler::new(mean, cov);
        let set = &mut self.sets[self.current];

        set.samples.clear();
        set.kdtree.clear();
        let w = 1.0 / n as f64;
        for _ in 0..n {
            let pose = sampler.sample(rng);
            set.samples.push(Particle { pose, weight: w });
            set.kdtree.insert(&pose, w);
        }
        self.w_slow = 0.0;
        self.w_fast = 0.0;
        // Statistics over a freshly built set cannot fail
        let _ = self.cluster_stats();
    }

    /// Initialize from an arbitrary pose sampler (typically uniform over
    /// free map cells), sized to `max_particles`.
    pub fn init_from_fn<R: Rng, F: FnMut(&mut R) -> Pose2D>(&mut self, rng: &mut R, mut sampler: F) {
        let n = self.config.max_particles;
        let set = &mut self.sets[self.current];

        set.samples.clear();
        set.kdtree.clear();
        let w = 1.0 / n as f64;
        for _ in 0..n {
            let pose = sampler(rng);
            set.samples.push(Particle { pose, weight: w });
            set.kdtree.insert(&pose, w);
        }
        self.w_slow = 0.0;
        self.w_fast = 0.0;
        let _ = self.cluster_stats();
    }

    /// Perturb every particle with the motion model for the measured
    /// odometric step. Weights are untouched.
    pub fn update_motion<R: Rng>(&mut self, model: &MotionModel, data: &OdomData, rng: &mut R) {
        model.update(&mut self.sets[self.current].samples, data, rng);
    }

    /// Apply an observation model. `reweight` multiplies each particle's
    /// weight by its likelihood and returns the resulting total weight.
    /// Weights are then normalized and the recovery averages updated.
    pub fn update_sensor<F>(&mut self, reweight: F)
    where
        F: FnOnce(&mut [Particle]) -> f64,
    {
        let set = &mut self.sets[self.current];
        let total = reweight(&mut set.samples);
        let n = set.samples.len();

        if total > 0.0 {
            for s in &mut set.samples {
                s.weight /= total;
            }
            let w_avg = total / n as f64;
            self.w_slow += self.config.alpha_slow * (w_avg - self.w_slow);
            self.w_fast += self.config.alpha_fast * (w_avg - self.w_fast);
        } else {
            warn!("observation drove all particle weights to zero");
            let w = 1.0 / n as f64;
            for s in &mut set.samples {
                s.weight = w;
            }
        }
    }

    /// KLD-adaptive low-variance resampling with recovery injection.
    ///
    /// `uniform` draws a random pose for recovery injection; when it
    /// returns `None` (degenerate map) the systematic draw is used
    /// instead.
    pub fn resample<R, F>(&mut self, rng: &mut R, mut uniform: F)
    where
        R: Rng,
        F: FnMut(&mut R) -> Option<Pose2D>,
    {
        let config = self.config;
        let w_diff = if self.w_slow > 0.0 {
            (1.0 - self.w_fast / self.w_slow).max(0.0)
        } else {
            0.0
        };

        let (a, b) = if self.current == 0 {
            let (x, y) = self.sets.split_at_mut(1);
            (&x[0], &mut y[0])
        } else {
            let (x, y) = self.sets.split_at_mut(1);
            (&y[0], &mut x[0])
        };

        let n_a = a.samples.len();
        debug_assert!(n_a > 0, "resampling an empty sample set");

        // Cumulative weight ladder over the current set
        let mut cum = Vec::with_capacity(n_a + 1);
        cum.push(0.0);
        let mut acc = 0.0;
        for s in &a.samples {
            acc += s.weight;
            cum.push(acc);
        }
        // Guard against normalization drift
        cum[n_a] = cum[n_a].max(1.0);

        b.samples.clear();
        b.kdtree.clear();

        let step = 1.0 / n_a as f64;
        let mut u = rng.gen_range(0.0..step);
        let mut i = 0usize;

        loop {
            let pose = if rng.gen::<f64>() < w_diff {
                match uniform(rng) {
                    Some(p) => p,
                    None => Self::systematic_draw(&a.samples, &cum, &mut u, &mut i, step),
                }
            } else {
                Self::systematic_draw(&a.samples, &cum, &mut u, &mut i, step)
            };

            b.samples.push(Particle { pose, weight: 1.0 });
            b.kdtree.insert(&pose, 1.0);

            let count = b.samples.len();
            if count >= config.max_particles {
                break;
            }
            if count >= Self::kld_limit(&config, b.kdtree.leaf_count()) {
                break;
            }
        }

        let w = 1.0 / b.samples.len() as f64;
        for s in &mut b.samples {
            s.weight = w;
        }

        // A triggered recovery resets the averages so injection does not
        // persist once the filter re-converges
        if w_diff > 0.0 {
            self.w_slow = 0.0;
            self.w_fast = 0.0;
        }

        self.current = 1 - self.current;
        let _ = self.cluster_stats();
    }

    fn systematic_draw(
        samples: &[Particle],
        cum: &[f64],
        u: &mut f64,
        i: &mut usize,
        step: f64,
    ) -> Pose2D {
        while *i + 1 < samples.len() && *u > cum[*i + 1] {
            *i += 1;
        }
        let pose = samples[*i].pose;
        *u += step;
        if *u >= 1.0 {
            *u -= 1.0;
            *i = 0;
        }
        pose
    }

    /// KLD bound on the number of samples required for `k` occupied
    /// histogram buckets (Fox 2001), clamped to the configured range.
    fn kld_limit(config: &ParticleFilterConfig, k: usize) -> usize {
        if k <= 1 {
            return config.min_particles;
        }
        let k = k as f64;
        let b = 2.0 / (9.0 * (k - 1.0));
        let x = 1.0 - b + b.sqrt() * config.kld_z;
        let n = ((k - 1.0) / (2.0 * config.kld_err) * x * x * x).ceil() as usize;
        n.clamp(config.min_particles, config.max_particles)
    }

    /// Recompute cluster and whole-set statistics for the current set.
    pub fn cluster_stats(&mut self) -> Result<()> {
        let set = &mut self.sets[self.current];
        let cluster_count = set.kdtree.cluster();

        // Per-cluster and whole-set accumulators:
        // weight, Σw·x, Σw·y, Σw·cosθ, Σw·sinθ, and second moments
        #[derive(Clone)]
        struct Acc {
            weight: f64,
            m: [f64; 4],
            c: [f64; 4],
        }
        let zero = Acc {
            weight: 0.0,
            m: [0.0; 4],
            c: [0.0; 4],
        };
        let mut clusters = vec![zero.clone(); cluster_count];
        let mut overall = zero;

        for s in &set.samples {
            let cid = set.kdtree.get_cluster(&s.pose).ok_or_else(|| {
                AmclError::Filter("sample fell outside the cluster histogram".into())
            })?;

            for acc in [&mut clusters[cid], &mut overall] {
                acc.weight += s.weight;
                acc.m[0] += s.weight * s.pose.x;
                acc.m[1] += s.weight * s.pose.y;
                acc.m[2] += s.weight * s.pose.theta.cos();
                acc.m[3] += s.weight * s.pose.theta.sin();
                acc.c[0] += s.weight * s.pose.x * s.pose.x;
                acc.c[1] += s.weight * s.pose.x * s.pose.y;
                acc.c[2] += s.weight * s.pose.y * s.pose.x;
                acc.c[3] += s.weight * s.pose.y * s.pose.y;
            }
        }

        let finish = |acc: &Acc| -> Hypothesis {
            let w = acc.weight;
            if w <= 0.0 {
                return Hypothesis {
                    weight: 0.0,
                    mean: Pose2D::identity(),
                    covariance: Covariance3::zeros(),
                };
            }
            let mean = Pose2D::new(acc.m[0] / w, acc.m[1] / w, acc.m[3].atan2(acc.m[2]));
            let mut cov = Covariance3::zeros();
            cov.set(0, 0, acc.c[0] / w - mean.x * mean.x);
            cov.set(0, 1, acc.c[1] / w - mean.x * mean.y);
            cov.set(1, 0, acc.c[2] / w - mean.y * mean.x);
            cov.set(1, 1, acc.c[3] / w - mean.y * mean.y);
            // Circular variance of yaw
            let r = ((acc.m[2] / w).powi(2) + (acc.m[3] / w).powi(2))
                .sqrt()
                .clamp(f64::MIN_POSITIVE, 1.0);
            cov.set(2, 2, -2.0 * r.ln());
            Hypothesis {
                weight: w,
                mean,
                covariance: cov,
            }
        };

        set.clusters = clusters.iter().map(&finish).collect();
        let overall = finish(&overall);
        set.mean = overall.mean;
        set.covariance = overall.covariance;
        Ok(())
    }

    /// All cluster hypotheses of the current set.
    pub fn hypotheses(&self) -> &[Hypothesis] {
        &self.sets[self.current].clusters
    }

    /// The cluster with the largest total weight; ties prefer the lower
    /// cluster id. `None` when no cluster has positive weight.
    pub fn best_hypothesis(&self) -> Option<&Hypothesis> {
        let mut best: Option<&Hypothesis> = None;
        for h in &self.sets[self.current].clusters {
            if h.weight <= 0.0 {
                continue;
            }
            match best {
                Some(b) if h.weight <= b.weight => {}
                _ => best = Some(h),
            }
        }
        best
    }
}

/// Draws poses from a 3-D Gaussian, using the full covariance when it
/// admits a Cholesky factor and the diagonal otherwise.
struct GaussianPoseSampler {
    mean: Pose2D,
    chol: Option<Matrix3<f64>>,
    diag_sigma: [f64; 3],
}

impl GaussianPoseSampler {
    fn new(mean: &Pose2D, cov: &Covariance3) -> Self {
        let m = Matrix3::from_fn(|i, j| cov.get(i, j));
        let chol = m.cholesky().map(|c| c.l());
        let diag_sigma = [
            cov.var_x().max(0.0).sqrt(),
            cov.var_y().max(0.0).sqrt(),
            cov.var_theta().max(0.0).sqrt(),
        ];
        Self {
            mean: *mean,
            chol,
            diag_sigma,
        }
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> Pose2D {
        let z = Vector3::new(
            rng.sample::<f64, _>(StandardNormal),
            rng.sample::<f64, _>(StandardNormal),
            rng.sample::<f64, _>(StandardNormal),
        );
        let d = match &self.chol {
            Some(l) => l * z,
            None => Vector3::new(
                z[0] * self.diag_sigma[0],
                z[1] * self.diag_sigma[1],
                z[2] * self.diag_sigma[2],
            ),
        };
        Pose2D::new(
            self.mean.x + d[0],
            self.mean.y + d[1],
            normalize_angle(self.mean.theta + d[2]),
        )
    }
}
