//! Laser observation models against the occupancy map.
//!
//! The default likelihood-field model scores each beam endpoint by its
//! distance to the nearest occupied cell; the probabilistic variant can
//! additionally skip beams that disagree with most particles (dynamic
//! obstacles). A classic ray-cast beam model is available as well.
//!
//! Per-particle aggregation is a running product seeded at 1 to which the
//! cube of every beam likelihood is added. This is not a probability, but
//! it is the source's convention: it softens uniformly poor particles
//! while emphasizing strong single-beam agreement, and is preserved here
//! for parity.

use std::sync::Arc;

use crate::core::math::gaussian_pdf;
use crate::core::types::Pose2D;

use super::particle_filter::Particle;
use crate::algorithms::mapping::OccupancyMap;

/// Which range model scores the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaserModelKind {
    Beam,
    LikelihoodField,
    LikelihoodFieldProb,
}

impl LaserModelKind {
    /// Parse the configuration tag; unknown tags fall back to the
    /// likelihood field with a warning.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "beam" => LaserModelKind::Beam,
            "likelihood_field" => LaserModelKind::LikelihoodField,
            "likelihood_field_prob" => LaserModelKind::LikelihoodFieldProb,
            other => {
                log::warn!(
                    "unknown laser model type {:?}; defaulting to likelihood_field",
                    other
                );
                LaserModelKind::LikelihoodField
            }
        }
    }
}

/// Range-model parameters.
#[derive(Debug, Clone, Copy)]
pub struct LaserModelConfig {
    pub kind: LaserModelKind,
    /// Mixture weight of the Gaussian hit term. Typical: 0.95.
    pub z_hit: f64,
    /// Mixture weight of unexpected-obstacle returns (beam model).
    pub z_short: f64,
    /// Mixture weight of max-range returns (beam model).
    pub z_max: f64,
    /// Mixture weight of uniform random returns. Typical: 0.05.
    pub z_rand: f64,
    /// Standard deviation of the hit term in meters. Typical: 0.2.
    pub sigma_hit: f64,
    /// Decay of the short-return exponential (beam model).
    pub lambda_short: f64,
    /// Upper bound on scored beams; scans are subsampled uniformly.
    pub max_beams: usize,
    /// Enable beam skipping (likelihood_field_prob only).
    pub do_beamskip: bool,
    /// A particle "disagrees" with a beam beyond this distance (meters).
    pub beam_skip_distance: f64,
    /// Skip a beam when more than this fraction of particles disagree.
    pub beam_skip_threshold: f64,
    /// Fall back to full scoring when more than this fraction of beams
    /// would be skipped.
    pub beam_skip_error_threshold: f64,
    /// Exponent applied to the particle's likelihood factor when fusing
    /// with other observation sources.
    pub coeff: f64,
}

impl Default for LaserModelConfig {
    fn default() -> Self {
        Self {
            kind: LaserModelKind::LikelihoodField,
            z_hit: 0.95,
            z_short: 0.1,
            z_max: 0.05,
            z_rand: 0.05,
            sigma_hit: 0.2,
            lambda_short: 0.1,
            max_beams: 30,
            do_beamskip: false,
            beam_skip_distance: 0.5,
            beam_skip_threshold: 0.3,
            beam_skip_error_threshold: 0.9,
            coeff: 1.0,
        }
    }
}

/// One beam: measured range and bearing in the base frame.
#[derive(Debug, Clone, Copy)]
pub struct Beam {
    pub range: f64,
    pub bearing: f64,
}

/// A preprocessed scan ready for scoring.
#[derive(Debug, Clone)]
pub struct BeamData {
    pub beams: Vec<Beam>,
    pub range_max: f64,
}

/// Laser observation model bound to a map.
#[derive(Debug, Clone)]
pub struct LaserModel {
    config: LaserModelConfig,
    map: Arc<OccupancyMap>,
    /// Pose of the laser relative to the robot base
    laser_pose: Pose2D,
}

impl LaserModel {
    pub fn new(config: LaserModelConfig, map: Arc<OccupancyMap>) -> Self {
        Self {
            config,
            map,
            laser_pose: Pose2D::identity(),
        }
    }

    pub fn config(&self) -> &LaserModelConfig {
        &self.config
    }

    /// Set the mounting pose of the laser relative to the base.
    pub fn set_laser_pose(&mut self, pose: Pose2D) {
        self.laser_pose = pose;
    }

    pub fn laser_pose(&self) -> Pose2D {
        self.laser_pose
    }

    /// Reweight every particle for this scan; returns the total weight.
    pub fn reweight(&self, samples: &mut [Particle], data: &BeamData) -> f64 {
        match self.config.kind {
            LaserModelKind::Beam => self.reweight_beam(samples, data),
            LaserModelKind::LikelihoodField => {
                self.reweight_likelihood_field(samples, data, None)
            }
            LaserModelKind::LikelihoodFieldProb => {
                if self.config.do_beamskip {
                    self.reweight_with_beamskip(samples, data)
                } else {
                    self.reweight_likelihood_field(samples, data, None)
                }
            }
        }
    }

    /// Indices of the uniformly subsampled beams.
    fn selected_beams(&self, data: &BeamData) -> Vec<usize> {
        let n = data.beams.len();
        if n == 0 {
            return Vec::new();
        }
        let step = if self.config.max_beams >= 2 && n > self.config.max_beams {
            ((n - 1) / (self.config.max_beams - 1)).max(1)
        } else {
            1
        };
        (0..n).step_by(step).collect()
    }

    /// Likelihood-field distance for one beam endpoint seen from a world
    /// laser pose.
    fn endpoint_dist(&self, laser_world: &Pose2D, beam: &Beam) -> f64 {
        let angle = laser_world.theta + beam.bearing;
        let hx = laser_world.x + beam.range * angle.cos();
        let hy = laser_world.y + beam.range * angle.sin();
        self.map.occ_dist_at_world(hx, hy)
    }

    fn reweight_likelihood_field(
        &self,
        samples: &mut [Particle],
        data: &BeamData,
        skip: Option<&[bool]>,
    ) -> f64 {
        let c = &self.config;
        let selected = self.selected_beams(data);
        let z_rand_term = if data.range_max > 0.0 {
            c.z_rand / data.range_max
        } else {
            0.0
        };

        let mut total = 0.0;
        for s in samples.iter_mut() {
            // Off-map particles cannot explain any range reading
            let (ci, cj) = self.map.world_to_cell(s.pose.x, s.pose.y);
            if !self.map.is_valid(ci, cj) {
                s.weight = 0.0;
                continue;
            }

            let laser_world = s.pose.compose(&self.laser_pose);
            let mut p = 1.0;
            for (slot, &bi) in selected.iter().enumerate() {
                if skip.map_or(false, |m| m[slot]) {
                    continue;
                }
                let beam = data.beams[bi];
                if beam.range.is_nan() {
                    continue;
                }
                let pz = if beam.range >= data.range_max {
                    z_rand_term
                } else {
                    let dist = self.endpoint_dist(&laser_world, &beam);
                    c.z_hit * gaussian_pdf(dist, c.sigma_hit) + z_rand_term
                };
                p += pz * pz * pz;
            }
            s.weight *= p.powf(c.coeff);
            total += s.weight;
        }
        total
    }

    /// Beam-skipping variant: a beam is dropped when most particles put
    /// its endpoint far from any obstacle, unless that would drop too
    /// much of the scan.
    fn reweight_with_beamskip(&self, samples: &mut [Particle], data: &BeamData) -> f64 {
        let c = &self.config;
        let selected = self.selected_beams(data);

        let mut far_counts = vec![0usize; selected.len()];
        let mut considered = 0usize;
        for s in samples.iter() {
            let (ci, cj) = self.map.world_to_cell(s.pose.x, s.pose.y);
            if !self.map.is_valid(ci, cj) {
                continue;
            }
            considered += 1;
            let laser_world = s.pose.compose(&self.laser_pose);
            for (slot, &bi) in selected.iter().enumerate() {
                let beam = data.beams[bi];
                if beam.range.is_nan() || beam.range >= data.range_max {
                    continue;
                }
                if self.endpoint_dist(&laser_world, &beam) > c.beam_skip_distance {
                    far_counts[slot] += 1;
                }
            }
        }

        let skip: Vec<bool> = if considered == 0 {
            vec![false; selected.len()]
        } else {
            far_counts
                .iter()
                .map(|&far| far as f64 / considered as f64 > c.beam_skip_threshold)
                .collect()
        };

        let skipped = skip.iter().filter(|&&s| s).count();
        let skip = if !selected.is_empty()
            && skipped as f64 / selected.len() as f64 > c.beam_skip_error_threshold
        {
            log::warn!(
                "beam skip dropped {}/{} beams; falling back to full scoring",
                skipped,
                selected.len()
            );
            None
        } else {
            Some(skip)
        };

        self.reweight_likelihood_field(samples, data, skip.as_deref())
    }

    /// Classic ray-cast mixture model.
    fn reweight_beam(&self, samples: &mut [Particle], data: &BeamData) -> f64 {
        let c = &self.config;
        let selected = self.selected_beams(data);
        let denom = 2.0 * c.sigma_hit * c.sigma_hit;

        let mut total = 0.0;
        for s in samples.iter_mut() {
            let (ci, cj) = self.map.world_to_cell(s.pose.x, s.pose.y);
            if !self.map.is_valid(ci, cj) {
                s.weight = 0.0;
                continue;
            }

            let laser_world = s.pose.compose(&self.laser_pose);
            let mut p = 1.0;
            for &bi in &selected {
                let beam = data.beams[bi];
                if beam.range.is_nan() {
                    continue;
                }
                let expected = self.map.calc_range(
                    laser_world.x,
                    laser_world.y,
                    laser_world.theta + beam.bearing,
                    data.range_max,
                );
                let z = beam.range - expected;

                let mut pz = c.z_hit * (-(z * z) / denom).exp();
                if z < 0.0 {
                    pz += c.z_short * c.lambda_short * (-c.lambda_short * beam.range).exp();
                }
                if beam.range >= data.range_max {
                    pz += c.z_max;
                }
                if beam.range < data.range_max {
                    pz += c.z_rand / data.range_max;
                }
                p += pz * pz * pz;
            }
            s.weight *= p.powf(c.coeff);
            total += s.weight;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::OccupancyGrid;

    /// 10x10 m bordered map at 0.1 m resolution.
    fn walled_map() -> Arc<OccupancyMap> {
        let (w, h) = (100usize, 100usize);
        let mut data = vec![0u8; w * h];
        for i in 0..w {
            data[i] = 100;
            data[(h - 1) * w + i] = 100;
        }
        for j in 0..h {
            data[j * w] = 100;
            data[j * w + (w - 1)] = 100;
        }
        Arc::new(OccupancyMap::from_grid(
            &OccupancyGrid {
                width: w,
                height: h,
                resolution: 0.1,
                origin: Pose2D::new(0.0, 0.0, 0.0),
                data,
            },
            2.0,
        ))
    }

    fn particle(x: f64, y: f64, theta: f64) -> Particle {
        Particle {
            pose: Pose2D::new(x, y, theta),
            weight: 1.0,
        }
    }

    /// A scan from (5, 5, 0): wall centers sit 4.9m away in the four
    /// cardinal directions.
    fn center_scan() -> BeamData {
        let beams = (0..4)
            .map(|i| Beam {
                range: 4.9,
                bearing: i as f64 * std::f64::consts::FRAC_PI_2,
            })
            .collect();
        BeamData {
            beams,
            range_max: 8.0,
        }
    }

    #[test]
    fn test_true_pose_outscores_wrong_pose() {
        let model = LaserModel::new(LaserModelConfig::default(), walled_map());
        let mut samples = vec![particle(5.0, 5.0, 0.0), particle(3.0, 4.0, 0.4)];
        let total = model.reweight(&mut samples, &center_scan());
        assert!(total > 0.0);
        assert!(
            samples[0].weight > samples[1].weight,
            "true pose {} must beat wrong pose {}",
            samples[0].weight,
            samples[1].weight
        );
    }

    #[test]
    fn test_off_map_particle_scores_zero() {
        let model = LaserModel::new(LaserModelConfig::default(), walled_map());
        let mut samples = vec![particle(5.0, 5.0, 0.0), particle(50.0, 50.0, 0.0)];
        model.reweight(&mut samples, &center_scan());
        assert!(samples[0].weight > 0.0);
        assert_eq!(samples[1].weight, 0.0);
    }

    #[test]
    fn test_max_range_beams_only_random_term() {
        let model = LaserModel::new(LaserModelConfig::default(), walled_map());
        let data = BeamData {
            beams: vec![Beam {
                range: 8.0,
                bearing: 0.0,
            }],
            range_max: 8.0,
        };
        let mut samples = vec![particle(5.0, 5.0, 0.0)];
        model.reweight(&mut samples, &data);
        let z_rand_term: f64 = 0.05 / 8.0;
        let expected = 1.0 + z_rand_term.powi(3);
        assert!((samples[0].weight - expected).abs() < 1e-12);
    }

    #[test]
    fn test_nan_ranges_skipped() {
        let model = LaserModel::new(LaserModelConfig::default(), walled_map());
        let data = BeamData {
            beams: vec![Beam {
                range: f64::NAN,
                bearing: 0.0,
            }],
            range_max: 8.0,
        };
        let mut samples = vec![particle(5.0, 5.0, 0.0)];
        model.reweight(&mut samples, &data);
        // Neutral factor: only the seed of the cubed sum remains
        assert!((samples[0].weight - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_laser_offset_shifts_endpoints() {
        let mut near = LaserModel::new(LaserModelConfig::default(), walled_map());
        near.set_laser_pose(Pose2D::new(0.2, 0.0, 0.0));
        let far = LaserModel::new(LaserModelConfig::default(), walled_map());

        // Beam that exactly reaches the east wall center from the laser
        // at (5.2, 5): range 4.7
        let data = BeamData {
            beams: vec![Beam {
                range: 4.7,
                bearing: 0.0,
            }],
            range_max: 8.0,
        };
        let mut with_offset = vec![particle(5.0, 5.0, 0.0)];
        let mut without = vec![particle(5.0, 5.0, 0.0)];
        near.reweight(&mut with_offset, &data);
        far.reweight(&mut without, &data);
        assert!(with_offset[0].weight > without[0].weight);
    }

    #[test]
    fn test_subsampling_caps_beam_count() {
        let model = LaserModel::new(
            LaserModelConfig {
                max_beams: 10,
                ..Default::default()
            },
            walled_map(),
        );
        let data = BeamData {
            beams: (0..360)
                .map(|i| Beam {
                    range: 5.0,
                    bearing: (i as f64).to_radians(),
                })
                .collect(),
            range_max: 8.0,
        };
        let selected = model.selected_beams(&data);
        assert!(selected.len() <= 11, "selected {}", selected.len());
    }

    #[test]
    fn test_beamskip_drops_disagreeing_beam() {
        let config = LaserModelConfig {
            kind: LaserModelKind::LikelihoodFieldProb,
            do_beamskip: true,
            beam_skip_distance: 0.5,
            beam_skip_threshold: 0.5,
            beam_skip_error_threshold: 0.9,
            ..Default::default()
        };
        let model = LaserModel::new(config, walled_map());

        // All particles agree the east wall is at 4.9m; a phantom beam
        // claims an obstacle at 2m where the map is empty
        let data = BeamData {
            beams: vec![
                Beam {
                    range: 4.9,
                    bearing: 0.0,
                },
                Beam {
                    range: 2.0,
                    bearing: 0.0,
                },
            ],
            range_max: 8.0,
        };
        let mut skipping = vec![particle(5.0, 5.0, 0.0); 10];
        model.reweight(&mut skipping, &data);

        let no_skip = LaserModel::new(
            LaserModelConfig {
                do_beamskip: false,
                ..model.config
            },
            walled_map(),
        );
        let mut full = vec![particle(5.0, 5.0, 0.0); 10];
        no_skip.reweight(&mut full, &data);

        // The skipped phantom no longer contributes its random-term
        // cube, so the factors must differ by exactly that much
        assert!(skipping[0].weight > 1.0);
        assert!(skipping[0].weight < full[0].weight);
        let z_rand_cube: f64 = (0.05_f64 / 8.0).powi(3);
        assert!((full[0].weight - skipping[0].weight - z_rand_cube).abs() < 1e-9);
    }

    #[test]
    fn test_beamskip_error_fallback() {
        let config = LaserModelConfig {
            kind: LaserModelKind::LikelihoodFieldProb,
            do_beamskip: true,
            beam_skip_distance: 0.01,
            beam_skip_threshold: 0.0,
            // Any skipping at all exceeds this, forcing fallback
            beam_skip_error_threshold: 0.0,
            ..Default::default()
        };
        let model = LaserModel::new(config, walled_map());
        let data = center_scan();

        let mut skipping = vec![particle(4.0, 4.0, 0.2); 5];
        model.reweight(&mut skipping, &data);

        let no_skip = LaserModel::new(
            LaserModelConfig {
                do_beamskip: false,
                ..model.config
            },
            walled_map(),
        );
        let mut full = vec![particle(4.0, 4.0, 0.2); 5];
        no_skip.reweight(&mut full, &data);

        assert!((skipping[0].weight - full[0].weight).abs() < 1e-12);
    }

    #[test]
    fn test_beam_model_prefers_true_pose() {
        let model = LaserModel::new(
            LaserModelConfig {
                kind: LaserModelKind::Beam,
                ..Default::default()
            },
            walled_map(),
        );
        let mut samples = vec![particle(5.0, 5.0, 0.0), particle(3.5, 4.2, 0.3)];
        let total = model.reweight(&mut samples, &center_scan());
        assert!(total > 0.0);
        assert!(samples[0].weight > samples[1].weight);
    }

    #[test]
    fn test_coeff_flattens_factors() {
        let sharp = LaserModel::new(LaserModelConfig::default(), walled_map());
        let flat = LaserModel::new(
            LaserModelConfig {
                coeff: 0.5,
                ..Default::default()
            },
            walled_map(),
        );
        let mut a = vec![particle(5.0, 5.0, 0.0), particle(3.0, 4.0, 0.4)];
        let mut b = a.clone();
        sharp.reweight(&mut a, &center_scan());
        flat.reweight(&mut b, &center_scan());
        let ratio_sharp = a[0].weight / a[1].weight;
        let ratio_flat = b[0].weight / b[1].weight;
        assert!(ratio_sharp > ratio_flat);
    }
}
