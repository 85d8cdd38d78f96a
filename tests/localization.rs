//! End-to-end localization scenarios.
//!
//! Seed scenarios over a synthetic 10x10 m arena:
//! - Gaussian initialization accuracy
//! - Pure odometry drift with zeroed noise
//! - Laser likelihood convergence from a uniform prior
//! - KLD adaptation after a collapsing observation
//! - Adaptive random injection after a weight-average drop
//! - Marker reprojection consistency through the driver
//!
//! Run with: `cargo test --test localization`

mod common;

use std::sync::Arc;

use common::{arena_grid, arena_map, synth_scan, test_config, FakeTf};
use dhruva_amcl::{
    Beam, BeamData, LaserModel, LaserModelConfig, MarkerDetectionSet, MarkerObservation,
    ParticleFilter, ParticleFilterConfig, Pose2D, UpdateDriver,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn weight_sum(filter: &ParticleFilter) -> f64 {
    filter.particles().iter().map(|p| p.weight).sum()
}

// ============================================================================
// Scenario 1: Single-Gaussian initialization, no motion
// ============================================================================

#[test]
fn test_gaussian_init_publishes_its_mean() {
    let tf = FakeTf::new();
    let mut config = test_config();
    config.filter.min_particles = 1000;
    config.initial_pose.x = 2.0;
    config.initial_pose.y = 3.0;
    config.initial_pose.a = 0.5;
    config.initial_pose.cov_xx = 0.01;
    config.initial_pose.cov_yy = 0.01;
    config.initial_pose.cov_aa = 0.01;

    let mut driver = UpdateDriver::new(config, tf.clone());
    driver.set_map(&arena_grid());

    // Statistics are available right after initialization
    let best = driver
        .filter()
        .expect("filter exists after map")
        .best_hypothesis()
        .expect("one cluster")
        .clone();
    assert!((best.mean.x - 2.0).abs() < 0.02, "x: {}", best.mean.x);
    assert!((best.mean.y - 3.0).abs() < 0.02, "y: {}", best.mean.y);
    assert!(
        (best.mean.theta - 0.5).abs() < 0.05,
        "yaw: {}",
        best.mean.theta
    );

    // A first scan cycle publishes the same belief
    tf.set_odom(Pose2D::identity());
    let map = arena_map();
    let scan = synth_scan(&map, &Pose2D::new(2.0, 3.0, 0.5), 24, 1_000);
    let out = driver.handle_laser_scan(&scan);
    let published = out.pose.expect("first cycle must publish");
    assert!((published.pose.x - 2.0).abs() < 0.02);
    assert!((published.pose.y - 3.0).abs() < 0.02);
    assert!((published.pose.theta - 0.5).abs() < 0.05);
    assert!(out.correction.is_some());
}

// ============================================================================
// Scenario 2: Pure odometry drift (differential model, zero noise)
// ============================================================================

#[test]
fn test_pure_odometry_drift_is_exact() {
    let tf = FakeTf::new();
    let mut config = test_config();
    config.filter.min_particles = 50;
    config.odom.alpha1 = 0.0;
    config.odom.alpha2 = 0.0;
    config.odom.alpha3 = 0.0;
    config.odom.alpha4 = 0.0;
    config.odom.alpha5 = 0.0;
    config.initial_pose.x = 2.0;
    config.initial_pose.y = 3.0;
    config.initial_pose.a = 0.0;
    config.initial_pose.cov_xx = 0.0;
    config.initial_pose.cov_yy = 0.0;
    config.initial_pose.cov_aa = 0.0;

    let mut driver = UpdateDriver::new(config, tf.clone());
    driver.set_map(&arena_grid());

    // The empty-detection camera path integrates motion without
    // reweighting: first cycle seeds the gate, second feeds delta (1,0,0)
    let empty = |ts| MarkerDetectionSet {
        frame_id: "camera".to_string(),
        timestamp_us: ts,
        markers: Vec::new(),
    };
    tf.set_odom(Pose2D::identity());
    driver.handle_marker_detections(&empty(1_000));

    tf.set_odom(Pose2D::new(1.0, 0.0, 0.0));
    driver.handle_marker_detections(&empty(2_000));

    for p in driver.particles() {
        assert!((p.pose.x - 3.0).abs() <= 1e-9, "x: {}", p.pose.x);
        assert!((p.pose.y - 3.0).abs() <= 1e-9, "y: {}", p.pose.y);
        assert!(p.pose.theta.abs() <= 1e-9, "yaw: {}", p.pose.theta);
    }
}

// ============================================================================
// Scenario 3: Laser likelihood convergence from a uniform prior
// ============================================================================

#[test]
fn test_laser_convergence_from_uniform() {
    common::init_logging();
    let tf = FakeTf::new();
    let config = test_config();
    let mut driver = UpdateDriver::new(config, tf.clone());
    driver.set_map(&arena_grid());
    driver.global_localization().expect("arena has free cells");

    let map = arena_map();
    let truth = Pose2D::new(5.0, 5.0, 0.0);
    tf.set_odom(truth);

    for i in 0..50u64 {
        driver.request_nomotion_update();
        let scan = synth_scan(&map, &truth, 36, (i + 1) * 100_000);
        driver.handle_laser_scan(&scan);

        let filter = driver.filter().unwrap();
        assert!(
            (weight_sum(filter) - 1.0).abs() <= 1e-6,
            "weights must stay normalized"
        );
        let n = filter.sample_count();
        assert!(
            n >= filter.config().min_particles && n <= filter.config().max_particles,
            "sample count {} out of bounds",
            n
        );
    }

    let best = driver.filter().unwrap().best_hypothesis().unwrap().clone();
    assert!(
        (best.mean.x - truth.x).abs() < 0.2,
        "converged x: {}",
        best.mean.x
    );
    assert!(
        (best.mean.y - truth.y).abs() < 0.2,
        "converged y: {}",
        best.mean.y
    );
    assert!(
        (best.mean.theta - truth.theta).abs() < 0.1,
        "converged yaw: {}",
        best.mean.theta
    );
}

// ============================================================================
// Scenario 4: KLD adaptation after a collapsing observation
// ============================================================================

#[test]
fn test_kld_shrinks_after_collapsing_observation() {
    let map = arena_map();
    let mut pf = ParticleFilter::new(ParticleFilterConfig {
        min_particles: 100,
        max_particles: 5000,
        ..Default::default()
    });
    let mut rng = StdRng::seed_from_u64(5);
    pf.init_from_fn(&mut rng, |r| map.sample_free_pose(r).unwrap_or_default());
    assert_eq!(pf.sample_count(), 5000);

    // A perfectly informative observation: only one particle survives
    pf.update_sensor(|samples| {
        let mut total = 0.0;
        for (i, s) in samples.iter_mut().enumerate() {
            s.weight *= if i == 0 { 1.0 } else { 0.0 };
            total += s.weight;
        }
        total
    });

    pf.resample(&mut rng, |r| map.sample_free_pose(r));
    assert_eq!(pf.sample_count(), 100, "single bucket must shrink to min");
}

// ============================================================================
// Scenario 5: Adaptive random injection
// ============================================================================

#[test]
fn test_recovery_injects_uniform_poses() {
    let map = arena_map();
    let mut pf = ParticleFilter::new(ParticleFilterConfig {
        min_particles: 500,
        max_particles: 500,
        ..Default::default()
    });
    let mut rng = StdRng::seed_from_u64(6);
    let center = Pose2D::new(5.0, 5.0, 0.0);
    pf.init_gaussian(
        &center,
        &dhruva_amcl::Covariance3::diagonal(0.01, 0.01, 0.01),
        &mut rng,
    );

    // Fabricated weight history: the fast average collapsed to 10% of
    // the slow one, so ~90% of the next set should be drawn uniformly
    pf.set_recovery_averages(1.0, 0.1);
    pf.resample(&mut rng, |r| map.sample_free_pose(r));

    let far = pf
        .particles()
        .iter()
        .filter(|p| {
            let dx = p.pose.x - center.x;
            let dy = p.pose.y - center.y;
            (dx * dx + dy * dy).sqrt() > 0.5
        })
        .count() as f64;
    let frac = far / pf.sample_count() as f64;
    assert!((frac - 0.9).abs() < 0.06, "injected fraction: {}", frac);
}

// ============================================================================
// Scenario 6: Marker reprojection consistency through the driver
// ============================================================================

#[test]
fn test_marker_detections_keep_estimate_on_truth() {
    common::init_logging();
    let tf = FakeTf::new();
    let mut config = test_config();
    config.filter.min_particles = 500;
    config.filter.resample_interval = 1;
    config.initial_pose.x = 5.0;
    config.initial_pose.y = 5.0;
    config.initial_pose.a = 0.0;
    config.initial_pose.cov_xx = 0.04;
    config.initial_pose.cov_yy = 0.04;
    config.initial_pose.cov_aa = 0.01;

    // One forward-looking camera at the base origin and one marker 1m
    // ahead of the ground-truth pose, facing the robot
    config.marker.camera_positions = vec![dhruva_amcl::config::PoseEntry {
        roll: -std::f64::consts::FRAC_PI_2,
        yaw: -std::f64::consts::FRAC_PI_2,
        ..Default::default()
    }];
    config.marker.marker_positions = vec![dhruva_amcl::config::MarkerEntry {
        id: 7,
        map: 0,
        sector: 0,
        pose: dhruva_amcl::config::PoseEntry {
            x: 6.0,
            y: 5.0,
            z: 0.0,
            pitch: -std::f64::consts::FRAC_PI_2,
            ..Default::default()
        },
    }];

    let truth = Pose2D::new(5.0, 5.0, 0.0);
    let mut driver = UpdateDriver::new(config, tf.clone());
    driver.set_map(&arena_grid());
    tf.set_odom(truth);

    let corners = driver
        .marker_model()
        .reproject(&truth, 7, 0)
        .expect("marker in view from ground truth");

    for i in 0..10u64 {
        driver.request_nomotion_update();
        let detections = MarkerDetectionSet {
            frame_id: "camera".to_string(),
            timestamp_us: (i + 1) * 100_000,
            markers: vec![MarkerObservation {
                id: 7,
                map_id: 0,
                sector_id: 0,
                camera: 0,
                corners,
            }],
        };
        let out = driver.handle_marker_detections(&detections);
        assert!(out.pose.is_some(), "every forced camera cycle publishes");
    }

    let best = driver.filter().unwrap().best_hypothesis().unwrap().clone();
    assert!(
        (best.mean.x - truth.x).abs() < 0.2,
        "marker-held x: {}",
        best.mean.x
    );
    assert!(
        (best.mean.y - truth.y).abs() < 0.2,
        "marker-held y: {}",
        best.mean.y
    );
    assert!(
        (best.mean.theta - truth.theta).abs() < 0.1,
        "marker-held yaw: {}",
        best.mean.theta
    );
}

// ============================================================================
// Boundary: off-map particles die on the next resample
// ============================================================================

#[test]
fn test_off_map_particles_are_eliminated() {
    let map = Arc::new(arena_map());
    let model = LaserModel::new(LaserModelConfig::default(), map.clone());

    let mut pf = ParticleFilter::new(ParticleFilterConfig {
        min_particles: 20,
        max_particles: 20,
        ..Default::default()
    });
    let mut rng = StdRng::seed_from_u64(8);
    let mut i = 0usize;
    pf.init_from_fn(&mut rng, |_| {
        i += 1;
        if i % 2 == 0 {
            Pose2D::new(5.0, 5.0, 0.0)
        } else {
            Pose2D::new(50.0, 50.0, 0.0)
        }
    });

    let data = BeamData {
        beams: vec![Beam {
            range: 4.9,
            bearing: 0.0,
        }],
        range_max: 8.0,
    };
    pf.update_sensor(|samples| model.reweight(samples, &data));

    for p in pf.particles() {
        if p.pose.x > 10.0 {
            assert_eq!(p.weight, 0.0, "off-map particle must score zero");
        } else {
            assert!(p.weight > 0.0);
        }
    }

    pf.resample(&mut rng, |r| map.sample_free_pose(r));
    for p in pf.particles() {
        let (ci, cj) = map.world_to_cell(p.pose.x, p.pose.y);
        assert!(map.is_valid(ci, cj), "resampled particle left the map");
    }
}
