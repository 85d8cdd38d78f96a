//! Test utilities for DhruvaAMCL integration tests.
//!
//! Provides a synthetic arena map, a scriptable transform source, and a
//! deterministic base configuration.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use dhruva_amcl::{
    AmclConfig, LaserScan, OccupancyGrid, OccupancyMap, Pose2D, TransformSource,
};

/// Route engine logs through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 10x10 m arena at 0.1 m resolution: occupied border walls plus an
/// interior wall stub that breaks the square's rotational symmetry.
pub fn arena_grid() -> OccupancyGrid {
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
    // Interior stub: a wall segment reaching in from the east at y ≈ 3m
    for i in 70..100 {
        data[30 * w + i] = 100;
    }
    OccupancyGrid {
        width: w,
        height: h,
        resolution: 0.1,
        origin: Pose2D::new(0.0, 0.0, 0.0),
        data,
    }
}

/// The arena converted to the internal map representation.
pub fn arena_map() -> OccupancyMap {
    OccupancyMap::from_grid(&arena_grid(), 2.0)
}

/// A map with no free cell at all.
pub fn degenerate_grid() -> OccupancyGrid {
    OccupancyGrid {
        width: 4,
        height: 4,
        resolution: 0.5,
        origin: Pose2D::new(0.0, 0.0, 0.0),
        data: vec![100u8; 16],
    }
}

/// Synthesize the scan a perfect laser at `pose` would measure in `map`.
pub fn synth_scan(
    map: &OccupancyMap,
    pose: &Pose2D,
    num_beams: usize,
    timestamp_us: u64,
) -> LaserScan {
    let angle_min = -std::f64::consts::PI;
    let angle_increment = 2.0 * std::f64::consts::PI / num_beams as f64;
    let range_max = 8.0;
    let ranges = (0..num_beams)
        .map(|i| {
            let bearing = angle_min + i as f64 * angle_increment;
            map.calc_range(pose.x, pose.y, pose.theta + bearing, range_max)
        })
        .collect();
    LaserScan::new(
        "laser",
        timestamp_us,
        angle_min,
        angle_increment,
        0.05,
        range_max,
        ranges,
    )
}

/// Deterministic configuration for driver tests.
pub fn test_config() -> AmclConfig {
    let mut config = AmclConfig::default();
    config.runtime.seed = 42;
    config.runtime.save_pose_rate = -1.0;
    config.laser.coeff = 1.0;
    config.marker.coeff = 1.0;
    config
}

#[derive(Default)]
pub struct FakeTfState {
    pub odom_pose: Option<Pose2D>,
    pub mounts: HashMap<String, Pose2D>,
}

/// Scriptable transform source shared between the test and the driver.
#[derive(Clone, Default)]
pub struct FakeTf(pub Rc<RefCell<FakeTfState>>);

impl FakeTf {
    pub fn new() -> Self {
        let tf = Self::default();
        tf.0
            .borrow_mut()
            .mounts
            .insert("laser".to_string(), Pose2D::identity());
        tf
    }

    pub fn set_odom(&self, pose: Pose2D) {
        self.0.borrow_mut().odom_pose = Some(pose);
    }

    pub fn clear_odom(&self) {
        self.0.borrow_mut().odom_pose = None;
    }

    pub fn set_mount(&self, frame: &str, pose: Pose2D) {
        self.0.borrow_mut().mounts.insert(frame.to_string(), pose);
    }
}

impl TransformSource for FakeTf {
    fn odom_pose_at(&self, _timestamp_us: u64) -> Option<Pose2D> {
        self.0.borrow().odom_pose
    }

    fn sensor_mount(&self, frame_id: &str) -> Option<Pose2D> {
        self.0.borrow().mounts.get(frame_id).copied()
    }
}
