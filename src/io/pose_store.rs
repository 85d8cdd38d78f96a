//! Persistence of the last pose estimate across restarts.
//!
//! The estimate and its diagonal covariance are written as the same
//! `initial_pose_*` / `initial_cov_*` keys the engine reads back at
//! startup, so a restarted robot resumes from where it stopped.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// The persisted pose record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SavedPose {
    pub initial_pose_x: f64,
    pub initial_pose_y: f64,
    pub initial_pose_a: f64,
    pub initial_cov_xx: f64,
    pub initial_cov_yy: f64,
    pub initial_cov_aa: f64,
}

/// Key/value store for the persisted pose.
pub trait PoseStore {
    fn save(&mut self, pose: &SavedPose) -> Result<()>;
    fn load(&self) -> Result<Option<SavedPose>>;
}

/// TOML-file backed pose store.
#[derive(Debug, Clone)]
pub struct TomlPoseStore {
    path: PathBuf,
}

impl TomlPoseStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PoseStore for TomlPoseStore {
    fn save(&mut self, pose: &SavedPose) -> Result<()> {
        let content = toml::to_string(pose)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    fn load(&self) -> Result<Option<SavedPose>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(Some(toml::from_str(&content)?))
    }
}
