//! Boundary interfaces to the middleware: transform lookups and the
//! persisted-pose store. Message transport itself is out of scope.

mod pose_store;
mod transform_source;

pub use pose_store::{PoseStore, SavedPose, TomlPoseStore};
pub use transform_source::TransformSource;
