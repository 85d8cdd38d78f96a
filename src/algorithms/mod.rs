//! Core algorithms: the static map and the particle-filter localization
//! stack built on top of it.

pub mod localization;
pub mod mapping;
