//! Static occupancy map with a precomputed likelihood field.

mod occupancy_map;

pub use occupancy_map::{CellState, OccupancyMap};
