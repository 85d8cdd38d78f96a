//! Occupancy grid converted from a map message, read-only after build.
//!
//! Besides cell occupancy, every cell caches its Euclidean distance to the
//! nearest occupied cell (the likelihood field), computed once with an
//! outward wavefront from all occupied cells and clamped at a maximum.
//! The map also keeps a flat index of free cells for uniform pose sampling
//! and supports Bresenham ray casting for the beam range model.

use std::collections::VecDeque;
use std::f64::consts::{PI, SQRT_2};

use rand::Rng;

use crate::core::types::{OccupancyGrid, Pose2D};

/// Occupancy state of a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Free,
    Unknown,
    Occupied,
}

/// Static occupancy map.
///
/// The origin is stored as the world coordinate of the grid center
/// (source convention); incoming messages carry the lower-left corner and
/// are converted in [`OccupancyMap::from_grid`].
#[derive(Debug)]
pub struct OccupancyMap {
    width: usize,
    height: usize,
    resolution: f64,
    origin_x: f64,
    origin_y: f64,
    /// -1 free, 0 unknown, +1 occupied
    occ: Vec<i8>,
    /// Distance to the nearest occupied cell in meters, clamped
    occ_dist: Vec<f64>,
    max_occ_dist: f64,
    free_cells: Vec<(usize, usize)>,
}

impl OccupancyMap {
    /// Convert a grid message into the internal representation and
    /// precompute the likelihood field out to `likelihood_max_dist`.
    pub fn from_grid(grid: &OccupancyGrid, likelihood_max_dist: f64) -> Self {
        let width = grid.width;
        let height = grid.height;
        let n = width * height;

        let mut occ = vec![0i8; n];
        let mut free_cells = Vec::new();
        for j in 0..height {
            for i in 0..width {
                let idx = j * width + i;
                occ[idx] = match grid.data.get(idx) {
                    Some(0) => -1,
                    Some(100) => 1,
                    _ => 0,
                };
                if occ[idx] == -1 {
                    free_cells.push((i, j));
                }
            }
        }

        let mut map = Self {
            width,
            height,
            resolution: grid.resolution,
            // Lower-left corner to grid center
            origin_x: grid.origin.x + (width / 2) as f64 * grid.resolution,
            origin_y: grid.origin.y + (height / 2) as f64 * grid.resolution,
            occ,
            occ_dist: Vec::new(),
            max_occ_dist: likelihood_max_dist,
            free_cells,
        };
        map.compute_likelihood_field(likelihood_max_dist);
        map
    }

    /// Grid dimensions in cells.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Cell edge length in meters.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Distance clamp of the likelihood field.
    pub fn max_occ_dist(&self) -> f64 {
        self.max_occ_dist
    }

    /// Whether the cell indices fall inside the grid.
    #[inline]
    pub fn is_valid(&self, i: i64, j: i64) -> bool {
        i >= 0 && j >= 0 && (i as usize) < self.width && (j as usize) < self.height
    }

    /// World coordinates to cell indices (unclamped; check with
    /// [`OccupancyMap::is_valid`]).
    #[inline]
    pub fn world_to_cell(&self, x: f64, y: f64) -> (i64, i64) {
        let i = ((x - self.origin_x) / self.resolution + 0.5).floor() as i64
            + (self.width / 2) as i64;
        let j = ((y - self.origin_y) / self.resolution + 0.5).floor() as i64
            + (self.height / 2) as i64;
        (i, j)
    }

    /// Cell indices to the world coordinates of the cell center.
    #[inline]
    pub fn cell_to_world(&self, i: i64, j: i64) -> (f64, f64) {
        (
            self.origin_x + (i - (self.width / 2) as i64) as f64 * self.resolution,
            self.origin_y + (j - (self.height / 2) as i64) as f64 * self.resolution,
        )
    }

    /// Occupancy state of a cell (unknown when out of range).
    pub fn cell_state(&self, i: i64, j: i64) -> CellState {
        if !self.is_valid(i, j) {
            return CellState::Unknown;
        }
        match self.occ[j as usize * self.width + i as usize] {
            -1 => CellState::Free,
            1 => CellState::Occupied,
            _ => CellState::Unknown,
        }
    }

    /// Likelihood-field distance at a cell; the clamp maximum when out of
    /// range.
    pub fn occ_dist_at(&self, i: i64, j: i64) -> f64 {
        if !self.is_valid(i, j) {
            return self.max_occ_dist;
        }
        self.occ_dist[j as usize * self.width + i as usize]
    }

    /// Likelihood-field distance at world coordinates.
    pub fn occ_dist_at_world(&self, x: f64, y: f64) -> f64 {
        let (i, j) = self.world_to_cell(x, y);
        self.occ_dist_at(i, j)
    }

    /// Indices of all free cells, for uniform pose sampling.
    pub fn free_cell_indices(&self) -> &[(usize, usize)] {
        &self.free_cells
    }

    /// Draw a pose uniformly over free cells with yaw uniform in (-π, π].
    /// `None` when the map has no free cell.
    pub fn sample_free_pose<R: Rng>(&self, rng: &mut R) -> Option<Pose2D> {
        if self.free_cells.is_empty() {
            return None;
        }
        let (i, j) = self.free_cells[rng.gen_range(0..self.free_cells.len())];
        let (x, y) = self.cell_to_world(i as i64, j as i64);
        let theta = rng.gen_range(-PI..PI);
        Some(Pose2D::new(x, y, theta))
    }

    /// Cast a ray from `(x, y)` along `bearing` and return the distance to
    /// the first non-free cell, or `max_range` if none is hit.
    pub fn calc_range(&self, x: f64, y: f64, bearing: f64, max_range: f64) -> f64 {
        let (x0, y0) = self.world_to_cell(x, y);
        let (x1, y1) = self.world_to_cell(
            x + max_range * bearing.cos(),
            y + max_range * bearing.sin(),
        );

        let steep = (y1 - y0).abs() > (x1 - x0).abs();
        let (mut x0, mut y0, x1, y1) = if steep {
            (y0, x0, y1, x1)
        } else {
            (x0, y0, x1, y1)
        };

        let dx = (x1 - x0).abs();
        let dy = (y1 - y0).abs();
        let mut error = 0i64;
        let delta = dy;
        let xstep = if x0 < x1 { 1 } else { -1 };
        let ystep = if y0 < y1 { 1 } else { -1 };

        let hit = |i: i64, j: i64| -> bool {
            let (ci, cj) = if steep { (j, i) } else { (i, j) };
            !self.is_valid(ci, cj) || self.occ[cj as usize * self.width + ci as usize] > -1
        };

        if hit(x0, y0) {
            return 0.0;
        }

        while x0 != x1 {
            x0 += xstep;
            error += delta;
            if 2 * error >= dx {
                y0 += ystep;
                error -= dx;
            }
            if hit(x0, y0) {
                let (ci, cj) = if steep { (y0, x0) } else { (x0, y0) };
                let (wx, wy) = self.cell_to_world(ci, cj);
                let d = ((wx - x).powi(2) + (wy - y).powi(2)).sqrt();
                return d.min(max_range);
            }
        }
        max_range
    }

    /// Wavefront expansion from all occupied cells, 8-connected, clamped
    /// at `max_dist`.
    fn compute_likelihood_field(&mut self, max_dist: f64) {
        let (width, height) = (self.width, self.height);
        self.max_occ_dist = max_dist;
        self.occ_dist = vec![max_dist; width * height];

        let mut queue: VecDeque<(usize, usize, f64)> = VecDeque::new();
        for j in 0..height {
            for i in 0..width {
                if self.occ[j * width + i] == 1 {
                    self.occ_dist[j * width + i] = 0.0;
                    queue.push_back((i, j, 0.0));
                }
            }
        }

        let neighbors: [(i64, i64, f64); 8] = [
            (-1, 0, 1.0),
            (1, 0, 1.0),
            (0, -1, 1.0),
            (0, 1, 1.0),
            (-1, -1, SQRT_2),
            (1, -1, SQRT_2),
            (-1, 1, SQRT_2),
            (1, 1, SQRT_2),
        ];

        while let Some((ci, cj, dist)) = queue.pop_front() {
            if dist > self.occ_dist[cj * width + ci] + 1e-9 {
                continue;
            }
            for &(di, dj, step) in &neighbors {
                let ni = ci as i64 + di;
                let nj = cj as i64 + dj;
                if ni < 0 || nj < 0 || ni as usize >= width || nj as usize >= height {
                    continue;
                }
                let (ni, nj) = (ni as usize, nj as usize);
                let new_dist = dist + step * self.resolution;
                if new_dist < self.occ_dist[nj * width + ni] && new_dist < max_dist {
                    self.occ_dist[nj * width + ni] = new_dist;
                    queue.push_back((ni, nj, new_dist));
                }
            }
        }
    }
}
