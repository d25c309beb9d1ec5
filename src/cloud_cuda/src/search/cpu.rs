//! CPU reference implementations of the neighborhood searches.
//!
//! These mirror the device kernels exactly: same grid, same stencil
//! traversal order, same tie handling. They are the tested baseline and
//! the fallback when no accelerator is present.

use nalgebra::Vector3;
use rayon::prelude::*;

use super::NeighborLists;
use crate::spatial_hash::SpatialHashGrid;

/// Enumerate in-radius neighbors (self included) for every point.
pub fn radius_neighbors_cpu(
    coords: &[Vector3<f32>],
    grid: &SpatialHashGrid,
    radius: f32,
) -> NeighborLists {
    let radius_sq = radius * radius;

    let per_point: Vec<Vec<u32>> = coords
        .par_iter()
        .map(|p| {
            let center = grid.params.cell_coord(p);
            grid.stencil_candidates(center)
                .filter(|&j| (coords[j as usize] - p).norm_squared() <= radius_sq)
                .collect()
        })
        .collect();

    let total: usize = per_point.iter().map(Vec::len).sum();
    let mut indices = Vec::with_capacity(total);
    let mut ranges = Vec::with_capacity(coords.len());
    for list in &per_point {
        ranges.push((indices.len() as u32, list.len() as u32));
        indices.extend_from_slice(list);
    }

    NeighborLists { indices, ranges }
}

/// Closest reference index within `radius` per query, `-1` when none.
pub fn nn_search_cpu(
    query: &[Vector3<f32>],
    reference: &[Vector3<f32>],
    grid: &SpatialHashGrid,
    radius: f32,
) -> Vec<i32> {
    let radius_sq = radius * radius;

    query
        .par_iter()
        .map(|q| {
            let center = grid.params.cell_coord(q);
            let mut best = -1i32;
            let mut best_dist = radius_sq;
            for j in grid.stencil_candidates(center) {
                let dist = (reference[j as usize] - q).norm_squared();
                let better = (best < 0 && dist <= radius_sq) || (best >= 0 && dist < best_dist);
                if better {
                    best = j as i32;
                    best_dist = dist;
                }
            }
            best
        })
        .collect()
}
