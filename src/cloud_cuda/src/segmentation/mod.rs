//! Local-convex-object segmentation.
//!
//! Refines a Euclidean clustering: within each base cluster, only edges
//! whose endpoints satisfy a local convexity predicate survive, and the
//! resulting connected sub-components become objects. An edge `(i, j)` is
//! convex when `(n_i - n_j) . (p_j - p_i) >= 0` (the surface does not fold
//! away from the sensor) and the angle between the normals is at most
//! `MAX_NORMAL_ANGLE`.
//!
//! The predicate is sensitive to normal orientation, so before the test
//! each base cluster's normals are flipped into the hemisphere of the
//! normal at the cluster's lowest-index member that has one. Orientation
//! is then consistent within every cluster, and whatever convention the
//! caller established (for example sensor-facing normals from an RGB-D
//! pipeline) is preserved rather than overridden. Points with a zero
//! normal (degenerate neighborhoods) carry no convex edges and end up in
//! singleton sub-components.

pub mod cpu;

use nalgebra::Vector3;

use crate::clustering;
use crate::error::{Error, Result};

/// Largest normal angle, in radians, an edge may span and still count as
/// convex.
pub const MAX_NORMAL_ANGLE: f32 = std::f32::consts::PI / 6.0;

/// Segment a cloud with per-point `normals` into locally convex objects.
///
/// Each returned object is a strictly ascending sequence of point indices;
/// objects are ordered by their smallest member and are pairwise disjoint.
/// Sub-components outside `[min_size, max_size]` are dropped.
pub fn convex_obj_segmentation(
    coords: &[Vector3<f32>],
    normals: &[Vector3<f32>],
    tolerance: f32,
    min_size: usize,
    max_size: usize,
) -> Result<Vec<Vec<u32>>> {
    clustering::validate_window("convex_obj_segmentation", tolerance, min_size, max_size)?;
    if normals.len() != coords.len() {
        return Err(Error::invalid(
            "convex_obj_segmentation",
            format!(
                "normal count {} does not match point count {}",
                normals.len(),
                coords.len()
            ),
        ));
    }
    if coords.is_empty() {
        return Ok(Vec::new());
    }

    let grid = clustering::build_cluster_grid(coords, tolerance)?;
    let base_roots = clustering::component_roots(coords, &grid, tolerance);

    Ok(cpu::refine_convex_components(
        coords,
        normals,
        &grid,
        &base_roots,
        tolerance,
        min_size,
        max_size,
    ))
}
