//! Device kernels for grid construction.
//!
//! The per-point cell assignment is the embarrassingly parallel half of the
//! index build; the sort, run scan, and table insertion stay on the host
//! (sorting on the device would need a radix-sort pipeline that is not
//! worth its complexity at the point counts this engine sees).
//!
//! Traversal kernels in the operation modules re-derive cell coordinates
//! and probe the uploaded table inline; CubeCL helper functions over array
//! arguments are brittle, so each kernel carries its own copy of the probe
//! loop.

use cubecl::prelude::*;

/// Compute the grid cell coordinate of every point.
///
/// One thread per point. Points are expected to lie inside the padded
/// grid, so the resulting coordinates are non-negative.
#[cube(launch_unchecked)]
pub fn compute_cell_coords_kernel<F: Float>(
    points: &Array<F>, // [x0, y0, z0, x1, ...] flattened
    origin_x: F,
    origin_y: F,
    origin_z: F,
    inv_cell_side: F,
    num_points: u32,
    cell_x: &mut Array<i32>,
    cell_y: &mut Array<i32>,
    cell_z: &mut Array<i32>,
) {
    let idx = ABSOLUTE_POS;

    if idx >= num_points {
        return;
    }

    let base = idx * 3;
    let px = points[base];
    let py = points[base + 1];
    let pz = points[base + 2];

    cell_x[idx] = i32::cast_from(F::floor((px - origin_x) * inv_cell_side));
    cell_y[idx] = i32::cast_from(F::floor((py - origin_y) * inv_cell_side));
    cell_z[idx] = i32::cast_from(F::floor((pz - origin_z) * inv_cell_side));
}
