//! Device kernels for the neighborhood searches.
//!
//! One thread per query point. Every kernel re-derives the query's cell,
//! walks the 27-cell stencil, resolves each cell through the uploaded hash
//! table by bounded linear probing, and distance-tests the candidates.
//!
//! The probe loops are bounded by the exact `probe_bound` the host computed
//! at build time, and use a done-flag instead of `break`: early exits from
//! data-dependent loops trip CubeCL's uniformity analysis.

use cubecl::prelude::*;

/// Count in-radius neighbors (self included) for every point.
#[cube(launch_unchecked)]
pub fn radius_count_kernel<F: Float>(
    points: &Array<F>, // [N * 3] flattened
    origin_x: F,
    origin_y: F,
    origin_z: F,
    inv_cell_side: F,
    dims_x: i32,
    dims_y: i32,
    dims_z: i32,
    cell_x: &Array<i32>,       // hash table: cell coordinate per slot
    cell_y: &Array<i32>,
    cell_z: &Array<i32>,
    entry_first: &Array<u32>,  // hash table: slice start per slot
    entry_count: &Array<u32>,  // hash table: slice length, 0 = empty slot
    sorted_indices: &Array<u32>,
    table_mask: u32,
    probe_bound: u32,
    radius_sq: F,
    num_points: u32,
    counts: &mut Array<u32>,
) {
    let idx = ABSOLUTE_POS;

    if idx >= num_points {
        return;
    }

    let base = idx * 3;
    let qx = points[base];
    let qy = points[base + 1];
    let qz = points[base + 2];

    let cx = i32::cast_from(F::floor((qx - origin_x) * inv_cell_side));
    let cy = i32::cast_from(F::floor((qy - origin_y) * inv_cell_side));
    let cz = i32::cast_from(F::floor((qz - origin_z) * inv_cell_side));

    let mut found = 0u32;

    for dz in 0..3u32 {
        for dy in 0..3u32 {
            for dx in 0..3u32 {
                let sx = cx + dx as i32 - 1;
                let sy = cy + dy as i32 - 1;
                let sz = cz + dz as i32 - 1;

                let inside = sx >= 0
                    && sy >= 0
                    && sz >= 0
                    && sx < dims_x
                    && sy < dims_y
                    && sz < dims_z;

                if inside {
                    // Resolve the cell to its slice of the sorted layout.
                    let hash = (sx as u32) * 73856093u32
                        ^ (sy as u32) * 19349669u32
                        ^ (sz as u32) * 83492791u32;
                    let mut slot = hash & table_mask;
                    let mut run_first = 0u32;
                    let mut run_count = 0u32;
                    let mut done = false;

                    for _probe in 0..probe_bound {
                        if !done {
                            let occupancy = entry_count[slot];
                            if occupancy == 0u32 {
                                done = true;
                            } else if cell_x[slot] == sx
                                && cell_y[slot] == sy
                                && cell_z[slot] == sz
                            {
                                run_first = entry_first[slot];
                                run_count = occupancy;
                                done = true;
                            } else {
                                slot = (slot + 1u32) & table_mask;
                            }
                        }
                    }

                    for k in 0..run_count {
                        let j = sorted_indices[run_first + k];
                        let jb = j * 3;
                        let ex = points[jb] - qx;
                        let ey = points[jb + 1] - qy;
                        let ez = points[jb + 2] - qz;
                        let dist_sq = ex * ex + ey * ey + ez * ez;

                        if dist_sq <= radius_sq {
                            found += 1u32;
                        }
                    }
                }
            }
        }
    }

    counts[idx] = found;
}

/// Write the in-radius neighbor indices of every point at its offset in
/// the flat output. Traversal order matches `radius_count_kernel`, so the
/// counts computed there are exact slice lengths here.
#[cube(launch_unchecked)]
pub fn radius_gather_kernel<F: Float>(
    points: &Array<F>,
    origin_x: F,
    origin_y: F,
    origin_z: F,
    inv_cell_side: F,
    dims_x: i32,
    dims_y: i32,
    dims_z: i32,
    cell_x: &Array<i32>,
    cell_y: &Array<i32>,
    cell_z: &Array<i32>,
    entry_first: &Array<u32>,
    entry_count: &Array<u32>,
    sorted_indices: &Array<u32>,
    table_mask: u32,
    probe_bound: u32,
    radius_sq: F,
    num_points: u32,
    offsets: &Array<u32>, // exclusive prefix sum of the counts
    neighbors: &mut Array<u32>,
) {
    let idx = ABSOLUTE_POS;

    if idx >= num_points {
        return;
    }

    let base = idx * 3;
    let qx = points[base];
    let qy = points[base + 1];
    let qz = points[base + 2];

    let cx = i32::cast_from(F::floor((qx - origin_x) * inv_cell_side));
    let cy = i32::cast_from(F::floor((qy - origin_y) * inv_cell_side));
    let cz = i32::cast_from(F::floor((qz - origin_z) * inv_cell_side));

    let mut cursor = offsets[idx];

    for dz in 0..3u32 {
        for dy in 0..3u32 {
            for dx in 0..3u32 {
                let sx = cx + dx as i32 - 1;
                let sy = cy + dy as i32 - 1;
                let sz = cz + dz as i32 - 1;

                let inside = sx >= 0
                    && sy >= 0
                    && sz >= 0
                    && sx < dims_x
                    && sy < dims_y
                    && sz < dims_z;

                if inside {
                    let hash = (sx as u32) * 73856093u32
                        ^ (sy as u32) * 19349669u32
                        ^ (sz as u32) * 83492791u32;
                    let mut slot = hash & table_mask;
                    let mut run_first = 0u32;
                    let mut run_count = 0u32;
                    let mut done = false;

                    for _probe in 0..probe_bound {
                        if !done {
                            let occupancy = entry_count[slot];
                            if occupancy == 0u32 {
                                done = true;
                            } else if cell_x[slot] == sx
                                && cell_y[slot] == sy
                                && cell_z[slot] == sz
                            {
                                run_first = entry_first[slot];
                                run_count = occupancy;
                                done = true;
                            } else {
                                slot = (slot + 1u32) & table_mask;
                            }
                        }
                    }

                    for k in 0..run_count {
                        let j = sorted_indices[run_first + k];
                        let jb = j * 3;
                        let ex = points[jb] - qx;
                        let ey = points[jb + 1] - qy;
                        let ez = points[jb + 2] - qz;
                        let dist_sq = ex * ex + ey * ey + ez * ez;

                        if dist_sq <= radius_sq {
                            neighbors[cursor] = j;
                            cursor += 1u32;
                        }
                    }
                }
            }
        }
    }
}

/// Closest in-radius reference point per query, `-1` when none exists.
#[cube(launch_unchecked)]
pub fn nn_search_kernel<F: Float>(
    query: &Array<F>,      // [Nq * 3]
    reference: &Array<F>,  // [Nr * 3], the indexed set
    origin_x: F,
    origin_y: F,
    origin_z: F,
    inv_cell_side: F,
    dims_x: i32,
    dims_y: i32,
    dims_z: i32,
    cell_x: &Array<i32>,
    cell_y: &Array<i32>,
    cell_z: &Array<i32>,
    entry_first: &Array<u32>,
    entry_count: &Array<u32>,
    sorted_indices: &Array<u32>,
    table_mask: u32,
    probe_bound: u32,
    radius_sq: F,
    num_queries: u32,
    nearest: &mut Array<i32>,
) {
    let idx = ABSOLUTE_POS;

    if idx >= num_queries {
        return;
    }

    let base = idx * 3;
    let qx = query[base];
    let qy = query[base + 1];
    let qz = query[base + 2];

    let cx = i32::cast_from(F::floor((qx - origin_x) * inv_cell_side));
    let cy = i32::cast_from(F::floor((qy - origin_y) * inv_cell_side));
    let cz = i32::cast_from(F::floor((qz - origin_z) * inv_cell_side));

    let mut best = 0i32 - 1i32;
    let mut best_dist = radius_sq;

    for dz in 0..3u32 {
        for dy in 0..3u32 {
            for dx in 0..3u32 {
                let sx = cx + dx as i32 - 1;
                let sy = cy + dy as i32 - 1;
                let sz = cz + dz as i32 - 1;

                let inside = sx >= 0
                    && sy >= 0
                    && sz >= 0
                    && sx < dims_x
                    && sy < dims_y
                    && sz < dims_z;

                if inside {
                    let hash = (sx as u32) * 73856093u32
                        ^ (sy as u32) * 19349669u32
                        ^ (sz as u32) * 83492791u32;
                    let mut slot = hash & table_mask;
                    let mut run_first = 0u32;
                    let mut run_count = 0u32;
                    let mut done = false;

                    for _probe in 0..probe_bound {
                        if !done {
                            let occupancy = entry_count[slot];
                            if occupancy == 0u32 {
                                done = true;
                            } else if cell_x[slot] == sx
                                && cell_y[slot] == sy
                                && cell_z[slot] == sz
                            {
                                run_first = entry_first[slot];
                                run_count = occupancy;
                                done = true;
                            } else {
                                slot = (slot + 1u32) & table_mask;
                            }
                        }
                    }

                    for k in 0..run_count {
                        let j = sorted_indices[run_first + k];
                        let jb = j * 3;
                        let ex = reference[jb] - qx;
                        let ey = reference[jb + 1] - qy;
                        let ez = reference[jb + 2] - qz;
                        let dist_sq = ex * ex + ey * ey + ez * ez;

                        let better = (best < 0 && dist_sq <= radius_sq)
                            || (best >= 0 && dist_sq < best_dist);
                        if better {
                            let j_i32 = j as i32;
                            best = j_i32;
                            best_dist = dist_sq;
                        }
                    }
                }
            }
        }
    }

    nearest[idx] = best;
}
