//! Device kernel for the clustering label relaxation.

use cubecl::prelude::*;

/// One minimum-label relaxation pass.
///
/// Every point reads the labels of its in-tolerance neighbors from
/// `labels_in` and writes the minimum (its own included) to `labels_out`,
/// flagging `changed[idx]` when the label shrank. The host swaps the two
/// buffers and re-launches until a pass changes nothing; the labels then
/// equal the smallest member index of each connected component. Labels
/// are monotonically non-increasing, which bounds the iteration.
#[cube(launch_unchecked)]
pub fn label_relax_kernel<F: Float>(
    points: &Array<F>, // [N * 3] flattened
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
    tolerance_sq: F,
    num_points: u32,
    labels_in: &Array<u32>,
    labels_out: &mut Array<u32>,
    changed: &mut Array<u32>,
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

    let own = labels_in[idx];
    let mut best = own;

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

                        if dist_sq <= tolerance_sq {
                            let neighbor_label = labels_in[j];
                            if neighbor_label < best {
                                best = neighbor_label;
                            }
                        }
                    }
                }
            }
        }
    }

    labels_out[idx] = best;
    if best < own {
        changed[idx] = 1u32;
    } else {
        changed[idx] = 0u32;
    }
}
