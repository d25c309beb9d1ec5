//! Device kernel for the normal-estimation gather pass.

use cubecl::prelude::*;

/// Accumulate per-point neighborhood moments.
///
/// For every point, sums the coordinates and coordinate products of its
/// in-radius neighbors (self included) into
/// `[sx, sy, sz, sxx, sxy, sxz, syy, syz, szz]` at `sums[idx * 9..]`, and
/// the neighbor count into `counts[idx]`. The host turns these moments
/// into covariances and eigen-decompositions.
#[cube(launch_unchecked)]
pub fn covariance_gather_kernel<F: Float>(
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
    radius_sq: F,
    num_points: u32,
    sums: &mut Array<F>,    // [N * 9]
    counts: &mut Array<u32>, // [N]
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
    let mut sx = F::new(0.0);
    let mut sy = F::new(0.0);
    let mut sz = F::new(0.0);
    let mut sxx = F::new(0.0);
    let mut sxy = F::new(0.0);
    let mut sxz = F::new(0.0);
    let mut syy = F::new(0.0);
    let mut syz = F::new(0.0);
    let mut szz = F::new(0.0);

    for dz in 0..3u32 {
        for dy in 0..3u32 {
            for dx in 0..3u32 {
                let stx = cx + dx as i32 - 1;
                let sty = cy + dy as i32 - 1;
                let stz = cz + dz as i32 - 1;

                let inside = stx >= 0
                    && sty >= 0
                    && stz >= 0
                    && stx < dims_x
                    && sty < dims_y
                    && stz < dims_z;

                if inside {
                    let hash = (stx as u32) * 73856093u32
                        ^ (sty as u32) * 19349669u32
                        ^ (stz as u32) * 83492791u32;
                    let mut slot = hash & table_mask;
                    let mut run_first = 0u32;
                    let mut run_count = 0u32;
                    let mut done = false;

                    for _probe in 0..probe_bound {
                        if !done {
                            let occupancy = entry_count[slot];
                            if occupancy == 0u32 {
                                done = true;
                            } else if cell_x[slot] == stx
                                && cell_y[slot] == sty
                                && cell_z[slot] == stz
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
                        let px = points[jb];
                        let py = points[jb + 1];
                        let pz = points[jb + 2];

                        let ex = px - qx;
                        let ey = py - qy;
                        let ez = pz - qz;
                        let dist_sq = ex * ex + ey * ey + ez * ez;

                        if dist_sq <= radius_sq {
                            found += 1u32;
                            sx += px;
                            sy += py;
                            sz += pz;
                            sxx += px * px;
                            sxy += px * py;
                            sxz += px * pz;
                            syy += py * py;
                            syz += py * pz;
                            szz += pz * pz;
                        }
                    }
                }
            }
        }
    }

    let out = idx * 9;
    sums[out] = sx;
    sums[out + 1] = sy;
    sums[out + 2] = sz;
    sums[out + 3] = sxx;
    sums[out + 4] = sxy;
    sums[out + 5] = sxz;
    sums[out + 6] = syy;
    sums[out + 7] = syz;
    sums[out + 8] = szz;
    counts[idx] = found;
}
