//! Host-side convexity refinement.
//!
//! The adjacency structure is the same 27-cell stencil the base clustering
//! used, so the refinement re-walks the grid instead of materializing an
//! edge list. This pass stays on the host: it touches each edge once and
//! is dominated by the base clustering and normal estimation that precede
//! it.

use nalgebra::Vector3;

use super::MAX_NORMAL_ANGLE;
use crate::spatial_hash::SpatialHashGrid;

/// Guard against sign noise on exactly coplanar neighborhoods, applied to
/// the normalized convexity dot product.
const CONVEXITY_EPSILON: f32 = 1e-6;

fn find(parent: &mut [u32], mut i: u32) -> u32 {
    while parent[i as usize] != i {
        let grandparent = parent[parent[i as usize] as usize];
        parent[i as usize] = grandparent;
        i = grandparent;
    }
    i
}

/// Split every base cluster along its non-convex edges and emit the
/// resulting sub-components whose sizes fall inside the window.
#[allow(clippy::too_many_arguments)]
pub fn refine_convex_components(
    coords: &[Vector3<f32>],
    normals: &[Vector3<f32>],
    grid: &SpatialHashGrid,
    base_roots: &[u32],
    tolerance: f32,
    min_size: usize,
    max_size: usize,
) -> Vec<Vec<u32>> {
    let n = coords.len();
    let tolerance_sq = tolerance * tolerance;

    // Reorient within each base cluster: the normal of the cluster's
    // lowest-index member with a nonzero normal defines the hemisphere,
    // and every other member is flipped into it. Orientation becomes
    // consistent per cluster without depending on where the surface sits
    // relative to the world origin.
    let mut reference: Vec<Option<Vector3<f32>>> = vec![None; n];
    for i in 0..n {
        let root = base_roots[i] as usize;
        if reference[root].is_none() && normals[i].norm_squared() > 0.0 {
            reference[root] = Some(normals[i]);
        }
    }

    let oriented: Vec<Vector3<f32>> = normals
        .iter()
        .enumerate()
        .map(|(i, n)| match reference[base_roots[i] as usize] {
            Some(reference_normal) if n.dot(&reference_normal) < 0.0 => -*n,
            _ => *n,
        })
        .collect();

    let mut parent: Vec<u32> = (0..n as u32).collect();
    let cos_max_angle = MAX_NORMAL_ANGLE.cos();

    for i in 0..n {
        let p = &coords[i];
        let ni = &oriented[i];
        if ni.norm_squared() == 0.0 {
            continue;
        }

        let center = grid.params.cell_coord(p);
        for j in grid.stencil_candidates(center) {
            let j = j as usize;
            if j == i || base_roots[j] != base_roots[i] {
                continue;
            }

            let d = coords[j] - p;
            let dist_sq = d.norm_squared();
            if dist_sq > tolerance_sq || dist_sq == 0.0 {
                continue;
            }

            let nj = &oriented[j];
            if nj.norm_squared() == 0.0 {
                continue;
            }

            if nj.dot(ni) < cos_max_angle {
                continue;
            }
            if (ni - nj).dot(&d) / dist_sq.sqrt() < -CONVEXITY_EPSILON {
                continue;
            }

            let root_a = find(&mut parent, i as u32);
            let root_b = find(&mut parent, j as u32);
            if root_a != root_b {
                let (low, high) = if root_a < root_b {
                    (root_a, root_b)
                } else {
                    (root_b, root_a)
                };
                parent[high as usize] = low;
            }
        }
    }

    // Gather members per refined root; ascending index order falls out of
    // the scan order.
    let roots: Vec<u32> = (0..n as u32).map(|i| find(&mut parent, i)).collect();
    let mut members: Vec<Vec<u32>> = vec![Vec::new(); n];
    for (i, &root) in roots.iter().enumerate() {
        members[root as usize].push(i as u32);
    }

    members
        .into_iter()
        .filter(|m| m.len() >= min_size && m.len() <= max_size)
        .collect()
}
