//! CPU reference implementation: union-find over in-tolerance edges.

use nalgebra::Vector3;

use crate::spatial_hash::SpatialHashGrid;

/// Root with path halving.
fn find(parent: &mut [u32], mut i: u32) -> u32 {
    while parent[i as usize] != i {
        let grandparent = parent[parent[i as usize] as usize];
        parent[i as usize] = grandparent;
        i = grandparent;
    }
    i
}

/// Label every point with the smallest index of its connected component.
///
/// A union always points the larger root at the smaller, so the surviving
/// root of a component is its minimum member index and the forest stays
/// cycle-free.
pub fn component_roots_cpu(
    coords: &[Vector3<f32>],
    grid: &SpatialHashGrid,
    tolerance: f32,
) -> Vec<u32> {
    let n = coords.len();
    let tolerance_sq = tolerance * tolerance;
    let mut parent: Vec<u32> = (0..n as u32).collect();

    for i in 0..n {
        let p = &coords[i];
        let center = grid.params.cell_coord(p);
        for j in grid.stencil_candidates(center) {
            if (coords[j as usize] - p).norm_squared() <= tolerance_sq {
                let root_a = find(&mut parent, i as u32);
                let root_b = find(&mut parent, j);
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
    }

    (0..n as u32).map(|i| find(&mut parent, i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial_hash::GridParams;

    fn grid_for(coords: &[Vector3<f32>], tolerance: f32) -> SpatialHashGrid {
        let mut min = Vector3::repeat(f32::MAX);
        let mut max = Vector3::repeat(f32::MIN);
        for p in coords {
            min = min.inf(p);
            max = max.sup(p);
        }
        let params = GridParams::padded(&min, &max, tolerance).unwrap();
        SpatialHashGrid::build(coords, params)
    }

    #[test]
    fn test_chain_collapses_to_first_index() {
        // A chain where only consecutive points are within tolerance.
        let coords: Vec<Vector3<f32>> =
            (0..10).map(|i| Vector3::new(i as f32 * 0.09, 0.0, 0.0)).collect();
        let grid = grid_for(&coords, 0.1);

        let roots = component_roots_cpu(&coords, &grid, 0.1);
        assert!(roots.iter().all(|&r| r == 0));
    }

    #[test]
    fn test_singletons_keep_own_index() {
        let coords = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
        ];
        let grid = grid_for(&coords, 0.1);

        let roots = component_roots_cpu(&coords, &grid, 0.1);
        assert_eq!(roots, vec![0, 1, 2]);
    }
}
