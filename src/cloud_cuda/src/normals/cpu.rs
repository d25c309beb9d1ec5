//! CPU reference implementation of normal estimation.

use nalgebra::Vector3;
use rayon::prelude::*;

use super::{smallest_eigenvector, MIN_NEIGHBORS_FOR_NORMAL};
use crate::math::CovarianceAccumulator;
use crate::spatial_hash::SpatialHashGrid;

/// One unit normal per point; zero vector for degenerate neighborhoods.
pub fn estimate_normals_cpu(
    coords: &[Vector3<f32>],
    grid: &SpatialHashGrid,
    radius: f32,
) -> Vec<Vector3<f32>> {
    let radius_sq = radius * radius;

    coords
        .par_iter()
        .map(|p| {
            let center = grid.params.cell_coord(p);
            let mut acc = CovarianceAccumulator::default();
            for j in grid.stencil_candidates(center) {
                let q = &coords[j as usize];
                if (q - p).norm_squared() <= radius_sq {
                    acc.add(q);
                }
            }

            if acc.count() < MIN_NEIGHBORS_FOR_NORMAL {
                return Vector3::zeros();
            }

            match acc.covariance() {
                Some(cov) => smallest_eigenvector(&cov),
                None => Vector3::zeros(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial_hash::GridParams;

    #[test]
    fn test_vertical_plane_normal_is_horizontal() {
        // Points in the x = 0 plane: normals must align with the x axis.
        let mut coords = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                coords.push(Vector3::new(0.0, i as f32 * 0.01, j as f32 * 0.01));
            }
        }

        let mut min = Vector3::repeat(f32::MAX);
        let mut max = Vector3::repeat(f32::MIN);
        for p in &coords {
            min = min.inf(p);
            max = max.sup(p);
        }
        let params = GridParams::padded(&min, &max, 0.03).unwrap();
        let grid = SpatialHashGrid::build(&coords, params);

        let normals = estimate_normals_cpu(&coords, &grid, 0.03);
        for n in &normals {
            assert!(n.x.abs() > 0.99, "normal {n:?} not aligned with x");
        }
    }
}
