//! CPU reference implementation of the density count.

use nalgebra::Vector3;
use rayon::prelude::*;

use crate::spatial_hash::SpatialHashGrid;

/// In-radius neighbor count (self included) per point.
pub fn count_in_radius_cpu(
    coords: &[Vector3<f32>],
    grid: &SpatialHashGrid,
    radius: f32,
) -> Vec<u32> {
    let radius_sq = radius * radius;
    coords
        .par_iter()
        .map(|p| {
            let center = grid.params.cell_coord(p);
            grid.stencil_candidates(center)
                .filter(|&j| (coords[j as usize] - p).norm_squared() <= radius_sq)
                .count() as u32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial_hash::GridParams;

    #[test]
    fn test_counts_include_self() {
        let coords = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.05, 0.0, 0.0),
            Vector3::new(9.0, 9.0, 9.0),
        ];
        let params = GridParams::padded(
            &Vector3::zeros(),
            &Vector3::repeat(9.0),
            0.2,
        )
        .unwrap();
        let grid = SpatialHashGrid::build(&coords, params);

        let counts = count_in_radius_cpu(&coords, &grid, 0.1);
        assert_eq!(counts, vec![2, 2, 1]);
    }
}
