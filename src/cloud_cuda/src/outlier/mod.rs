//! Radius outlier removal.
//!
//! A point survives iff at least `min_neighbors` points (itself included)
//! lie within `radius` of it. The density pass shares the radius-count
//! kernel with the search module; the surviving points are stream-compacted
//! into a fresh set whose bounds are recomputed lazily, never inherited,
//! because the filter may prune extrema.

pub mod cpu;

use nalgebra::Vector3;

use crate::error::{Error, Result};
use crate::point::Point;
use crate::spatial_hash::{GridParams, SpatialHashGrid};

/// Remove points with fewer than `min_neighbors` in-radius neighbors.
pub fn radius_outlier_removal(
    points: &[Point],
    radius: f32,
    min_neighbors: usize,
) -> Result<Vec<Point>> {
    if !(radius > 0.0) || !radius.is_finite() {
        return Err(Error::invalid(
            "radius_outlier_removal",
            format!("radius must be positive, got {radius}"),
        ));
    }
    if points.is_empty() {
        return Ok(Vec::new());
    }

    let coords: Vec<Vector3<f32>> = points.iter().map(|p| p.coordinates).collect();
    let mut min = Vector3::repeat(f32::MAX);
    let mut max = Vector3::repeat(f32::MIN);
    for p in &coords {
        min = min.inf(p);
        max = max.sup(p);
    }
    let params = GridParams::padded(&min, &max, 2.0 * radius)?;
    let grid = SpatialHashGrid::build(&coords, params);

    let counts = count_neighbors(&coords, &grid, radius);

    let threshold = min_neighbors as u32;
    Ok(points
        .iter()
        .zip(counts.iter())
        .filter(|(_, &c)| c >= threshold)
        .map(|(p, _)| *p)
        .collect())
}

fn count_neighbors(coords: &[Vector3<f32>], grid: &SpatialHashGrid, radius: f32) -> Vec<u32> {
    #[cfg(feature = "cuda")]
    if crate::runtime::is_cuda_available() {
        match gpu::radius_counts_gpu(coords, grid, radius) {
            Ok(counts) => return counts,
            Err(e) => {
                tracing::warn!(
                    "radius_outlier_removal: GPU path failed ({e}), falling back to CPU"
                );
            }
        }
    }

    cpu::count_in_radius_cpu(coords, grid, radius)
}

#[cfg(feature = "cuda")]
mod gpu {
    use super::*;
    use crate::runtime::{default_client, device_guard, flatten_coords, launch_dims, upload_grid};
    use crate::search::kernels::radius_count_kernel;
    use cubecl::cuda::CudaRuntime;
    use cubecl::prelude::*;

    pub fn radius_counts_gpu(
        coords: &[Vector3<f32>],
        grid: &SpatialHashGrid,
        radius: f32,
    ) -> Result<Vec<u32>> {
        device_guard("radius_outlier_removal", || {
            let client = default_client();
            let n = coords.len();
            let table_len = grid.table_len();

            let points_gpu = client.create(f32::as_bytes(&flatten_coords(coords)));
            let table = upload_grid(&client, grid);
            let counts_gpu = client.empty(n * std::mem::size_of::<u32>());

            let (cube_count, cube_dim) = launch_dims(n);
            unsafe {
                radius_count_kernel::launch_unchecked::<f32, CudaRuntime>(
                    &client,
                    cube_count,
                    cube_dim,
                    ArrayArg::from_raw_parts::<f32>(&points_gpu, n * 3, 1),
                    ScalarArg::new(grid.params.origin.x),
                    ScalarArg::new(grid.params.origin.y),
                    ScalarArg::new(grid.params.origin.z),
                    ScalarArg::new(1.0 / grid.params.cell_side),
                    ScalarArg::new(grid.params.dims[0]),
                    ScalarArg::new(grid.params.dims[1]),
                    ScalarArg::new(grid.params.dims[2]),
                    ArrayArg::from_raw_parts::<i32>(&table.cell_x, table_len, 1),
                    ArrayArg::from_raw_parts::<i32>(&table.cell_y, table_len, 1),
                    ArrayArg::from_raw_parts::<i32>(&table.cell_z, table_len, 1),
                    ArrayArg::from_raw_parts::<u32>(&table.first, table_len, 1),
                    ArrayArg::from_raw_parts::<u32>(&table.count, table_len, 1),
                    ArrayArg::from_raw_parts::<u32>(&table.sorted, n, 1),
                    ScalarArg::new(grid.table_len() as u32 - 1),
                    ScalarArg::new(grid.probe_bound()),
                    ScalarArg::new(radius * radius),
                    ScalarArg::new(n as u32),
                    ArrayArg::from_raw_parts::<u32>(&counts_gpu, n, 1),
                );
            }

            let counts_bytes = client.read_one(counts_gpu);
            u32::from_bytes(&counts_bytes)[..n].to_vec()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud(coords: &[(f32, f32, f32)]) -> Vec<Point> {
        coords
            .iter()
            .map(|&(x, y, z)| Point::from_coordinates(x, y, z))
            .collect()
    }

    #[test]
    fn test_rejects_bad_radius() {
        let points = cloud(&[(0.0, 0.0, 0.0)]);
        assert!(radius_outlier_removal(&points, 0.0, 1).is_err());
        assert!(radius_outlier_removal(&points, -1.0, 1).is_err());
    }

    #[test]
    fn test_zero_threshold_is_identity() {
        // Every count satisfies `count >= 0`, so the degenerate threshold
        // keeps the whole set.
        let points = cloud(&[(0.0, 0.0, 0.0), (10.0, 0.0, 0.0), (0.0, 10.0, 0.0)]);
        let result = radius_outlier_removal(&points, 0.05, 0).unwrap();
        assert_eq!(result.len(), points.len());
    }

    #[test]
    fn test_threshold_one_keeps_everything() {
        // Self counts as a neighbor, so k = 1 is the identity filter.
        let points = cloud(&[(0.0, 0.0, 0.0), (10.0, 0.0, 0.0), (0.0, 10.0, 0.0)]);
        let result = radius_outlier_removal(&points, 0.05, 1).unwrap();
        assert_eq!(result.len(), points.len());
    }

    #[test]
    fn test_threshold_above_count_removes_everything() {
        let points = cloud(&[(0.0, 0.0, 0.0), (0.01, 0.0, 0.0), (0.02, 0.0, 0.0)]);
        let result = radius_outlier_removal(&points, 1.0, points.len() + 1).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_isolated_points_are_removed() {
        // Dense line of 10 points spaced 0.01 apart, plus two isolated
        // points far away.
        let mut coords: Vec<(f32, f32, f32)> =
            (0..10).map(|i| (i as f32 * 0.01, 0.0, 0.0)).collect();
        coords.push((5.0, 5.0, 5.0));
        coords.push((-5.0, -5.0, -5.0));
        let points = cloud(&coords);

        let result = radius_outlier_removal(&points, 0.025, 3).unwrap();
        assert_eq!(result.len(), 10);
        assert!(result
            .iter()
            .all(|p| p.coordinates.norm() < 1.0));
    }

    #[test]
    fn test_preserves_input_record_data() {
        use crate::point::Color;
        use nalgebra::Vector3;

        let points = vec![
            Point::new(Vector3::new(0.0, 0.0, 0.0), Color::new(0.9, 0.1, 0.2)),
            Point::new(Vector3::new(0.005, 0.0, 0.0), Color::new(0.8, 0.2, 0.3)),
        ];
        let result = radius_outlier_removal(&points, 0.01, 2).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].color, points[0].color);
    }

    #[test]
    fn test_empty_input() {
        assert!(radius_outlier_removal(&[], 0.1, 2).unwrap().is_empty());
    }
}
