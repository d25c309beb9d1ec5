//! Voxel-grid down-sampling.
//!
//! Every occupied voxel of a coarse grid collapses to one synthesized
//! point carrying the arithmetic mean of its members' coordinates and
//! colors. Unlike the search grid, the voxel grid is anchored at the data
//! minimum with no padding, and needs no hash table: grouping is a sort by
//! voxel key. Output order is ascending voxel key, not input order.

pub mod cpu;

use nalgebra::Vector3;

use crate::error::{Error, Result};
use crate::point::Point;

/// Integer dimensions of the voxel grid anchored at `min_bound`.
///
/// Fails when any axis would overflow a signed 32-bit voxel coordinate.
pub(crate) fn voxel_dims(
    min_bound: &Vector3<f32>,
    max_bound: &Vector3<f32>,
    voxel_size: f32,
) -> Result<[i64; 3]> {
    let mut dims = [0i64; 3];
    for axis in 0..3 {
        let extent = (max_bound[axis] - min_bound[axis]) as f64;
        let cells = (extent / voxel_size as f64).floor() + 1.0;
        if !cells.is_finite() || cells > i32::MAX as f64 {
            return Err(Error::invalid(
                "voxel_grid_down_sample",
                format!("extent {extent} overflows voxel coordinates at voxel size {voxel_size}"),
            ));
        }
        dims[axis] = cells as i64;
    }
    Ok(dims)
}

/// Down-sample `points` on a grid of side `voxel_size`, dropping voxels
/// with fewer than `min_points_per_voxel` members.
pub fn voxel_downsample(
    points: &[Point],
    voxel_size: f32,
    min_points_per_voxel: usize,
) -> Result<Vec<Point>> {
    if !(voxel_size > 0.0) || !voxel_size.is_finite() {
        return Err(Error::invalid(
            "voxel_grid_down_sample",
            format!("voxel size must be positive, got {voxel_size}"),
        ));
    }
    if points.is_empty() {
        return Ok(Vec::new());
    }

    let mut min = Vector3::repeat(f32::MAX);
    let mut max = Vector3::repeat(f32::MIN);
    for p in points {
        min = min.inf(&p.coordinates);
        max = max.sup(&p.coordinates);
    }
    let dims = voxel_dims(&min, &max, voxel_size)?;

    #[cfg(feature = "cuda")]
    if crate::runtime::is_cuda_available() {
        match gpu::voxel_keys_gpu(points, &min, voxel_size, dims) {
            Ok(keys) => return Ok(cpu::accumulate_voxels(points, keys, min_points_per_voxel)),
            Err(e) => {
                tracing::warn!("voxel_grid_down_sample: GPU path failed ({e}), falling back to CPU");
            }
        }
    }

    let keys = cpu::compute_voxel_keys_cpu(points, &min, voxel_size, dims);
    Ok(cpu::accumulate_voxels(points, keys, min_points_per_voxel))
}

#[cfg(feature = "cuda")]
mod gpu {
    use super::*;
    use crate::runtime::{default_client, device_guard, launch_dims};
    use crate::spatial_hash::kernels::compute_cell_coords_kernel;
    use cubecl::cuda::CudaRuntime;
    use cubecl::prelude::*;

    /// Voxel keys for every point, with the per-point cell assignment on
    /// the device. Accumulation stays on the host: voxel averaging needs
    /// atomic float adds whose availability is platform-dependent.
    pub fn voxel_keys_gpu(
        points: &[Point],
        min_bound: &Vector3<f32>,
        voxel_size: f32,
        dims: [i64; 3],
    ) -> Result<Vec<u64>> {
        device_guard("voxel_grid_down_sample", || {
            let client = default_client();
            let n = points.len();

            let flat: Vec<f32> = points
                .iter()
                .flat_map(|p| [p.coordinates.x, p.coordinates.y, p.coordinates.z])
                .collect();
            let points_gpu = client.create(f32::as_bytes(&flat));

            let cx_gpu = client.empty(n * std::mem::size_of::<i32>());
            let cy_gpu = client.empty(n * std::mem::size_of::<i32>());
            let cz_gpu = client.empty(n * std::mem::size_of::<i32>());

            let (cube_count, cube_dim) = launch_dims(n);
            unsafe {
                compute_cell_coords_kernel::launch_unchecked::<f32, CudaRuntime>(
                    &client,
                    cube_count,
                    cube_dim,
                    ArrayArg::from_raw_parts::<f32>(&points_gpu, n * 3, 1),
                    ScalarArg::new(min_bound.x),
                    ScalarArg::new(min_bound.y),
                    ScalarArg::new(min_bound.z),
                    ScalarArg::new(1.0 / voxel_size),
                    ScalarArg::new(n as u32),
                    ArrayArg::from_raw_parts::<i32>(&cx_gpu, n, 1),
                    ArrayArg::from_raw_parts::<i32>(&cy_gpu, n, 1),
                    ArrayArg::from_raw_parts::<i32>(&cz_gpu, n, 1),
                );
            }

            let cx = i32::from_bytes(&client.read_one(cx_gpu)).to_vec();
            let cy = i32::from_bytes(&client.read_one(cy_gpu)).to_vec();
            let cz = i32::from_bytes(&client.read_one(cz_gpu)).to_vec();

            (0..n)
                .map(|i| {
                    (cz[i] as u64 * dims[1] as u64 + cy[i] as u64) * dims[0] as u64 + cx[i] as u64
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::{Color, PointProperty};
    use approx::assert_relative_eq;

    fn colored(x: f32, y: f32, z: f32, shade: f32) -> Point {
        Point::new(Vector3::new(x, y, z), Color::new(shade, shade, shade))
    }

    #[test]
    fn test_rejects_bad_voxel_size() {
        let points = vec![Point::from_coordinates(0.0, 0.0, 0.0)];
        assert!(voxel_downsample(&points, 0.0, 1).is_err());
        assert!(voxel_downsample(&points, -0.5, 1).is_err());
    }

    #[test]
    fn test_rejects_overflowing_extent() {
        let points = vec![
            Point::from_coordinates(0.0, 0.0, 0.0),
            Point::from_coordinates(1e9, 0.0, 0.0),
        ];
        assert!(voxel_downsample(&points, 1e-4, 1).is_err());
    }

    #[test]
    fn test_empty_input() {
        assert!(voxel_downsample(&[], 0.1, 1).unwrap().is_empty());
    }

    #[test]
    fn test_corner_cube_collapses_to_centroid() {
        // 8 points at the corners of [0, 0.004]^3 inside one 0.01 voxel.
        let mut points = Vec::new();
        for dx in [0.0, 0.004] {
            for dy in [0.0, 0.004] {
                for dz in [0.0, 0.004] {
                    points.push(colored(dx, dy, dz, 0.5));
                }
            }
        }

        let result = voxel_downsample(&points, 0.01, 1).unwrap();
        assert_eq!(result.len(), 1);

        let p = &result[0];
        assert_relative_eq!(p.coordinates.x, 0.002, epsilon = 1e-6);
        assert_relative_eq!(p.coordinates.y, 0.002, epsilon = 1e-6);
        assert_relative_eq!(p.coordinates.z, 0.002, epsilon = 1e-6);
        assert_eq!(p.property, PointProperty::Inactive);
        assert_relative_eq!(p.color.r, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_color_averaging() {
        let points = vec![
            Point::new(Vector3::new(0.1, 0.1, 0.1), Color::new(1.0, 0.0, 0.0)),
            Point::new(Vector3::new(0.2, 0.2, 0.2), Color::new(0.0, 1.0, 0.0)),
        ];
        let result = voxel_downsample(&points, 1.0, 1).unwrap();
        assert_eq!(result.len(), 1);
        assert_relative_eq!(result[0].color.r, 0.5, epsilon = 1e-6);
        assert_relative_eq!(result[0].color.g, 0.5, epsilon = 1e-6);
        assert_relative_eq!(result[0].color.b, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_downsample_idempotent() {
        // Down-sampling a down-sampled set at the same size changes nothing
        // but ordering-independent content.
        let mut points = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                points.push(colored(i as f32 * 0.013, j as f32 * 0.017, 0.0, 0.3));
            }
        }

        let once = voxel_downsample(&points, 0.05, 1).unwrap();
        let twice = voxel_downsample(&once, 0.05, 1).unwrap();

        assert_eq!(once.len(), twice.len());
        let mut a: Vec<_> = once
            .iter()
            .map(|p| (p.coordinates.x, p.coordinates.y, p.coordinates.z))
            .collect();
        let mut b: Vec<_> = twice
            .iter()
            .map(|p| (p.coordinates.x, p.coordinates.y, p.coordinates.z))
            .collect();
        a.sort_by(|p, q| p.partial_cmp(q).unwrap());
        b.sort_by(|p, q| p.partial_cmp(q).unwrap());
        for (p, q) in a.iter().zip(b.iter()) {
            assert_relative_eq!(p.0, q.0, epsilon = 1e-5);
            assert_relative_eq!(p.1, q.1, epsilon = 1e-5);
            assert_relative_eq!(p.2, q.2, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_min_points_per_voxel_drops_sparse_voxels() {
        let mut points = vec![
            colored(0.1, 0.1, 0.1, 0.2),
            colored(0.2, 0.2, 0.2, 0.2),
            colored(0.3, 0.1, 0.2, 0.2),
        ];
        // Lone point in a distant voxel.
        points.push(colored(5.0, 5.0, 5.0, 0.2));

        let all = voxel_downsample(&points, 1.0, 1).unwrap();
        assert_eq!(all.len(), 2);

        let dense_only = voxel_downsample(&points, 1.0, 2).unwrap();
        assert_eq!(dense_only.len(), 1);
    }

    #[test]
    fn test_output_sorted_by_voxel_key() {
        let points = vec![
            colored(2.5, 0.0, 0.0, 0.1),
            colored(0.5, 0.0, 0.0, 0.1),
            colored(1.5, 0.0, 0.0, 0.1),
        ];
        let result = voxel_downsample(&points, 1.0, 1).unwrap();
        assert_eq!(result.len(), 3);
        // Keys ascend along x here, so output x must ascend too.
        assert!(result[0].coordinates.x < result[1].coordinates.x);
        assert!(result[1].coordinates.x < result[2].coordinates.x);
    }
}
