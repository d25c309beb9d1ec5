//! Normal estimation by PCA over the in-radius neighborhood.
//!
//! For each point, the covariance of its neighbors' coordinates is
//! decomposed and the eigenvector of the smallest eigenvalue becomes the
//! normal. Neighborhoods with fewer than three members (self included) get
//! a zero vector. The sign of a normal is unspecified at this layer;
//! consumers needing a consistent orientation must reorient downstream.
//!
//! The device path gathers per-point covariance sums with one kernel, then
//! finishes the eigen-decompositions on the host in parallel.

pub mod cpu;
pub mod kernels;

use nalgebra::{Matrix3, Vector3};

use crate::error::{Error, Result};
use crate::math::sym_eigen_3x3;
use crate::spatial_hash::{GridParams, SpatialHashGrid};

/// Fewest neighborhood members (self included) for a usable covariance.
pub const MIN_NEIGHBORS_FOR_NORMAL: usize = 3;

/// Estimate one unit normal per point.
pub fn estimate_normals(coords: &[Vector3<f32>], search_radius: f32) -> Result<Vec<Vector3<f32>>> {
    if !(search_radius > 0.0) || !search_radius.is_finite() {
        return Err(Error::invalid(
            "estimate_normals",
            format!("search radius must be positive, got {search_radius}"),
        ));
    }
    if coords.is_empty() {
        return Ok(Vec::new());
    }

    let mut min = Vector3::repeat(f32::MAX);
    let mut max = Vector3::repeat(f32::MIN);
    for p in coords {
        min = min.inf(p);
        max = max.sup(p);
    }
    let params = GridParams::padded(&min, &max, search_radius)?;
    let grid = SpatialHashGrid::build(coords, params);

    #[cfg(feature = "cuda")]
    if crate::runtime::is_cuda_available() {
        match gpu::covariance_sums_gpu(coords, &grid, search_radius) {
            Ok((sums, counts)) => return Ok(gpu::normals_from_sums(&sums, &counts)),
            Err(e) => {
                tracing::warn!("estimate_normals: GPU path failed ({e}), falling back to CPU");
            }
        }
    }

    Ok(cpu::estimate_normals_cpu(coords, &grid, search_radius))
}

/// Unit eigenvector of the smallest eigenvalue.
pub(crate) fn smallest_eigenvector(cov: &Matrix3<f64>) -> Vector3<f32> {
    let (_, vectors) = sym_eigen_3x3(cov);
    let v = vectors.column(0);
    Vector3::new(v.x as f32, v.y as f32, v.z as f32)
}

#[cfg(feature = "cuda")]
mod gpu {
    use super::*;
    use crate::runtime::{default_client, device_guard, flatten_coords, launch_dims, upload_grid};
    use cubecl::cuda::CudaRuntime;
    use cubecl::prelude::*;
    use rayon::prelude::*;

    /// Finish the device pass: turn per-point moment sums into unit
    /// normals, in parallel on the host.
    pub fn normals_from_sums(sums: &[f32], counts: &[u32]) -> Vec<Vector3<f32>> {
        counts
            .par_iter()
            .enumerate()
            .map(|(i, &count)| {
                if (count as usize) < MIN_NEIGHBORS_FOR_NORMAL {
                    return Vector3::zeros();
                }

                let s = &sums[i * 9..i * 9 + 9];
                let n = count as f64;
                let mean = Vector3::new(s[0] as f64, s[1] as f64, s[2] as f64) / n;
                let cov = Matrix3::new(
                    s[3] as f64 / n - mean.x * mean.x,
                    s[4] as f64 / n - mean.x * mean.y,
                    s[5] as f64 / n - mean.x * mean.z,
                    s[4] as f64 / n - mean.x * mean.y,
                    s[6] as f64 / n - mean.y * mean.y,
                    s[7] as f64 / n - mean.y * mean.z,
                    s[5] as f64 / n - mean.x * mean.z,
                    s[7] as f64 / n - mean.y * mean.z,
                    s[8] as f64 / n - mean.z * mean.z,
                );

                smallest_eigenvector(&cov)
            })
            .collect()
    }

    pub fn covariance_sums_gpu(
        coords: &[Vector3<f32>],
        grid: &SpatialHashGrid,
        radius: f32,
    ) -> Result<(Vec<f32>, Vec<u32>)> {
        device_guard("estimate_normals", || {
            let client = default_client();
            let n = coords.len();
            let table_len = grid.table_len();

            let points_gpu = client.create(f32::as_bytes(&flatten_coords(coords)));
            let table = upload_grid(&client, grid);
            let sums_gpu = client.empty(n * 9 * std::mem::size_of::<f32>());
            let counts_gpu = client.empty(n * std::mem::size_of::<u32>());

            let (cube_count, cube_dim) = launch_dims(n);
            unsafe {
                kernels::covariance_gather_kernel::launch_unchecked::<f32, CudaRuntime>(
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
                    ArrayArg::from_raw_parts::<f32>(&sums_gpu, n * 9, 1),
                    ArrayArg::from_raw_parts::<u32>(&counts_gpu, n, 1),
                );
            }

            let sums = f32::from_bytes(&client.read_one(sums_gpu))[..n * 9].to_vec();
            let counts = u32::from_bytes(&client.read_one(counts_gpu))[..n].to_vec();
            (sums, counts)
        })
    }
}
