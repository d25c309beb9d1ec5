//! Radius neighbor enumeration and nearest-neighbor search over the
//! spatial hash grid.
//!
//! Both searches build a transient grid, then run one pass per point over
//! the 27-cell stencil of its cell. The radius search returns contiguous
//! per-point slices whose internal order is unspecified but reproducible;
//! the 1-NN search returns one reference index per query with `-1` as the
//! not-found sentinel.

pub mod cpu;
pub mod kernels;

use nalgebra::Vector3;

use crate::error::{Error, Result};
use crate::spatial_hash::{GridParams, SpatialHashGrid};

/// Neighbor indices for every point, stored as one flat array plus a
/// `(start, count)` range per point. Self is always included.
#[derive(Debug, Clone, Default)]
pub struct NeighborLists {
    pub indices: Vec<u32>,
    pub ranges: Vec<(u32, u32)>,
}

impl NeighborLists {
    pub fn neighbors_of(&self, point: usize) -> &[u32] {
        let (start, count) = self.ranges[point];
        &self.indices[start as usize..(start + count) as usize]
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

fn bounds_of(coords: &[Vector3<f32>]) -> (Vector3<f32>, Vector3<f32>) {
    let mut min = Vector3::repeat(f32::MAX);
    let mut max = Vector3::repeat(f32::MIN);
    for p in coords {
        min = min.inf(p);
        max = max.sup(p);
    }
    (min, max)
}

/// Enumerate all neighbors within `radius` of every point.
///
/// The grid uses a cell side of `2 * radius`, so the stencil is a
/// conservative superset of the ball being tested.
pub fn radius_neighbors(coords: &[Vector3<f32>], radius: f32) -> Result<NeighborLists> {
    if !(radius > 0.0) || !radius.is_finite() {
        return Err(Error::invalid(
            "radius_neighbors",
            format!("radius must be positive, got {radius}"),
        ));
    }
    if coords.is_empty() {
        return Ok(NeighborLists::default());
    }

    let (min, max) = bounds_of(coords);
    let params = GridParams::padded(&min, &max, 2.0 * radius)?;
    let grid = SpatialHashGrid::build(coords, params);

    #[cfg(feature = "cuda")]
    if crate::runtime::is_cuda_available() {
        match gpu::radius_neighbors_gpu(coords, &grid, radius) {
            Ok(lists) => return Ok(lists),
            Err(e) => {
                tracing::warn!("radius_neighbors: GPU path failed ({e}), falling back to CPU");
            }
        }
    }

    Ok(cpu::radius_neighbors_cpu(coords, &grid, radius))
}

/// For each query point, the index of the closest reference point within
/// `radius`, or `-1` when none exists.
///
/// The grid covers the union bounds of both sets with a cell side equal to
/// `radius`, so reference candidates for a query are confined to its
/// 27-cell stencil.
pub fn nn_search(
    query: &[Vector3<f32>],
    reference: &[Vector3<f32>],
    radius: f32,
) -> Result<Vec<i32>> {
    if !(radius > 0.0) || !radius.is_finite() {
        return Err(Error::invalid(
            "nn_search",
            format!("radius must be positive, got {radius}"),
        ));
    }
    if query.is_empty() {
        return Ok(Vec::new());
    }
    if reference.is_empty() {
        return Ok(vec![-1; query.len()]);
    }

    let (qmin, qmax) = bounds_of(query);
    let (rmin, rmax) = bounds_of(reference);
    let params = GridParams::padded(&qmin.inf(&rmin), &qmax.sup(&rmax), radius)?;
    let grid = SpatialHashGrid::build(reference, params);

    #[cfg(feature = "cuda")]
    if crate::runtime::is_cuda_available() {
        match gpu::nn_search_gpu(query, reference, &grid, radius) {
            Ok(result) => return Ok(result),
            Err(e) => {
                tracing::warn!("nn_search: GPU path failed ({e}), falling back to CPU");
            }
        }
    }

    Ok(cpu::nn_search_cpu(query, reference, &grid, radius))
}

#[cfg(feature = "cuda")]
mod gpu {
    use super::*;
    use crate::runtime::{default_client, device_guard, flatten_coords, launch_dims, upload_grid};
    use cubecl::cuda::CudaRuntime;
    use cubecl::prelude::*;

    pub fn radius_neighbors_gpu(
        coords: &[Vector3<f32>],
        grid: &SpatialHashGrid,
        radius: f32,
    ) -> Result<NeighborLists> {
        device_guard("radius_neighbors", || {
            let client = default_client();
            let n = coords.len();
            let table_len = grid.table_len();
            let flat = flatten_coords(coords);

            let points_gpu = client.create(f32::as_bytes(&flat));
            let table = upload_grid(&client, grid);
            let counts_gpu = client.empty(n * std::mem::size_of::<u32>());

            let (cube_count, cube_dim) = launch_dims(n);
            unsafe {
                kernels::radius_count_kernel::launch_unchecked::<f32, CudaRuntime>(
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
            let counts = u32::from_bytes(&counts_bytes).to_vec();

            // Exclusive prefix sum on the host, as with the grid sort.
            let mut offsets = Vec::with_capacity(n);
            let mut total = 0u32;
            for &c in &counts {
                offsets.push(total);
                total += c;
            }

            let offsets_gpu = client.create(u32::as_bytes(&offsets));
            let out_gpu = client.empty((total as usize).max(1) * std::mem::size_of::<u32>());

            let (cube_count, cube_dim) = launch_dims(n);
            unsafe {
                kernels::radius_gather_kernel::launch_unchecked::<f32, CudaRuntime>(
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
                    ArrayArg::from_raw_parts::<u32>(&offsets_gpu, n, 1),
                    ArrayArg::from_raw_parts::<u32>(&out_gpu, total as usize, 1),
                );
            }

            let indices_bytes = client.read_one(out_gpu);
            let indices = u32::from_bytes(&indices_bytes)[..total as usize].to_vec();

            let ranges = offsets
                .iter()
                .zip(counts.iter())
                .map(|(&start, &count)| (start, count))
                .collect();

            NeighborLists { indices, ranges }
        })
    }

    pub fn nn_search_gpu(
        query: &[Vector3<f32>],
        reference: &[Vector3<f32>],
        grid: &SpatialHashGrid,
        radius: f32,
    ) -> Result<Vec<i32>> {
        device_guard("nn_search", || {
            let client = default_client();
            let nq = query.len();
            let nr = reference.len();
            let table_len = grid.table_len();

            let query_gpu = client.create(f32::as_bytes(&flatten_coords(query)));
            let reference_gpu = client.create(f32::as_bytes(&flatten_coords(reference)));
            let table = upload_grid(&client, grid);
            let out_gpu = client.empty(nq * std::mem::size_of::<i32>());

            let (cube_count, cube_dim) = launch_dims(nq);
            unsafe {
                kernels::nn_search_kernel::launch_unchecked::<f32, CudaRuntime>(
                    &client,
                    cube_count,
                    cube_dim,
                    ArrayArg::from_raw_parts::<f32>(&query_gpu, nq * 3, 1),
                    ArrayArg::from_raw_parts::<f32>(&reference_gpu, nr * 3, 1),
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
                    ArrayArg::from_raw_parts::<u32>(&table.sorted, nr, 1),
                    ScalarArg::new(grid.table_len() as u32 - 1),
                    ScalarArg::new(grid.probe_bound()),
                    ScalarArg::new(radius * radius),
                    ScalarArg::new(nq as u32),
                    ArrayArg::from_raw_parts::<i32>(&out_gpu, nq, 1),
                );
            }

            let out_bytes = client.read_one(out_gpu);
            i32::from_bytes(&out_bytes)[..nq].to_vec()
        })
    }
}
