//! GPU runtime plumbing shared by the operation modules.
//!
//! Every operation is a sequence of kernels launched one-thread-per-item;
//! host calls are synchronous because each dispatch ends with a blocking
//! readback. The CUDA pieces live behind the `cuda` feature; the kernels
//! themselves compile for any CubeCL target.

use cubecl::prelude::*;

/// Work-items per cube; every launch in this crate uses flat 1-D cubes.
pub const CUBE_DIM: u32 = 256;

/// Grid/block shape for a one-thread-per-item launch.
pub fn launch_dims(items: usize) -> (CubeCount, CubeDim) {
    let cubes = Ord::max((items as u32).div_ceil(CUBE_DIM), 1);
    (CubeCount::Static(cubes, 1, 1), CubeDim::new(CUBE_DIM, 1, 1))
}

/// Apply a row-major 4x4 rigid transform to every point.
#[cube(launch_unchecked)]
pub fn transform_points_kernel<F: Float>(
    points: &Array<F>,    // [N * 3] flattened
    transform: &Array<F>, // [16] row-major
    num_points: u32,
    output: &mut Array<F>,
) {
    let idx = ABSOLUTE_POS;

    if idx >= num_points {
        return;
    }

    let base = idx * 3;
    let x = points[base];
    let y = points[base + 1];
    let z = points[base + 2];

    output[base] = transform[0] * x + transform[1] * y + transform[2] * z + transform[3];
    output[base + 1] = transform[4] * x + transform[5] * y + transform[6] * z + transform[7];
    output[base + 2] = transform[8] * x + transform[9] * y + transform[10] * z + transform[11];
}

/// Rotate every normal by the upper-left 3x3 of a row-major 4x4 transform.
/// No translation and no scale correction: the caller guarantees rigidity.
#[cube(launch_unchecked)]
pub fn transform_normals_kernel<F: Float>(
    normals: &Array<F>,   // [N * 3] flattened
    transform: &Array<F>, // [16] row-major
    num_points: u32,
    output: &mut Array<F>,
) {
    let idx = ABSOLUTE_POS;

    if idx >= num_points {
        return;
    }

    let base = idx * 3;
    let x = normals[base];
    let y = normals[base + 1];
    let z = normals[base + 2];

    output[base] = transform[0] * x + transform[1] * y + transform[2] * z;
    output[base + 1] = transform[4] * x + transform[5] * y + transform[6] * z;
    output[base + 2] = transform[8] * x + transform[9] * y + transform[10] * z;
}

#[cfg(feature = "cuda")]
mod cuda {
    use cubecl::client::ComputeClient;
    use cubecl::cuda::{CudaDevice, CudaRuntime};
    use cubecl::prelude::*;
    use cubecl::server::Handle;
    use nalgebra::{Matrix4, Vector3};

    use super::{launch_dims, transform_normals_kernel, transform_points_kernel};
    use crate::error::{Error, Result};
    use crate::spatial_hash::SpatialHashGrid;

    /// Type alias for the CUDA compute client.
    pub type CudaClient = ComputeClient<<CudaRuntime as Runtime>::Server>;

    /// Client for device 0. CubeCL caches clients per device, so this is
    /// cheap to call at the start of every operation.
    pub fn default_client() -> CudaClient {
        let device = CudaDevice::new(0);
        CudaRuntime::client(&device)
    }

    /// Check whether a CUDA device can be initialized at all.
    pub fn is_cuda_available() -> bool {
        std::panic::catch_unwind(|| {
            let _device = CudaDevice::new(0);
        })
        .is_ok()
    }

    /// Run a block of device work, converting a runtime panic (allocation,
    /// launch, or synchronization failure) into `Error::Device` so callers
    /// can fall back to the CPU path.
    pub fn device_guard<T>(op: &'static str, work: impl FnOnce() -> T) -> Result<T> {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(work)).map_err(|payload| {
            let reason = payload
                .downcast_ref::<String>()
                .cloned()
                .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
                .unwrap_or_else(|| "accelerator runtime returned a non-success status".into());
            tracing::warn!(operation = op, "device failure: {reason}");
            Error::Device(format!("{op}: {reason}"))
        })
    }

    /// Device copies of the hash table arrays and sorted permutation.
    pub struct GridBuffers {
        pub cell_x: Handle,
        pub cell_y: Handle,
        pub cell_z: Handle,
        pub first: Handle,
        pub count: Handle,
        pub sorted: Handle,
    }

    pub fn upload_grid(client: &CudaClient, grid: &SpatialHashGrid) -> GridBuffers {
        let (cx, cy, cz, first, count) = grid.table_arrays();
        GridBuffers {
            cell_x: client.create(i32::as_bytes(&cx)),
            cell_y: client.create(i32::as_bytes(&cy)),
            cell_z: client.create(i32::as_bytes(&cz)),
            first: client.create(u32::as_bytes(&first)),
            count: client.create(u32::as_bytes(&count)),
            sorted: client.create(u32::as_bytes(&grid.sorted_indices)),
        }
    }

    pub fn flatten_coords(coords: &[Vector3<f32>]) -> Vec<f32> {
        coords.iter().flat_map(|p| [p.x, p.y, p.z]).collect()
    }

    pub fn unflatten_coords(flat: &[f32]) -> Vec<Vector3<f32>> {
        flat.chunks(3)
            .map(|c| Vector3::new(c[0], c[1], c[2]))
            .collect()
    }

    /// Transform coordinates (and optionally normals) on the device.
    pub fn transform_gpu(
        coords: &[Vector3<f32>],
        normals: Option<&[Vector3<f32>]>,
        matrix: &Matrix4<f32>,
    ) -> Result<(Vec<Vector3<f32>>, Option<Vec<Vector3<f32>>>)> {
        device_guard("transform", || {
            let client = default_client();
            let n = coords.len();

            // nalgebra stores column-major; the kernel reads row-major.
            let mut rows = [0.0f32; 16];
            for r in 0..4 {
                for c in 0..4 {
                    rows[r * 4 + c] = matrix[(r, c)];
                }
            }
            let transform_gpu = client.create(f32::as_bytes(&rows));

            let points_flat = flatten_coords(coords);
            let points_gpu = client.create(f32::as_bytes(&points_flat));
            let out_gpu = client.empty(n * 3 * std::mem::size_of::<f32>());

            let (cube_count, cube_dim) = launch_dims(n);
            unsafe {
                transform_points_kernel::launch_unchecked::<f32, CudaRuntime>(
                    &client,
                    cube_count,
                    cube_dim,
                    ArrayArg::from_raw_parts::<f32>(&points_gpu, n * 3, 1),
                    ArrayArg::from_raw_parts::<f32>(&transform_gpu, 16, 1),
                    ScalarArg::new(n as u32),
                    ArrayArg::from_raw_parts::<f32>(&out_gpu, n * 3, 1),
                );
            }

            let out_bytes = client.read_one(out_gpu);
            let new_coords = unflatten_coords(f32::from_bytes(&out_bytes));

            let new_normals = normals.map(|normals| {
                let normals_flat = flatten_coords(normals);
                let normals_gpu = client.create(f32::as_bytes(&normals_flat));
                let out_gpu = client.empty(n * 3 * std::mem::size_of::<f32>());

                let (cube_count, cube_dim) = launch_dims(n);
                unsafe {
                    transform_normals_kernel::launch_unchecked::<f32, CudaRuntime>(
                        &client,
                        cube_count,
                        cube_dim,
                        ArrayArg::from_raw_parts::<f32>(&normals_gpu, n * 3, 1),
                        ArrayArg::from_raw_parts::<f32>(&transform_gpu, 16, 1),
                        ScalarArg::new(n as u32),
                        ArrayArg::from_raw_parts::<f32>(&out_gpu, n * 3, 1),
                    );
                }

                let out_bytes = client.read_one(out_gpu);
                unflatten_coords(f32::from_bytes(&out_bytes))
            });

            (new_coords, new_normals)
        })
    }
}

#[cfg(feature = "cuda")]
pub use cuda::{
    default_client, device_guard, flatten_coords, is_cuda_available, transform_gpu,
    unflatten_coords, upload_grid, CudaClient, GridBuffers,
};

/// Without the `cuda` feature there is no accelerator to probe.
#[cfg(not(feature = "cuda"))]
pub fn is_cuda_available() -> bool {
    false
}

#[cfg(all(test, feature = "cuda"))]
mod tests {
    use super::*;
    use nalgebra::{Matrix4, Vector3};

    #[test]
    #[ignore = "Requires CUDA GPU"]
    fn test_transform_identity_gpu() {
        let coords = vec![Vector3::new(1.0, 2.0, 3.0), Vector3::new(-4.0, 0.5, 6.0)];
        let (out, _) = transform_gpu(&coords, None, &Matrix4::identity()).unwrap();
        for (a, b) in coords.iter().zip(out.iter()) {
            assert!((a - b).norm() < 1e-5);
        }
    }

    #[test]
    #[ignore = "Requires CUDA GPU"]
    fn test_transform_translation_gpu() {
        let coords = vec![Vector3::zeros()];
        let mut m = Matrix4::identity();
        m[(0, 3)] = 1.0;
        m[(1, 3)] = 2.0;
        m[(2, 3)] = 3.0;

        let (out, _) = transform_gpu(&coords, None, &m).unwrap();
        assert!((out[0] - Vector3::new(1.0, 2.0, 3.0)).norm() < 1e-5);
    }
}
