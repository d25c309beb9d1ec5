//! Euclidean clustering over the spatial hash grid.
//!
//! Two points belong to the same cluster when a chain of hops, each no
//! longer than `tolerance`, connects them. The canonical representative of
//! a cluster is the smallest member index; output labels are densified to
//! `0..n_clusters` in ascending-root order, and clusters outside the
//! `[min_size, max_size]` window are re-labeled to the sentinel `-1`.
//!
//! The CPU reference is a union-find with path compression where a union
//! always points the larger root at the smaller. The device path iterates
//! a per-point minimum-label relaxation kernel until a full pass changes
//! nothing; both converge to the same smallest-member labeling.

pub mod cpu;
pub mod kernels;

use nalgebra::Vector3;

use crate::error::{Error, Result};
use crate::spatial_hash::{GridParams, SpatialHashGrid};

/// Dense cluster labels plus the number of clusters inside the size
/// window. Labels are `-1` for members of out-of-window clusters.
pub fn euclidean_clustering(
    coords: &[Vector3<f32>],
    tolerance: f32,
    min_size: usize,
    max_size: usize,
) -> Result<(Vec<i32>, usize)> {
    validate_window("euclidean_clustering", tolerance, min_size, max_size)?;
    if coords.is_empty() {
        return Ok((Vec::new(), 0));
    }

    let grid = build_cluster_grid(coords, tolerance)?;
    let roots = component_roots(coords, &grid, tolerance);
    Ok(densify_labels(&roots, min_size, max_size))
}

pub(crate) fn validate_window(
    op: &'static str,
    tolerance: f32,
    min_size: usize,
    max_size: usize,
) -> Result<()> {
    if !(tolerance > 0.0) || !tolerance.is_finite() {
        return Err(Error::invalid(
            op,
            format!("tolerance must be positive, got {tolerance}"),
        ));
    }
    if min_size == 0 {
        return Err(Error::invalid(op, "minimum cluster size must be positive"));
    }
    if max_size < min_size {
        return Err(Error::invalid(
            op,
            format!("size window [{min_size}, {max_size}] is empty"),
        ));
    }
    Ok(())
}

pub(crate) fn build_cluster_grid(
    coords: &[Vector3<f32>],
    tolerance: f32,
) -> Result<SpatialHashGrid> {
    let mut min = Vector3::repeat(f32::MAX);
    let mut max = Vector3::repeat(f32::MIN);
    for p in coords {
        min = min.inf(p);
        max = max.sup(p);
    }
    let params = GridParams::padded(&min, &max, tolerance)?;
    Ok(SpatialHashGrid::build(coords, params))
}

/// Smallest-member-index label per point.
pub(crate) fn component_roots(
    coords: &[Vector3<f32>],
    grid: &SpatialHashGrid,
    tolerance: f32,
) -> Vec<u32> {
    #[cfg(feature = "cuda")]
    if crate::runtime::is_cuda_available() {
        match gpu::component_roots_gpu(coords, grid, tolerance) {
            Ok(roots) => return roots,
            Err(e) => {
                tracing::warn!("euclidean_clustering: GPU path failed ({e}), falling back to CPU");
            }
        }
    }

    cpu::component_roots_cpu(coords, grid, tolerance)
}

/// Compact root labels to dense ids in ascending-root order, mapping
/// clusters outside the size window to `-1`.
pub(crate) fn densify_labels(
    roots: &[u32],
    min_size: usize,
    max_size: usize,
) -> (Vec<i32>, usize) {
    let n = roots.len();
    let mut sizes = vec![0u32; n];
    for &r in roots {
        sizes[r as usize] += 1;
    }

    // Prefix count over the is-root mask, restricted to the size window.
    let mut dense = vec![-1i32; n];
    let mut next = 0i32;
    for i in 0..n {
        let size = sizes[i] as usize;
        if size > 0 && size >= min_size && size <= max_size {
            dense[i] = next;
            next += 1;
        }
    }

    let labels = roots.iter().map(|&r| dense[r as usize]).collect();
    (labels, next as usize)
}

#[cfg(feature = "cuda")]
mod gpu {
    use super::*;
    use crate::runtime::{default_client, device_guard, flatten_coords, launch_dims, upload_grid};
    use cubecl::cuda::CudaRuntime;
    use cubecl::prelude::*;

    /// Iterate the relaxation kernel until a full pass changes no label.
    /// Termination is bounded: labels only decrease and are bounded below
    /// by the component minimum.
    pub fn component_roots_gpu(
        coords: &[Vector3<f32>],
        grid: &SpatialHashGrid,
        tolerance: f32,
    ) -> Result<Vec<u32>> {
        device_guard("euclidean_clustering", || {
            let client = default_client();
            let n = coords.len();
            let table_len = grid.table_len();

            let points_gpu = client.create(f32::as_bytes(&flatten_coords(coords)));
            let table = upload_grid(&client, grid);

            let init: Vec<u32> = (0..n as u32).collect();
            let mut labels_in = client.create(u32::as_bytes(&init));
            let mut labels_out = client.empty(n * std::mem::size_of::<u32>());
            let changed_gpu = client.empty(n * std::mem::size_of::<u32>());

            loop {
                let (cube_count, cube_dim) = launch_dims(n);
                unsafe {
                    kernels::label_relax_kernel::launch_unchecked::<f32, CudaRuntime>(
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
                        ScalarArg::new(tolerance * tolerance),
                        ScalarArg::new(n as u32),
                        ArrayArg::from_raw_parts::<u32>(&labels_in, n, 1),
                        ArrayArg::from_raw_parts::<u32>(&labels_out, n, 1),
                        ArrayArg::from_raw_parts::<u32>(&changed_gpu, n, 1),
                    );
                }

                let changed_bytes = client.read_one(changed_gpu.clone());
                let any_changed = u32::from_bytes(&changed_bytes)[..n].iter().any(|&c| c != 0);

                std::mem::swap(&mut labels_in, &mut labels_out);
                if !any_changed {
                    break;
                }
            }

            let labels_bytes = client.read_one(labels_in);
            u32::from_bytes(&labels_bytes)[..n].to_vec()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> Vec<Vector3<f32>> {
        let mut coords = Vec::new();
        for i in 0..30 {
            let t = i as f32 * 0.001;
            coords.push(Vector3::new(t, 0.0, 0.0));
            coords.push(Vector3::new(5.0 + t, 0.0, 0.0));
        }
        coords
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let coords = vec![Vector3::zeros()];
        assert!(euclidean_clustering(&coords, 0.0, 1, 10).is_err());
        assert!(euclidean_clustering(&coords, 0.1, 0, 10).is_err());
        assert!(euclidean_clustering(&coords, 0.1, 5, 4).is_err());
    }

    #[test]
    fn test_two_separated_blobs() {
        let coords = two_blobs();
        let (labels, n_clusters) = euclidean_clustering(&coords, 0.05, 2, 100).unwrap();

        assert_eq!(n_clusters, 2);
        // Interleaved input: even indices are blob A, odd are blob B.
        for (i, &label) in labels.iter().enumerate() {
            assert_eq!(label, (i % 2) as i32);
        }
    }

    #[test]
    fn test_labels_dense_and_counted() {
        let coords = two_blobs();
        let (labels, n_clusters) = euclidean_clustering(&coords, 0.05, 2, 100).unwrap();

        let mut seen: Vec<i32> = labels.iter().copied().filter(|&l| l >= 0).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), n_clusters);
        assert_eq!(seen, (0..n_clusters as i32).collect::<Vec<_>>());
    }

    #[test]
    fn test_size_window_sentinels() {
        let mut coords = two_blobs();
        // A third, tiny blob of 2 points.
        coords.push(Vector3::new(10.0, 0.0, 0.0));
        coords.push(Vector3::new(10.001, 0.0, 0.0));

        let (labels, n_clusters) = euclidean_clustering(&coords, 0.05, 5, 100).unwrap();
        assert_eq!(n_clusters, 2);
        assert_eq!(labels[coords.len() - 1], -1);
        assert_eq!(labels[coords.len() - 2], -1);
    }

    #[test]
    fn test_soundness_of_shared_labels() {
        // For every same-labeled pair a tolerance path must exist; verify
        // via a brute-force flood fill.
        let coords: Vec<Vector3<f32>> = (0..40)
            .map(|i| {
                let t = i as f32 * 0.613;
                Vector3::new(t.sin() * 0.4, t.cos() * 0.4, (i / 8) as f32)
            })
            .collect();
        let tolerance = 0.35f32;

        let (labels, _) = euclidean_clustering(&coords, tolerance, 1, coords.len()).unwrap();

        // Brute-force components.
        let n = coords.len();
        let mut component = vec![usize::MAX; n];
        let mut next = 0usize;
        for start in 0..n {
            if component[start] != usize::MAX {
                continue;
            }
            let mut stack = vec![start];
            component[start] = next;
            while let Some(i) = stack.pop() {
                for j in 0..n {
                    if component[j] == usize::MAX
                        && (coords[i] - coords[j]).norm_squared() <= tolerance * tolerance
                    {
                        component[j] = next;
                        stack.push(j);
                    }
                }
            }
            next += 1;
        }

        for i in 0..n {
            for j in 0..n {
                assert_eq!(
                    labels[i] == labels[j],
                    component[i] == component[j],
                    "label/component disagreement for pair ({i}, {j})"
                );
            }
        }
    }

    #[test]
    fn test_canonical_root_is_smallest_index() {
        let coords = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.01, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.01, 0.0, 0.0),
        ];
        let grid = build_cluster_grid(&coords, 0.05).unwrap();
        let roots = component_roots(&coords, &grid, 0.05);
        assert_eq!(roots, vec![0, 0, 2, 2]);
    }

    #[test]
    fn test_gaussian_blobs_cluster_separately() {
        use rand::prelude::*;
        use rand_distr::Normal;

        let mut rng = StdRng::seed_from_u64(11);
        let dist = Normal::new(0.0f32, 0.002).unwrap();

        let mut coords = Vec::new();
        for center in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
            for _ in 0..40 {
                coords.push(Vector3::new(
                    center[0] + dist.sample(&mut rng),
                    center[1] + dist.sample(&mut rng),
                    center[2] + dist.sample(&mut rng),
                ));
            }
        }

        let (labels, n_clusters) = euclidean_clustering(&coords, 0.05, 10, 100).unwrap();
        assert_eq!(n_clusters, 3);
        for blob in 0..3 {
            let size = labels
                .iter()
                .skip(blob * 40)
                .take(40)
                .filter(|&&l| l == blob as i32)
                .count();
            assert_eq!(size, 40, "blob {blob} fragmented");
        }
    }

    #[test]
    fn test_empty_input() {
        let (labels, n_clusters) = euclidean_clustering(&[], 0.1, 1, 10).unwrap();
        assert!(labels.is_empty());
        assert_eq!(n_clusters, 0);
    }
}
