//! The host-visible point set and its operation surface.
//!
//! A `PointCloud` owns its points and optional normals exclusively; the
//! axis-aligned bounds are computed lazily and cached behind a read/write
//! lock so read-only queries on a shared reference stay safe. Every
//! neighborhood operation builds its own transient grid, so one failed
//! operation never corrupts the set's invariants.
//!
//! Label arrays (clustering) and index sequences (segmentation, searches)
//! are returned as new owned allocations aligned to the input indices;
//! stream-compacting operations (down-sampling, outlier removal) return
//! whole new sets.

use nalgebra::{Matrix4, Vector3};
use parking_lot::RwLock;

use crate::clustering;
use crate::downsample;
use crate::error::{Error, Result};
use crate::normals;
use crate::outlier;
use crate::point::{Point, PointProperty};
use crate::rgbd::{CameraParams, ColorFrame, DepthFrame};
use crate::search;
use crate::segmentation;

#[derive(Debug, Default)]
pub struct PointCloud {
    points: Vec<Point>,
    normals: Option<Vec<Vector3<f32>>>,
    bounds: RwLock<Option<(Vector3<f32>, Vector3<f32>)>>,
}

impl Clone for PointCloud {
    fn clone(&self) -> Self {
        Self {
            points: self.points.clone(),
            normals: self.normals.clone(),
            bounds: RwLock::new(*self.bounds.read()),
        }
    }
}

impl PointCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            points: Vec::with_capacity(n),
            normals: None,
            bounds: RwLock::new(None),
        }
    }

    /// Wrap an existing host point sequence.
    pub fn from_points(points: Vec<Point>) -> Self {
        Self {
            points,
            normals: None,
            bounds: RwLock::new(None),
        }
    }

    /// Project an RGB-D frame pair into a point cloud in the depth camera
    /// frame. Pixels without usable depth are compacted away, so the
    /// result is free of `Invalid` points.
    pub fn create_from_rgbd(
        depth: &DepthFrame,
        color: &ColorFrame,
        params: &CameraParams,
        z_min: f32,
        z_max: f32,
    ) -> Result<Self> {
        let points = crate::rgbd::project_rgbd(depth, color, params, z_min, z_max)?;
        Ok(Self::from_points(points))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Owned copy of the point sequence, aligned to input indices.
    pub fn download(&self) -> Vec<Point> {
        self.points.clone()
    }

    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    pub fn normals(&self) -> Option<&[Vector3<f32>]> {
        self.normals.as_deref()
    }

    /// Owned copy of the normals, aligned to input indices.
    pub fn download_normals(&self) -> Option<Vec<Vector3<f32>>> {
        self.normals.clone()
    }

    /// Componentwise minimum of all coordinates, `None` when empty.
    /// Computed on first access and cached until a mutation.
    pub fn min_bound(&self) -> Option<Vector3<f32>> {
        self.ensure_bounds().map(|(min, _)| min)
    }

    /// Componentwise maximum of all coordinates, `None` when empty.
    pub fn max_bound(&self) -> Option<Vector3<f32>> {
        self.ensure_bounds().map(|(_, max)| max)
    }

    fn ensure_bounds(&self) -> Option<(Vector3<f32>, Vector3<f32>)> {
        if let Some(bounds) = *self.bounds.read() {
            return Some(bounds);
        }

        let mut guard = self.bounds.write();
        if guard.is_none() && !self.points.is_empty() {
            let mut min = Vector3::repeat(f32::MAX);
            let mut max = Vector3::repeat(f32::MIN);
            for p in &self.points {
                min = min.inf(&p.coordinates);
                max = max.sup(&p.coordinates);
            }
            *guard = Some((min, max));
        }
        *guard
    }

    fn invalidate_caches(&mut self) {
        *self.bounds.get_mut() = None;
    }

    fn coords(&self) -> Vec<Vector3<f32>> {
        self.points.iter().map(|p| p.coordinates).collect()
    }

    /// Indexed operations require the set to be free of `Invalid` points.
    fn ensure_indexed(&self, op: &'static str) -> Result<()> {
        if self
            .points
            .iter()
            .any(|p| p.property == PointProperty::Invalid)
        {
            return Err(Error::invalid(
                op,
                "point cloud contains invalid points; compact them first",
            ));
        }
        Ok(())
    }

    /// Drop all `Invalid` points (and their normals), preserving the
    /// relative order of the survivors.
    pub fn compact_invalid(&mut self) {
        if let Some(normals) = self.normals.take() {
            let kept = self
                .points
                .iter()
                .zip(normals)
                .filter(|(p, _)| p.property != PointProperty::Invalid)
                .map(|(_, n)| n)
                .collect();
            self.normals = Some(kept);
        }
        self.points.retain(|p| p.property != PointProperty::Invalid);
        self.invalidate_caches();
    }

    /// Apply a rigid 4x4 transform to the coordinates and, when present,
    /// its rotation to the normals. No scale correction is applied; the
    /// caller guarantees rigidity. Cached bounds are invalidated.
    pub fn transform(&mut self, matrix: &Matrix4<f32>) {
        #[cfg(feature = "cuda")]
        if crate::runtime::is_cuda_available() {
            let coords = self.coords();
            match crate::runtime::transform_gpu(&coords, self.normals.as_deref(), matrix) {
                Ok((new_coords, new_normals)) => {
                    for (p, c) in self.points.iter_mut().zip(new_coords) {
                        p.coordinates = c;
                    }
                    if let Some(normals) = new_normals {
                        self.normals = Some(normals);
                    }
                    self.invalidate_caches();
                    return;
                }
                Err(e) => {
                    tracing::warn!("transform: GPU path failed ({e}), falling back to CPU");
                }
            }
        }

        let rotation = matrix.fixed_view::<3, 3>(0, 0).into_owned();
        for p in &mut self.points {
            let homogeneous = matrix * p.coordinates.push(1.0);
            p.coordinates = homogeneous.xyz();
        }
        if let Some(normals) = &mut self.normals {
            for n in normals.iter_mut() {
                *n = rotation * *n;
            }
        }
        self.invalidate_caches();
    }

    /// Estimate one unit normal per point by neighborhood PCA. Normals of
    /// degenerate neighborhoods (< 3 members) are zero vectors; signs are
    /// unspecified.
    pub fn estimate_normals(&mut self, search_radius: f32) -> Result<()> {
        self.ensure_indexed("estimate_normals")?;
        let coords = self.coords();
        let normals = normals::estimate_normals(&coords, search_radius)?;
        self.normals = Some(normals);
        Ok(())
    }

    /// Down-sample onto a voxel grid of side `voxel_size`, averaging
    /// coordinates and colors per occupied voxel.
    pub fn voxel_grid_down_sample(&self, voxel_size: f32) -> Result<PointCloud> {
        self.voxel_grid_down_sample_with_min(voxel_size, 1)
    }

    /// Down-sample, dropping voxels with fewer than `min_points_per_voxel`
    /// members.
    pub fn voxel_grid_down_sample_with_min(
        &self,
        voxel_size: f32,
        min_points_per_voxel: usize,
    ) -> Result<PointCloud> {
        self.ensure_indexed("voxel_grid_down_sample")?;
        let points = downsample::voxel_downsample(&self.points, voxel_size, min_points_per_voxel)?;
        Ok(PointCloud::from_points(points))
    }

    /// Keep only points with at least `min_neighbors` neighbors (self
    /// included) within `radius`. The result's bounds are recomputed
    /// lazily, never inherited.
    pub fn radius_outlier_removal(&self, radius: f32, min_neighbors: usize) -> Result<PointCloud> {
        self.ensure_indexed("radius_outlier_removal")?;
        let points = outlier::radius_outlier_removal(&self.points, radius, min_neighbors)?;
        Ok(PointCloud::from_points(points))
    }

    /// Euclidean clustering: dense labels in `0..n_clusters` aligned to
    /// the input order, `-1` for members of clusters outside the size
    /// window.
    pub fn euclidean_clustering(
        &self,
        tolerance: f32,
        min_size: usize,
        max_size: usize,
    ) -> Result<(Vec<i32>, usize)> {
        self.ensure_indexed("euclidean_clustering")?;
        clustering::euclidean_clustering(&self.coords(), tolerance, min_size, max_size)
    }

    /// Segment into locally convex objects. Requires normals.
    pub fn convex_obj_segmentation(
        &self,
        tolerance: f32,
        min_size: usize,
        max_size: usize,
    ) -> Result<Vec<Vec<u32>>> {
        self.ensure_indexed("convex_obj_segmentation")?;
        let Some(normals) = self.normals.as_deref() else {
            return Err(Error::missing_normals("convex_obj_segmentation"));
        };
        segmentation::convex_obj_segmentation(
            &self.coords(),
            normals,
            tolerance,
            min_size,
            max_size,
        )
    }

    /// For each point of `query`, the index of the closest point of
    /// `reference` within `radius`, or `-1`.
    pub fn nn_search(query: &PointCloud, reference: &PointCloud, radius: f32) -> Result<Vec<i32>> {
        query.ensure_indexed("nn_search")?;
        reference.ensure_indexed("nn_search")?;
        search::nn_search(&query.coords(), &reference.coords(), radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Color;
    use crate::test_utils;
    use approx::assert_relative_eq;

    #[test]
    fn test_bounds_cached_and_correct() {
        let cloud = PointCloud::from_points(test_utils::make_cube_cloud(
            0.2,
            0.04,
            [1.0, -2.0, 3.0],
        ));

        let min = cloud.min_bound().unwrap();
        let max = cloud.max_bound().unwrap();
        for p in cloud.points() {
            for axis in 0..3 {
                assert!(min[axis] <= p.coordinates[axis]);
                assert!(max[axis] >= p.coordinates[axis]);
            }
        }
    }

    #[test]
    fn test_empty_cloud_has_no_bounds() {
        let cloud = PointCloud::new();
        assert!(cloud.min_bound().is_none());
        assert!(cloud.max_bound().is_none());
    }

    #[test]
    fn test_transform_invalidates_bounds() {
        let mut cloud = PointCloud::from_points(vec![
            Point::from_coordinates(0.0, 0.0, 0.0),
            Point::from_coordinates(1.0, 1.0, 1.0),
        ]);
        assert_relative_eq!(cloud.max_bound().unwrap().x, 1.0);

        let mut shift = Matrix4::identity();
        shift[(0, 3)] = 10.0;
        cloud.transform(&shift);

        assert_relative_eq!(cloud.max_bound().unwrap().x, 11.0);
        assert_relative_eq!(cloud.min_bound().unwrap().x, 10.0);
    }

    #[test]
    fn test_transform_composition_matches_product() {
        let points = test_utils::make_cube_cloud(0.3, 0.1, [0.5, 0.5, 0.5]);

        let a = test_utils::rotation_z(0.3).append_translation(&Vector3::new(1.0, -0.5, 2.0));
        let b = test_utils::rotation_z(-0.7).append_translation(&Vector3::new(0.0, 3.0, -1.0));

        let mut sequential = PointCloud::from_points(points.clone());
        sequential.transform(&b);
        sequential.transform(&a);

        let mut composed = PointCloud::from_points(points);
        composed.transform(&(a * b));

        for (p, q) in sequential.points().iter().zip(composed.points()) {
            assert!(
                (p.coordinates - q.coordinates).norm() <= 1e-5,
                "{:?} vs {:?}",
                p.coordinates,
                q.coordinates
            );
        }
    }

    #[test]
    fn test_transform_rotates_normals_without_translating() {
        let mut cloud = PointCloud::from_points(
            test_utils::make_plane_cloud(20, 0.01, 0.0),
        );
        cloud.estimate_normals(0.03).unwrap();

        let m = test_utils::rotation_z(0.5).append_translation(&Vector3::new(5.0, 5.0, 5.0));
        let before = cloud.download_normals().unwrap();
        cloud.transform(&m);
        let after = cloud.download_normals().unwrap();

        // Rotation about z leaves z-aligned plane normals unchanged, and
        // the translation must not leak in.
        for (b, a) in before.iter().zip(after.iter()) {
            assert_relative_eq!(b.z.abs(), a.z.abs(), epsilon = 1e-5);
            assert_relative_eq!(a.norm(), 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_estimate_normals_planar_patch_scenario() {
        // 50x50 grid at 0.01 spacing with mild z noise: at least 95% of
        // the normals align with the z axis.
        let mut cloud = PointCloud::from_points(test_utils::make_noisy_plane_cloud(
            50, 0.01, 0.001, 42,
        ));
        cloud.estimate_normals(0.03).unwrap();

        let normals = cloud.normals().unwrap();
        let aligned = normals.iter().filter(|n| n.z.abs() >= 0.99).count();
        assert!(
            aligned as f32 >= 0.95 * normals.len() as f32,
            "only {aligned} of {} normals z-aligned",
            normals.len()
        );

        // Unit length for every populated neighborhood.
        for n in normals {
            let len = n.norm();
            assert!(len == 0.0 || (len - 1.0).abs() <= 1e-4);
        }
    }

    #[test]
    fn test_two_cube_clustering_scenario() {
        let mut points = test_utils::make_jittered_cube_cloud([0.0, 0.0, 0.0], 42);
        points.extend(test_utils::make_jittered_cube_cloud([5.0, 0.0, 0.0], 43));
        let cloud = PointCloud::from_points(points);

        let (labels, n_clusters) = cloud.euclidean_clustering(0.05, 100, 2000).unwrap();
        assert_eq!(n_clusters, 2);

        let first_size = labels.iter().filter(|&&l| l == 0).count();
        let second_size = labels.iter().filter(|&&l| l == 1).count();
        assert_eq!(first_size, 1000);
        assert_eq!(second_size, 1000);
    }

    #[test]
    fn test_outlier_scenario_dense_sphere_survives() {
        // 100 points inside a 0.01 sphere plus 10 isolated points at
        // distance 1: the sphere survives, the isolated points do not.
        let mut points = test_utils::make_sphere_cloud([0.0, 0.0, 0.0], 0.01, 100, 7);
        for k in 0..10 {
            let angle = k as f32;
            points.push(Point::from_coordinates(angle.cos(), angle.sin(), 0.0));
        }
        let cloud = PointCloud::from_points(points);

        let filtered = cloud.radius_outlier_removal(0.02, 5).unwrap();
        assert_eq!(filtered.len(), 100);
        assert!(filtered
            .points()
            .iter()
            .all(|p| p.coordinates.norm() <= 0.011));
    }

    #[test]
    fn test_single_voxel_scenario() {
        let mut points = Vec::new();
        for dx in [0.0, 0.004] {
            for dy in [0.0, 0.004] {
                for dz in [0.0, 0.004] {
                    points.push(Point::new(
                        Vector3::new(dx, dy, dz),
                        Color::new(0.25, 0.5, 0.75),
                    ));
                }
            }
        }
        let cloud = PointCloud::from_points(points);

        let down = cloud.voxel_grid_down_sample(0.01).unwrap();
        assert_eq!(down.len(), 1);
        let p = &down.points()[0];
        assert_relative_eq!(p.coordinates.x, 0.002, epsilon = 1e-6);
        assert_relative_eq!(p.coordinates.y, 0.002, epsilon = 1e-6);
        assert_relative_eq!(p.coordinates.z, 0.002, epsilon = 1e-6);
    }

    #[test]
    fn test_nn_scenario() {
        let reference = PointCloud::from_points(vec![
            Point::from_coordinates(0.0, 0.0, 0.0),
            Point::from_coordinates(1.0, 0.0, 0.0),
            Point::from_coordinates(0.0, 1.0, 0.0),
        ]);
        let query = PointCloud::from_points(vec![Point::from_coordinates(0.1, 0.1, 0.0)]);

        let result = PointCloud::nn_search(&query, &reference, 0.5).unwrap();
        assert_eq!(result, vec![0]);
    }

    #[test]
    fn test_segmentation_requires_normals() {
        let cloud = PointCloud::from_points(vec![Point::from_coordinates(0.0, 0.0, 1.0)]);
        let err = cloud.convex_obj_segmentation(0.02, 1, 10).unwrap_err();
        assert!(matches!(err, Error::MissingNormals));
    }

    #[test]
    fn test_indexed_operations_reject_invalid_points() {
        let mut invalid = Point::from_coordinates(0.0, 0.0, 0.0);
        invalid.property = PointProperty::Invalid;
        let cloud = PointCloud::from_points(vec![
            invalid,
            Point::from_coordinates(1.0, 0.0, 0.0),
        ]);

        assert!(cloud.voxel_grid_down_sample(0.1).is_err());
        assert!(cloud.radius_outlier_removal(0.1, 1).is_err());
        assert!(cloud.euclidean_clustering(0.1, 1, 10).is_err());
    }

    #[test]
    fn test_compact_invalid_keeps_alignment() {
        let mut invalid = Point::from_coordinates(9.0, 9.0, 9.0);
        invalid.property = PointProperty::Invalid;

        let mut cloud = PointCloud::from_points(vec![
            Point::from_coordinates(0.0, 0.0, 0.0),
            invalid,
            Point::from_coordinates(1.0, 0.0, 0.0),
        ]);
        cloud.normals = Some(vec![
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ]);

        cloud.compact_invalid();
        assert_eq!(cloud.len(), 2);
        let normals = cloud.normals().unwrap();
        assert_eq!(normals.len(), 2);
        assert_relative_eq!(normals[0].z, 1.0);
        assert_relative_eq!(normals[1].y, 1.0);
    }

    #[test]
    fn test_failed_operation_leaves_cloud_intact() {
        let mut cloud = PointCloud::from_points(vec![
            Point::from_coordinates(0.0, 0.0, 0.0),
            Point::from_coordinates(0.01, 0.0, 0.0),
        ]);
        assert!(cloud.estimate_normals(-1.0).is_err());
        assert!(!cloud.has_normals());
        assert_eq!(cloud.len(), 2);
        assert!(cloud.min_bound().is_some());
    }
}
