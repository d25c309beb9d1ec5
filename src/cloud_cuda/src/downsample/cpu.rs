//! Host-side voxel key computation and accumulation.

use nalgebra::Vector3;

use crate::point::{Color, Point, PointProperty};

/// Linearized voxel key per point on a grid anchored at `min_bound`.
pub fn compute_voxel_keys_cpu(
    points: &[Point],
    min_bound: &Vector3<f32>,
    voxel_size: f32,
    dims: [i64; 3],
) -> Vec<u64> {
    let inv = 1.0 / voxel_size;
    points
        .iter()
        .map(|p| {
            let c = &p.coordinates;
            let vx = ((c.x - min_bound.x) * inv).floor() as u64;
            let vy = ((c.y - min_bound.y) * inv).floor() as u64;
            let vz = ((c.z - min_bound.z) * inv).floor() as u64;
            (vz * dims[1] as u64 + vy) * dims[0] as u64 + vx
        })
        .collect()
}

/// Group points by voxel key and emit one averaged point per voxel with at
/// least `min_points_per_voxel` members, ordered by ascending key.
///
/// Sums are accumulated in f64 so large voxels do not lose precision.
pub fn accumulate_voxels(
    points: &[Point],
    keys: Vec<u64>,
    min_points_per_voxel: usize,
) -> Vec<Point> {
    let mut pairs: Vec<(u64, u32)> = keys.into_iter().zip(0u32..).collect();
    pairs.sort_unstable();

    let min_points = min_points_per_voxel.max(1);
    let mut result = Vec::new();

    let mut run_start = 0usize;
    while run_start < pairs.len() {
        let key = pairs[run_start].0;
        let mut run_end = run_start + 1;
        while run_end < pairs.len() && pairs[run_end].0 == key {
            run_end += 1;
        }

        let count = run_end - run_start;
        if count >= min_points {
            let mut coord_sum = Vector3::<f64>::zeros();
            let mut color_sum = [0.0f64; 3];
            for &(_, idx) in &pairs[run_start..run_end] {
                let p = &points[idx as usize];
                coord_sum += p.coordinates.cast::<f64>();
                color_sum[0] += p.color.r as f64;
                color_sum[1] += p.color.g as f64;
                color_sum[2] += p.color.b as f64;
            }

            let n = count as f64;
            result.push(Point {
                coordinates: (coord_sum / n).cast::<f32>(),
                color: Color::new(
                    (color_sum[0] / n) as f32,
                    (color_sum[1] / n) as f32,
                    (color_sum[2] / n) as f32,
                ),
                property: PointProperty::Inactive,
            });
        }

        run_start = run_end;
    }

    result
}
