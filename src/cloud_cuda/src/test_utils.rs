//! Synthetic point cloud generators for tests.
//!
//! Randomized shapes use a small seeded LCG instead of a thread RNG so
//! every test run sees identical data.

use nalgebra::{Matrix4, Vector3};

use crate::point::Point;

/// Deterministic uniform sampler in `[0, 1)`.
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9E3779B97F4A7C15).wrapping_add(1))
    }

    fn next(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) as f32) / (u32::MAX >> 1) as f32
    }

    /// Uniform in `[-limit, limit]`.
    fn jitter(&mut self, limit: f32) -> f32 {
        (self.next() * 2.0 - 1.0) * limit
    }
}

/// Regular grid filling a cube of the given side, anchored at `offset`.
pub fn make_cube_cloud(side: f32, interval: f32, offset: [f32; 3]) -> Vec<Point> {
    let per_axis = ((side / interval) as usize) + 1;
    let mut points = Vec::with_capacity(per_axis * per_axis * per_axis);
    for i in 0..per_axis {
        for j in 0..per_axis {
            for k in 0..per_axis {
                points.push(Point::from_coordinates(
                    offset[0] + k as f32 * interval,
                    offset[1] + j as f32 * interval,
                    offset[2] + i as f32 * interval,
                ));
            }
        }
    }
    points
}

/// Square grid of `n x n` points in the plane `z = z_value`.
pub fn make_plane_cloud(n: usize, interval: f32, z_value: f32) -> Vec<Point> {
    let mut points = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            points.push(Point::from_coordinates(
                j as f32 * interval,
                i as f32 * interval,
                z_value,
            ));
        }
    }
    points
}

/// Planar grid with bounded pseudo-Gaussian z noise of scale `sigma`
/// (sum of three uniforms, clamped by construction to `3 * sigma`).
pub fn make_noisy_plane_cloud(n: usize, interval: f32, sigma: f32, seed: u64) -> Vec<Point> {
    let mut rng = Lcg::new(seed);
    let mut points = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            let noise = rng.jitter(sigma) + rng.jitter(sigma) + rng.jitter(sigma);
            points.push(Point::from_coordinates(
                j as f32 * interval,
                i as f32 * interval,
                noise,
            ));
        }
    }
    points
}

/// A 10x10x10 grid cube (1000 points) centered at `center`, each point
/// jittered by at most a tenth of the 0.04 grid spacing. The bounded
/// jitter keeps every axis-neighbor pair within a 0.05 clustering
/// tolerance.
pub fn make_jittered_cube_cloud(center: [f32; 3], seed: u64) -> Vec<Point> {
    const SPACING: f32 = 0.04;
    const JITTER: f32 = 0.004;

    let mut rng = Lcg::new(seed);
    let mut points = Vec::with_capacity(1000);
    for i in 0..10 {
        for j in 0..10 {
            for k in 0..10 {
                points.push(Point::from_coordinates(
                    center[0] + (k as f32 - 4.5) * SPACING + rng.jitter(JITTER),
                    center[1] + (j as f32 - 4.5) * SPACING + rng.jitter(JITTER),
                    center[2] + (i as f32 - 4.5) * SPACING + rng.jitter(JITTER),
                ));
            }
        }
    }
    points
}

/// `count` points uniformly distributed inside a sphere, by rejection
/// sampling.
pub fn make_sphere_cloud(center: [f32; 3], radius: f32, count: usize, seed: u64) -> Vec<Point> {
    let mut rng = Lcg::new(seed);
    let mut points = Vec::with_capacity(count);
    while points.len() < count {
        let x = rng.jitter(1.0);
        let y = rng.jitter(1.0);
        let z = rng.jitter(1.0);
        if x * x + y * y + z * z <= 1.0 {
            points.push(Point::from_coordinates(
                center[0] + x * radius,
                center[1] + y * radius,
                center[2] + z * radius,
            ));
        }
    }
    points
}

/// Homogeneous rotation about the z axis.
pub fn rotation_z(angle: f32) -> Matrix4<f32> {
    let (sin, cos) = angle.sin_cos();
    let mut m = Matrix4::identity();
    m[(0, 0)] = cos;
    m[(0, 1)] = -sin;
    m[(1, 0)] = sin;
    m[(1, 1)] = cos;
    m
}

/// Coordinates of a point cloud as bare vectors.
pub fn coords_of(points: &[Point]) -> Vec<Vector3<f32>> {
    points.iter().map(|p| p.coordinates).collect()
}
