//! RGB-D collaborator interfaces and the depth-to-cloud projection.
//!
//! The sensor stack (device drivers, frame alignment, undistortion) lives
//! outside this crate; these types are the narrow seam it hands frames
//! through. Depth arrives as Z16 codes, color as packed BGR8, and the
//! camera parameters carry both pinhole intrinsics and the depth-to-color
//! extrinsics. The projection produces points in the depth camera frame.

use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::point::{Color, Point};

/// Pixel formats accepted at this seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// 16-bit depth codes, `depth_scale` meters per unit.
    Z16,
    /// 8-bit blue/green/red triplets.
    Bgr8,
}

/// Pinhole intrinsics of one camera.
#[derive(Debug, Clone, Copy)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub width: u32,
    pub height: u32,
}

/// Rigid transform from the depth camera frame to the color camera frame.
#[derive(Debug, Clone)]
pub struct Extrinsics {
    pub rotation: Matrix3<f32>,
    pub translation: Vector3<f32>,
}

impl Extrinsics {
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }
}

/// Everything the projection needs to know about the sensor pair.
#[derive(Debug, Clone)]
pub struct CameraParams {
    pub depth_intrinsics: Intrinsics,
    pub color_intrinsics: Intrinsics,
    pub depth_to_color: Extrinsics,
    /// Meters per depth code unit.
    pub depth_scale: f32,
}

/// One depth frame: `width * height` codes, row-major.
#[derive(Debug, Clone)]
pub struct DepthFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u16>,
    pub format: FrameFormat,
}

/// One color frame: `width * height` BGR triplets, row-major.
#[derive(Debug, Clone)]
pub struct ColorFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub format: FrameFormat,
}

/// Project a depth/color frame pair into points in the depth camera frame.
///
/// Pixels with a zero depth code or a metric depth outside
/// `[z_min, z_max]` are dropped (the compaction the point model requires
/// before indexed operations). Color is sampled through the depth-to-color
/// extrinsics with the sample position clamped to the color frame.
pub fn project_rgbd(
    depth: &DepthFrame,
    color: &ColorFrame,
    params: &CameraParams,
    z_min: f32,
    z_max: f32,
) -> Result<Vec<Point>> {
    if depth.format != FrameFormat::Z16 {
        tracing::warn!("create_from_rgbd: depth frame is not Z16");
        return Err(Error::UnsupportedFormat("depth frame must be Z16"));
    }
    if color.format != FrameFormat::Bgr8 {
        tracing::warn!("create_from_rgbd: color frame is not BGR8");
        return Err(Error::UnsupportedFormat("color frame must be BGR8"));
    }
    if depth.data.len() != (depth.width * depth.height) as usize {
        return Err(Error::invalid(
            "create_from_rgbd",
            "depth buffer size does not match frame dimensions",
        ));
    }
    if color.data.len() != (color.width * color.height * 3) as usize {
        return Err(Error::invalid(
            "create_from_rgbd",
            "color buffer size does not match frame dimensions",
        ));
    }
    if !(z_min >= 0.0) || !(z_max > z_min) || !z_max.is_finite() {
        return Err(Error::invalid(
            "create_from_rgbd",
            format!("depth window [{z_min}, {z_max}] is not usable"),
        ));
    }

    let din = &params.depth_intrinsics;
    let cin = &params.color_intrinsics;
    let scale = params.depth_scale;

    let points: Vec<Point> = (0..depth.height)
        .into_par_iter()
        .flat_map_iter(|v| {
            let row = &depth.data[(v * depth.width) as usize..((v + 1) * depth.width) as usize];
            row.iter().enumerate().filter_map(move |(u, &code)| {
                if code == 0 {
                    return None;
                }
                let z = code as f32 * scale;
                if z < z_min || z > z_max {
                    return None;
                }

                let x = (u as f32 - din.cx) * z / din.fx;
                let y = (v as f32 - din.cy) * z / din.fy;
                let p = Vector3::new(x, y, z);

                let in_color =
                    params.depth_to_color.rotation * p + params.depth_to_color.translation;
                let color_value = if in_color.z > 0.0 {
                    let uc = (in_color.x / in_color.z * cin.fx + cin.cx).round();
                    let vc = (in_color.y / in_color.z * cin.fy + cin.cy).round();
                    let uc = (uc.max(0.0) as u32).min(color.width - 1);
                    let vc = (vc.max(0.0) as u32).min(color.height - 1);
                    let base = ((vc * color.width + uc) * 3) as usize;
                    Color::new(
                        color.data[base + 2] as f32 / 255.0,
                        color.data[base + 1] as f32 / 255.0,
                        color.data[base] as f32 / 255.0,
                    )
                } else {
                    Color::default()
                };

                Some(Point::new(p, color_value))
            })
        })
        .collect();

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_params(width: u32, height: u32) -> CameraParams {
        let intrinsics = Intrinsics {
            fx: 100.0,
            fy: 100.0,
            cx: width as f32 / 2.0,
            cy: height as f32 / 2.0,
            width,
            height,
        };
        CameraParams {
            depth_intrinsics: intrinsics,
            color_intrinsics: intrinsics,
            depth_to_color: Extrinsics::identity(),
            depth_scale: 0.001,
        }
    }

    fn flat_depth(width: u32, height: u32, code: u16) -> DepthFrame {
        DepthFrame {
            width,
            height,
            data: vec![code; (width * height) as usize],
            format: FrameFormat::Z16,
        }
    }

    fn solid_color(width: u32, height: u32, b: u8, g: u8, r: u8) -> ColorFrame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..width * height {
            data.extend_from_slice(&[b, g, r]);
        }
        ColorFrame {
            width,
            height,
            data,
            format: FrameFormat::Bgr8,
        }
    }

    #[test]
    fn test_rejects_wrong_formats() {
        let params = test_params(4, 4);
        let mut depth = flat_depth(4, 4, 1000);
        let color = solid_color(4, 4, 0, 0, 0);

        depth.format = FrameFormat::Bgr8;
        assert!(matches!(
            project_rgbd(&depth, &color, &params, 0.1, 2.0),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_backprojection_geometry() {
        let params = test_params(4, 4);
        // Code 1000 at scale 0.001 = 1 meter.
        let depth = flat_depth(4, 4, 1000);
        let color = solid_color(4, 4, 255, 0, 0);

        let points = project_rgbd(&depth, &color, &params, 0.1, 2.0).unwrap();
        assert_eq!(points.len(), 16);

        // Pixel (0, 0): x = (0 - 2) * 1 / 100, y likewise.
        let p = &points[0];
        assert_relative_eq!(p.coordinates.x, -0.02, epsilon = 1e-6);
        assert_relative_eq!(p.coordinates.y, -0.02, epsilon = 1e-6);
        assert_relative_eq!(p.coordinates.z, 1.0, epsilon = 1e-6);

        // BGR (255, 0, 0) is pure blue.
        assert_relative_eq!(p.color.b, 1.0, epsilon = 1e-6);
        assert_relative_eq!(p.color.r, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_depth_window_and_zero_codes_drop_pixels() {
        let params = test_params(4, 1);
        let depth = DepthFrame {
            width: 4,
            height: 1,
            data: vec![0, 500, 1000, 3000], // 0m (invalid), 0.5m, 1m, 3m
            format: FrameFormat::Z16,
        };
        let color = solid_color(4, 1, 10, 20, 30);

        let points = project_rgbd(&depth, &color, &params, 0.6, 2.0).unwrap();
        // Only the 1-meter pixel survives the [0.6, 2.0] window.
        assert_eq!(points.len(), 1);
        assert_relative_eq!(points[0].coordinates.z, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_rejects_bad_depth_window() {
        let params = test_params(2, 2);
        let depth = flat_depth(2, 2, 1000);
        let color = solid_color(2, 2, 0, 0, 0);
        assert!(project_rgbd(&depth, &color, &params, 2.0, 1.0).is_err());
        assert!(project_rgbd(&depth, &color, &params, -1.0, 1.0).is_err());
    }

    #[test]
    fn test_rejects_mismatched_buffers() {
        let params = test_params(4, 4);
        let depth = DepthFrame {
            width: 4,
            height: 4,
            data: vec![1000; 3],
            format: FrameFormat::Z16,
        };
        let color = solid_color(4, 4, 0, 0, 0);
        assert!(project_rgbd(&depth, &color, &params, 0.1, 2.0).is_err());
    }
}
