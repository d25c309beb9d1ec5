//! Point record types shared by every operation.

use nalgebra::Vector3;

/// Lifecycle tag carried by each point.
///
/// `Invalid` marks points that must be compacted away before any indexed
/// operation runs; the producing side (RGB-D projection) sets it for pixels
/// with no usable depth. `Inactive` marks synthesized points such as voxel
/// centroids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PointProperty {
    Invalid = 0,
    #[default]
    Active = 1,
    Inactive = 2,
}

/// RGB color with channels normalized to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Perceptual intensity using Rec. 709 luma weights.
    pub fn intensity(&self) -> f32 {
        0.2126 * self.r + 0.7152 * self.g + 0.0722 * self.b
    }

    /// Plain channel average.
    pub fn channel_mean(&self) -> f32 {
        (self.r + self.g + self.b) / 3.0
    }
}

/// A single colored 3-D point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub coordinates: Vector3<f32>,
    pub color: Color,
    pub property: PointProperty,
}

impl Point {
    /// Create an `Active` point.
    pub fn new(coordinates: Vector3<f32>, color: Color) -> Self {
        Self {
            coordinates,
            color,
            property: PointProperty::Active,
        }
    }

    /// Create an `Active` point with a default color, for geometry-only
    /// call sites and tests.
    pub fn from_coordinates(x: f32, y: f32, z: f32) -> Self {
        Self::new(Vector3::new(x, y, z), Color::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_intensity_weights_sum_to_one() {
        let white = Color::new(1.0, 1.0, 1.0);
        assert_relative_eq!(white.intensity(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(white.channel_mean(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_default_property_is_active() {
        let p = Point::from_coordinates(1.0, 2.0, 3.0);
        assert_eq!(p.property, PointProperty::Active);
    }
}
