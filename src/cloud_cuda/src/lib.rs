//! GPU-accelerated point cloud geometry for real-time RGB-D perception.
//!
//! The crate provides a coherent set of neighborhood-driven operations
//! over an unordered set of colored 3-D points: spatial indexing, radius
//! and nearest-neighbor search, voxel down-sampling, radius outlier
//! removal, normal estimation, Euclidean clustering, and local-convexity
//! segmentation.
//!
//! # Architecture
//!
//! Every operation shares one algorithmic backbone: compute the bounds of
//! the input, build a uniform spatial hash grid whose cell side depends on
//! the operation's radius, then run massively parallel per-point passes
//! that consult the grid through its 27-cell stencil. The kernels are
//! CubeCL and execute on CUDA when the `cuda` feature is enabled and a
//! device is present; each operation carries a CPU reference
//! implementation that is also the fallback path, so results are
//! available on any machine.
//!
//! # Usage
//!
//! ```ignore
//! use cloud_cuda::PointCloud;
//!
//! let cloud = PointCloud::create_from_rgbd(&depth, &color, &params, 0.3, 1.5)?;
//! let down = cloud.voxel_grid_down_sample(0.005)?;
//! let mut clean = down.radius_outlier_removal(0.007, 3)?;
//! clean.estimate_normals(0.03)?;
//!
//! let objects = clean.convex_obj_segmentation(0.007, clean.len() / 500, clean.len() / 2)?;
//! ```

pub mod clustering;
pub mod downsample;
pub mod error;
pub mod math;
pub mod normals;
pub mod outlier;
pub mod point;
pub mod point_cloud;
pub mod rgbd;
pub mod runtime;
pub mod search;
pub mod segmentation;
pub mod spatial_hash;
pub mod test_utils;

pub use error::{Error, Result};
pub use point::{Color, Point, PointProperty};
pub use point_cloud::PointCloud;
pub use rgbd::{CameraParams, ColorFrame, DepthFrame, Extrinsics, FrameFormat, Intrinsics};
pub use search::{nn_search, radius_neighbors, NeighborLists};
pub use spatial_hash::{CellCoord, GridParams, SpatialHashGrid};

// GPU runtime probe (always present; reports `false` without the `cuda`
// feature).
pub use runtime::is_cuda_available;
