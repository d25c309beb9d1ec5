//! Error kinds surfaced by the point cloud operations.
//!
//! Soft outcomes are not errors: a nearest-neighbor miss is the sentinel
//! `-1`, a segmentation sub-component outside the size window is dropped
//! silently, and an empty input yields an empty output. Everything else is
//! one of the kinds below, and every failure path logs a short diagnostic
//! on the `tracing` warning channel before returning.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A radius, size, or tolerance was non-positive, or the requested grid
    /// would overflow a signed 32-bit cell coordinate.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The accelerator runtime reported a non-success status.
    #[error("device failure: {0}")]
    Device(String),

    /// The operation needs per-point normals but the set has none.
    #[error("point cloud has no normals")]
    MissingNormals,

    /// An RGB-D frame arrived in a format the projection does not accept.
    #[error("unsupported camera frame format: {0}")]
    UnsupportedFormat(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build an `InvalidParameter` and emit its warning diagnostic in one
    /// place so call sites stay terse.
    pub(crate) fn invalid(op: &str, reason: impl std::fmt::Display) -> Self {
        tracing::warn!(operation = op, "invalid parameter: {reason}");
        Error::InvalidParameter(format!("{op}: {reason}"))
    }

    pub(crate) fn missing_normals(op: &str) -> Self {
        tracing::warn!(operation = op, "point cloud has no normals");
        Error::MissingNormals
    }
}
