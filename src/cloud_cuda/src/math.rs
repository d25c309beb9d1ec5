//! Math primitives shared by the neighborhood operations.
//!
//! Host-side vector and matrix arithmetic is nalgebra; the device kernels
//! inline their own scalar arithmetic. This module adds the two pieces
//! nalgebra does not hand us directly: a small LDL^T solver for symmetric
//! positive-definite 3x3 systems, and a symmetric 3x3 eigen-decomposition
//! with a guaranteed ascending eigenvalue order.

use nalgebra::{Matrix3, Vector3};

/// Diagonal regularization callers add before factoring a covariance that
/// may be rank-deficient: `a + LDLT_REGULARIZATION * I`.
pub const LDLT_REGULARIZATION: f32 = 1e-6;

/// LDL^T factorization of a symmetric positive-definite 3x3 matrix.
#[derive(Debug, Clone, Copy)]
pub struct Ldlt3 {
    l10: f32,
    l20: f32,
    l21: f32,
    d: [f32; 3],
}

/// Factor `a` as `L * D * L^T`.
///
/// Returns `None` when a pivot is non-positive, i.e. `a` is not positive
/// definite. Only the lower triangle of `a` is read.
pub fn ldlt_3x3(a: &Matrix3<f32>) -> Option<Ldlt3> {
    let d0 = a[(0, 0)];
    if d0 <= 0.0 {
        return None;
    }
    let l10 = a[(1, 0)] / d0;
    let l20 = a[(2, 0)] / d0;

    let d1 = a[(1, 1)] - l10 * l10 * d0;
    if d1 <= 0.0 {
        return None;
    }
    let l21 = (a[(2, 1)] - l20 * l10 * d0) / d1;

    let d2 = a[(2, 2)] - l20 * l20 * d0 - l21 * l21 * d1;
    if d2 <= 0.0 {
        return None;
    }

    Some(Ldlt3 {
        l10,
        l20,
        l21,
        d: [d0, d1, d2],
    })
}

impl Ldlt3 {
    /// Solve `A x = b` for the factored `A`.
    pub fn solve(&self, b: &Vector3<f32>) -> Vector3<f32> {
        // Forward substitution: L z = b
        let z0 = b.x;
        let z1 = b.y - self.l10 * z0;
        let z2 = b.z - self.l20 * z0 - self.l21 * z1;

        // Diagonal: D y = z
        let y0 = z0 / self.d[0];
        let y1 = z1 / self.d[1];
        let y2 = z2 / self.d[2];

        // Back substitution: L^T x = y
        let x2 = y2;
        let x1 = y1 - self.l21 * x2;
        let x0 = y0 - self.l10 * x1 - self.l20 * x2;

        Vector3::new(x0, x1, x2)
    }
}

/// Symmetric 3x3 eigen-decomposition.
///
/// Returns eigenvalues in ascending order together with the matching
/// orthonormal eigenvectors as the columns of the returned matrix. For a
/// rank-deficient input whose two smaller eigenvalues coincide to float
/// precision, the first eigenvector is an arbitrary unit vector of the
/// degenerate subspace.
pub fn sym_eigen_3x3(m: &Matrix3<f64>) -> (Vector3<f64>, Matrix3<f64>) {
    let eigen = m.symmetric_eigen();

    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[a]
            .partial_cmp(&eigen.eigenvalues[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let values = Vector3::new(
        eigen.eigenvalues[order[0]],
        eigen.eigenvalues[order[1]],
        eigen.eigenvalues[order[2]],
    );
    let vectors = Matrix3::from_columns(&[
        eigen.eigenvectors.column(order[0]).into_owned(),
        eigen.eigenvectors.column(order[1]).into_owned(),
        eigen.eigenvectors.column(order[2]).into_owned(),
    ]);

    (values, vectors)
}

/// Streaming accumulator for the covariance of a set of samples.
///
/// Accumulates in f64 so large neighborhoods do not lose precision.
#[derive(Debug, Clone, Default)]
pub struct CovarianceAccumulator {
    sum: Vector3<f64>,
    sum_sq: Matrix3<f64>,
    count: usize,
}

impl CovarianceAccumulator {
    pub fn add(&mut self, p: &Vector3<f32>) {
        let v = Vector3::new(p.x as f64, p.y as f64, p.z as f64);
        self.sum += v;
        self.sum_sq += v * v.transpose();
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> Option<Vector3<f64>> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Population covariance around the sample mean, or `None` when empty.
    pub fn covariance(&self) -> Option<Matrix3<f64>> {
        let mean = self.mean()?;
        let n = self.count as f64;
        Some(self.sum_sq / n - mean * mean.transpose())
    }
}
