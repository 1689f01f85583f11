//! Correlation matrix assembly with nugget handling.

use crate::correlation_models::{CorrelationModel, Kernel};
use crate::parameters::CovarianceParams;
use crate::points::Points;
use ndarray::{Array2, ArrayView1, ArrayViewMut2};

/// Tiny on-diagonal regulariser, `256 * machine epsilon`.
///
/// Keeps mixtures such as all-ones plus nugget invertible; a power-of-two
/// factor lets repeated rows still factor cleanly for matrices up to twice
/// that size.
pub const TINY_NUGGET_ON_DIAG: f64 = 256.0 * f64::EPSILON;

/// Correlation matrix diagonal before any user nugget
pub const DIAGONAL_VALUE: f64 = 1.0 + TINY_NUGGET_ON_DIAG;

macro_rules! with_kernel {
    ($kernel:expr, $k:ident => $body:expr) => {
        match $kernel {
            Kernel::AbsoluteExponential($k) => $body,
            Kernel::SquaredExponential($k) => $body,
            Kernel::Matern32($k) => $body,
            Kernel::Matern52($k) => $body,
            Kernel::PowerExponential($k) => $body,
            Kernel::WhiteNoise($k) => $body,
        }
    };
}

/// Assembles correlation and cross-correlation matrices for the active kernel
///
/// Borrows the parameter bundle; the per-kernel dispatch happens once per
/// fill so the pairwise loops run monomorphised.
pub struct Covariance<'a> {
    params: &'a CovarianceParams,
}

impl<'a> Covariance<'a> {
    /// Constructor
    pub fn new(params: &'a CovarianceParams) -> Covariance<'a> {
        Covariance { params }
    }

    #[inline]
    fn diagonal_value(&self, index: usize, nugget: ArrayView1<f64>) -> f64 {
        if nugget.is_empty() {
            DIAGONAL_VALUE
        } else {
            DIAGONAL_VALUE + nugget[index % nugget.len()] * self.params.inverse_variance()
        }
    }

    /// Symmetric correlation matrix of a point set.
    ///
    /// Off-diagonal entries are kernel correlations; the diagonal is
    /// `1 + 256*eps + nugget_i / sigma^2`, with the nugget vector dividing
    /// cyclically (sizes 0, 1, n or any k are all valid).
    pub fn corr_matrix(&self, points: &Points, nugget: ArrayView1<f64>) -> Array2<f64> {
        let n = points.len();
        let mut m = Array2::zeros((n, n));
        with_kernel!(self.params.kernel(), k => fill_corr_matrix(k, &mut m, points));
        for i in 0..n {
            m[[i, i]] = self.diagonal_value(i, nugget);
        }
        m
    }

    /// Cross-correlation matrix between two point sets, without any
    /// diagonal regularisation
    pub fn cross_correlations(&self, a: &Points, b: &Points) -> Array2<f64> {
        let mut m = Array2::zeros((a.len(), b.len()));
        self.fill_cross_correlations(m.view_mut(), a, b);
        m
    }

    /// Fill a pre-allocated `|a| x |b|` view with cross-correlations.
    ///
    /// Used by the pair loop of the cross-covariance engine to reuse
    /// per-thread scratch instead of allocating per pair.
    pub fn fill_cross_correlations(&self, m: ArrayViewMut2<f64>, a: &Points, b: &Points) {
        with_kernel!(self.params.kernel(), k => fill_cross_correlations(k, m, a, b));
    }
}

fn fill_corr_matrix<C: CorrelationModel>(corr: &C, m: &mut Array2<f64>, points: &Points) {
    for i in 0..points.len() {
        for j in 0..i {
            let v = corr.corr(points.row(i), points.row(j));
            m[[i, j]] = v;
            m[[j, i]] = v;
        }
    }
}

fn fill_cross_correlations<C: CorrelationModel>(
    corr: &C,
    mut m: ArrayViewMut2<f64>,
    a: &Points,
    b: &Points,
) {
    for i in 0..a.len() {
        for j in 0..b.len() {
            m[[i, j]] = corr.corr(a.row(i), b.row(j));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation_models::CovType;
    use approx::assert_abs_diff_eq;
    use linfa_linalg::cholesky::Cholesky;
    use ndarray::array;

    fn setup() -> (CovarianceParams, Points) {
        let params = CovarianceParams::new(1, array![1.0].view(), 2.0, CovType::Exp).unwrap();
        let pts = Points::new(array![[0.0], [1.0], [2.0]].view(), &params);
        (params, pts)
    }

    #[test]
    fn test_corr_matrix_diagonal_and_symmetry() {
        let (params, pts) = setup();
        let cov = Covariance::new(&params);
        let m = cov.corr_matrix(&pts, array![].view());
        assert_eq!(m[[0, 0]], DIAGONAL_VALUE);
        assert_abs_diff_eq!(m[[0, 1]], (-1.0f64).exp(), epsilon = 1e-14);
        assert_eq!(m[[0, 2]], m[[2, 0]]);
    }

    #[test]
    fn test_nugget_divides_cyclically() {
        let (params, pts) = setup();
        let cov = Covariance::new(&params);
        // variance is 2, nugget of size 2 wraps on the third point
        let m = cov.corr_matrix(&pts, array![4.0, 8.0].view());
        assert_abs_diff_eq!(m[[0, 0]], DIAGONAL_VALUE + 2.0, epsilon = 1e-10);
        assert_abs_diff_eq!(m[[1, 1]], DIAGONAL_VALUE + 4.0, epsilon = 1e-10);
        assert_abs_diff_eq!(m[[2, 2]], DIAGONAL_VALUE + 2.0, epsilon = 1e-10);
    }

    #[test]
    fn test_cross_correlations_have_no_regularisation() {
        let (params, pts) = setup();
        let cov = Covariance::new(&params);
        let m = cov.cross_correlations(&pts, &pts);
        assert_eq!(m[[1, 1]], 1.0);
        assert_eq!(m.dim(), (3, 3));
    }

    #[test]
    fn test_repeated_rows_still_factor() {
        // all-ones correlation block, invertible thanks to the tiny diagonal nugget
        let params = CovarianceParams::new(1, array![1.0].view(), 1.0, CovType::Gauss).unwrap();
        let pts = Points::new(array![[0.5], [0.5], [0.5], [0.5]].view(), &params);
        let m = Covariance::new(&params).corr_matrix(&pts, array![].view());
        assert!(m.cholesky().is_ok());
    }
}
