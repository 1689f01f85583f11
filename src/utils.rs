//! Linear-algebra façade and small shared helpers.
//!
//! The dense backend is `linfa-linalg` by default and LAPACK through
//! `ndarray-linalg` when the `blas` feature is enabled; everything else in
//! the crate goes through the two wrappers below and stays backend-agnostic.

use crate::covariance::TINY_NUGGET_ON_DIAG;
use crate::errors::Result;
use log::warn;
use ndarray::Array2;

#[cfg(not(feature = "blas"))]
use linfa_linalg::{cholesky::*, triangular::*};
#[cfg(feature = "blas")]
use ndarray_linalg::{cholesky::*, triangular::*};

/// Cap on diagonal-nugget doublings before a factorisation is reported fatal
pub(crate) const MAX_NUGGET_RETRIES: usize = 10;

#[cfg(not(feature = "blas"))]
fn try_cholesky(m: &Array2<f64>) -> Option<Array2<f64>> {
    m.cholesky().ok()
}

#[cfg(feature = "blas")]
fn try_cholesky(m: &Array2<f64>) -> Option<Array2<f64>> {
    m.cholesky(UPLO::Lower).ok()
}

/// Lower Cholesky factor of a symmetric matrix, retrying with a doubled
/// on-diagonal tiny nugget on failure.
///
/// Returns the factor and the number of retries used, or `None` when the
/// matrix stays non positive definite after [`MAX_NUGGET_RETRIES`] doublings.
pub(crate) fn cholesky_with_retry(mut m: Array2<f64>) -> Option<(Array2<f64>, usize)> {
    let mut bump = TINY_NUGGET_ON_DIAG;
    for retry in 0..=MAX_NUGGET_RETRIES {
        if let Some(l) = try_cholesky(&m) {
            return Some((l, retry));
        }
        m.diag_mut().mapv_inplace(|v| v + bump);
        bump *= 2.0;
    }
    None
}

/// Solve `(L L^T) x = b` from the lower Cholesky factor via two triangular solves
#[cfg(not(feature = "blas"))]
pub(crate) fn cho_solve(l: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
    let rho = l.solve_triangular(b, UPLO::Lower)?;
    Ok(l.t().solve_triangular(&rho, UPLO::Upper)?)
}

/// See non blas version
#[cfg(feature = "blas")]
pub(crate) fn cho_solve(l: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
    let rho = l.solve_triangular(UPLO::Lower, Diag::NonUnit, b)?;
    Ok(l.t().solve_triangular(UPLO::Upper, Diag::NonUnit, &rho)?)
}

/// Buffers warnings raised inside a parallel phase so they are emitted in
/// order at the next phase boundary. A verbosity at or below 0 drops them.
pub(crate) struct WarningBuffer {
    enabled: bool,
    pending: Vec<String>,
}

impl WarningBuffer {
    pub fn new(verbose_level: i32) -> WarningBuffer {
        WarningBuffer {
            enabled: verbose_level > 0,
            pending: Vec::new(),
        }
    }

    pub fn push(&mut self, message: String) {
        if self.enabled {
            self.pending.push(message);
        }
    }

    pub fn flush(&mut self) {
        for message in self.pending.drain(..) {
            warn!("{message}");
        }
    }
}
