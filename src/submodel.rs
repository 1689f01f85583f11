//! Per-subgroup Kriging solves.
//!
//! Factorisation is query-independent and happens once per subgroup; the
//! query-dependent quantities (cross-correlations, weights, means, variances)
//! are computed per prediction zone from the retained factor.

use crate::clustering::Subgroup;
use crate::covariance::{Covariance, DIAGONAL_VALUE};
use crate::errors::{NestedKrigingError, Result};
use crate::points::Points;
use crate::utils::{MAX_NUGGET_RETRIES, cho_solve, cholesky_with_retry};
use ndarray::{Array1, Array2, Axis};

/// Query-independent part of a submodel: retained Cholesky factor and
/// solved vectors for one subgroup
#[derive(Debug)]
pub(crate) struct SubmodelFactor {
    pub points: Points,
    pub nugget: Array1<f64>,
    /// Responses, trend-removed under ordinary Kriging
    pub y: Array1<f64>,
    /// Lower Cholesky factor of the nugget-regularised correlation matrix
    pub l_chol: Array2<f64>,
    /// `K^-1 y`
    pub alpha: Array1<f64>,
    /// `K^-1 1`, kept for the constant-trend estimate (ordinary Kriging only)
    k_inv_ones: Option<Array1<f64>>,
}

impl SubmodelFactor {
    /// Numerator `1^T K^-1 y` and denominator `1^T K^-1 1` of the pooled
    /// generalized least-squares constant-trend estimate
    pub fn trend_terms(&self) -> (f64, f64) {
        let num = self.alpha.sum();
        let den = self.k_inv_ones.as_ref().map(|u| u.sum()).unwrap_or(0.);
        (num, den)
    }

    /// Switch the factor to residual form once the global trend is known
    pub fn remove_trend(&mut self, trend: f64) {
        if let Some(u) = self.k_inv_ones.as_ref() {
            self.y.mapv_inplace(|v| v - trend);
            self.alpha = &self.alpha - &u.mapv(|v| v * trend);
        }
    }
}

/// Assemble and factor one subgroup's correlation matrix and solve for `alpha`.
///
/// `group_index` only serves error reporting. Ordinary Kriging additionally
/// solves against the all-ones vector for the trend estimate.
pub(crate) fn build_factor(
    group: Subgroup,
    group_index: usize,
    covariance: &Covariance,
    ordinary: bool,
) -> Result<SubmodelFactor> {
    let size = group.len();
    let k = covariance.corr_matrix(&group.points, group.nugget.view());
    let (l_chol, _retries) =
        cholesky_with_retry(k).ok_or(NestedKrigingError::NotPositiveDefinite {
            group: group_index,
            size,
            retries: MAX_NUGGET_RETRIES,
        })?;
    let rhs = group.y.clone().insert_axis(Axis(1));
    let alpha = cho_solve(&l_chol, &rhs)?.remove_axis(Axis(1));
    let k_inv_ones = if ordinary {
        let ones = Array2::ones((size, 1));
        Some(cho_solve(&l_chol, &ones)?.remove_axis(Axis(1)))
    } else {
        None
    };
    Ok(SubmodelFactor {
        points: group.points,
        nugget: group.nugget,
        y: group.y,
        l_chol,
        alpha,
        k_inv_ones,
    })
}

/// Submodel quantities at the prediction points of one zone
#[derive(Debug)]
pub(crate) struct SubmodelPrediction {
    /// Cross-correlations between the subgroup design points and the zone queries (n_i x q)
    pub kx: Array2<f64>,
    /// `K^-1 kx` (n_i x q)
    pub lambda: Array2<f64>,
    /// Residual submodel mean per query
    pub mean: Array1<f64>,
    /// Posterior variance per query, floored at 0
    pub var: Array1<f64>,
    /// Number of queries whose variance underflowed and was clamped
    pub n_clamped: usize,
}

/// Kriging mean and variance of one submodel at every query point of a zone
pub(crate) fn predict_submodel(
    factor: &SubmodelFactor,
    covariance: &Covariance,
    query: &Points,
    variance: f64,
) -> Result<SubmodelPrediction> {
    let kx = covariance.cross_correlations(&factor.points, query);
    let lambda = cho_solve(&factor.l_chol, &kx)?;
    let mean = kx.t().dot(&factor.alpha);
    let k_dot_lambda = (&kx * &lambda).sum_axis(Axis(0));
    let mut n_clamped = 0;
    let var = k_dot_lambda.mapv(|kl| {
        let v = variance * (DIAGONAL_VALUE - kl);
        if v < 0. {
            n_clamped += 1;
            0.
        } else {
            v
        }
    });
    Ok(SubmodelPrediction {
        kx,
        lambda,
        mean,
        var,
        n_clamped,
    })
}
