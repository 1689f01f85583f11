//! Second-level solve fusing the submodels into the nested predictor.
//!
//! All second-level matrices are kept in correlation units (the process
//! variance divided out) so the tiny-nugget retry of the per-query Cholesky
//! operates on O(1)-scale entries; the variance is re-applied on export.

use crate::covariance::Covariance;
use crate::errors::{NestedKrigingError, Result};
use crate::points::Points;
use crate::submodel::{SubmodelFactor, SubmodelPrediction};
use crate::utils::{MAX_NUGGET_RETRIES, cho_solve, cholesky_with_retry};
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;

/// Aggregated outputs over one zone of prediction points
#[derive(Debug)]
pub(crate) struct ZoneAggregation {
    /// Aggregated (residual) mean per query
    pub mean: Array1<f64>,
    /// Aggregated variance per query, floored at 0
    pub sd2: Array1<f64>,
    /// Aggregation weights, one column per query
    pub weights: Option<Array2<f64>>,
    /// Per-query submodel covariance matrices K_M, variance-scaled
    pub k_m: Option<Vec<Array2<f64>>>,
    /// Per-query right-hand sides k_M as columns, variance-scaled
    pub k_m_diag: Option<Array2<f64>>,
    /// Number of queries whose aggregated variance underflowed and was clamped
    pub n_clamped: usize,
}

/// Solve the N x N fusion system at every query point of a zone.
///
/// `query_offset` converts zone-local indices into global ones for error
/// reporting. The diagonal of the system reuses the submodel predictor
/// variances; off-diagonal entries come from the cross-covariance engine.
pub(crate) fn aggregate_zone(
    predictions: &[SubmodelPrediction],
    pair_covs: &[Array1<f64>],
    pairs: &[(usize, usize)],
    variance: f64,
    keep_weights: bool,
    keep_tensors: bool,
    query_offset: usize,
) -> Result<ZoneAggregation> {
    let n_groups = predictions.len();
    let n_queries = predictions.first().map(|p| p.mean.len()).unwrap_or(0);

    let mut mean = Array1::zeros(n_queries);
    let mut sd2 = Array1::zeros(n_queries);
    let mut weights = keep_weights.then(|| Array2::zeros((n_groups, n_queries)));
    let mut k_m = keep_tensors.then(Vec::new);
    let mut k_m_diag = keep_tensors.then(|| Array2::zeros((n_groups, n_queries)));
    let mut n_clamped = 0;

    for q in 0..n_queries {
        let mut kappa = Array2::zeros((n_groups, n_groups));
        for (&(i, j), cov) in pairs.iter().zip(pair_covs) {
            kappa[[i, j]] = cov[q];
            kappa[[j, i]] = cov[q];
        }
        for (i, pred) in predictions.iter().enumerate() {
            kappa[[i, i]] = 1.0 - pred.var[q] / variance;
        }
        let rhs: Array1<f64> = kappa.diag().to_owned();

        if let Some(tensors) = k_m.as_mut() {
            tensors.push(kappa.mapv(|v| v * variance));
        }
        if let Some(diag) = k_m_diag.as_mut() {
            diag.column_mut(q).assign(&rhs.mapv(|v| v * variance));
        }

        let (l, _retries) =
            cholesky_with_retry(kappa).ok_or(NestedKrigingError::SingularAggregation {
                query: query_offset + q,
                retries: MAX_NUGGET_RETRIES,
            })?;
        let w = cho_solve(&l, &rhs.clone().insert_axis(Axis(1)))?.remove_axis(Axis(1));

        mean[q] = predictions
            .iter()
            .zip(&w)
            .map(|(pred, &wi)| wi * pred.mean[q])
            .sum();
        let v = variance * (1.0 - w.dot(&rhs));
        sd2[q] = if v < 0. {
            n_clamped += 1;
            0.
        } else {
            v
        };
        if let Some(weights) = weights.as_mut() {
            weights.column_mut(q).assign(&w);
        }
    }

    Ok(ZoneAggregation {
        mean,
        sd2,
        weights,
        k_m,
        k_m_diag,
        n_clamped,
    })
}

/// Joint conditional and prior covariance matrices between all prediction
/// points.
///
/// With `B_i` the submodel weight matrix `lambda_i` column-scaled by the
/// aggregation weights, the conditional covariance is
/// `sigma^2 C(x,x') - P - P^T + sum_{i<=j} sym(B_i^T C_ij B_j)` where
/// `P = sigma^2 sum_i B_i^T k_i`. Pair terms are computed in parallel but
/// accumulated serially in pair order, keeping results independent of
/// scheduling. Diagonal pair blocks use the nugget-regularised correlation
/// matrix so the point-wise diagonal matches the aggregated variance.
pub(crate) fn joint_covariances(
    covariance: &Covariance,
    factors: &[SubmodelFactor],
    lambda_full: &[Array2<f64>],
    kx_full: &[Array2<f64>],
    weights: &Array2<f64>,
    query: &Points,
    variance: f64,
    pool: &rayon::ThreadPool,
) -> (Array2<f64>, Array2<f64>) {
    let n_groups = factors.len();
    let n_queries = query.len();

    let cov_prior = covariance
        .cross_correlations(query, query)
        .mapv(|v| v * variance);

    let b: Vec<Array2<f64>> = lambda_full
        .iter()
        .enumerate()
        .map(|(i, lambda)| lambda * &weights.row(i))
        .collect();

    let mut pairs = Vec::with_capacity(n_groups * (n_groups + 1) / 2);
    for i in 0..n_groups {
        for j in i..n_groups {
            pairs.push((i, j));
        }
    }
    let contributions: Vec<(usize, usize, Array2<f64>)> = pool.install(|| {
        pairs
            .par_iter()
            .map(|&(i, j)| {
                let c = if i == j {
                    covariance.corr_matrix(&factors[i].points, factors[i].nugget.view())
                } else {
                    covariance.cross_correlations(&factors[i].points, &factors[j].points)
                };
                (i, j, b[i].t().dot(&c.dot(&b[j])))
            })
            .collect()
    });
    let mut pred_cov = Array2::zeros((n_queries, n_queries));
    for (i, j, s) in &contributions {
        pred_cov += s;
        if i != j {
            pred_cov += &s.t();
        }
    }
    pred_cov.mapv_inplace(|v| v * variance);

    let mut p = Array2::zeros((n_queries, n_queries));
    for (bi, kxi) in b.iter().zip(kx_full) {
        p += &bi.t().dot(kxi);
    }
    p.mapv_inplace(|v| v * variance);

    let cov = &cov_prior - &p - &p.t() + &pred_cov;
    (cov, cov_prior)
}
