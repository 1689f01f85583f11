//! Consensus alternatives to the nested predictor.
//!
//! Product of experts, generalised product of experts (uniform and
//! entropy-weighted), Bayesian committee machine, robust Bayesian committee
//! machine, and the smallest-predictive-variance selector, all in closed form
//! from the per-submodel means and variances.
//!
//! Reference: Deisenroth, M. P. and Ng, J. W. (2015), Distributed Gaussian
//! Processes, ICML.

use ndarray::{Array1, Array2, ArrayView1};
use ndarray_stats::QuantileExt;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Guard against infinite precisions at interpolated points
const PRECISION_EPSILON: f64 = 1e-100;

/// Mean and variance vectors of one alternative predictor
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct AlternativePrediction {
    /// Predicted mean per query point
    pub mean: Array1<f64>,
    /// Predicted variance per query point
    pub sd2: Array1<f64>,
}

impl AlternativePrediction {
    fn with_capacity(n: usize) -> AlternativePrediction {
        AlternativePrediction {
            mean: Array1::zeros(n),
            sd2: Array1::zeros(n),
        }
    }
}

/// The full set of alternative predictors
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Alternatives {
    /// Product of experts
    pub poe: AlternativePrediction,
    /// Generalised product of experts with uniform weights 1/N
    pub gpoe: AlternativePrediction,
    /// Generalised product of experts with renormalised entropy weights
    pub gpoe_entropy: AlternativePrediction,
    /// Bayesian committee machine
    pub bcm: AlternativePrediction,
    /// Robust Bayesian committee machine (unnormalised entropy weights)
    pub rbcm: AlternativePrediction,
    /// Submodel with the smallest predictive variance
    pub spv: AlternativePrediction,
}

fn entropy_weights(v: ArrayView1<f64>, variance: f64) -> Array1<f64> {
    v.mapv(|vi| 0.5 * (variance.ln() - (vi + PRECISION_EPSILON).ln()))
}

/// Compute every alternative from the submodel means and variances
/// (one row per submodel, one column per query point).
pub(crate) fn compute_alternatives(
    mean_m: &Array2<f64>,
    sd2_m: &Array2<f64>,
    variance: f64,
) -> Alternatives {
    let n_groups = mean_m.nrows();
    let n_queries = mean_m.ncols();
    let mut poe = AlternativePrediction::with_capacity(n_queries);
    let mut gpoe = AlternativePrediction::with_capacity(n_queries);
    let mut gpoe_entropy = AlternativePrediction::with_capacity(n_queries);
    let mut bcm = AlternativePrediction::with_capacity(n_queries);
    let mut rbcm = AlternativePrediction::with_capacity(n_queries);
    let mut spv = AlternativePrediction::with_capacity(n_queries);

    for q in 0..n_queries {
        let m = mean_m.column(q);
        let v = sd2_m.column(q);
        let tau = v.mapv(|vi| 1.0 / (vi + PRECISION_EPSILON));
        let tau_m = (&tau * &m).sum();
        let tau_sum = tau.sum();

        // PoE: plain precision-weighted fusion
        poe.sd2[q] = 1.0 / tau_sum;
        poe.mean[q] = tau_m / tau_sum;

        // GPoE with uniform weights keeps the prior scale for N submodels
        let prec = tau_sum / n_groups as f64;
        gpoe.sd2[q] = 1.0 / prec;
        gpoe.mean[q] = tau_m / n_groups as f64 / prec;

        // GPoE with entropy weights renormalised to sum to one
        let beta = entropy_weights(v, variance);
        let beta_sum = beta.sum();
        let beta_norm = if beta_sum.abs() > PRECISION_EPSILON {
            beta.mapv(|b| b / beta_sum)
        } else {
            Array1::from_elem(n_groups, 1.0 / n_groups as f64)
        };
        let prec = (&beta_norm * &tau).sum().max(PRECISION_EPSILON);
        gpoe_entropy.sd2[q] = 1.0 / prec;
        gpoe_entropy.mean[q] = (&beta_norm * &tau * &m).sum() / prec;

        // BCM subtracts the prior precision counted N-1 times too many
        let prec = (tau_sum - (n_groups as f64 - 1.0) / variance).max(PRECISION_EPSILON);
        bcm.sd2[q] = 1.0 / prec;
        bcm.mean[q] = tau_m / prec;

        // RBCM: unnormalised entropy weights, prior correction to match
        let prec =
            ((&beta * &tau).sum() + (1.0 - beta_sum) / variance).max(PRECISION_EPSILON);
        rbcm.sd2[q] = 1.0 / prec;
        rbcm.mean[q] = (&beta * &tau * &m).sum() / prec;

        // SPV: follow the most confident submodel
        let best = v.argmin().unwrap();
        spv.mean[q] = m[best];
        spv.sd2[q] = v[best];
    }

    Alternatives {
        poe,
        gpoe,
        gpoe_entropy,
        bcm,
        rbcm,
        spv,
    }
}
