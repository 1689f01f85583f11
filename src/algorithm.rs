//! Driver-facing nested Kriging entry point.
//!
//! Orchestrates the full pipeline: input validation, rescaling, subgroup
//! splitting, per-subgroup factorisation, per-zone submodel prediction,
//! cross-covariance evaluation, second-level aggregation, and the optional
//! joint-covariance and alternatives stages. Prediction points are cut into
//! zones run as independent parallel tasks; inside a zone the subgroup-pair
//! space is spread over its own worker pool.

use crate::aggregator::{ZoneAggregation, aggregate_zone, joint_covariances};
use crate::alternatives::{Alternatives, compute_alternatives};
use crate::clustering::split_by_cluster;
use crate::correlation_models::CovType;
use crate::covariance::Covariance;
use crate::cross_cov::{pair_list, submodel_cross_covariances};
use crate::errors::{NestedKrigingError, Result};
use crate::parameters::{
    CovarianceParams, KrigingType, NestedKrigingParams, NestedKrigingValidParams, OutputSpec,
};
use crate::points::Points;
use crate::submodel::{SubmodelFactor, SubmodelPrediction, build_factor, predict_submodel};
use crate::utils::WarningBuffer;
use log::debug;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, concatenate, s};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use std::time::Instant;

/// Wall-clock seconds spent in each phase of a run
///
/// The labels follow the historical phase split: `part_a` submodel
/// construction, `part_b` cross-covariances, `part_c` aggregation, `part_d`
/// joint covariances, `part_e` alternatives. With several zones, per-zone
/// phases report the slowest zone.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serializable", derive(serde::Serialize, serde::Deserialize))]
pub struct DurationDetails {
    /// Submodel construction: factorisations plus per-zone predictions
    pub part_a: f64,
    /// Cross-covariances over the subgroup-pair space
    pub part_b: f64,
    /// Second-level aggregation solves
    pub part_c: f64,
    /// Joint prediction covariance matrices
    pub part_d: f64,
    /// Alternative predictors
    pub part_e: f64,
}

/// Results of a nested Kriging run
///
/// `mean` and `sd2` are empty when the output level requested alternatives
/// only; every other field is present exactly when the output level asked
/// for it.
#[derive(Debug)]
pub struct NestedKrigingOutput {
    /// Aggregated predictor mean, one entry per prediction point
    pub mean: Array1<f64>,
    /// Aggregated predictor variance, one entry per prediction point
    pub sd2: Array1<f64>,
    /// Conditional covariance matrix between prediction points
    pub cov: Option<Array2<f64>>,
    /// Prior covariance matrix between prediction points
    pub cov_prior: Option<Array2<f64>>,
    /// Total wall-clock duration in seconds
    pub duration: f64,
    /// Per-phase wall-clock durations
    pub duration_details: DurationDetails,
    /// Algorithm name and version
    pub source_code: String,
    /// Aggregation weights, one row per submodel, one column per prediction point
    pub weights: Option<Array2<f64>>,
    /// Per-submodel means, one row per submodel
    pub mean_m: Option<Array2<f64>>,
    /// Per-submodel variances, one row per submodel
    pub sd2_m: Option<Array2<f64>>,
    /// Per-query submodel covariance matrices K_M (query x submodel x submodel)
    pub k_m: Option<Array3<f64>>,
    /// Per-query right-hand sides k_M (equal to the diagonals of K_M)
    pub k_m_diag: Option<Array2<f64>>,
    /// Alternative consensus predictors
    pub alternatives: Option<Alternatives>,
}

/// Nested Kriging predictor entry point
///
/// ```no_run
/// use ndarray::array;
/// use linfa::ParamGuard;
/// use nested_kriging::NestedKriging;
///
/// let x = array![[0.0], [1.0], [2.0], [3.0]];
/// let y = array![0.0, 1.0, 2.0, 3.0];
/// let clusters = array![0, 0, 1, 1];
/// let x_pred = array![[0.5], [1.5], [2.5]];
///
/// let output = NestedKriging::params()
///     .cov_type("matern5_2")
///     .param(array![1.0])
///     .sd2(1.0)
///     .num_threads(4)
///     .check()
///     .expect("valid parameters")
///     .predict(x.view(), y.view(), clusters.view(), x_pred.view())
///     .expect("nested Kriging prediction");
/// println!("mean = {}, sd2 = {}", output.mean, output.sd2);
/// ```
pub struct NestedKriging;

impl NestedKriging {
    /// Nested Kriging parameters constructor
    pub fn params() -> NestedKrigingParams {
        NestedKrigingParams::new()
    }
}

/// Per-zone intermediate results
struct ZoneResult {
    start: usize,
    end: usize,
    predictions: Vec<SubmodelPrediction>,
    aggregation: Option<ZoneAggregation>,
    part_a: f64,
    part_b: f64,
    part_c: f64,
}

/// Immutable inputs shared by every zone task
struct ZoneSettings<'a> {
    factors: &'a [SubmodelFactor],
    covariance: &'a Covariance<'a>,
    pairs: &'a [(usize, usize)],
    variance: f64,
    num_threads: usize,
    needs_aggregation: bool,
    keep_weights: bool,
    keep_tensors: bool,
}

fn run_zone(settings: &ZoneSettings, query: &Points, start: usize, end: usize) -> Result<ZoneResult> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(settings.num_threads)
        .build()?;
    let zone_query = query.slice_rows(start, end);

    let timer = Instant::now();
    let predictions: Vec<SubmodelPrediction> = pool.install(|| {
        settings
            .factors
            .par_iter()
            .map(|factor| {
                predict_submodel(factor, settings.covariance, &zone_query, settings.variance)
            })
            .collect::<Result<Vec<_>>>()
    })?;
    let part_a = timer.elapsed().as_secs_f64();

    let timer = Instant::now();
    let pair_covs = if settings.needs_aggregation {
        submodel_cross_covariances(
            settings.covariance,
            settings.factors,
            &predictions,
            settings.pairs,
            &pool,
        )
    } else {
        Vec::new()
    };
    let part_b = timer.elapsed().as_secs_f64();

    let timer = Instant::now();
    let aggregation = if settings.needs_aggregation {
        Some(aggregate_zone(
            &predictions,
            &pair_covs,
            settings.pairs,
            settings.variance,
            settings.keep_weights,
            settings.keep_tensors,
            start,
        )?)
    } else {
        None
    };
    let part_c = timer.elapsed().as_secs_f64();

    Ok(ZoneResult {
        start,
        end,
        predictions,
        aggregation,
        part_a,
        part_b,
        part_c,
    })
}

impl NestedKrigingValidParams {
    /// Compute the nested Kriging predictor.
    ///
    /// * `x` - n x d design matrix
    /// * `y` - length-n responses (assumed centered under simple Kriging)
    /// * `clusters` - length-n partition vector with arbitrary integer labels
    /// * `x_pred` - q x d prediction matrix
    pub fn predict(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        clusters: ArrayView1<i64>,
        x_pred: ArrayView2<f64>,
    ) -> Result<NestedKrigingOutput> {
        let start_time = Instant::now();
        let mut warnings = WarningBuffer::new(self.verbose_level);

        let n = x.nrows();
        let d = x.ncols();
        if n == 0 {
            return Err(NestedKrigingError::InvalidShape {
                argument: "X",
                expected: "at least one row".to_string(),
                actual: "0 rows".to_string(),
            });
        }
        if y.len() != n {
            return Err(NestedKrigingError::InvalidShape {
                argument: "Y",
                expected: format!("length {n}"),
                actual: format!("length {}", y.len()),
            });
        }
        if clusters.len() != n {
            return Err(NestedKrigingError::InvalidShape {
                argument: "clusters",
                expected: format!("length {n}"),
                actual: format!("length {}", clusters.len()),
            });
        }
        if x_pred.ncols() != d {
            return Err(NestedKrigingError::InvalidShape {
                argument: "x",
                expected: format!("{d} columns"),
                actual: format!("{} columns", x_pred.ncols()),
            });
        }
        let q = x_pred.nrows();

        let cov_type = CovType::parse(&self.cov_type).unwrap_or_else(|| {
            warnings.push(format!(
                "unknown covariance type `{}`, using exponential kernel",
                self.cov_type
            ));
            CovType::Exp
        });
        let cov_params = CovarianceParams::new(d, self.param.view(), self.sd2, cov_type)?;
        let covariance = Covariance::new(&cov_params);
        let variance = self.sd2;
        let spec = self.output_spec();
        let ordinary = self.kriging_type == KrigingType::Ordinary;

        let design = Points::new(x, &cov_params);
        let query = Points::new(x_pred, &cov_params);
        let groups = split_by_cluster(&design, y, self.nugget.view(), clusters);
        let n_groups = groups.len();
        debug!(
            "nested kriging: n={n}, d={d}, q={q}, {n_groups} subgroups, kernel={}",
            cov_params.kernel()
        );

        let pair_pool = ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .build()?;

        // part A, query-independent half: factor every subgroup once
        let timer = Instant::now();
        let mut factors: Vec<SubmodelFactor> = pair_pool.install(|| {
            groups
                .into_par_iter()
                .enumerate()
                .map(|(index, group)| build_factor(group, index, &covariance, ordinary))
                .collect::<Result<Vec<_>>>()
        })?;
        let trend = if ordinary {
            let (num, den) = factors
                .iter()
                .map(SubmodelFactor::trend_terms)
                .fold((0., 0.), |acc, t| (acc.0 + t.0, acc.1 + t.1));
            let trend = num / den;
            factors.iter_mut().for_each(|f| f.remove_trend(trend));
            trend
        } else {
            0.
        };
        let mut part_a = timer.elapsed().as_secs_f64();
        warnings.flush();

        let needs_aggregation = spec.contains(OutputSpec::NESTED);
        let keep_weights =
            spec.intersects(OutputSpec::SUBMODELS | OutputSpec::JOINT_COV) && needs_aggregation;
        let keep_tensors = spec.contains(OutputSpec::TENSORS);
        let pairs = pair_list(n_groups);
        let settings = ZoneSettings {
            factors: &factors,
            covariance: &covariance,
            pairs: &pairs,
            variance,
            num_threads: self.num_threads,
            needs_aggregation,
            keep_weights,
            keep_tensors,
        };

        // zones: disjoint query ranges run as fully independent tasks
        let n_zones = self.num_threads_zones.min(q.max(1));
        let chunk = q.div_ceil(n_zones).max(1);
        let ranges: Vec<(usize, usize)> = (0..n_zones)
            .map(|z| (z * chunk, ((z + 1) * chunk).min(q)))
            .filter(|(s, e)| s < e)
            .collect();
        let zone_pool = ThreadPoolBuilder::new().num_threads(n_zones).build()?;
        let zone_results: Vec<ZoneResult> = zone_pool.install(|| {
            ranges
                .par_iter()
                .map(|&(s, e)| run_zone(&settings, &query, s, e))
                .collect::<Result<Vec<_>>>()
        })?;

        part_a += max_duration(&zone_results, |z| z.part_a);
        let part_b = max_duration(&zone_results, |z| z.part_b);
        let part_c = max_duration(&zone_results, |z| z.part_c);
        let n_clamped: usize = zone_results
            .iter()
            .map(|z| {
                z.predictions.iter().map(|p| p.n_clamped).sum::<usize>()
                    + z.aggregation.as_ref().map(|a| a.n_clamped).unwrap_or(0)
            })
            .sum();
        if n_clamped > 0 && self.verbose_level > 1 {
            debug!("{n_clamped} variance underflows clamped to 0");
        }
        warnings.flush();

        // stitch the per-zone slices back into full-length outputs
        let (mut mean, mut sd2) = if needs_aggregation {
            (Array1::zeros(q), Array1::zeros(q))
        } else {
            (Array1::zeros(0), Array1::zeros(0))
        };
        let mut weights = keep_weights.then(|| Array2::zeros((n_groups, q)));
        let mut k_m = keep_tensors.then(|| Array3::zeros((q, n_groups, n_groups)));
        let mut k_m_diag = keep_tensors.then(|| Array2::zeros((n_groups, q)));
        for zone in &zone_results {
            if let Some(agg) = zone.aggregation.as_ref() {
                mean.slice_mut(s![zone.start..zone.end]).assign(&agg.mean);
                sd2.slice_mut(s![zone.start..zone.end]).assign(&agg.sd2);
                if let (Some(full), Some(part)) = (weights.as_mut(), agg.weights.as_ref()) {
                    full.slice_mut(s![.., zone.start..zone.end]).assign(part);
                }
                if let (Some(full), Some(part)) = (k_m.as_mut(), agg.k_m.as_ref()) {
                    for (offset, tile) in part.iter().enumerate() {
                        full.index_axis_mut(Axis(0), zone.start + offset).assign(tile);
                    }
                }
                if let (Some(full), Some(part)) = (k_m_diag.as_mut(), agg.k_m_diag.as_ref()) {
                    full.slice_mut(s![.., zone.start..zone.end]).assign(part);
                }
            }
        }
        if ordinary {
            mean.mapv_inplace(|v| v + trend);
        }

        // per-submodel outputs, also feeding the alternatives
        let submodel_outputs = spec.intersects(OutputSpec::SUBMODELS | OutputSpec::ALTERNATIVES);
        let (mean_m, sd2_m) = if submodel_outputs {
            let mut mean_m = Array2::zeros((n_groups, q));
            let mut sd2_m = Array2::zeros((n_groups, q));
            for zone in &zone_results {
                for (i, pred) in zone.predictions.iter().enumerate() {
                    mean_m
                        .slice_mut(s![i, zone.start..zone.end])
                        .assign(&pred.mean.mapv(|v| v + trend));
                    sd2_m
                        .slice_mut(s![i, zone.start..zone.end])
                        .assign(&pred.var);
                }
            }
            (Some(mean_m), Some(sd2_m))
        } else {
            (None, None)
        };

        // part D: joint covariances over the full query set
        let timer = Instant::now();
        let (cov, cov_prior) = if spec.contains(OutputSpec::JOINT_COV) && q > 0 {
            let lambda_full = stitch_columns(&zone_results, n_groups, |p| &p.lambda);
            let kx_full = stitch_columns(&zone_results, n_groups, |p| &p.kx);
            let weights_full = weights.as_ref().expect("weights kept for joint covariance");
            let (cov, cov_prior) = joint_covariances(
                &covariance,
                &factors,
                &lambda_full,
                &kx_full,
                weights_full,
                &query,
                variance,
                &pair_pool,
            );
            (Some(cov), Some(cov_prior))
        } else {
            (None, None)
        };
        let part_d = timer.elapsed().as_secs_f64();

        // part E: alternative consensus predictors
        let timer = Instant::now();
        let alternatives = if spec.contains(OutputSpec::ALTERNATIVES) {
            let mean_m = mean_m.as_ref().expect("submodel means computed");
            let sd2_m = sd2_m.as_ref().expect("submodel variances computed");
            Some(compute_alternatives(mean_m, sd2_m, variance))
        } else {
            None
        };
        let part_e = timer.elapsed().as_secs_f64();

        let export_submodels = spec.contains(OutputSpec::SUBMODELS);
        Ok(NestedKrigingOutput {
            mean,
            sd2,
            cov,
            cov_prior,
            duration: start_time.elapsed().as_secs_f64(),
            duration_details: DurationDetails {
                part_a,
                part_b,
                part_c,
                part_d,
                part_e,
            },
            source_code: format!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            weights: if export_submodels { weights } else { None },
            mean_m: if export_submodels { mean_m } else { None },
            sd2_m: if export_submodels { sd2_m } else { None },
            k_m,
            k_m_diag,
            alternatives,
        })
    }
}

fn max_duration(zones: &[ZoneResult], get: impl Fn(&ZoneResult) -> f64) -> f64 {
    zones.iter().map(get).fold(0., f64::max)
}

/// Concatenate one per-group matrix across zones along the query axis
fn stitch_columns(
    zones: &[ZoneResult],
    n_groups: usize,
    get: impl Fn(&SubmodelPrediction) -> &Array2<f64>,
) -> Vec<Array2<f64>> {
    (0..n_groups)
        .map(|i| {
            let views: Vec<_> = zones.iter().map(|z| get(&z.predictions[i]).view()).collect();
            concatenate(Axis(1), &views).expect("zone slices share the group dimension")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::DIAGONAL_VALUE;
    use crate::utils::{cho_solve, cholesky_with_retry};
    use approx::assert_abs_diff_eq;
    use linfa::ParamGuard;
    use ndarray::array;
    use ndarray_rand::RandomExt;
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use paste::paste;
    use rand_xoshiro::Xoshiro256Plus;

    /// Plain single-model Kriging with the exponential kernel, the long way
    fn reference_kriging(
        x: &Array2<f64>,
        y: &Array1<f64>,
        x_pred: &Array2<f64>,
        lengthscale: f64,
        variance: f64,
    ) -> (Array1<f64>, Array1<f64>) {
        let n = x.nrows();
        let q = x_pred.nrows();
        let mut k = Array2::from_shape_fn((n, n), |(i, j)| {
            (-(x[[i, 0]] - x[[j, 0]]).abs() / lengthscale).exp()
        });
        for i in 0..n {
            k[[i, i]] = DIAGONAL_VALUE;
        }
        let kx = Array2::from_shape_fn((n, q), |(i, j)| {
            (-(x[[i, 0]] - x_pred[[j, 0]]).abs() / lengthscale).exp()
        });
        let (l, _) = cholesky_with_retry(k).unwrap();
        let lambda = cho_solve(&l, &kx).unwrap();
        let mean = lambda.t().dot(y);
        let var = (&kx * &lambda)
            .sum_axis(Axis(0))
            .mapv(|kl| variance * (DIAGONAL_VALUE - kl));
        (mean, var)
    }

    fn line_setup() -> (Array2<f64>, Array1<f64>, Array2<f64>) {
        (
            array![[0.0], [1.0], [2.0], [3.0]],
            array![0.0, 1.0, 2.0, 3.0],
            array![[0.5], [1.5], [2.5]],
        )
    }

    fn base_params() -> NestedKrigingParams {
        NestedKriging::params().cov_type("exp").param(array![1.0]).sd2(1.0)
    }

    #[test]
    fn test_single_cluster_matches_reference_kriging() {
        let (x, y, x_pred) = line_setup();
        let clusters = array![0, 0, 0, 0];
        let output = base_params()
            .check()
            .unwrap()
            .predict(x.view(), y.view(), clusters.view(), x_pred.view())
            .unwrap();
        let (ref_mean, ref_var) = reference_kriging(&x, &y, &x_pred, 1.0, 1.0);
        for q in 0..3 {
            assert_abs_diff_eq!(output.mean[q], ref_mean[q], epsilon = 1e-10);
            assert_abs_diff_eq!(output.sd2[q], ref_var[q].max(0.), epsilon = 1e-10);
        }
    }

    #[test]
    fn test_two_clusters_stay_close_to_the_full_model() {
        let (x, y, x_pred) = line_setup();
        let output = base_params()
            .check()
            .unwrap()
            .predict(
                x.view(),
                y.view(),
                array![0, 0, 1, 1].view(),
                x_pred.view(),
            )
            .unwrap();
        let (ref_mean, ref_var) = reference_kriging(&x, &y, &x_pred, 1.0, 1.0);
        for q in 0..3 {
            assert_abs_diff_eq!(output.mean[q], ref_mean[q], epsilon = 1e-3);
            // aggregating subgroup predictors cannot beat the full model
            assert!(output.sd2[q] >= ref_var[q] - 1e-9);
            assert!((output.sd2[q] - ref_var[q]).abs() < 1e-3);
        }
    }

    #[test]
    fn test_interpolation_at_design_points() {
        let (x, y, _) = line_setup();
        let output = base_params()
            .check()
            .unwrap()
            .predict(x.view(), y.view(), array![0, 1, 0, 1].view(), x.view())
            .unwrap();
        for (q, &expected) in y.iter().enumerate() {
            assert_abs_diff_eq!(output.mean[q], expected, epsilon = 1e-9);
            assert!(output.sd2[q] <= 1e-9, "sd2 {} at query {q}", output.sd2[q]);
        }
    }

    #[test]
    fn test_cluster_relabelling_changes_nothing() {
        let (x, y, x_pred) = line_setup();
        let run = |clusters: Array1<i64>| {
            base_params()
                .check()
                .unwrap()
                .predict(x.view(), y.view(), clusters.view(), x_pred.view())
                .unwrap()
        };
        let a = run(array![4, 4, -7, -7]);
        let b = run(array![1, 1, 100, 100]);
        assert_eq!(a.mean, b.mean);
        assert_eq!(a.sd2, b.sd2);
    }

    #[test]
    fn test_unknown_kernel_falls_back_to_exp() {
        let (x, y, x_pred) = line_setup();
        let clusters = array![0, 0, 1, 1];
        let fallback = base_params()
            .cov_type("no_such_kernel")
            .check()
            .unwrap()
            .predict(x.view(), y.view(), clusters.view(), x_pred.view())
            .unwrap();
        let exp = base_params()
            .check()
            .unwrap()
            .predict(x.view(), y.view(), clusters.view(), x_pred.view())
            .unwrap();
        assert_eq!(fallback.mean, exp.mean);
        assert_eq!(fallback.sd2, exp.sd2);
    }

    #[test]
    fn test_zone_and_thread_counts_do_not_change_results() {
        let (x, y, x_pred) = line_setup();
        let clusters = array![0, 1, 0, 1];
        let run = |zones: usize, threads: usize| {
            base_params()
                .cov_type("matern3_2")
                .num_threads_zones(zones)
                .num_threads(threads)
                .output_level(1)
                .check()
                .unwrap()
                .predict(x.view(), y.view(), clusters.view(), x_pred.view())
                .unwrap()
        };
        let serial = run(1, 1);
        let parallel = run(3, 4);
        assert_eq!(serial.mean, parallel.mean);
        assert_eq!(serial.sd2, parallel.sd2);
        assert_eq!(serial.weights.unwrap(), parallel.weights.unwrap());
    }

    #[test]
    fn test_nugget_monotonicity() {
        let (x, y, x_pred) = line_setup();
        let run = |nugget: Array1<f64>, clusters: Array1<i64>| {
            base_params()
                .nugget(nugget)
                .check()
                .unwrap()
                .predict(x.view(), y.view(), clusters.view(), x_pred.view())
                .unwrap()
        };
        let single = array![0, 0, 0, 0];
        let low = run(array![0.01], single.clone());
        let high = run(array![0.1], single);
        for q in 0..3 {
            assert!(high.sd2[q] >= low.sd2[q] - 1e-9);
        }
        let split = array![0, 0, 1, 1];
        let low = run(array![0.0], split.clone());
        let high = run(array![0.5], split);
        for q in 0..3 {
            assert!(high.sd2[q] >= low.sd2[q] - 1e-9);
        }
    }

    #[test]
    fn test_scaling_identity() {
        let (x, y, x_pred) = line_setup();
        let clusters = array![0, 0, 1, 1];
        let base = base_params()
            .check()
            .unwrap()
            .predict(x.view(), y.view(), clusters.view(), x_pred.view())
            .unwrap();
        let scaled = base_params()
            .param(array![3.0])
            .check()
            .unwrap()
            .predict(
                x.mapv(|v| 3.0 * v).view(),
                y.view(),
                clusters.view(),
                x_pred.mapv(|v| 3.0 * v).view(),
            )
            .unwrap();
        for q in 0..3 {
            assert_abs_diff_eq!(base.mean[q], scaled.mean[q], epsilon = 1e-10);
            assert_abs_diff_eq!(base.sd2[q], scaled.sd2[q], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_ordinary_kriging_absorbs_a_constant_shift() {
        let (x, y, x_pred) = line_setup();
        let clusters = array![0, 0, 1, 1];
        let run = |y: Array1<f64>| {
            base_params()
                .cov_type("matern5_2")
                .kriging_type(KrigingType::Ordinary)
                .check()
                .unwrap()
                .predict(x.view(), y.view(), clusters.view(), x_pred.view())
                .unwrap()
        };
        let base = run(y.clone());
        let shifted = run(y.mapv(|v| v + 42.0));
        for q in 0..3 {
            assert_abs_diff_eq!(shifted.mean[q], base.mean[q] + 42.0, epsilon = 1e-9);
            assert_abs_diff_eq!(shifted.sd2[q], base.sd2[q], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_tensor_round_trip_reproduces_the_aggregation() {
        let (x, y, x_pred) = line_setup();
        let output = base_params()
            .cov_type("matern3_2")
            .sd2(2.0)
            .output_level(3)
            .check()
            .unwrap()
            .predict(x.view(), y.view(), array![0, 1, 0, 1].view(), x_pred.view())
            .unwrap();
        let k_m = output.k_m.as_ref().unwrap();
        let k_m_diag = output.k_m_diag.as_ref().unwrap();
        let mean_m = output.mean_m.as_ref().unwrap();
        for q in 0..3 {
            let tile = k_m.index_axis(Axis(0), q).to_owned();
            let rhs = k_m_diag.column(q).to_owned();
            let (l, _) = cholesky_with_retry(tile).unwrap();
            let w = cho_solve(&l, &rhs.clone().insert_axis(Axis(1)))
                .unwrap()
                .remove_axis(Axis(1));
            let mean: f64 = w.dot(&mean_m.column(q));
            let sd2 = 2.0 - w.dot(&rhs);
            assert_abs_diff_eq!(mean, output.mean[q], epsilon = 1e-10);
            assert_abs_diff_eq!(sd2.max(0.), output.sd2[q], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_joint_covariance_diagonal_matches_sd2() {
        let (x, y, x_pred) = line_setup();
        let output = base_params()
            .cov_type("gauss")
            .output_level(10)
            .check()
            .unwrap()
            .predict(x.view(), y.view(), array![0, 0, 1, 1].view(), x_pred.view())
            .unwrap();
        let cov = output.cov.as_ref().unwrap();
        let cov_prior = output.cov_prior.as_ref().unwrap();
        for q in 0..3 {
            assert_abs_diff_eq!(cov[[q, q]], output.sd2[q], epsilon = 1e-8);
            assert_abs_diff_eq!(cov_prior[[q, q]], 1.0, epsilon = 1e-12);
        }
        // both matrices are symmetric
        for a in 0..3 {
            for b in 0..3 {
                assert_abs_diff_eq!(cov[[a, b]], cov[[b, a]], epsilon = 1e-10);
                assert_abs_diff_eq!(cov_prior[[a, b]], cov_prior[[b, a]], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_alternatives_smoke() {
        let (x, y, x_pred) = line_setup();
        let clusters = array![0, 0, 1, 1];
        let output = base_params()
            .output_level(-3)
            .check()
            .unwrap()
            .predict(x.view(), y.view(), clusters.view(), x_pred.view())
            .unwrap();
        let alternatives = output.alternatives.as_ref().unwrap();
        // nested outputs are present as well at level -3
        assert_eq!(output.mean.len(), 3);

        // per-submodel references from two single-cluster runs
        let sub = |rows: [usize; 2]| {
            base_params()
                .check()
                .unwrap()
                .predict(
                    x.select(Axis(0), &rows).view(),
                    y.select(Axis(0), &rows).view(),
                    array![0, 0].view(),
                    x_pred.view(),
                )
                .unwrap()
        };
        let first = sub([0, 1]);
        let second = sub([2, 3]);
        for q in 0..3 {
            for pred in [
                &alternatives.poe,
                &alternatives.gpoe,
                &alternatives.gpoe_entropy,
                &alternatives.bcm,
                &alternatives.rbcm,
                &alternatives.spv,
            ] {
                assert!(pred.mean[q].is_finite());
                assert!(pred.sd2[q].is_finite());
            }
            let min_var = first.sd2[q].min(second.sd2[q]);
            assert_abs_diff_eq!(alternatives.spv.sd2[q], min_var, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_alternatives_only_skips_the_nested_predictor() {
        let (x, y, x_pred) = line_setup();
        let output = base_params()
            .output_level(-1)
            .check()
            .unwrap()
            .predict(x.view(), y.view(), array![0, 0, 1, 1].view(), x_pred.view())
            .unwrap();
        assert!(output.alternatives.is_some());
        assert!(output.mean.is_empty());
        assert!(output.sd2.is_empty());
        assert!(output.weights.is_none());
    }

    #[test]
    fn test_shape_mismatches_are_reported() {
        let (x, y, x_pred) = line_setup();
        let params = base_params().check().unwrap();
        let err = params.predict(x.view(), y.view(), array![0, 0].view(), x_pred.view());
        assert!(matches!(
            err,
            Err(NestedKrigingError::InvalidShape { argument: "clusters", .. })
        ));
        let err = params.predict(
            x.view(),
            array![1.0, 2.0].view(),
            array![0, 0, 1, 1].view(),
            x_pred.view(),
        );
        assert!(matches!(
            err,
            Err(NestedKrigingError::InvalidShape { argument: "Y", .. })
        ));
        let err = params.predict(
            x.view(),
            y.view(),
            array![0, 0, 1, 1].view(),
            array![[0.5, 0.5]].view(),
        );
        assert!(matches!(
            err,
            Err(NestedKrigingError::InvalidShape { argument: "x", .. })
        ));
    }

    // Random designs must assemble into factorable correlation matrices for
    // every kernel, up to 100 points in 5 dimensions.
    macro_rules! test_kernel_factorisation {
        ($name:ident, $tag:literal, $seed:literal) => {
            paste! {
                #[test]
                fn [<test_random_design_factorises_ $name>]() {
                    let mut rng = Xoshiro256Plus::seed_from_u64($seed);
                    let x = Array2::random_using((100, 5), Uniform::new(0., 5.), &mut rng);
                    let y = Array1::random_using(100, Uniform::new(-1., 1.), &mut rng);
                    let x_pred = Array2::random_using((7, 5), Uniform::new(0., 5.), &mut rng);
                    let clusters = Array1::from_shape_fn(100, |i| (i % 4) as i64);
                    let param = if $tag == "powexp" {
                        Array1::from_elem(10, 1.0)
                    } else {
                        Array1::from_elem(5, 1.0)
                    };
                    let output = NestedKriging::params()
                        .cov_type($tag)
                        .param(param)
                        .sd2(1.0)
                        .num_threads(2)
                        .check()
                        .unwrap()
                        .predict(x.view(), y.view(), clusters.view(), x_pred.view())
                        .unwrap();
                    assert!(output.mean.iter().all(|v| v.is_finite()));
                    assert!(output.sd2.iter().all(|v| v.is_finite() && *v >= 0.));
                }
            }
        };
    }

    test_kernel_factorisation!(exp, "exp", 42);
    test_kernel_factorisation!(gauss, "gauss", 43);
    test_kernel_factorisation!(matern32, "matern3_2", 44);
    test_kernel_factorisation!(matern52, "matern5_2", 45);
    test_kernel_factorisation!(powexp, "powexp", 46);
    test_kernel_factorisation!(white_noise, "white_noise", 47);
}
