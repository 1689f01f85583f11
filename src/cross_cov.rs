//! Cross-covariances between submodel predictions.
//!
//! For each unordered subgroup pair this computes, at every query point of a
//! zone, the covariance between the two submodel predictors in correlation
//! units: `lambda_i(q)^T C(G_i, G_j) lambda_j(q)`. The pair set is the
//! dominant cost of the whole algorithm and is spread over the zone's worker
//! pool; each worker reuses one scratch tile sized to the largest pair so the
//! kernel-evaluation loop never allocates.

use crate::covariance::Covariance;
use crate::submodel::{SubmodelFactor, SubmodelPrediction};
use ndarray::{Array1, Array2, Axis, s};
use rayon::prelude::*;

/// Unordered subgroup pairs `(i, j)` with `i < j`, in row-major order
pub(crate) fn pair_list(n_groups: usize) -> Vec<(usize, usize)> {
    let mut pairs = Vec::with_capacity(n_groups * n_groups.saturating_sub(1) / 2);
    for i in 0..n_groups {
        for j in (i + 1)..n_groups {
            pairs.push((i, j));
        }
    }
    pairs
}

/// Covariance between the predictions of submodels `i` and `j` at every
/// query, in correlation units, for one already-filled correlation tile
fn pair_covariance(
    tile: &Array2<f64>,
    ni: usize,
    nj: usize,
    pred_i: &SubmodelPrediction,
    pred_j: &SubmodelPrediction,
) -> Array1<f64> {
    let c = tile.slice(s![..ni, ..nj]);
    let t = c.dot(&pred_j.lambda);
    (&pred_i.lambda * &t).sum_axis(Axis(0))
}

/// Evaluate every pair of the upper triangle over the zone's worker pool.
///
/// The result vector is aligned with [`pair_list`]; diagonal terms come from
/// the submodel predictor variances and are filled in by the aggregator.
pub(crate) fn submodel_cross_covariances(
    covariance: &Covariance,
    factors: &[SubmodelFactor],
    predictions: &[SubmodelPrediction],
    pairs: &[(usize, usize)],
    pool: &rayon::ThreadPool,
) -> Vec<Array1<f64>> {
    let max_n = factors.iter().map(|f| f.points.len()).max().unwrap_or(0);
    pool.install(|| {
        pairs
            .par_iter()
            .map_init(
                || Array2::zeros((max_n, max_n)),
                |scratch, &(i, j)| {
                    let (ni, nj) = (factors[i].points.len(), factors[j].points.len());
                    covariance.fill_cross_correlations(
                        scratch.slice_mut(s![..ni, ..nj]),
                        &factors[i].points,
                        &factors[j].points,
                    );
                    pair_covariance(scratch, ni, nj, &predictions[i], &predictions[j])
                },
            )
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::Subgroup;
    use crate::correlation_models::CovType;
    use crate::parameters::CovarianceParams;
    use crate::points::Points;
    use crate::submodel::{build_factor, predict_submodel};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_matches_direct_contraction() {
        let params = CovarianceParams::new(1, array![1.0].view(), 1.0, CovType::Matern32).unwrap();
        let covariance = Covariance::new(&params);
        let groups = [
            Subgroup {
                points: Points::new(array![[0.0], [1.0]].view(), &params),
                y: array![1.0, 2.0],
                nugget: ndarray::Array1::zeros(0),
            },
            Subgroup {
                points: Points::new(array![[2.0], [3.0], [4.0]].view(), &params),
                y: array![3.0, 4.0, 5.0],
                nugget: ndarray::Array1::zeros(0),
            },
        ];
        let factors: Vec<_> = groups
            .into_iter()
            .enumerate()
            .map(|(i, g)| build_factor(g, i, &covariance, false).unwrap())
            .collect();
        let query = Points::new(array![[0.5], [2.5]].view(), &params);
        let predictions: Vec<_> = factors
            .iter()
            .map(|f| predict_submodel(f, &covariance, &query, 1.0).unwrap())
            .collect();
        let pairs = pair_list(2);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build()
            .unwrap();
        let covs =
            submodel_cross_covariances(&covariance, &factors, &predictions, &pairs, &pool);
        assert_eq!(covs.len(), 1);

        // direct: lambda_0^T C lambda_1 per query column
        let c = covariance.cross_correlations(&factors[0].points, &factors[1].points);
        for q in 0..2 {
            let expected = predictions[0]
                .lambda
                .column(q)
                .dot(&c.dot(&predictions[1].lambda.column(q)));
            assert_abs_diff_eq!(covs[0][q], expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_pair_list_covers_the_upper_triangle() {
        assert_eq!(pair_list(1), vec![]);
        assert_eq!(pair_list(3), vec![(0, 1), (0, 2), (1, 2)]);
    }
}
