//! Subgroup splitting from a user-supplied partition vector.

use crate::points::Points;
use ndarray::{Array1, ArrayView1};
use std::collections::HashMap;

/// One cluster of design points with its responses and per-point nugget values
#[derive(Debug)]
pub(crate) struct Subgroup {
    pub points: Points,
    pub y: Array1<f64>,
    pub nugget: Array1<f64>,
}

impl Subgroup {
    pub fn len(&self) -> usize {
        self.points.len()
    }
}

/// Densely reindex arbitrary integer labels to `0..n_groups`, in order of
/// first appearance. Labels absent from the vector simply never show up, so
/// empty groups drop out.
///
/// First-appearance order is invariant under any bijective relabelling,
/// which keeps group ordering (and therefore every downstream floating-point
/// operation order) identical across relabelled inputs.
pub(crate) fn dense_labels(clusters: ArrayView1<i64>) -> (Vec<usize>, usize) {
    let mut mapping: HashMap<i64, usize> = HashMap::new();
    let mut dense = Vec::with_capacity(clusters.len());
    for &label in clusters.iter() {
        let next = mapping.len();
        let id = *mapping.entry(label).or_insert(next);
        dense.push(id);
    }
    (dense, mapping.len())
}

/// Split rescaled design points, responses and the cyclic nugget vector into
/// per-subgroup containers, preserving within-group point order.
pub(crate) fn split_by_cluster(
    points: &Points,
    y: ArrayView1<f64>,
    nugget: ArrayView1<f64>,
    clusters: ArrayView1<i64>,
) -> Vec<Subgroup> {
    let (dense, n_groups) = dense_labels(clusters);
    let mut indices: Vec<Vec<usize>> = vec![Vec::new(); n_groups];
    for (row, &group) in dense.iter().enumerate() {
        indices[group].push(row);
    }
    indices
        .iter()
        .map(|rows| Subgroup {
            points: points.select(rows),
            y: rows.iter().map(|&r| y[r]).collect(),
            nugget: if nugget.is_empty() {
                Array1::zeros(0)
            } else {
                rows.iter().map(|&r| nugget[r % nugget.len()]).collect()
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation_models::CovType;
    use crate::parameters::CovarianceParams;
    use ndarray::array;

    #[test]
    fn test_dense_labels_first_appearance_order() {
        let (dense, n) = dense_labels(array![7, 7, -2, 7, 42, -2].view());
        assert_eq!(dense, vec![0, 0, 1, 0, 2, 1]);
        assert_eq!(n, 3);
    }

    #[test]
    fn test_dense_labels_bijection_invariance() {
        let before = dense_labels(array![5, 5, 2, 2, 9].view());
        // swap labels 5 <-> 2, map 9 -> 0: same positions, same dense ids
        let after = dense_labels(array![2, 2, 5, 5, 0].view());
        assert_eq!(before, after);
    }

    #[test]
    fn test_split_preserves_order_and_broadcasts_nugget() {
        let params = CovarianceParams::new(1, array![1.0].view(), 1.0, CovType::Exp).unwrap();
        let points = Points::new(array![[0.0], [1.0], [2.0], [3.0]].view(), &params);
        let groups = split_by_cluster(
            &points,
            array![10.0, 11.0, 12.0, 13.0].view(),
            array![0.5, 0.25].view(),
            array![1, 3, 1, 3].view(),
        );
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].y, array![10.0, 12.0]);
        assert_eq!(groups[1].y, array![11.0, 13.0]);
        assert_eq!(groups[0].points.row(1)[0], 2.0);
        // nugget values follow the points they are attached to
        assert_eq!(groups[0].nugget, array![0.5, 0.5]);
        assert_eq!(groups[1].nugget, array![0.25, 0.25]);
    }

    #[test]
    fn test_empty_nugget_stays_empty() {
        let params = CovarianceParams::new(1, array![1.0].view(), 1.0, CovType::Exp).unwrap();
        let points = Points::new(array![[0.0], [1.0]].view(), &params);
        let groups = split_by_cluster(
            &points,
            array![1.0, 2.0].view(),
            array![].view(),
            array![0, 0].view(),
        );
        assert_eq!(groups.len(), 1);
        assert!(groups[0].nugget.is_empty());
    }
}
