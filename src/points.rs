//! Rescaled point sets.
//!
//! Points are stored packed row-major with every coordinate already multiplied
//! by the active kernel's per-dimension scaling factor, so the correlation hot
//! loop sees unit lengthscales and contains no division.

use crate::parameters::CovarianceParams;
use ndarray::{Array2, ArrayView1, ArrayView2, s};

/// A rescaled point cloud (design or prediction points)
///
/// Each stored coordinate is `(raw - origin) * scaling_factor_k`.
#[derive(Clone, Debug)]
pub struct Points {
    data: Array2<f64>,
}

impl Points {
    /// Rescale a raw n x d matrix with a zero origin
    pub fn new(source: ArrayView2<f64>, params: &CovarianceParams) -> Points {
        let factors = params.scaling_factors();
        let mut data = source.to_owned();
        for mut row in data.rows_mut() {
            row *= factors;
        }
        Points { data }
    }

    /// Rescale a raw n x d matrix relative to an origin row
    pub fn with_origin(
        source: ArrayView2<f64>,
        params: &CovarianceParams,
        origin: ArrayView1<f64>,
    ) -> Points {
        let factors = params.scaling_factors();
        let mut data = source.to_owned();
        for mut row in data.rows_mut() {
            row -= &origin;
            row *= factors;
        }
        Points { data }
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    /// Whether the set holds no point
    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    /// Point dimension
    pub fn dim(&self) -> usize {
        self.data.ncols()
    }

    /// Read-only access to one point
    #[inline]
    pub fn row(&self, index: usize) -> ArrayView1<f64> {
        self.data.row(index)
    }

    /// New set holding the given rows, preserving their order
    pub(crate) fn select(&self, indices: &[usize]) -> Points {
        Points {
            data: self.data.select(ndarray::Axis(0), indices),
        }
    }

    /// New set holding a contiguous row range (used for prediction zones)
    pub(crate) fn slice_rows(&self, start: usize, end: usize) -> Points {
        Points {
            data: self.data.slice(s![start..end, ..]).to_owned(),
        }
    }
}
