use thiserror::Error;

/// A result type for nested Kriging computations
pub type Result<T> = std::result::Result<T, NestedKrigingError>;

/// An error raised while building or evaluating a nested Kriging predictor
#[derive(Error, Debug)]
pub enum NestedKrigingError {
    /// When an input argument has inconsistent dimensions
    #[error("Invalid shape for `{argument}`: expected {expected}, got {actual}")]
    InvalidShape {
        /// Name of the offending argument
        argument: &'static str,
        /// Expected dimensions
        expected: String,
        /// Actual dimensions
        actual: String,
    },
    /// When a subgroup correlation matrix stays non positive definite after nugget retries
    #[error(
        "Correlation matrix of subgroup {group} (size {size}) is not positive definite after {retries} nugget retries"
    )]
    NotPositiveDefinite {
        /// Index of the offending subgroup
        group: usize,
        /// Number of design points in the subgroup
        size: usize,
        /// Number of diagonal-nugget doublings attempted
        retries: usize,
    },
    /// When the submodel fusion system stays singular after nugget retries
    #[error("Aggregation system is singular at prediction point {query} after {retries} nugget retries")]
    SingularAggregation {
        /// Global index of the offending prediction point
        query: usize,
        /// Number of diagonal-nugget doublings attempted
        retries: usize,
    },
    /// When linear algebra computation fails
    #[cfg(feature = "blas")]
    #[error("Linalg BLAS error: {0}")]
    LinalgBlasError(#[from] ndarray_linalg::error::LinalgError),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a worker pool cannot be built
    #[error("Thread pool error: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
}
