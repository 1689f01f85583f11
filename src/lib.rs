//! This library implements the [nested Kriging](https://doi.org/10.1007/s11222-017-9766-2)
//! prediction method for [Gaussian process](https://en.wikipedia.org/wiki/Gaussian_process)
//! regression on datasets too large for a single Kriging model.
//!
//! A single Gaussian process predictor costs O(n^3) in the number of
//! observations. Nested Kriging restricts exact Kriging to user-supplied
//! subgroups of the design points, then aggregates the subgroup predictors
//! through their cross-covariances into one global predictor: the submodels
//! are treated as jointly Gaussian and Kriging's conditioning formula is
//! applied a second time. The cost becomes cubic in subgroup size and
//! quadratic in the number of subgroups, at a controlled loss of statistical
//! optimality.
//!
//! # Implementation
//!
//! * Based on [ndarray](https://github.com/rust-ndarray/ndarray) with the
//!   [linfa-linalg](https://github.com/rust-ml/linfa-linalg) Cholesky backend
//!   (pure Rust) by default and LAPACK through
//!   [`ndarray-linalg`](https://github.com/rust-ndarray/ndarray-linalg)
//!   behind the `blas` feature.
//! * Six stationary correlation kernels evaluated on pre-rescaled
//!   coordinates: `exp`, `gauss`, `matern3_2`, `matern5_2`, `powexp`,
//!   `white_noise`.
//! * Two axes of parallelism via [rayon](https://github.com/rayon-rs/rayon):
//!   prediction-point zones run as independent tasks, and the subgroup-pair
//!   space inside a zone is spread over a worker pool. Results are
//!   deterministic for any thread configuration.
//! * Simple Kriging (centered responses) or ordinary Kriging with a constant
//!   trend estimated across subgroups.
//! * Optional consensus alternatives (PoE, GPoE, BCM, RBCM, SPV) computed
//!   from the same per-submodel quantities.
//!
//! # Features
//!
//! ## serializable
//!
//! The `serializable` feature enables [serde](https://serde.rs/) derives on
//! the public parameter and output types.
//!
//! ## blas
//!
//! The `blas` feature switches the dense linear-algebra backend to
//! BLAS/LAPACK via [`ndarray-linalg`](https://github.com/rust-ndarray/ndarray-linalg).
//!
//! # Example
//!
//! ```no_run
//! use ndarray::array;
//! use linfa::ParamGuard;
//! use nested_kriging::NestedKriging;
//!
//! let x = array![[0.0], [1.0], [2.0], [3.0]];
//! let y = array![0.0, 1.0, 2.0, 3.0];
//! // the partition is given, e.g. by any clustering of the design points
//! let clusters = array![0, 0, 1, 1];
//! let x_pred = array![[0.5], [1.5], [2.5]];
//!
//! let output = NestedKriging::params()
//!     .cov_type("matern5_2")
//!     .param(array![1.0])
//!     .sd2(1.0)
//!     .num_threads(4)
//!     .check()
//!     .expect("valid parameters")
//!     .predict(x.view(), y.view(), clusters.view(), x_pred.view())
//!     .expect("nested Kriging prediction");
//!
//! println!("mean = {}", output.mean);
//! println!("sd2  = {}", output.sd2);
//! ```
//!
//! # Reference
//!
//! Rullière, D., Durrande, N., Bachoc, F., Chevalier, C.,
//! [Nested Kriging predictions for datasets with a large number of observations](https://doi.org/10.1007/s11222-017-9766-2),
//! Statistics and Computing 28 (2018), 849-867.
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod aggregator;
mod algorithm;
mod alternatives;
mod clustering;
pub mod correlation_models;
mod covariance;
mod cross_cov;
mod errors;
mod parameters;
mod points;
mod submodel;
mod utils;

pub use algorithm::*;
pub use alternatives::{AlternativePrediction, Alternatives};
pub use covariance::{Covariance, DIAGONAL_VALUE, TINY_NUGGET_ON_DIAG};
pub use errors::*;
pub use parameters::*;
pub use points::Points;
