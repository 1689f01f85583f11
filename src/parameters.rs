//! Covariance parameter bundle and driver-facing run configuration.

use crate::correlation_models::{CovType, Kernel};
use crate::errors::{NestedKrigingError, Result};
use bitflags::bitflags;
use linfa::ParamGuard;
use ndarray::{Array1, ArrayView1};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Guard against division by a vanishing variance
const VARIANCE_EPSILON: f64 = 1e-100;

/// An immutable carrier of the covariance configuration shared by every worker
///
/// Construction performs all precomputations: the kernel is instantiated, the
/// per-dimension scaling factors are derived from the kernel constant and the
/// lengthscales, and the inverse variance is cached. The lengthscale vector is
/// copied so callers may keep mutating theirs. The bundle is neither cloned
/// nor moved afterwards; all other components borrow it.
#[derive(Debug)]
pub struct CovarianceParams {
    d: usize,
    param: Array1<f64>,
    variance: f64,
    inverse_variance: f64,
    kernel: Kernel,
    scaling_factors: Array1<f64>,
}

impl CovarianceParams {
    /// Build the bundle from the input dimension, the lengthscale vector
    /// (length 2d for the power exponential kernel), the process variance
    /// and the kernel choice.
    pub fn new(
        d: usize,
        param: ArrayView1<f64>,
        variance: f64,
        cov_type: CovType,
    ) -> Result<CovarianceParams> {
        if d == 0 {
            return Err(NestedKrigingError::InvalidValueError(
                "input dimension must be positive".to_string(),
            ));
        }
        let expected = if cov_type == CovType::PowExp { 2 * d } else { d };
        if param.len() != expected {
            return Err(NestedKrigingError::InvalidShape {
                argument: "param",
                expected: format!("length {expected}"),
                actual: format!("length {}", param.len()),
            });
        }
        if param.iter().any(|&v| !(v > 0.)) {
            return Err(NestedKrigingError::InvalidValueError(
                "lengthscales and exponents must be strictly positive".to_string(),
            ));
        }
        if !(variance > 0.) {
            return Err(NestedKrigingError::InvalidValueError(format!(
                "variance must be strictly positive, got {variance}"
            )));
        }
        let kernel = Kernel::new(cov_type, param);
        let scaling_factors = if kernel.rescales() {
            let c = kernel.scaling_factor();
            param.slice(ndarray::s![..d]).mapv(|l| c / l)
        } else {
            Array1::ones(d)
        };
        Ok(CovarianceParams {
            d,
            param: param.to_owned(),
            variance,
            inverse_variance: 1. / (variance + VARIANCE_EPSILON),
            kernel,
            scaling_factors,
        })
    }

    /// Input dimension
    pub fn d(&self) -> usize {
        self.d
    }

    /// Lengthscale vector as given (length 2d for the power exponential kernel)
    pub fn param(&self) -> &Array1<f64> {
        &self.param
    }

    /// Process variance
    pub fn variance(&self) -> f64 {
        self.variance
    }

    /// Cached `1 / (variance + epsilon)`
    pub fn inverse_variance(&self) -> f64 {
        self.inverse_variance
    }

    /// The constructed kernel instance
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Per-dimension multipliers applied to raw coordinates at ingestion
    pub fn scaling_factors(&self) -> &Array1<f64> {
        &self.scaling_factors
    }
}

/// First-layer Kriging flavour
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum KrigingType {
    /// Known (zero) mean; responses are assumed centered
    #[default]
    Simple,
    /// Unknown constant mean estimated from the data, predictions run on residuals
    Ordinary,
}

impl KrigingType {
    /// Parse the driver-facing tag (`"simple"` or `"ordinary"`)
    pub fn parse(tag: &str) -> Option<KrigingType> {
        match tag {
            "simple" => Some(KrigingType::Simple),
            "ordinary" => Some(KrigingType::Ordinary),
            _ => None,
        }
    }
}

impl fmt::Display for KrigingType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KrigingType::Simple => write!(f, "simple"),
            KrigingType::Ordinary => write!(f, "ordinary"),
        }
    }
}

bitflags! {
    /// Flags selecting which quantities a run computes and returns.
    ///
    /// Decoded from the integer `output_level` of the driver interface with
    /// [`OutputSpec::from_level`]; flags can also be combined directly with
    /// the bit-wise `or` operator.
    ///
    /// See [bitflags::bitflags]
    #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    #[cfg_attr(feature = "serializable", derive(Serialize, Deserialize), serde(transparent))]
    pub struct OutputSpec: u8 {
        /// Aggregated nested predictor (mean and variance)
        const NESTED = 0x01;
        /// Per-submodel means/variances and aggregation weights
        const SUBMODELS = 0x02;
        /// Full cross-covariance tensors K_M and k_M
        const TENSORS = 0x04;
        /// Joint prediction covariance matrices
        const JOINT_COV = 0x08;
        /// Consensus alternatives (PoE, GPoE, BCM, RBCM, SPV)
        const ALTERNATIVES = 0x10;
    }
}

impl OutputSpec {
    /// Decode the driver-facing output level.
    ///
    /// Non-negative levels always compute the nested predictor; `+1` adds
    /// per-submodel outputs and weights, `+2` the full tensors, `+10` the
    /// joint covariances. Negative levels enable the alternatives: `-1`
    /// computes alternatives only, `-3` alternatives plus the nested
    /// predictor.
    pub fn from_level(level: i32) -> OutputSpec {
        if level < 0 {
            let rest = level.unsigned_abs();
            let mut spec = OutputSpec::ALTERNATIVES;
            if rest & 2 != 0 {
                spec |= OutputSpec::NESTED;
            }
            spec
        } else {
            let mut rest = level as u32;
            let mut spec = OutputSpec::NESTED;
            if rest >= 10 {
                spec |= OutputSpec::JOINT_COV;
                rest -= 10;
            }
            if rest & 1 != 0 {
                spec |= OutputSpec::SUBMODELS;
            }
            if rest & 2 != 0 {
                spec |= OutputSpec::TENSORS;
            }
            spec
        }
    }
}

/// A set of validated nested Kriging parameters.
#[derive(Clone, Debug)]
pub struct NestedKrigingValidParams {
    pub(crate) cov_type: String,
    pub(crate) param: Array1<f64>,
    pub(crate) sd2: f64,
    pub(crate) kriging_type: KrigingType,
    pub(crate) num_threads_zones: usize,
    pub(crate) num_threads: usize,
    pub(crate) num_threads_blas: usize,
    pub(crate) verbose_level: i32,
    pub(crate) output_level: i32,
    pub(crate) global_options: Vec<i64>,
    pub(crate) nugget: Array1<f64>,
}

impl Default for NestedKrigingValidParams {
    fn default() -> NestedKrigingValidParams {
        NestedKrigingValidParams {
            cov_type: "matern5_2".to_string(),
            param: Array1::zeros(0),
            sd2: 1.0,
            kriging_type: KrigingType::Simple,
            num_threads_zones: 1,
            num_threads: 1,
            num_threads_blas: 1,
            verbose_level: 1,
            output_level: 0,
            global_options: Vec::new(),
            nugget: Array1::zeros(0),
        }
    }
}

impl NestedKrigingValidParams {
    /// Covariance kernel tag
    pub fn cov_type(&self) -> &str {
        &self.cov_type
    }

    /// Lengthscale vector (length 2d for the power exponential kernel)
    pub fn param(&self) -> &Array1<f64> {
        &self.param
    }

    /// Process variance
    pub fn sd2(&self) -> f64 {
        self.sd2
    }

    /// First-layer Kriging flavour
    pub fn kriging_type(&self) -> KrigingType {
        self.kriging_type
    }

    /// Number of independent prediction-point zones
    pub fn num_threads_zones(&self) -> usize {
        self.num_threads_zones
    }

    /// Number of workers covering the subgroup-pair space inside one zone
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Thread count handed to the dense linear-algebra backend
    pub fn num_threads_blas(&self) -> usize {
        self.num_threads_blas
    }

    /// Verbosity; values at or below 0 suppress warnings
    pub fn verbose_level(&self) -> i32 {
        self.verbose_level
    }

    /// Raw output level as given by the driver
    pub fn output_level(&self) -> i32 {
        self.output_level
    }

    /// Decoded output selection
    pub fn output_spec(&self) -> OutputSpec {
        OutputSpec::from_level(self.output_level)
    }

    /// Reserved developer options, without observable effect on results
    pub fn global_options(&self) -> &[i64] {
        &self.global_options
    }

    /// Nugget vector, broadcast cyclically over the observations
    pub fn nugget(&self) -> &Array1<f64> {
        &self.nugget
    }
}

#[derive(Clone, Debug, Default)]
/// The set of hyperparameters that can be specified for a
/// [nested Kriging run](crate::NestedKriging).
pub struct NestedKrigingParams(NestedKrigingValidParams);

impl NestedKrigingParams {
    /// Constructor with default values: matern 5/2 kernel, unit variance,
    /// simple Kriging, single-threaded, base outputs, empty nugget
    pub fn new() -> NestedKrigingParams {
        NestedKrigingParams(NestedKrigingValidParams::default())
    }

    /// Set the covariance kernel tag.
    ///
    /// One of `exp`, `gauss`, `matern3_2`, `matern5_2`, `powexp`,
    /// `white_noise`; an unknown tag is warned about at run time and falls
    /// back to `exp`.
    pub fn cov_type(mut self, cov_type: &str) -> Self {
        self.0.cov_type = cov_type.to_string();
        self
    }

    /// Set the lengthscale vector, one entry per input dimension
    /// (for `powexp`: d lengthscales followed by d exponents)
    pub fn param(mut self, param: Array1<f64>) -> Self {
        self.0.param = param;
        self
    }

    /// Set the process variance
    pub fn sd2(mut self, sd2: f64) -> Self {
        self.0.sd2 = sd2;
        self
    }

    /// Set the first-layer Kriging flavour
    pub fn kriging_type(mut self, kriging_type: KrigingType) -> Self {
        self.0.kriging_type = kriging_type;
        self
    }

    /// Set the number of prediction-point zones run as independent tasks
    pub fn num_threads_zones(mut self, num_threads_zones: usize) -> Self {
        self.0.num_threads_zones = num_threads_zones;
        self
    }

    /// Set the number of workers covering the subgroup-pair space
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.0.num_threads = num_threads;
        self
    }

    /// Set the thread count of the dense linear-algebra backend
    pub fn num_threads_blas(mut self, num_threads_blas: usize) -> Self {
        self.0.num_threads_blas = num_threads_blas;
        self
    }

    /// Set verbosity; values at or below 0 suppress warnings
    pub fn verbose_level(mut self, verbose_level: i32) -> Self {
        self.0.verbose_level = verbose_level;
        self
    }

    /// Set the output level (see [`OutputSpec::from_level`] for the encoding)
    pub fn output_level(mut self, output_level: i32) -> Self {
        self.0.output_level = output_level;
        self
    }

    /// Set reserved developer options; no observable effect on results
    pub fn global_options(mut self, global_options: Vec<i64>) -> Self {
        self.0.global_options = global_options;
        self
    }

    /// Set the nugget vector, broadcast cyclically over the observations
    pub fn nugget(mut self, nugget: Array1<f64>) -> Self {
        self.0.nugget = nugget;
        self
    }
}

impl From<NestedKrigingValidParams> for NestedKrigingParams {
    fn from(valid: NestedKrigingValidParams) -> Self {
        NestedKrigingParams(valid)
    }
}

impl ParamGuard for NestedKrigingParams {
    type Checked = NestedKrigingValidParams;
    type Error = NestedKrigingError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if self.0.param.is_empty() {
            return Err(NestedKrigingError::InvalidValueError(
                "`param` lengthscale vector must be provided".to_string(),
            ));
        }
        if self.0.param.iter().any(|&v| !(v > 0.)) {
            return Err(NestedKrigingError::InvalidValueError(
                "`param` entries must be strictly positive".to_string(),
            ));
        }
        if !(self.0.sd2 > 0.) {
            return Err(NestedKrigingError::InvalidValueError(format!(
                "`sd2` must be strictly positive, got {}",
                self.0.sd2
            )));
        }
        if self.0.num_threads_zones == 0 || self.0.num_threads == 0 || self.0.num_threads_blas == 0
        {
            return Err(NestedKrigingError::InvalidValueError(
                "thread counts must be at least 1".to_string(),
            ));
        }
        if self.0.nugget.iter().any(|&v| v < 0.) {
            return Err(NestedKrigingError::InvalidValueError(
                "`nugget` entries must be non-negative".to_string(),
            ));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}
