//! A module for stationary correlation models evaluated on pre-rescaled coordinates.
//!
//! The following correlation models are implemented:
//! * absolute exponential,
//! * squared exponential,
//! * matern 3/2,
//! * matern 5/2,
//! * power exponential,
//! * white noise.
//!
//! Coordinates are rescaled once at ingestion (see [`Points`](crate::Points)) by the
//! kernel scaling factor divided by the lengthscale, so the correlation call itself
//! contains no per-dimension division and inlines into the matrix fill loops.

use ndarray::{Array1, ArrayView1, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A trait for using a correlation model in nested Kriging
///
/// Implementations evaluate on coordinates already multiplied by
/// `scaling_factor() / lengthscale`, per dimension.
pub trait CorrelationModel: Clone + fmt::Display + Sync + Send {
    /// Correlation between two rescaled points
    fn corr(&self, x1: ArrayView1<f64>, x2: ArrayView1<f64>) -> f64;

    /// Kernel specific constant entering the per-dimension scaling factors
    fn scaling_factor(&self) -> f64 {
        1.0
    }
}

/// Absolute exponential correlation model: `exp(-sum |s_k|)`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct AbsoluteExponentialCorr();

impl CorrelationModel for AbsoluteExponentialCorr {
    #[inline]
    fn corr(&self, x1: ArrayView1<f64>, x2: ArrayView1<f64>) -> f64 {
        let mut s = 0.;
        Zip::from(&x1).and(&x2).for_each(|&a, &b| s += (a - b).abs());
        (-s).exp()
    }
}

impl fmt::Display for AbsoluteExponentialCorr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AbsoluteExponential")
    }
}

/// Squared exponential correlation model: `exp(-sum s_k^2)`
///
/// The `sqrt(2)/2` scaling constant makes this the usual
/// `exp(-d^2 / (2 l^2))` Gaussian kernel on raw coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct SquaredExponentialCorr();

impl CorrelationModel for SquaredExponentialCorr {
    #[inline]
    fn corr(&self, x1: ArrayView1<f64>, x2: ArrayView1<f64>) -> f64 {
        let mut s = 0.;
        Zip::from(&x1).and(&x2).for_each(|&a, &b| {
            let t = a - b;
            s += t * t;
        });
        (-s).exp()
    }

    fn scaling_factor(&self) -> f64 {
        f64::sqrt(2.) / 2.
    }
}

impl fmt::Display for SquaredExponentialCorr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SquaredExponential")
    }
}

/// Matern 3/2 correlation model: `prod (1 + s_k) * exp(-sum s_k)`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Matern32Corr();

impl CorrelationModel for Matern32Corr {
    #[inline]
    fn corr(&self, x1: ArrayView1<f64>, x2: ArrayView1<f64>) -> f64 {
        let mut s = 0.;
        let mut prod = 1.;
        Zip::from(&x1).and(&x2).for_each(|&a, &b| {
            let e = (a - b).abs();
            s += e;
            prod *= 1. + e;
        });
        prod * (-s).exp()
    }

    fn scaling_factor(&self) -> f64 {
        f64::sqrt(3.)
    }
}

impl fmt::Display for Matern32Corr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Matern32")
    }
}

/// Matern 5/2 correlation model: `prod (1 + s_k + s_k^2/3) * exp(-sum s_k)`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Matern52Corr();

const ONE_OVER_THREE: f64 = 1. / 3.;

impl CorrelationModel for Matern52Corr {
    #[inline]
    fn corr(&self, x1: ArrayView1<f64>, x2: ArrayView1<f64>) -> f64 {
        let mut s = 0.;
        let mut prod = 1.;
        Zip::from(&x1).and(&x2).for_each(|&a, &b| {
            let e = (a - b).abs();
            s += e;
            prod *= 1. + e + e * e * ONE_OVER_THREE;
        });
        prod * (-s).exp()
    }

    fn scaling_factor(&self) -> f64 {
        f64::sqrt(5.)
    }
}

impl fmt::Display for Matern52Corr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Matern52")
    }
}

/// Power exponential correlation model: `exp(-sum (|d_k| / l_k)^p_k)`
///
/// Exponents vary per dimension so the lengthscale division cannot be folded
/// into a rescaling pass; this kernel evaluates on raw coordinates and its
/// scaling factor stays 1.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct PowerExponentialCorr {
    theta: Array1<f64>,
    power: Array1<f64>,
}

impl PowerExponentialCorr {
    /// Build from a length-2d parameter vector: d lengthscales then d exponents
    pub fn new(param: ArrayView1<f64>) -> PowerExponentialCorr {
        let d = param.len() / 2;
        PowerExponentialCorr {
            theta: param.slice(ndarray::s![..d]).to_owned(),
            power: param.slice(ndarray::s![d..]).to_owned(),
        }
    }
}

impl CorrelationModel for PowerExponentialCorr {
    #[inline]
    fn corr(&self, x1: ArrayView1<f64>, x2: ArrayView1<f64>) -> f64 {
        let mut s = 0.;
        Zip::from(&x1)
            .and(&x2)
            .and(&self.theta)
            .and(&self.power)
            .for_each(|&a, &b, &t, &p| s += ((a - b).abs() / t).powf(p));
        (-s).exp()
    }
}

impl fmt::Display for PowerExponentialCorr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PowerExponential")
    }
}

/// White noise correlation model: 1 on (numerically) coincident points, 0 elsewhere
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct WhiteNoiseCorr();

/// L1 proximity under which two rescaled points count as coincident
const WHITE_NOISE_TOL: f64 = 1e-15;

impl CorrelationModel for WhiteNoiseCorr {
    #[inline]
    fn corr(&self, x1: ArrayView1<f64>, x2: ArrayView1<f64>) -> f64 {
        let mut s = 0.;
        Zip::from(&x1).and(&x2).for_each(|&a, &b| s += (a - b).abs());
        if s < WHITE_NOISE_TOL { 1.0 } else { 0.0 }
    }
}

impl fmt::Display for WhiteNoiseCorr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "WhiteNoise")
    }
}

/// Tags of the available correlation models, as accepted by the driver interface
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum CovType {
    /// Absolute exponential kernel (`"exp"`)
    #[default]
    Exp,
    /// Squared exponential kernel (`"gauss"`)
    Gauss,
    /// Matern 3/2 kernel (`"matern3_2"`)
    Matern32,
    /// Matern 5/2 kernel (`"matern5_2"`)
    Matern52,
    /// Power exponential kernel (`"powexp"`), parameterized by d lengthscales and d exponents
    PowExp,
    /// White noise kernel (`"white_noise"`)
    WhiteNoise,
}

impl CovType {
    /// Parse a covariance tag; `None` when the tag is unknown
    /// (callers substitute [`CovType::Exp`] with a warning)
    pub fn parse(tag: &str) -> Option<CovType> {
        match tag {
            "exp" => Some(CovType::Exp),
            "gauss" => Some(CovType::Gauss),
            "matern3_2" => Some(CovType::Matern32),
            "matern5_2" => Some(CovType::Matern52),
            "powexp" => Some(CovType::PowExp),
            "white_noise" => Some(CovType::WhiteNoise),
            _ => None,
        }
    }
}

impl fmt::Display for CovType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let tag = match self {
            CovType::Exp => "exp",
            CovType::Gauss => "gauss",
            CovType::Matern32 => "matern3_2",
            CovType::Matern52 => "matern5_2",
            CovType::PowExp => "powexp",
            CovType::WhiteNoise => "white_noise",
        };
        write!(f, "{tag}")
    }
}

/// A constructed correlation model instance
///
/// Dispatch on the variant happens once per matrix fill; the fill loops are
/// generic over [`CorrelationModel`] so the inner correlation call monomorphises.
#[derive(Clone, Debug)]
pub enum Kernel {
    /// Absolute exponential
    AbsoluteExponential(AbsoluteExponentialCorr),
    /// Squared exponential
    SquaredExponential(SquaredExponentialCorr),
    /// Matern 3/2
    Matern32(Matern32Corr),
    /// Matern 5/2
    Matern52(Matern52Corr),
    /// Power exponential
    PowerExponential(PowerExponentialCorr),
    /// White noise
    WhiteNoise(WhiteNoiseCorr),
}

impl Kernel {
    /// Instantiate the kernel designated by `cov_type`
    ///
    /// `param` is only read for the power exponential kernel, which keeps its
    /// own copy of the lengthscales and exponents.
    pub fn new(cov_type: CovType, param: ArrayView1<f64>) -> Kernel {
        match cov_type {
            CovType::Exp => Kernel::AbsoluteExponential(AbsoluteExponentialCorr()),
            CovType::Gauss => Kernel::SquaredExponential(SquaredExponentialCorr()),
            CovType::Matern32 => Kernel::Matern32(Matern32Corr()),
            CovType::Matern52 => Kernel::Matern52(Matern52Corr()),
            CovType::PowExp => Kernel::PowerExponential(PowerExponentialCorr::new(param)),
            CovType::WhiteNoise => Kernel::WhiteNoise(WhiteNoiseCorr()),
        }
    }

    /// Kernel specific scaling constant (see [`CorrelationModel::scaling_factor`])
    pub fn scaling_factor(&self) -> f64 {
        match self {
            Kernel::AbsoluteExponential(k) => k.scaling_factor(),
            Kernel::SquaredExponential(k) => k.scaling_factor(),
            Kernel::Matern32(k) => k.scaling_factor(),
            Kernel::Matern52(k) => k.scaling_factor(),
            Kernel::PowerExponential(k) => k.scaling_factor(),
            Kernel::WhiteNoise(k) => k.scaling_factor(),
        }
    }

    /// Whether coordinates are pre-rescaled for this kernel
    ///
    /// False only for the power exponential kernel whose per-dimension
    /// exponents prevent folding the lengthscales into the stored points.
    pub fn rescales(&self) -> bool {
        !matches!(self, Kernel::PowerExponential(_))
    }

    /// Correlation between two (rescaled) points
    #[inline]
    pub fn corr(&self, x1: ArrayView1<f64>, x2: ArrayView1<f64>) -> f64 {
        match self {
            Kernel::AbsoluteExponential(k) => k.corr(x1, x2),
            Kernel::SquaredExponential(k) => k.corr(x1, x2),
            Kernel::Matern32(k) => k.corr(x1, x2),
            Kernel::Matern52(k) => k.corr(x1, x2),
            Kernel::PowerExponential(k) => k.corr(x1, x2),
            Kernel::WhiteNoise(k) => k.corr(x1, x2),
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Kernel::AbsoluteExponential(k) => k.fmt(f),
            Kernel::SquaredExponential(k) => k.fmt(f),
            Kernel::Matern32(k) => k.fmt(f),
            Kernel::Matern52(k) => k.fmt(f),
            Kernel::PowerExponential(k) => k.fmt(f),
            Kernel::WhiteNoise(k) => k.fmt(f),
        }
    }
}
