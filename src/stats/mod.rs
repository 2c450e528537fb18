//! Statistical kernel shared by the detectors
//!
//! Every routine that can fail numerically (too few points, zero variance,
//! singular design matrix, invalid distribution parameters) returns a
//! [`TestOutcome`] rather than an error. Callers treat `NoResult` as
//! "not significant" and move on to the next item.

mod correlation;
mod descriptive;
mod granger;
mod mutual_info;
mod regression;
mod stationarity;

pub use correlation::{pearson, rank_average, spearman, CorrelationTest};
pub use descriptive::{
    ewma, mean, median, median_absolute_deviation, population_std, quantile, round_to, sample_std,
};
pub use granger::{best_granger_lag, granger_f_test, GrangerTest};
pub use mutual_info::ksg_mutual_information;
pub use regression::OlsFit;
pub use stationarity::{adf_test, difference, mackinnon_p_value, AdfResult};

use serde::{Deserialize, Serialize};

/// Why a statistical routine produced no value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoResultReason {
    /// Not enough observations for the requested test
    InsufficientData { needed: usize, got: usize },
    /// One of the inputs has (numerically) zero variance
    ZeroVariance,
    /// Design matrix could not be inverted
    Singular,
    /// Intermediate or final value was NaN or infinite
    NonFinite,
    /// Distribution parameters were rejected (e.g. non-positive degrees of freedom)
    InvalidDistribution,
}

/// Outcome of a statistical test: a value, or an explicit "no result"
#[derive(Debug, Clone, PartialEq)]
pub enum TestOutcome<T> {
    Value(T),
    NoResult(NoResultReason),
}

impl<T> TestOutcome<T> {
    /// Convert into an `Option`, dropping the reason
    pub fn value(self) -> Option<T> {
        match self {
            TestOutcome::Value(v) => Some(v),
            TestOutcome::NoResult(_) => None,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, TestOutcome::Value(_))
    }

    pub fn as_ref(&self) -> TestOutcome<&T> {
        match self {
            TestOutcome::Value(v) => TestOutcome::Value(v),
            TestOutcome::NoResult(r) => TestOutcome::NoResult(*r),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> TestOutcome<U> {
        match self {
            TestOutcome::Value(v) => TestOutcome::Value(f(v)),
            TestOutcome::NoResult(r) => TestOutcome::NoResult(r),
        }
    }

    pub fn and_then<U, F: FnOnce(T) -> TestOutcome<U>>(self, f: F) -> TestOutcome<U> {
        match self {
            TestOutcome::Value(v) => f(v),
            TestOutcome::NoResult(r) => TestOutcome::NoResult(r),
        }
    }
}

/// Guard a computed float: non-finite values become `NoResult(NonFinite)`
pub(crate) fn finite(value: f64) -> TestOutcome<f64> {
    if value.is_finite() {
        TestOutcome::Value(value)
    } else {
        TestOutcome::NoResult(NoResultReason::NonFinite)
    }
}

/// Standard normal CDF
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * statrs::function::erf::erfc(-x / std::f64::consts::SQRT_2)
}
