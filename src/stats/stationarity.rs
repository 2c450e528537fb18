//! Augmented Dickey-Fuller unit-root test (constant, no trend)

use super::regression::OlsFit;
use super::{normal_cdf, NoResultReason, TestOutcome};
use ndarray::{Array1, Array2};

/// Shortest series the test is attempted on
pub const ADF_MIN_OBSERVATIONS: usize = 10;

// MacKinnon (1994) response-surface coefficients, one regressor, constant only
const TAU_MAX: f64 = 2.74;
const TAU_MIN: f64 = -18.83;
const TAU_STAR: f64 = -1.61;
const TAU_SMALL_P: [f64; 3] = [2.1659, 1.4412, 0.038269];
const TAU_LARGE_P: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

/// Outcome of an ADF test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdfResult {
    /// t-statistic of the lagged level coefficient
    pub statistic: f64,
    /// Approximate MacKinnon p-value
    pub p_value: f64,
    /// Number of lagged differences selected by AIC
    pub used_lag: usize,
    /// Observations in the final regression
    pub n_obs: usize,
    /// `p_value < significance`
    pub is_stationary: bool,
}

/// First differences `y[t] - y[t-1]`
pub fn difference(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Approximate p-value for an ADF tau statistic (constant-only regression)
pub fn mackinnon_p_value(tau: f64) -> f64 {
    if tau > TAU_MAX {
        return 1.0;
    }
    if tau < TAU_MIN {
        return 0.0;
    }
    let poly = if tau <= TAU_STAR {
        TAU_SMALL_P[0] + TAU_SMALL_P[1] * tau + TAU_SMALL_P[2] * tau * tau
    } else {
        TAU_LARGE_P[0]
            + TAU_LARGE_P[1] * tau
            + TAU_LARGE_P[2] * tau * tau
            + TAU_LARGE_P[3] * tau * tau * tau
    };
    normal_cdf(poly)
}

/// Test `series` for a unit root.
///
/// The lag order is chosen by AIC over `0..=maxlag` on a common sample, with
/// `maxlag = min(12 * (n/100)^(1/4), n/2 - 2)`, then the chosen model is refit
/// on every usable observation.
pub fn adf_test(series: &[f64], significance: f64) -> TestOutcome<AdfResult> {
    let n = series.len();
    if n < ADF_MIN_OBSERVATIONS {
        return TestOutcome::NoResult(NoResultReason::InsufficientData {
            needed: ADF_MIN_OBSERVATIONS,
            got: n,
        });
    }
    if series.iter().any(|v| !v.is_finite()) {
        return TestOutcome::NoResult(NoResultReason::NonFinite);
    }

    let schwert = (12.0 * (n as f64 / 100.0).powf(0.25)).floor() as usize;
    let max_lag = schwert.min(n / 2 - 2);
    let diffs = difference(series);

    let mut best: Option<(usize, f64)> = None;
    for lag in 0..=max_lag {
        let TestOutcome::Value(fit) = adf_regression(series, &diffs, lag, max_lag) else {
            continue;
        };
        let aic = fit.aic();
        if best.map_or(true, |(_, b)| aic < b) {
            best = Some((lag, aic));
        }
    }

    let Some((used_lag, _)) = best else {
        return TestOutcome::NoResult(NoResultReason::Singular);
    };

    adf_regression(series, &diffs, used_lag, used_lag).and_then(|fit| {
        fit.t_stat(1).map(|statistic| {
            let p_value = mackinnon_p_value(statistic);
            AdfResult {
                statistic,
                p_value,
                used_lag,
                n_obs: fit.n_obs,
                is_stationary: p_value < significance,
            }
        })
    })
}

/// Regress `dy[t]` on `[1, y[t], dy[t-1], .., dy[t-lag]]` for `t >= start`
fn adf_regression(series: &[f64], diffs: &[f64], lag: usize, start: usize) -> TestOutcome<OlsFit> {
    let rows = diffs.len().saturating_sub(start);
    let cols = 2 + lag;
    if rows <= cols {
        return TestOutcome::NoResult(NoResultReason::InsufficientData {
            needed: cols + 1,
            got: rows,
        });
    }

    let mut x = Array2::zeros((rows, cols));
    let mut y = Array1::zeros(rows);
    for (r, t) in (start..diffs.len()).enumerate() {
        y[r] = diffs[t];
        x[[r, 0]] = 1.0;
        x[[r, 1]] = series[t];
        for i in 1..=lag {
            x[[r, 1 + i]] = diffs[t - i];
        }
    }
    OlsFit::fit(&x, &y)
}
