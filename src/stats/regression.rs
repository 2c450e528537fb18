//! Ordinary least squares with coefficient standard errors

use super::{NoResultReason, TestOutcome};
use ndarray::{Array1, Array2};

/// Fitted OLS regression
#[derive(Debug, Clone)]
pub struct OlsFit {
    /// Coefficients in design-matrix column order
    pub coefficients: Array1<f64>,
    /// Standard error per coefficient
    pub std_errors: Array1<f64>,
    /// Residual sum of squares
    pub rss: f64,
    /// Number of observations (rows)
    pub n_obs: usize,
    /// Residual degrees of freedom (rows - columns)
    pub df_resid: usize,
}

impl OlsFit {
    /// Fit `y = X b` through the normal equations `(X^T X) b = X^T y`.
    ///
    /// The caller supplies any intercept column explicitly.
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>) -> TestOutcome<Self> {
        let n_obs = x.nrows();
        let k = x.ncols();
        if n_obs != y.len() || n_obs <= k {
            return TestOutcome::NoResult(NoResultReason::InsufficientData {
                needed: k + 1,
                got: n_obs,
            });
        }

        let xtx = x.t().dot(x);
        let xty = x.t().dot(y);

        let Some(xtx_inv) = matrix_inverse(&xtx) else {
            return TestOutcome::NoResult(NoResultReason::Singular);
        };

        let coefficients = xtx_inv.dot(&xty);
        let residuals = y - &x.dot(&coefficients);
        let rss = residuals.dot(&residuals);
        if !rss.is_finite() {
            return TestOutcome::NoResult(NoResultReason::NonFinite);
        }

        let df_resid = n_obs - k;
        let sigma2 = rss / df_resid as f64;
        let std_errors = xtx_inv.diag().mapv(|v| (sigma2 * v.max(0.0)).sqrt());

        TestOutcome::Value(Self {
            coefficients,
            std_errors,
            rss,
            n_obs,
            df_resid,
        })
    }

    /// t-statistic of coefficient `j`
    pub fn t_stat(&self, j: usize) -> TestOutcome<f64> {
        let se = self.std_errors[j];
        if se <= 0.0 || !se.is_finite() {
            return TestOutcome::NoResult(NoResultReason::ZeroVariance);
        }
        TestOutcome::Value(self.coefficients[j] / se)
    }

    /// Akaike information criterion up to an additive constant
    pub fn aic(&self) -> f64 {
        let n = self.n_obs as f64;
        let k = self.coefficients.len() as f64;
        if self.rss <= 0.0 {
            return f64::NEG_INFINITY;
        }
        n * (self.rss / n).ln() + 2.0 * k
    }
}

/// Gauss-Jordan inversion with partial pivoting.
///
/// Pivots are compared against the largest diagonal entry so that the
/// singularity check does not depend on the units of the regressors.
fn matrix_inverse(m: &Array2<f64>) -> Option<Array2<f64>> {
    let n = m.nrows();
    if n != m.ncols() || n == 0 {
        return None;
    }

    let scale = m.diag().iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if scale == 0.0 || !scale.is_finite() {
        return None;
    }
    let tolerance = 1e-12 * scale;

    // Augmented matrix [M | I]
    let mut aug = Array2::zeros((n, 2 * n));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = m[[i, j]];
        }
        aug[[i, n + i]] = 1.0;
    }

    for col in 0..n {
        let mut max_row = col;
        for row in col + 1..n {
            if aug[[row, col]].abs() > aug[[max_row, col]].abs() {
                max_row = row;
            }
        }

        if max_row != col {
            for j in 0..2 * n {
                aug.swap([col, j], [max_row, j]);
            }
        }

        if aug[[col, col]].abs() < tolerance {
            return None;
        }

        let pivot = aug[[col, col]];
        for j in 0..2 * n {
            aug[[col, j]] /= pivot;
        }

        for row in 0..n {
            if row != col {
                let factor = aug[[row, col]];
                if factor != 0.0 {
                    for j in 0..2 * n {
                        aug[[row, j]] -= factor * aug[[col, j]];
                    }
                }
            }
        }
    }

    let mut inv = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            inv[[i, j]] = aug[[i, n + j]];
        }
    }
    Some(inv)
}
