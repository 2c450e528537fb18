//! Granger causality via the sum-of-squared-residuals F-test

use super::regression::OlsFit;
use super::{finite, NoResultReason, TestOutcome};
use ndarray::{Array1, Array2};
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

/// F-test of "`cause` helps predict `effect`" at one lag order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrangerTest {
    pub lag: usize,
    pub f_stat: f64,
    pub p_value: f64,
    pub df_num: usize,
    pub df_denom: usize,
}

/// Compare the restricted model `effect ~ 1 + effect lags` against the
/// unrestricted model that adds `cause` lags.
pub fn granger_f_test(effect: &[f64], cause: &[f64], lag: usize) -> TestOutcome<GrangerTest> {
    let n = effect.len();
    if lag == 0 || n != cause.len() || n <= lag {
        return TestOutcome::NoResult(NoResultReason::InsufficientData {
            needed: lag + 1,
            got: n.min(cause.len()),
        });
    }

    let nobs = n - lag;
    let df_num = lag;
    let Some(df_denom) = nobs.checked_sub(2 * lag + 1).filter(|df| *df >= 1) else {
        return TestOutcome::NoResult(NoResultReason::InsufficientData {
            needed: 3 * lag + 2,
            got: n,
        });
    };

    let mut restricted = Array2::zeros((nobs, 1 + lag));
    let mut unrestricted = Array2::zeros((nobs, 1 + 2 * lag));
    let mut y = Array1::zeros(nobs);
    for (r, t) in (lag..n).enumerate() {
        y[r] = effect[t];
        restricted[[r, 0]] = 1.0;
        unrestricted[[r, 0]] = 1.0;
        for i in 1..=lag {
            restricted[[r, i]] = effect[t - i];
            unrestricted[[r, i]] = effect[t - i];
            unrestricted[[r, lag + i]] = cause[t - i];
        }
    }

    let rss_r = match OlsFit::fit(&restricted, &y) {
        TestOutcome::Value(fit) => fit.rss,
        TestOutcome::NoResult(reason) => return TestOutcome::NoResult(reason),
    };
    let rss_u = match OlsFit::fit(&unrestricted, &y) {
        TestOutcome::Value(fit) => fit.rss,
        TestOutcome::NoResult(reason) => return TestOutcome::NoResult(reason),
    };
    if rss_r <= 0.0 || rss_u <= 0.0 {
        return TestOutcome::NoResult(NoResultReason::ZeroVariance);
    }

    let f = ((rss_r - rss_u).max(0.0) / df_num as f64) / (rss_u / df_denom as f64);
    finite(f).and_then(|f_stat| {
        match FisherSnedecor::new(df_num as f64, df_denom as f64) {
            Ok(dist) => finite(1.0 - dist.cdf(f_stat)).map(|p| GrangerTest {
                lag,
                f_stat,
                p_value: p.clamp(0.0, 1.0),
                df_num,
                df_denom,
            }),
            Err(_) => TestOutcome::NoResult(NoResultReason::InvalidDistribution),
        }
    })
}

/// Lowest p-value test over lags `1..=max_lag`; lags without a result are skipped
pub fn best_granger_lag(effect: &[f64], cause: &[f64], max_lag: usize) -> TestOutcome<GrangerTest> {
    let mut best: Option<GrangerTest> = None;
    let mut last_reason = NoResultReason::InsufficientData {
        needed: 1,
        got: 0,
    };

    for lag in 1..=max_lag {
        match granger_f_test(effect, cause, lag) {
            TestOutcome::Value(test) => {
                if best.map_or(true, |b| test.p_value < b.p_value) {
                    best = Some(test);
                }
            }
            TestOutcome::NoResult(reason) => last_reason = reason,
        }
    }

    match best {
        Some(test) => TestOutcome::Value(test),
        None => TestOutcome::NoResult(last_reason),
    }
}
