//! Pearson and Spearman correlation with two-sided p-values

use super::{finite, NoResultReason, TestOutcome};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::cmp::Ordering;

/// Correlation coefficient with its significance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationTest {
    /// Coefficient in [-1, 1]
    pub r: f64,
    /// Two-sided p-value under H0: rho = 0
    pub p_value: f64,
    /// Number of paired observations
    pub n: usize,
}

/// Pearson product-moment correlation.
///
/// The p-value uses the t-distribution with `n - 2` degrees of freedom.
pub fn pearson(x: &[f64], y: &[f64]) -> TestOutcome<CorrelationTest> {
    let n = x.len();
    if n != y.len() || n < 3 {
        return TestOutcome::NoResult(NoResultReason::InsufficientData {
            needed: 3,
            got: n.min(y.len()),
        });
    }

    let nf = n as f64;
    let mean_x = x.iter().sum::<f64>() / nf;
    let mean_y = y.iter().sum::<f64>() / nf;

    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    if is_degenerate(sxx, mean_x, n) || is_degenerate(syy, mean_y, n) {
        return TestOutcome::NoResult(NoResultReason::ZeroVariance);
    }

    let r = (sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0);
    finite(r).and_then(|r| {
        correlation_p_value(r, n).map(|p_value| CorrelationTest { r, p_value, n })
    })
}

/// Spearman rank correlation (Pearson on average ranks)
pub fn spearman(x: &[f64], y: &[f64]) -> TestOutcome<CorrelationTest> {
    if x.len() != y.len() {
        return TestOutcome::NoResult(NoResultReason::InsufficientData {
            needed: x.len(),
            got: y.len(),
        });
    }
    pearson(&rank_average(x), &rank_average(y))
}

/// 1-based ranks; tied values share the mean of their ranks
pub fn rank_average(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // positions i..=j are tied
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }
    ranks
}

fn correlation_p_value(r: f64, n: usize) -> TestOutcome<f64> {
    if r.abs() >= 1.0 - 1e-12 {
        return TestOutcome::Value(0.0);
    }
    let df = (n - 2) as f64;
    let t = r * (df / (1.0 - r * r)).sqrt();

    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => finite(2.0 * (1.0 - dist.cdf(t.abs()))).map(|p| p.clamp(0.0, 1.0)),
        Err(_) => TestOutcome::NoResult(NoResultReason::InvalidDistribution),
    }
}

/// Sum of squared deviations that is zero up to rounding noise
fn is_degenerate(sum_sq: f64, mean: f64, n: usize) -> bool {
    let scale = 1.0 + mean.abs();
    sum_sq.sqrt() <= 1e-10 * scale * (n as f64).sqrt()
}
