//! Granger causality between metric pairs, in both directions

use super::{
    meaningful_pairs, resolve_pairs, CausalDirection, CorrelationDetails, CorrelationDetector,
    CorrelationResult, CorrelationStrength, CorrelationType, Granularity, MethodDetails,
    MetricPair,
};
use crate::data::DailyFeatureTable;
use crate::stats::{
    adf_test, best_granger_lag, difference, round_to, GrangerTest, TestOutcome,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Configuration for [`GrangerDetector`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrangerConfig {
    /// Lags `1..=max_lag` are tested per direction
    pub max_lag: usize,
    pub significance_level: f64,
    /// Complete rows required, before and after differencing
    pub min_samples: usize,
    /// p-value below which the ADF test calls a series stationary
    pub stationarity_significance: f64,
}

impl Default for GrangerConfig {
    fn default() -> Self {
        Self {
            max_lag: 3,
            significance_level: 0.05,
            min_samples: 20,
            stationarity_significance: 0.05,
        }
    }
}

impl GrangerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the maximum lag
    pub fn with_max_lag(mut self, max_lag: usize) -> Self {
        self.max_lag = max_lag;
        self
    }

    /// Builder method to set the minimum sample count
    pub fn with_min_samples(mut self, n: usize) -> Self {
        self.min_samples = n;
        self
    }

    /// Builder method to set the significance level
    pub fn with_significance_level(mut self, alpha: f64) -> Self {
        self.significance_level = alpha;
        self
    }
}

/// Outcome of both directional tests for one pair
struct DirectionalTests {
    a_to_b: Option<GrangerTest>,
    b_to_a: Option<GrangerTest>,
    differenced_a: bool,
    differenced_b: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GrangerDetector {
    config: GrangerConfig,
}

impl GrangerDetector {
    pub fn new(config: GrangerConfig) -> Self {
        Self { config }
    }

    /// Stationary if the ADF test says so, or if it cannot be run
    fn is_stationary(&self, series: &[f64]) -> bool {
        match adf_test(series, self.config.stationarity_significance) {
            TestOutcome::Value(adf) => adf.is_stationary,
            TestOutcome::NoResult(_) => true,
        }
    }

    /// Significant best-lag test of "`cause` predicts `effect`", if any
    fn significant(&self, effect: &[f64], cause: &[f64]) -> Option<GrangerTest> {
        best_granger_lag(effect, cause, self.config.max_lag)
            .value()
            .filter(|t| t.p_value < self.config.significance_level)
    }

    /// Both directional tests over complete paired rows. The lag is a row
    /// offset within those rows, so calendar gaps do not shrink the sample.
    fn test_pair(&self, a: &[f64], b: &[f64]) -> Option<DirectionalTests> {
        let differenced_a = !self.is_stationary(a);
        let differenced_b = !self.is_stationary(b);

        let (a, b) = if differenced_a || differenced_b {
            let a = if differenced_a { difference(a) } else { a[1..].to_vec() };
            let b = if differenced_b { difference(b) } else { b[1..].to_vec() };
            (a, b)
        } else {
            (a.to_vec(), b.to_vec())
        };

        if a.len() < self.config.min_samples {
            return None;
        }

        Some(DirectionalTests {
            a_to_b: self.significant(&b, &a),
            b_to_a: self.significant(&a, &b),
            differenced_a,
            differenced_b,
        })
    }
}

impl CorrelationDetector for GrangerDetector {
    fn name(&self) -> &'static str {
        "granger"
    }

    fn detect(&self, table: &DailyFeatureTable, pairs: Option<&[MetricPair]>) -> Vec<CorrelationResult> {
        let pairs = resolve_pairs(pairs, || meaningful_pairs(table));

        let mut results = Vec::new();
        for (metric_a, metric_b) in &pairs {
            let (a, b) = table.paired(metric_a, metric_b);
            if a.len() < self.config.min_samples {
                continue;
            }
            let Some(tests) = self.test_pair(&a, &b) else {
                debug!(a = %metric_a, b = %metric_b, "Too few rows after differencing");
                continue;
            };

            let direction = match (&tests.a_to_b, &tests.b_to_a) {
                (Some(_), Some(_)) => CausalDirection::Bidirectional,
                (Some(_), None) => CausalDirection::ACausesB,
                (None, Some(_)) => CausalDirection::BCausesA,
                (None, None) => continue,
            };

            let best = match (tests.a_to_b, tests.b_to_a) {
                (Some(ab), Some(ba)) => {
                    if ab.p_value < ba.p_value {
                        ab
                    } else {
                        ba
                    }
                }
                (Some(t), None) | (None, Some(t)) => t,
                (None, None) => continue,
            };

            let confidence = (1.0 - best.p_value).min(0.99);
            results.push(CorrelationResult {
                metric_a: metric_a.clone(),
                metric_b: metric_b.clone(),
                correlation_type: CorrelationType::GrangerCausality,
                correlation_value: round_to(confidence, 4),
                strength: CorrelationStrength::from_value(confidence),
                p_value: Some(round_to(best.p_value, 6)),
                is_significant: true,
                lag_days: best.lag,
                granularity: Granularity::Daily,
                sample_size: a.len(),
                causal_direction: Some(direction),
                granger_f_stat: Some(round_to(best.f_stat, 4)),
                confidence: round_to(confidence, 4),
                details: CorrelationDetails::new(MethodDetails::Granger {
                    a_causes_b: tests.a_to_b.is_some(),
                    b_causes_a: tests.b_to_a.is_some(),
                    f_statistic: round_to(best.f_stat, 4),
                    optimal_lag: best.lag,
                    differenced_a: tests.differenced_a,
                    differenced_b: tests.differenced_b,
                }),
            });
        }

        results.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));
        debug!(pairs = pairs.len(), count = results.len(), "Granger detection complete");
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FeatureRow;
    use chrono::{Duration, NaiveDate};
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn lagged_table(n: usize, seed: u64) -> DailyFeatureTable {
        DailyFeatureTable::new(lagged_rows(n, seed)).unwrap()
    }

    fn lagged_rows(n: usize, seed: u64) -> Vec<FeatureRow> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let exercise: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..90.0)).collect();
        (0..n)
            .map(|i| {
                let prev = if i == 0 { 45.0 } else { exercise[i - 1] };
                FeatureRow::new(start + Duration::days(i as i64))
                    .with("exercise_minutes", exercise[i])
                    .with("sleep_quality", 4.0 + prev / 20.0 + rng.gen_range(-0.3..0.3))
            })
            .collect()
    }

    #[test]
    fn test_detects_predictive_direction() {
        let table = lagged_table(60, 17);
        let pairs = vec![("exercise_minutes".to_string(), "sleep_quality".to_string())];
        let results = GrangerDetector::default().detect(&table, Some(&pairs));

        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert!(matches!(
            r.causal_direction,
            Some(CausalDirection::ACausesB) | Some(CausalDirection::Bidirectional)
        ));
        assert!(r.p_value.unwrap() < 0.05);
        assert!(r.correlation_value <= 0.99);
        match &r.details.method {
            MethodDetails::Granger { a_causes_b, .. } => assert!(*a_causes_b),
            other => panic!("unexpected details {other:?}"),
        }
    }

    #[test]
    fn test_lag_counts_rows_not_calendar_days() {
        let pairs = vec![("exercise_minutes".to_string(), "sleep_quality".to_string())];
        let contiguous = GrangerDetector::default().detect(&lagged_table(60, 17), Some(&pairs));

        // same rows, with a five-day gap after day 29
        let mut rows = lagged_rows(60, 17);
        for row in rows.iter_mut().skip(30) {
            row.date += Duration::days(5);
        }
        let gapped_table = DailyFeatureTable::new(rows).unwrap();
        let gapped = GrangerDetector::default().detect(&gapped_table, Some(&pairs));

        assert_eq!(contiguous.len(), 1);
        assert_eq!(gapped.len(), 1);
        assert_eq!(gapped[0].sample_size, contiguous[0].sample_size);
        assert_eq!(gapped[0].lag_days, contiguous[0].lag_days);
        assert_eq!(gapped[0].p_value, contiguous[0].p_value);
    }

    #[test]
    fn test_direction_requires_significance() {
        for seed in 0..5 {
            let table = lagged_table(40, seed);
            for r in GrangerDetector::default().detect(&table, None) {
                assert_ne!(r.causal_direction, Some(CausalDirection::None));
                assert!(r.p_value.unwrap() < 0.05);
            }
        }
    }

    #[test]
    fn test_constant_series_yields_nothing() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let rows = (0..30)
            .map(|i| {
                FeatureRow::new(start + Duration::days(i))
                    .with("sleep_hours", 7.0)
                    .with("hrv", 40.0 + (i % 5) as f64)
            })
            .collect();
        let table = DailyFeatureTable::new(rows).unwrap();
        assert!(GrangerDetector::default().detect(&table, None).is_empty());
    }

    #[test]
    fn test_short_table_skipped() {
        let table = lagged_table(15, 1);
        assert!(GrangerDetector::default().detect(&table, None).is_empty());
    }
}
