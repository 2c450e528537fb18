//! Time-lagged correlation: does `a` on day t track `b` on day t + lag?

use super::{
    confidence_from, resolve_pairs, CorrelationDetails, CorrelationDetector, CorrelationResult,
    CorrelationStrength, CorrelationType, Granularity, MethodDetails, MetricPair,
};
use crate::data::DailyFeatureTable;
use crate::stats::{pearson, round_to, CorrelationTest, TestOutcome};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Domain pairs tested when the caller supplies none
pub fn default_lag_pairs() -> Vec<MetricPair> {
    [
        ("exercise_minutes", "sleep_quality"),
        ("exercise_minutes", "sleep_hours"),
        ("exercise_minutes", "resting_hr"),
        ("exercise_minutes", "hrv"),
        ("exercise_calories", "weight_kg"),
        ("total_sugar_g", "sleep_quality"),
        ("total_calories", "weight_kg"),
        ("total_carbs_g", "blood_glucose_fasting"),
        ("total_protein_g", "exercise_calories"),
        ("sleep_hours", "hrv"),
        ("sleep_quality", "resting_hr"),
        ("sleep_hours", "exercise_minutes"),
        ("awakenings", "resting_hr"),
    ]
    .into_iter()
    .map(|(a, b)| (a.to_string(), b.to_string()))
    .collect()
}

/// Configuration for [`CrossCorrelationDetector`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossCorrelationConfig {
    /// Lags `1..=max_lag` days are tested
    pub max_lag: usize,
    pub significance_level: f64,
    /// Aligned pairs required at each lag
    pub min_samples: usize,
    /// Minimum |r| for a lag to be considered
    pub min_correlation: f64,
}

impl Default for CrossCorrelationConfig {
    fn default() -> Self {
        Self {
            max_lag: 3,
            significance_level: 0.05,
            min_samples: 14,
            min_correlation: 0.25,
        }
    }
}

impl CrossCorrelationConfig {
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

#[derive(Debug, Clone, Default)]
pub struct CrossCorrelationDetector {
    config: CrossCorrelationConfig,
}

impl CrossCorrelationDetector {
    pub fn new(config: CrossCorrelationConfig) -> Self {
        Self { config }
    }

    /// Strongest significant lag for one pair
    fn best_lag(&self, table: &DailyFeatureTable, a: &str, b: &str) -> Option<(usize, CorrelationTest)> {
        let mut best: Option<(usize, CorrelationTest)> = None;
        for lag in 1..=self.config.max_lag {
            let (x, y) = table.lagged_pairs(a, b, lag as i64);
            if x.len() < self.config.min_samples {
                continue;
            }
            let TestOutcome::Value(test) = pearson(&x, &y) else {
                continue;
            };
            if test.r.abs() < self.config.min_correlation
                || test.p_value >= self.config.significance_level
            {
                continue;
            }
            if best.map_or(true, |(_, b)| test.r.abs() > b.r.abs()) {
                best = Some((lag, test));
            }
        }
        best
    }
}

impl CorrelationDetector for CrossCorrelationDetector {
    fn name(&self) -> &'static str {
        "cross_correlation"
    }

    fn detect(&self, table: &DailyFeatureTable, pairs: Option<&[MetricPair]>) -> Vec<CorrelationResult> {
        let pairs = resolve_pairs(pairs, default_lag_pairs);

        let mut results: Vec<CorrelationResult> = pairs
            .iter()
            .filter(|(a, b)| table.has_column(a) && table.has_column(b))
            .filter_map(|(a, b)| {
                let (lag, test) = self.best_lag(table, a, b)?;
                let confidence = confidence_from(test.r, test.p_value);
                Some(CorrelationResult {
                    metric_a: a.clone(),
                    metric_b: b.clone(),
                    correlation_type: CorrelationType::CrossCorrelation,
                    correlation_value: round_to(test.r, 4),
                    strength: CorrelationStrength::from_value(test.r),
                    p_value: Some(round_to(test.p_value, 6)),
                    is_significant: true,
                    lag_days: lag,
                    granularity: Granularity::Daily,
                    sample_size: test.n,
                    causal_direction: None,
                    granger_f_stat: None,
                    confidence: round_to(confidence, 4),
                    details: CorrelationDetails::new(MethodDetails::CrossCorrelation {
                        optimal_lag: lag,
                        lags_tested: self.config.max_lag,
                    }),
                })
            })
            .collect();

        results.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));
        debug!(pairs = pairs.len(), count = results.len(), "Cross-correlation detection complete");
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FeatureRow;
    use chrono::{Duration, NaiveDate};

    #[test]
    fn test_finds_one_day_lag() {
        let start = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let exercise: Vec<f64> = (0..30).map(|i| ((i * 37) % 90) as f64).collect();
        let rows = (0..30)
            .map(|i| {
                let quality = if i == 0 { 5.0 } else { 3.0 + exercise[i - 1] / 15.0 + (i % 2) as f64 * 0.3 };
                FeatureRow::new(start + Duration::days(i as i64))
                    .with("exercise_minutes", exercise[i])
                    .with("sleep_quality", quality)
            })
            .collect();
        let table = DailyFeatureTable::new(rows).unwrap();

        let results = CrossCorrelationDetector::default().detect(&table, None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].lag_days, 1);
        assert!(results[0].is_significant);
        assert!(results[0].correlation_value > 0.9);
    }

    #[test]
    fn test_gaps_shrink_aligned_sample() {
        let start = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        // every other day only: no (t, t+1) pairs exist
        let rows = (0..30)
            .map(|i| {
                FeatureRow::new(start + Duration::days(2 * i as i64))
                    .with("a", i as f64)
                    .with("b", i as f64)
            })
            .collect();
        let table = DailyFeatureTable::new(rows).unwrap();
        let pairs = vec![("a".to_string(), "b".to_string())];
        let detector = CrossCorrelationDetector::new(CrossCorrelationConfig::new().with_max_lag(1));
        assert!(detector.detect(&table, Some(&pairs)).is_empty());
    }
}
