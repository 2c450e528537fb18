//! Same-day linear (Pearson) and monotonic (Spearman) correlation

use super::{
    all_pairs, confidence_from, resolve_pairs, CorrelationDetails, CorrelationDetector,
    CorrelationResult, CorrelationStrength, CorrelationType, Granularity, MethodDetails,
    MetricPair,
};
use crate::data::DailyFeatureTable;
use crate::stats::{pearson, round_to, spearman, TestOutcome};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Configuration for [`PearsonSpearmanDetector`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PearsonSpearmanConfig {
    pub significance_level: f64,
    /// Complete pairs required per metric pair
    pub min_samples: usize,
    /// Minimum |r| to report
    pub min_correlation: f64,
    pub include_spearman: bool,
    /// Spearman is only reported when it differs from Pearson by more than this
    pub spearman_min_difference: f64,
    /// Granularity stamped on results
    pub granularity: Granularity,
}

impl Default for PearsonSpearmanConfig {
    fn default() -> Self {
        Self {
            significance_level: 0.05,
            min_samples: 14,
            min_correlation: 0.2,
            include_spearman: true,
            spearman_min_difference: 0.1,
            granularity: Granularity::Daily,
        }
    }
}

impl PearsonSpearmanConfig {
    pub fn new() -> Self {
        Self::default()
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

    /// Builder method to toggle Spearman
    pub fn with_spearman(mut self, enabled: bool) -> Self {
        self.include_spearman = enabled;
        self
    }

    /// Builder method to tag results with a granularity
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PearsonSpearmanDetector {
    config: PearsonSpearmanConfig,
}

impl PearsonSpearmanDetector {
    pub fn new(config: PearsonSpearmanConfig) -> Self {
        Self { config }
    }

    fn result(
        &self,
        pair: &MetricPair,
        correlation_type: CorrelationType,
        r: f64,
        p: f64,
        n: usize,
        method: MethodDetails,
    ) -> CorrelationResult {
        CorrelationResult {
            metric_a: pair.0.clone(),
            metric_b: pair.1.clone(),
            correlation_type,
            correlation_value: round_to(r, 4),
            strength: CorrelationStrength::from_value(r),
            p_value: Some(round_to(p, 6)),
            is_significant: p < self.config.significance_level,
            lag_days: 0,
            granularity: self.config.granularity,
            sample_size: n,
            causal_direction: None,
            granger_f_stat: None,
            confidence: round_to(confidence_from(r, p), 4),
            details: CorrelationDetails::new(method),
        }
    }

    fn test_pair(&self, table: &DailyFeatureTable, pair: &MetricPair) -> Vec<CorrelationResult> {
        let (x, y) = table.paired(&pair.0, &pair.1);
        if x.len() < self.config.min_samples {
            return Vec::new();
        }

        let TestOutcome::Value(p) = pearson(&x, &y) else {
            debug!(a = %pair.0, b = %pair.1, "Pearson test had no result");
            return Vec::new();
        };

        let mut results = Vec::new();
        if p.r.abs() >= self.config.min_correlation {
            results.push(self.result(
                pair,
                CorrelationType::Pearson,
                p.r,
                p.p_value,
                p.n,
                MethodDetails::Pearson {
                    r_squared: round_to(p.r * p.r, 4),
                },
            ));
        }

        if self.config.include_spearman {
            if let TestOutcome::Value(s) = spearman(&x, &y) {
                if s.r.abs() >= self.config.min_correlation
                    && (s.r - p.r).abs() > self.config.spearman_min_difference
                {
                    results.push(self.result(
                        pair,
                        CorrelationType::Spearman,
                        s.r,
                        s.p_value,
                        s.n,
                        MethodDetails::Spearman {
                            pearson_r: round_to(p.r, 4),
                            difference_from_pearson: round_to(s.r - p.r, 4),
                        },
                    ));
                }
            }
        }
        results
    }
}

impl CorrelationDetector for PearsonSpearmanDetector {
    fn name(&self) -> &'static str {
        "pearson_spearman"
    }

    fn detect(&self, table: &DailyFeatureTable, pairs: Option<&[MetricPair]>) -> Vec<CorrelationResult> {
        let pairs = resolve_pairs(pairs, || all_pairs(&table.columns()));
        let mut results: Vec<CorrelationResult> =
            pairs.iter().flat_map(|pair| self.test_pair(table, pair)).collect();

        results.sort_by(|a, b| {
            b.correlation_value
                .abs()
                .partial_cmp(&a.correlation_value.abs())
                .unwrap_or(Ordering::Equal)
        });
        debug!(pairs = pairs.len(), count = results.len(), "Pearson/Spearman detection complete");
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FeatureRow;
    use chrono::{Duration, NaiveDate};

    fn table(rows: Vec<(f64, f64)>) -> DailyFeatureTable {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        DailyFeatureTable::new(
            rows.into_iter()
                .enumerate()
                .map(|(i, (a, b))| {
                    FeatureRow::new(start + Duration::days(i as i64))
                        .with("sleep_hours", a)
                        .with("hrv", b)
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_strong_linear_relationship() {
        let rows = (0..20)
            .map(|i| (6.0 + 0.1 * i as f64, 40.0 + 2.0 * i as f64 + (i % 3) as f64))
            .collect();
        let results = PearsonSpearmanDetector::default().detect(&table(rows), None);
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.correlation_type, CorrelationType::Pearson);
        assert!(r.correlation_value > 0.9);
        assert!(r.is_significant);
        assert_eq!(r.strength, CorrelationStrength::StrongPositive);
        assert_eq!(r.sample_size, 20);
    }

    #[test]
    fn test_too_few_samples() {
        let rows = (0..10).map(|i| (i as f64, i as f64)).collect();
        assert!(PearsonSpearmanDetector::default().detect(&table(rows), None).is_empty());
    }

    #[test]
    fn test_spearman_reported_when_it_differs() {
        // monotonic but dominated by one extreme value
        let rows = (0..20)
            .map(|i| {
                let x = i as f64;
                (x, if i == 19 { 1.0e6 } else { x })
            })
            .collect();
        let results = PearsonSpearmanDetector::default().detect(&table(rows), None);
        let spearman = results
            .iter()
            .find(|r| r.correlation_type == CorrelationType::Spearman)
            .expect("spearman result");
        assert!((spearman.correlation_value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_pairs_skip_missing_columns() {
        let rows = (0..20).map(|i| (i as f64, 2.0 * i as f64)).collect();
        let pairs = vec![("sleep_hours".to_string(), "weight_kg".to_string())];
        assert!(PearsonSpearmanDetector::default()
            .detect(&table(rows), Some(&pairs))
            .is_empty());
    }
}
