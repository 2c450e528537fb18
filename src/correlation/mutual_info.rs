//! Non-linear dependence via k-nearest-neighbour mutual information

use super::{
    cross_pairs, resolve_pairs, CorrelationDetails, CorrelationDetector, CorrelationResult,
    CorrelationStrength, CorrelationType, Granularity, MethodDetails, MetricPair,
};
use crate::data::DailyFeatureTable;
use crate::stats::{ksg_mutual_information, round_to, TestOutcome};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Behaviours that may drive an outcome
pub const PREDICTOR_METRICS: &[&str] = super::INFLUENCER_METRICS;

/// Physiological outcomes
pub const OUTCOME_METRICS: &[&str] = &[
    "sleep_quality",
    "sleep_hours",
    "awakenings",
    "resting_hr",
    "hrv",
    "blood_glucose_fasting",
    "blood_glucose_post_meal",
    "weight_kg",
    "body_fat_pct",
];

/// Normalized scores at or above this are significant
const SIGNIFICANT_MI: f64 = 0.15;

/// Configuration for [`MutualInfoDetector`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MutualInfoConfig {
    pub min_samples: usize,
    /// Minimum normalized score to report
    pub min_mi_score: f64,
    pub n_neighbors: usize,
    /// Seed for the tie-breaking jitter
    pub seed: u64,
}

impl Default for MutualInfoConfig {
    fn default() -> Self {
        Self {
            min_samples: 20,
            min_mi_score: 0.1,
            n_neighbors: 3,
            seed: 42,
        }
    }
}

impl MutualInfoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the minimum sample count
    pub fn with_min_samples(mut self, n: usize) -> Self {
        self.min_samples = n;
        self
    }

    /// Builder method to set the reporting floor
    pub fn with_min_mi_score(mut self, score: f64) -> Self {
        self.min_mi_score = score;
        self
    }

    /// Builder method to set the jitter seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct MutualInfoDetector {
    config: MutualInfoConfig,
}

impl MutualInfoDetector {
    pub fn new(config: MutualInfoConfig) -> Self {
        Self { config }
    }

    fn test_pair(&self, table: &DailyFeatureTable, pair: &MetricPair) -> Option<CorrelationResult> {
        let (x, y) = table.paired(&pair.0, &pair.1);
        if x.len() < self.config.min_samples {
            return None;
        }

        let mi = match ksg_mutual_information(&x, &y, self.config.n_neighbors, self.config.seed) {
            TestOutcome::Value(mi) => mi,
            TestOutcome::NoResult(reason) => {
                debug!(a = %pair.0, b = %pair.1, ?reason, "Mutual information had no result");
                return None;
            }
        };

        // ~2 nats is near-deterministic dependence at these sample sizes
        let normalized = (mi / 2.0).clamp(0.0, 1.0);
        if normalized < self.config.min_mi_score {
            return None;
        }

        let score = round_to(normalized, 4);
        Some(CorrelationResult {
            metric_a: pair.0.clone(),
            metric_b: pair.1.clone(),
            correlation_type: CorrelationType::MutualInformation,
            correlation_value: score,
            strength: CorrelationStrength::from_mutual_information(normalized),
            p_value: None,
            is_significant: normalized >= SIGNIFICANT_MI,
            lag_days: 0,
            granularity: Granularity::Daily,
            sample_size: x.len(),
            causal_direction: None,
            granger_f_stat: None,
            confidence: score,
            details: CorrelationDetails::new(MethodDetails::MutualInformation {
                mi_raw: round_to(mi, 4),
                mi_normalized: score,
                n_neighbors: self.config.n_neighbors,
            }),
        })
    }
}

impl CorrelationDetector for MutualInfoDetector {
    fn name(&self) -> &'static str {
        "mutual_information"
    }

    fn detect(&self, table: &DailyFeatureTable, pairs: Option<&[MetricPair]>) -> Vec<CorrelationResult> {
        let pairs = resolve_pairs(pairs, || cross_pairs(table, PREDICTOR_METRICS, OUTCOME_METRICS));
        let mut results: Vec<CorrelationResult> =
            pairs.iter().filter_map(|pair| self.test_pair(table, pair)).collect();

        results.sort_by(|a, b| {
            b.correlation_value
                .partial_cmp(&a.correlation_value)
                .unwrap_or(Ordering::Equal)
        });
        debug!(pairs = pairs.len(), count = results.len(), "Mutual information detection complete");
        results
    }
}
