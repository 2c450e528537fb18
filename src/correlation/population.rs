//! Comparison of a user's correlations against other users
//!
//! Provides:
//! - The [`PopulationStore`] lookup seam and an in-memory implementation
//! - Literature default baselines for common metric pairs
//! - Percentile rank and unusualness of each correlation vs. the population

use super::{CorrelationResult, CorrelationType};
use crate::error::Result;
use crate::stats::{mean, normal_cdf, round_to, sample_std};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Literature `(metric_a, metric_b) -> (mean, std)` used when too few users exist
pub fn default_population_baselines() -> &'static [((&'static str, &'static str), (f64, f64))] {
    &[
        (("exercise_minutes", "sleep_quality"), (0.35, 0.15)),
        (("exercise_minutes", "resting_hr"), (-0.25, 0.12)),
        (("total_calories", "weight_kg"), (0.20, 0.18)),
        (("sleep_hours", "hrv"), (0.30, 0.14)),
        (("total_sugar_g", "sleep_quality"), (-0.18, 0.10)),
        (("sleep_quality", "resting_hr"), (-0.22, 0.11)),
        (("exercise_minutes", "hrv"), (0.28, 0.13)),
        (("total_carbs_g", "blood_glucose_fasting"), (0.25, 0.15)),
    ]
}

/// Aggregate of other users' values for one `(pair, type)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopulationStats {
    pub mean: f64,
    /// `None` when fewer than two values exist
    pub std: Option<f64>,
    pub count: usize,
}

impl PopulationStats {
    pub fn empty() -> Self {
        Self {
            mean: 0.0,
            std: None,
            count: 0,
        }
    }
}

/// Source of cross-user correlation statistics
pub trait PopulationStore: Send + Sync {
    /// Aggregate every stored `(metric_a, metric_b, correlation_type)` value,
    /// excluding `exclude_user`
    fn stats(
        &self,
        metric_a: &str,
        metric_b: &str,
        correlation_type: CorrelationType,
        exclude_user: Option<Uuid>,
    ) -> impl Future<Output = Result<PopulationStats>> + Send;
}

/// One user's stored correlation value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCorrelation {
    pub user_id: Uuid,
    pub metric_a: String,
    pub metric_b: String,
    pub correlation_type: CorrelationType,
    pub correlation_value: f64,
}

impl StoredCorrelation {
    pub fn from_result(user_id: Uuid, result: &CorrelationResult) -> Self {
        Self {
            user_id,
            metric_a: result.metric_a.clone(),
            metric_b: result.metric_b.clone(),
            correlation_type: result.correlation_type,
            correlation_value: result.correlation_value,
        }
    }

    fn same_key(&self, other: &StoredCorrelation) -> bool {
        self.user_id == other.user_id
            && self.metric_a == other.metric_a
            && self.metric_b == other.metric_b
            && self.correlation_type == other.correlation_type
    }
}

/// Thread-safe in-memory [`PopulationStore`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryPopulationStore {
    rows: Arc<RwLock<Vec<StoredCorrelation>>>,
}

impl InMemoryPopulationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, replacing any value for the same user, pair and type
    pub fn record(&self, entry: StoredCorrelation) {
        let mut rows = self.rows.write();
        match rows.iter_mut().find(|r| r.same_key(&entry)) {
            Some(existing) => existing.correlation_value = entry.correlation_value,
            None => rows.push(entry),
        }
    }

    /// Record every result for `user_id`
    pub fn record_results(&self, user_id: Uuid, results: &[CorrelationResult]) {
        for result in results {
            self.record(StoredCorrelation::from_result(user_id, result));
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl PopulationStore for InMemoryPopulationStore {
    async fn stats(
        &self,
        metric_a: &str,
        metric_b: &str,
        correlation_type: CorrelationType,
        exclude_user: Option<Uuid>,
    ) -> Result<PopulationStats> {
        let values: Vec<f64> = self
            .rows
            .read()
            .iter()
            .filter(|r| {
                r.metric_a == metric_a
                    && r.metric_b == metric_b
                    && r.correlation_type == correlation_type
                    && Some(r.user_id) != exclude_user
            })
            .map(|r| r.correlation_value)
            .collect();

        let Some(mean) = mean(&values) else {
            return Ok(PopulationStats::empty());
        };
        let std = (values.len() > 1).then(|| sample_std(&values));
        Ok(PopulationStats {
            mean,
            std,
            count: values.len(),
        })
    }
}

/// Population annotations attached to a correlation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopulationComparison {
    pub population_avg: f64,
    pub population_std: f64,
    /// 0 when a default baseline was used
    pub population_count: usize,
    pub is_default_baseline: bool,
    /// Normal-approximation percentile of |z|, in [50, 100]
    pub percentile_rank: f64,
    pub is_unusual: bool,
    pub z_vs_population: f64,
}

/// Configuration for [`PopulationComparator`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Other users required before their statistics replace the defaults
    pub min_users: usize,
    /// Used when no default exists for a pair
    pub neutral_mean: f64,
    pub neutral_std: f64,
    /// Std used when the population has fewer than two values
    pub fallback_std: f64,
    /// Lower bound on std in the z computation
    pub min_std: f64,
    /// |z| above which a correlation is unusual
    pub unusual_z: f64,
    /// Default threshold for [`PopulationComparator::population_anomalies`]
    pub anomaly_percentile: f64,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            min_users: 10,
            neutral_mean: 0.0,
            neutral_std: 0.25,
            fallback_std: 0.1,
            min_std: 0.1,
            unusual_z: 1.5,
            anomaly_percentile: 90.0,
        }
    }
}

impl PopulationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the minimum population size
    pub fn with_min_users(mut self, n: usize) -> Self {
        self.min_users = n;
        self
    }

    /// Builder method to set the unusualness threshold
    pub fn with_unusual_z(mut self, z: f64) -> Self {
        self.unusual_z = z;
        self
    }
}

/// Enriches correlations with population statistics
#[derive(Debug, Clone, Default)]
pub struct PopulationComparator {
    config: PopulationConfig,
}

/// Resolved `(mean, std, count, is_default)` baseline for one pair
struct Baseline {
    mean: f64,
    std: f64,
    count: usize,
    is_default: bool,
}

impl PopulationComparator {
    pub fn new(config: PopulationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PopulationConfig {
        &self.config
    }

    fn default_baseline(&self, metric_a: &str, metric_b: &str) -> Baseline {
        let found = default_population_baselines()
            .iter()
            .find(|((a, b), _)| (*a == metric_a && *b == metric_b) || (*a == metric_b && *b == metric_a))
            .map(|(_, stats)| *stats);
        let (mean, std) = found.unwrap_or((self.config.neutral_mean, self.config.neutral_std));
        Baseline {
            mean,
            std,
            count: 0,
            is_default: true,
        }
    }

    fn resolve(&self, metric_a: &str, metric_b: &str, stats: PopulationStats) -> Baseline {
        if stats.count < self.config.min_users {
            return self.default_baseline(metric_a, metric_b);
        }
        Baseline {
            mean: stats.mean,
            std: stats
                .std
                .filter(|s| *s > 0.0)
                .unwrap_or(self.config.fallback_std),
            count: stats.count,
            is_default: false,
        }
    }

    /// Percentile of `|z|` under a standard normal, rounded to 0.1.
    /// `std` is floored at `min_std`, as in [`compare`](Self::compare).
    pub fn percentile(&self, value: f64, mean: f64, std: f64) -> f64 {
        let std = if std <= 0.0 { self.config.fallback_std } else { std };
        let z = (value - mean) / std.max(self.config.min_std);
        round_to(normal_cdf(z.abs()) * 100.0, 1)
    }

    /// Compare one value against population statistics
    pub fn compare(
        &self,
        result: &CorrelationResult,
        stats: PopulationStats,
    ) -> PopulationComparison {
        let baseline = self.resolve(&result.metric_a, &result.metric_b, stats);
        let value = result.correlation_value;
        let z = (value - baseline.mean).abs() / baseline.std.max(self.config.min_std);

        PopulationComparison {
            population_avg: baseline.mean,
            population_std: baseline.std,
            population_count: baseline.count,
            is_default_baseline: baseline.is_default,
            percentile_rank: self.percentile(value, baseline.mean, baseline.std),
            is_unusual: z > self.config.unusual_z,
            z_vs_population: round_to(z, 2),
        }
    }

    /// Attach population statistics to every result, excluding `user_id`'s
    /// own values. A failed lookup leaves that result un-enriched.
    pub async fn enrich<S: PopulationStore>(
        &self,
        results: &mut [CorrelationResult],
        user_id: Uuid,
        store: &S,
    ) {
        let mut enriched = 0usize;
        for result in results.iter_mut() {
            match store
                .stats(&result.metric_a, &result.metric_b, result.correlation_type, Some(user_id))
                .await
            {
                Ok(stats) => {
                    result.details.population = Some(self.compare(result, stats));
                    enriched += 1;
                }
                Err(e) => warn!(
                    a = %result.metric_a,
                    b = %result.metric_b,
                    error = %e,
                    "Population lookup failed"
                ),
            }
        }
        debug!(enriched, total = results.len(), "Population enrichment complete");
    }

    /// Results whose percentile rank is at least `threshold`
    /// (config default when `None`). Un-enriched results rank at 50.
    pub fn population_anomalies<'a>(
        &self,
        results: &'a [CorrelationResult],
        threshold: Option<f64>,
    ) -> Vec<&'a CorrelationResult> {
        let threshold = threshold.unwrap_or(self.config.anomaly_percentile);
        results
            .iter()
            .filter(|r| {
                r.details
                    .population
                    .map_or(50.0, |p| p.percentile_rank)
                    >= threshold
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::{
        CorrelationDetails, CorrelationStrength, Granularity, MethodDetails,
    };
    use crate::error::InsightError;

    fn result(a: &str, b: &str, value: f64) -> CorrelationResult {
        CorrelationResult {
            metric_a: a.to_string(),
            metric_b: b.to_string(),
            correlation_type: CorrelationType::Pearson,
            correlation_value: value,
            strength: CorrelationStrength::from_value(value),
            p_value: Some(0.01),
            is_significant: true,
            lag_days: 0,
            granularity: Granularity::Daily,
            sample_size: 30,
            causal_direction: None,
            granger_f_stat: None,
            confidence: 0.6,
            details: CorrelationDetails::new(MethodDetails::Pearson { r_squared: value * value }),
        }
    }

    struct FailingStore;

    impl PopulationStore for FailingStore {
        async fn stats(
            &self,
            _metric_a: &str,
            _metric_b: &str,
            _correlation_type: CorrelationType,
            _exclude_user: Option<Uuid>,
        ) -> Result<PopulationStats> {
            Err(InsightError::PopulationStore("offline".to_string()))
        }
    }

    #[test]
    fn test_default_baseline_both_orderings() {
        let comparator = PopulationComparator::default();
        let forward = comparator.compare(&result("exercise_minutes", "sleep_quality", 0.8), PopulationStats::empty());
        let reverse = comparator.compare(&result("sleep_quality", "exercise_minutes", 0.8), PopulationStats::empty());

        assert_eq!(forward.population_avg, 0.35);
        assert_eq!(reverse.population_avg, 0.35);
        assert_eq!(forward.population_count, 0);
        assert!(forward.is_default_baseline);
        // z = 0.45 / 0.15 = 3
        assert_eq!(forward.z_vs_population, 3.0);
        assert!(forward.is_unusual);
        assert!((forward.percentile_rank - 99.9).abs() < 1e-9);
    }

    #[test]
    fn test_neutral_baseline_for_unknown_pair() {
        let comparator = PopulationComparator::default();
        let cmp = comparator.compare(&result("awakenings", "hrv", 0.0), PopulationStats::empty());
        assert_eq!(cmp.population_avg, 0.0);
        assert_eq!(cmp.population_std, 0.25);
        assert_eq!(cmp.percentile_rank, 50.0);
        assert!(!cmp.is_unusual);
    }

    #[test]
    fn test_percentile_guards_zero_std() {
        let comparator = PopulationComparator::default();
        // std 0 is replaced by 0.1: z = 1
        assert!((comparator.percentile(0.5, 0.4, 0.0) - 84.1).abs() < 1e-9);
        // positive std below the floor is raised to 0.1 as well
        assert!((comparator.percentile(0.1, 0.0, 0.05) - 84.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_tight_population_uses_std_floor() {
        let store = InMemoryPopulationStore::new();
        let me = Uuid::new_v4();
        // values alternate 0.275 / 0.325: sample std ~0.026
        for i in 0..10 {
            store.record(StoredCorrelation {
                user_id: Uuid::new_v4(),
                metric_a: "sleep_hours".to_string(),
                metric_b: "hrv".to_string(),
                correlation_type: CorrelationType::Pearson,
                correlation_value: 0.30 + if i % 2 == 0 { 0.025 } else { -0.025 },
            });
        }
        let stats = store
            .stats("sleep_hours", "hrv", CorrelationType::Pearson, Some(me))
            .await
            .unwrap();
        assert_eq!(stats.count, 10);
        let std = stats.std.unwrap();
        assert!(std > 0.0 && std < 0.1);

        let mut results = vec![result("sleep_hours", "hrv", 0.42)];
        PopulationComparator::default().enrich(&mut results, me, &store).await;
        let cmp = results[0].details.population.unwrap();
        assert!(!cmp.is_default_baseline);
        // z = 0.12 / max(std, 0.1) = 1.2
        assert!((cmp.z_vs_population - 1.2).abs() < 1e-9);
        assert!(!cmp.is_unusual);
        assert!((cmp.percentile_rank - 88.5).abs() < 1e-9);
        assert!(cmp.percentile_rank < 90.0);
    }

    #[tokio::test]
    async fn test_store_excludes_current_user() {
        let store = InMemoryPopulationStore::new();
        let me = Uuid::new_v4();
        for i in 0..12 {
            store.record(StoredCorrelation {
                user_id: Uuid::new_v4(),
                metric_a: "sleep_hours".to_string(),
                metric_b: "hrv".to_string(),
                correlation_type: CorrelationType::Pearson,
                correlation_value: 0.1 + 0.01 * i as f64,
            });
        }
        store.record_results(me, &[result("sleep_hours", "hrv", 0.9)]);
        assert_eq!(store.len(), 13);

        let stats = store
            .stats("sleep_hours", "hrv", CorrelationType::Pearson, Some(me))
            .await
            .unwrap();
        assert_eq!(stats.count, 12);
        assert!((stats.mean - 0.155).abs() < 1e-9);

        let mut results = vec![result("sleep_hours", "hrv", 0.9)];
        PopulationComparator::default().enrich(&mut results, me, &store).await;
        let cmp = results[0].details.population.unwrap();
        assert!(!cmp.is_default_baseline);
        assert_eq!(cmp.population_count, 12);
        assert!(cmp.is_unusual);
    }

    #[tokio::test]
    async fn test_record_replaces_same_key() {
        let store = InMemoryPopulationStore::new();
        let user = Uuid::new_v4();
        store.record_results(user, &[result("a", "b", 0.3)]);
        store.record_results(user, &[result("a", "b", 0.5)]);
        assert_eq!(store.len(), 1);
        let stats = store.stats("a", "b", CorrelationType::Pearson, None).await.unwrap();
        assert_eq!(stats.mean, 0.5);
        assert_eq!(stats.std, None);
    }

    #[tokio::test]
    async fn test_failed_lookup_leaves_result_untouched() {
        let mut results = vec![result("sleep_hours", "hrv", 0.5)];
        PopulationComparator::default()
            .enrich(&mut results, Uuid::new_v4(), &FailingStore)
            .await;
        assert!(results[0].details.population.is_none());
    }

    #[test]
    fn test_population_anomalies_threshold() {
        let comparator = PopulationComparator::default();
        let mut strong = result("exercise_minutes", "sleep_quality", 0.9);
        strong.details.population = Some(comparator.compare(&strong, PopulationStats::empty()));
        let plain = result("awakenings", "hrv", 0.3);

        let results = vec![strong, plain];
        let flagged = comparator.population_anomalies(&results, None);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].metric_a, "exercise_minutes");
        // un-enriched results rank at 50
        assert_eq!(comparator.population_anomalies(&results, Some(50.0)).len(), 2);
    }
}
