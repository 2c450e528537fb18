//! Runs every correlation detector and reconciles their findings

use super::{
    CausalDirection, CorrelationDetector, CorrelationResult, CorrelationType, CrossCorrelationConfig,
    CrossCorrelationDetector, Granularity, GrangerConfig, GrangerDetector, MetricPair,
    MutualInfoConfig, MutualInfoDetector, PearsonSpearmanConfig, PearsonSpearmanDetector,
};
use crate::data::DailyFeatureTable;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Breakpoints of [`CorrelationAggregator::is_actionable`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionabilityThresholds {
    /// |value| at or above which any finding is actionable
    pub strong_correlation: f64,
    /// |value| required for lagged and high-confidence findings
    pub min_correlation: f64,
    pub min_confidence: f64,
}

impl Default for ActionabilityThresholds {
    fn default() -> Self {
        Self {
            strong_correlation: 0.7,
            min_correlation: 0.5,
            min_confidence: 0.6,
        }
    }
}

/// Configuration for [`CorrelationAggregator`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub include_pearson: bool,
    pub include_cross_correlation: bool,
    pub include_granger: bool,
    pub include_mutual_info: bool,
    /// Weekly Pearson/Spearman pass; also requires `include_pearson`
    pub include_weekly: bool,
    pub max_lag: usize,
    pub significance_level: f64,
    /// Passed to every daily detector; Granger uses at least 20
    pub min_samples: usize,
    /// Weekly rows required for the weekly pass
    pub weekly_min_rows: usize,
    pub weekly_min_samples: usize,
    pub actionability: ActionabilityThresholds,
    /// Results rendered in [`FindingsSummary::top_findings`]
    pub top_findings: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            include_pearson: true,
            include_cross_correlation: true,
            include_granger: true,
            include_mutual_info: true,
            include_weekly: true,
            max_lag: 3,
            significance_level: 0.05,
            min_samples: 14,
            weekly_min_rows: 4,
            weekly_min_samples: 4,
            actionability: ActionabilityThresholds::default(),
            top_findings: 5,
        }
    }
}

impl AggregatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to toggle each daily detector
    pub fn with_detectors(mut self, pearson: bool, cross_correlation: bool, granger: bool, mutual_info: bool) -> Self {
        self.include_pearson = pearson;
        self.include_cross_correlation = cross_correlation;
        self.include_granger = granger;
        self.include_mutual_info = mutual_info;
        self
    }

    /// Builder method to toggle the weekly pass
    pub fn with_weekly(mut self, enabled: bool) -> Self {
        self.include_weekly = enabled;
        self
    }

    /// Builder method to set the maximum lag
    pub fn with_max_lag(mut self, max_lag: usize) -> Self {
        self.max_lag = max_lag;
        self
    }

    /// Builder method to set the significance level
    pub fn with_significance_level(mut self, alpha: f64) -> Self {
        self.significance_level = alpha;
        self
    }

    /// Builder method to set the minimum sample count
    pub fn with_min_samples(mut self, n: usize) -> Self {
        self.min_samples = n;
        self
    }
}

/// Counts and one-line descriptions of a ranked result list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindingsSummary {
    pub total_correlations: usize,
    pub significant_count: usize,
    pub actionable_count: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_strength: BTreeMap<String, usize>,
    pub top_findings: Vec<String>,
}

/// One-line description of a finding
fn describe(r: &CorrelationResult) -> String {
    match r.correlation_type {
        CorrelationType::GrangerCausality => {
            format!("{} predicts {} (lag: {} day)", r.metric_a, r.metric_b, r.lag_days)
        }
        CorrelationType::CrossCorrelation => {
            format!("{} affects {} after {} day(s)", r.metric_a, r.metric_b, r.lag_days)
        }
        _ => {
            let direction = if r.correlation_value > 0.0 {
                "positively"
            } else {
                "negatively"
            };
            format!("{} and {} are {} correlated", r.metric_a, r.metric_b, direction)
        }
    }
}

/// Orchestrates the correlation detectors
#[derive(Debug, Clone, Default)]
pub struct CorrelationAggregator {
    config: AggregatorConfig,
}

/// A detector bound to the table it runs on
type Job<'a> = (Box<dyn CorrelationDetector>, &'a DailyFeatureTable);

impl CorrelationAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    fn daily_jobs<'a>(&self, daily: &'a DailyFeatureTable) -> Vec<Job<'a>> {
        let c = &self.config;
        let mut jobs: Vec<Job<'a>> = Vec::new();
        if c.include_pearson {
            let config = PearsonSpearmanConfig::new()
                .with_significance_level(c.significance_level)
                .with_min_samples(c.min_samples);
            jobs.push((Box::new(PearsonSpearmanDetector::new(config)), daily));
        }
        if c.include_cross_correlation {
            let config = CrossCorrelationConfig::new()
                .with_max_lag(c.max_lag)
                .with_significance_level(c.significance_level)
                .with_min_samples(c.min_samples);
            jobs.push((Box::new(CrossCorrelationDetector::new(config)), daily));
        }
        if c.include_granger {
            let config = GrangerConfig::new()
                .with_max_lag(c.max_lag)
                .with_significance_level(c.significance_level)
                .with_min_samples(c.min_samples.max(20));
            jobs.push((Box::new(GrangerDetector::new(config)), daily));
        }
        if c.include_mutual_info {
            let config = MutualInfoConfig::new().with_min_samples(c.min_samples);
            jobs.push((Box::new(MutualInfoDetector::new(config)), daily));
        }
        jobs
    }

    fn weekly_detector(&self) -> PearsonSpearmanDetector {
        PearsonSpearmanDetector::new(
            PearsonSpearmanConfig::new()
                .with_significance_level(self.config.significance_level)
                .with_min_samples(self.config.weekly_min_samples)
                .with_granularity(Granularity::Weekly),
        )
    }

    /// Run all enabled detectors, then deduplicate, rank and mark actionable.
    ///
    /// When `weekly` is `None` and the weekly pass is enabled, the daily table
    /// is rolled up into ISO-week means.
    pub fn analyze(
        &self,
        daily: &DailyFeatureTable,
        weekly: Option<&DailyFeatureTable>,
    ) -> Vec<CorrelationResult> {
        let rolled;
        let weekly = match weekly {
            Some(w) => Some(w),
            None if self.config.include_weekly && self.config.include_pearson => {
                rolled = daily.weekly_means();
                Some(&rolled)
            }
            None => None,
        };

        let mut jobs = self.daily_jobs(daily);
        if let Some(weekly) = weekly {
            if self.config.include_weekly
                && self.config.include_pearson
                && weekly.len() >= self.config.weekly_min_rows
            {
                jobs.push((Box::new(self.weekly_detector()), weekly));
            }
        }

        let batches: Vec<Vec<CorrelationResult>> = jobs
            .par_iter()
            .map(|(detector, table)| {
                let results = detector.detect(table, None);
                debug!(detector = detector.name(), count = results.len(), "Detector finished");
                results
            })
            .collect();
        let raw: Vec<CorrelationResult> = batches.into_iter().flatten().collect();
        let raw_count = raw.len();

        let mut results = Self::deduplicate(raw);
        for r in &mut results {
            r.details.is_actionable = self.is_actionable(r);
        }
        info!(
            raw = raw_count,
            kept = results.len(),
            actionable = results.iter().filter(|r| r.is_actionable()).count(),
            "Correlation analysis complete"
        );
        results
    }

    /// Keep one result per `(unordered pair, granularity)` and rank them.
    ///
    /// Higher type priority wins, then strictly higher confidence; the first
    /// result seen wins exact ties. Applying this twice changes nothing.
    pub fn deduplicate(results: Vec<CorrelationResult>) -> Vec<CorrelationResult> {
        let mut kept: Vec<CorrelationResult> = Vec::new();
        let mut index: HashMap<(String, String, Granularity), usize> = HashMap::new();

        for result in results {
            let (a, b) = result.unordered_pair();
            let key = (a.to_string(), b.to_string(), result.granularity);
            match index.get(&key) {
                None => {
                    index.insert(key, kept.len());
                    kept.push(result);
                }
                Some(&i) => {
                    let existing = &kept[i];
                    let (new_p, old_p) = (
                        result.correlation_type.priority(),
                        existing.correlation_type.priority(),
                    );
                    if new_p > old_p || (new_p == old_p && result.confidence > existing.confidence) {
                        kept[i] = result;
                    }
                }
            }
        }

        Self::rank(&mut kept);
        kept
    }

    /// Sort by type priority and confidence, descending, with a stable
    /// tie-break on metric names and granularity
    pub fn rank(results: &mut [CorrelationResult]) {
        results.sort_by(|x, y| {
            y.correlation_type
                .priority()
                .cmp(&x.correlation_type.priority())
                .then_with(|| y.confidence.partial_cmp(&x.confidence).unwrap_or(Ordering::Equal))
                .then_with(|| x.metric_a.cmp(&y.metric_a))
                .then_with(|| x.metric_b.cmp(&y.metric_b))
                .then_with(|| x.granularity.cmp(&y.granularity))
        });
    }

    pub fn is_actionable(&self, r: &CorrelationResult) -> bool {
        let t = &self.config.actionability;
        let abs = r.correlation_value.abs();

        if abs >= t.strong_correlation {
            return true;
        }
        if r.correlation_type == CorrelationType::GrangerCausality
            && r.is_significant
            && matches!(
                r.causal_direction,
                Some(d) if d != CausalDirection::None
            )
        {
            return true;
        }
        if r.correlation_type == CorrelationType::CrossCorrelation
            && r.lag_days > 0
            && abs >= t.min_correlation
        {
            return true;
        }
        r.confidence >= t.min_confidence && abs >= t.min_correlation
    }

    /// First `limit` actionable results, in rank order
    pub fn top_actionable<'a>(&self, results: &'a [CorrelationResult], limit: usize) -> Vec<&'a CorrelationResult> {
        results.iter().filter(|r| r.is_actionable()).take(limit).collect()
    }

    pub fn summarize(&self, results: &[CorrelationResult]) -> FindingsSummary {
        let mut summary = FindingsSummary {
            total_correlations: results.len(),
            significant_count: results.iter().filter(|r| r.is_significant).count(),
            actionable_count: results.iter().filter(|r| r.is_actionable()).count(),
            ..FindingsSummary::default()
        };
        for r in results {
            *summary
                .by_type
                .entry(r.correlation_type.as_str().to_string())
                .or_insert(0) += 1;
            *summary
                .by_strength
                .entry(r.strength.as_str().to_string())
                .or_insert(0) += 1;
        }
        summary.top_findings = results
            .iter()
            .take(self.config.top_findings)
            .map(describe)
            .collect();
        summary
    }
}

impl CorrelationDetector for CorrelationAggregator {
    fn name(&self) -> &'static str {
        "aggregator"
    }

    /// Full analysis; explicit pairs restrict the reported results
    fn detect(&self, table: &DailyFeatureTable, pairs: Option<&[MetricPair]>) -> Vec<CorrelationResult> {
        let results = self.analyze(table, None);
        match pairs {
            None => results,
            Some(pairs) => results
                .into_iter()
                .filter(|r| {
                    pairs.iter().any(|(a, b)| {
                        (r.metric_a == *a && r.metric_b == *b) || (r.metric_a == *b && r.metric_b == *a)
                    })
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::{
        CorrelationDetails, CorrelationStrength, MethodDetails,
    };

    fn result(a: &str, b: &str, ty: CorrelationType, value: f64, confidence: f64) -> CorrelationResult {
        let method = match ty {
            CorrelationType::GrangerCausality => MethodDetails::Granger {
                a_causes_b: true,
                b_causes_a: false,
                f_statistic: 6.0,
                optimal_lag: 1,
                differenced_a: false,
                differenced_b: false,
            },
            CorrelationType::CrossCorrelation => MethodDetails::CrossCorrelation {
                optimal_lag: 1,
                lags_tested: 3,
            },
            CorrelationType::MutualInformation => MethodDetails::MutualInformation {
                mi_raw: value * 2.0,
                mi_normalized: value,
                n_neighbors: 3,
            },
            _ => MethodDetails::Pearson {
                r_squared: value * value,
            },
        };
        CorrelationResult {
            metric_a: a.to_string(),
            metric_b: b.to_string(),
            correlation_type: ty,
            correlation_value: value,
            strength: CorrelationStrength::from_value(value),
            p_value: Some(0.01),
            is_significant: true,
            lag_days: if ty == CorrelationType::CrossCorrelation || ty == CorrelationType::GrangerCausality { 1 } else { 0 },
            granularity: Granularity::Daily,
            sample_size: 30,
            causal_direction: (ty == CorrelationType::GrangerCausality).then_some(CausalDirection::ACausesB),
            granger_f_stat: None,
            confidence,
            details: CorrelationDetails::new(method),
        }
    }

    #[test]
    fn test_dedup_prefers_priority_then_confidence() {
        let results = vec![
            result("sleep_hours", "hrv", CorrelationType::Pearson, 0.6, 0.55),
            result("hrv", "sleep_hours", CorrelationType::MutualInformation, 0.4, 0.9),
            result("hrv", "sleep_hours", CorrelationType::CrossCorrelation, 0.45, 0.4),
            result("exercise_minutes", "hrv", CorrelationType::Pearson, 0.3, 0.25),
            result("exercise_minutes", "hrv", CorrelationType::Spearman, 0.35, 0.30),
        ];
        let deduped = CorrelationAggregator::deduplicate(results);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].correlation_type, CorrelationType::CrossCorrelation);
        assert_eq!(deduped[1].correlation_type, CorrelationType::Spearman);
    }

    #[test]
    fn test_dedup_first_seen_wins_ties() {
        let first = result("a", "b", CorrelationType::Pearson, 0.5, 0.5);
        let second = result("b", "a", CorrelationType::Spearman, 0.6, 0.5);
        let deduped = CorrelationAggregator::deduplicate(vec![first.clone(), second]);
        assert_eq!(deduped, vec![first]);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let results = vec![
            result("a", "b", CorrelationType::Pearson, 0.5, 0.5),
            result("a", "c", CorrelationType::GrangerCausality, 0.9, 0.9),
            result("c", "a", CorrelationType::MutualInformation, 0.3, 0.3),
            result("b", "c", CorrelationType::Spearman, -0.4, 0.35),
        ];
        let once = CorrelationAggregator::deduplicate(results);
        let twice = CorrelationAggregator::deduplicate(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_weekly_results_are_kept_separately() {
        let daily = result("a", "b", CorrelationType::Pearson, 0.5, 0.5);
        let mut weekly = daily.clone();
        weekly.granularity = Granularity::Weekly;
        assert_eq!(CorrelationAggregator::deduplicate(vec![daily, weekly]).len(), 2);
    }

    #[test]
    fn test_actionability_rules() {
        let agg = CorrelationAggregator::default();
        assert!(agg.is_actionable(&result("a", "b", CorrelationType::Pearson, -0.75, 0.1)));
        assert!(agg.is_actionable(&result("a", "b", CorrelationType::GrangerCausality, 0.2, 0.2)));
        assert!(agg.is_actionable(&result("a", "b", CorrelationType::CrossCorrelation, 0.5, 0.1)));
        assert!(agg.is_actionable(&result("a", "b", CorrelationType::Pearson, 0.55, 0.6)));
        assert!(!agg.is_actionable(&result("a", "b", CorrelationType::Pearson, 0.55, 0.59)));

        let mut none = result("a", "b", CorrelationType::GrangerCausality, 0.2, 0.2);
        none.causal_direction = Some(CausalDirection::None);
        assert!(!agg.is_actionable(&none));
    }

    #[test]
    fn test_summary_text() {
        let agg = CorrelationAggregator::default();
        let mut results = vec![
            result("exercise_minutes", "sleep_quality", CorrelationType::GrangerCausality, 0.97, 0.97),
            result("total_sugar_g", "sleep_quality", CorrelationType::CrossCorrelation, -0.5, 0.48),
            result("sleep_hours", "hrv", CorrelationType::Pearson, -0.3, 0.29),
        ];
        for r in &mut results {
            r.details.is_actionable = agg.is_actionable(r);
        }
        let summary = agg.summarize(&results);
        assert_eq!(summary.total_correlations, 3);
        assert_eq!(summary.actionable_count, 2);
        assert_eq!(summary.by_type["granger_causality"], 1);
        assert_eq!(summary.by_strength["strong_positive"], 1);
        assert_eq!(
            summary.top_findings,
            vec![
                "exercise_minutes predicts sleep_quality (lag: 1 day)".to_string(),
                "total_sugar_g affects sleep_quality after 1 day(s)".to_string(),
                "sleep_hours and hrv are negatively correlated".to_string(),
            ]
        );
        assert_eq!(agg.top_actionable(&results, 1).len(), 1);
        assert_eq!(agg.summarize(&[]), FindingsSummary::default());
    }
}
