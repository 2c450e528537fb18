//! Correlation discovery between pairs of daily health metrics
//!
//! Provides:
//! - Same-day Pearson and Spearman correlation
//! - Time-lagged cross-correlation
//! - Granger causality with stationarity handling
//! - KSG mutual information for non-linear dependence
//! - An aggregator that deduplicates, ranks and flags actionable findings
//! - Comparison against population baselines

mod aggregator;
mod cross_correlation;
mod granger;
mod mutual_info;
mod pearson;
mod population;

pub use aggregator::{AggregatorConfig, CorrelationAggregator, FindingsSummary};
pub use cross_correlation::{default_lag_pairs, CrossCorrelationConfig, CrossCorrelationDetector};
pub use granger::{GrangerConfig, GrangerDetector};
pub use mutual_info::{MutualInfoConfig, MutualInfoDetector, OUTCOME_METRICS, PREDICTOR_METRICS};
pub use pearson::{PearsonSpearmanConfig, PearsonSpearmanDetector};
pub use population::{
    default_population_baselines, InMemoryPopulationStore, PopulationComparator,
    PopulationComparison, PopulationConfig, PopulationStats, PopulationStore, StoredCorrelation,
};

use crate::data::DailyFeatureTable;
use serde::{Deserialize, Serialize};

/// Ordered `(metric_a, metric_b)` pair
pub type MetricPair = (String, String);

/// Metrics that plausibly influence others
pub const INFLUENCER_METRICS: &[&str] = &[
    "exercise_minutes",
    "exercise_calories",
    "exercise_intensity_avg",
    "total_calories",
    "total_protein_g",
    "total_carbs_g",
    "total_sugar_g",
    "total_fats_g",
    "sleep_hours",
    "sleep_quality",
];

/// Metrics that plausibly respond to influencers
pub const RESPONSE_METRICS: &[&str] = &[
    "sleep_hours",
    "sleep_quality",
    "awakenings",
    "resting_hr",
    "hrv",
    "bp_systolic",
    "bp_diastolic",
    "blood_glucose_fasting",
    "blood_glucose_post_meal",
    "weight_kg",
    "body_fat_pct",
];

/// Kind of relationship test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationType {
    Pearson,
    Spearman,
    CrossCorrelation,
    GrangerCausality,
    MutualInformation,
}

impl CorrelationType {
    /// Preference when several tests report the same pair
    pub fn priority(self) -> u8 {
        match self {
            CorrelationType::GrangerCausality => 4,
            CorrelationType::CrossCorrelation => 3,
            CorrelationType::Pearson | CorrelationType::Spearman => 2,
            CorrelationType::MutualInformation => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CorrelationType::Pearson => "pearson",
            CorrelationType::Spearman => "spearman",
            CorrelationType::CrossCorrelation => "cross_correlation",
            CorrelationType::GrangerCausality => "granger_causality",
            CorrelationType::MutualInformation => "mutual_information",
        }
    }
}

/// Seven-bucket strength label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStrength {
    StrongPositive,
    ModeratePositive,
    WeakPositive,
    Negligible,
    WeakNegative,
    ModerateNegative,
    StrongNegative,
}

impl CorrelationStrength {
    /// Bucket a signed coefficient; `[-0.2, 0.2]` is negligible
    pub fn from_value(value: f64) -> Self {
        if value >= 0.7 {
            CorrelationStrength::StrongPositive
        } else if value >= 0.4 {
            CorrelationStrength::ModeratePositive
        } else if value > 0.2 {
            CorrelationStrength::WeakPositive
        } else if value >= -0.2 {
            CorrelationStrength::Negligible
        } else if value > -0.4 {
            CorrelationStrength::WeakNegative
        } else if value > -0.7 {
            CorrelationStrength::ModerateNegative
        } else {
            CorrelationStrength::StrongNegative
        }
    }

    /// Bucket a normalized mutual information score (no sign)
    pub fn from_mutual_information(mi: f64) -> Self {
        if mi >= 0.5 {
            CorrelationStrength::StrongPositive
        } else if mi >= 0.3 {
            CorrelationStrength::ModeratePositive
        } else if mi >= 0.15 {
            CorrelationStrength::WeakPositive
        } else {
            CorrelationStrength::Negligible
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CorrelationStrength::StrongPositive => "strong_positive",
            CorrelationStrength::ModeratePositive => "moderate_positive",
            CorrelationStrength::WeakPositive => "weak_positive",
            CorrelationStrength::Negligible => "negligible",
            CorrelationStrength::WeakNegative => "weak_negative",
            CorrelationStrength::ModerateNegative => "moderate_negative",
            CorrelationStrength::StrongNegative => "strong_negative",
        }
    }
}

/// Direction of a Granger relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CausalDirection {
    ACausesB,
    BCausesA,
    Bidirectional,
    None,
}

/// Time resolution of the table a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Daily,
    Weekly,
}

/// Test-specific fields of a [`CorrelationResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum MethodDetails {
    Pearson {
        r_squared: f64,
    },
    Spearman {
        pearson_r: f64,
        difference_from_pearson: f64,
    },
    CrossCorrelation {
        optimal_lag: usize,
        lags_tested: usize,
    },
    Granger {
        a_causes_b: bool,
        b_causes_a: bool,
        f_statistic: f64,
        optimal_lag: usize,
        differenced_a: bool,
        differenced_b: bool,
    },
    MutualInformation {
        mi_raw: f64,
        mi_normalized: f64,
        n_neighbors: usize,
    },
}

/// Annotations added after detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationDetails {
    pub is_actionable: bool,
    #[serde(flatten)]
    pub population: Option<PopulationComparison>,
    #[serde(flatten)]
    pub method: MethodDetails,
}

impl CorrelationDetails {
    pub fn new(method: MethodDetails) -> Self {
        Self {
            is_actionable: false,
            population: None,
            method,
        }
    }
}

/// A discovered relationship between two metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub metric_a: String,
    pub metric_b: String,
    pub correlation_type: CorrelationType,
    /// In [-1, 1], or [0, 1] for mutual information
    pub correlation_value: f64,
    pub strength: CorrelationStrength,
    pub p_value: Option<f64>,
    pub is_significant: bool,
    pub lag_days: usize,
    pub granularity: Granularity,
    pub sample_size: usize,
    pub causal_direction: Option<CausalDirection>,
    pub granger_f_stat: Option<f64>,
    /// In [0, 1]
    pub confidence: f64,
    pub details: CorrelationDetails,
}

impl CorrelationResult {
    /// Pair key independent of metric order
    pub fn unordered_pair(&self) -> (&str, &str) {
        if self.metric_a <= self.metric_b {
            (&self.metric_a, &self.metric_b)
        } else {
            (&self.metric_b, &self.metric_a)
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.details.is_actionable
    }
}

/// Trait for pairwise relationship detectors
pub trait CorrelationDetector: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Test `pairs`, or the detector's default candidates when `None`.
    /// Pairs with missing columns or too little data are skipped.
    fn detect(&self, table: &DailyFeatureTable, pairs: Option<&[MetricPair]>)
        -> Vec<CorrelationResult>;
}

/// Confidence of a coefficient with a p-value: `(1 - p) * |r|`
pub fn confidence_from(r: f64, p_value: f64) -> f64 {
    ((1.0 - p_value) * r.abs()).clamp(0.0, 1.0)
}

/// Every unordered pair of columns, in column order
pub fn all_pairs(columns: &[String]) -> Vec<MetricPair> {
    let mut pairs = Vec::new();
    for (i, a) in columns.iter().enumerate() {
        for b in &columns[i + 1..] {
            pairs.push((a.clone(), b.clone()));
        }
    }
    pairs
}

/// `predictor x outcome` pairs whose metrics are both present
pub fn cross_pairs(table: &DailyFeatureTable, predictors: &[&str], outcomes: &[&str]) -> Vec<MetricPair> {
    let mut pairs = Vec::new();
    for &p in predictors {
        if !table.has_column(p) {
            continue;
        }
        for &o in outcomes {
            if p != o && table.has_column(o) {
                pairs.push((p.to_string(), o.to_string()));
            }
        }
    }
    pairs
}

/// Influencer x response pairs present in the table
pub fn meaningful_pairs(table: &DailyFeatureTable) -> Vec<MetricPair> {
    cross_pairs(table, INFLUENCER_METRICS, RESPONSE_METRICS)
}

/// Owned copy of a caller pair list, or the detector default
pub(crate) fn resolve_pairs(
    pairs: Option<&[MetricPair]>,
    default: impl FnOnce() -> Vec<MetricPair>,
) -> Vec<MetricPair> {
    match pairs {
        Some(p) => p.to_vec(),
        None => default(),
    }
}
