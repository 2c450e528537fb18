//! Anomaly detection on daily health metrics
//!
//! Provides:
//! - Z-Score detection against personal baselines with adaptive thresholds
//! - Isolation Forest detection across several metrics at once
//! - An ensemble that merges both into a ranked, deduplicated list

mod ensemble;
mod isolation_forest;
mod zscore;

pub use ensemble::{AnomalyEnsemble, EnsembleConfig};
pub use isolation_forest::{
    IsolationForest, IsolationForestConfig, IsolationForestDetector, IsolationTree,
    DEFAULT_IFOREST_FEATURES,
};
pub use zscore::{
    absolute_bounds, default_thresholds, AbsoluteBounds, ZScoreConfig, ZScoreDetector,
};

use crate::data::{BaselineMap, DailyFeatureTable};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Score at or above which an anomaly is `High`
pub const HIGH_SEVERITY_SCORE: f64 = 0.75;
/// Score at or above which an anomaly is `Medium`
pub const MEDIUM_SEVERITY_SCORE: f64 = 0.45;

/// Which detector produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorType {
    #[serde(rename = "zscore")]
    ZScore,
    IsolationForest,
    Ensemble,
}

/// Anomaly severity; ordered `Low < Medium < High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Map an anomaly score in [0, 1] to a severity
    pub fn from_score(score: f64) -> Self {
        if score >= HIGH_SEVERITY_SCORE {
            Severity::High
        } else if score >= MEDIUM_SEVERITY_SCORE {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// Record a reading was derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub table: String,
    pub id: Uuid,
}

/// `(date, metric) -> source record` for attributing z-score anomalies
pub type SourceMapping = HashMap<(NaiveDate, String), SourceRef>;

/// One feature's share of a multivariate anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub metric: String,
    pub value: f64,
    pub baseline: f64,
    /// `|value - baseline mean| / baseline std`
    pub deviation: f64,
}

/// Detector-specific explanation attached to an [`AnomalyResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnomalyDetails {
    ZScore {
        z_score: f64,
        threshold: f64,
        base_threshold: f64,
        center: f64,
        spread: f64,
        method: CenterMethod,
        bounds_violation: bool,
        iqr_outlier: bool,
    },
    Multivariate {
        primary_metric: String,
        feature_contributions: Vec<FeatureContribution>,
        features_used: Vec<String>,
        isolation_score: f64,
    },
    Ensemble {
        zscore_score: f64,
        iforest_score: f64,
        zscore_metrics: Vec<String>,
        iforest_primary_metric: Option<String>,
        feature_contributions: Vec<FeatureContribution>,
        detection_agreement: bool,
    },
}

/// Center/spread pair used by the z-score detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CenterMethod {
    /// median and 1.4826 * MAD
    Robust,
    /// mean and standard deviation
    Standard,
    /// EWMA center with the chosen spread
    Ewma,
}

/// A flagged daily reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub date: NaiveDate,
    pub source_table: String,
    pub source_id: Uuid,
    pub metric_name: String,
    pub metric_value: f64,
    pub baseline_value: f64,
    pub detector_type: DetectorType,
    pub severity: Severity,
    /// In [0, 1]; higher is more anomalous
    pub anomaly_score: f64,
    pub details: AnomalyDetails,
}

/// Trait for anomaly detectors
pub trait AnomalyDetector: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Flag anomalous readings. Insufficient data yields an empty list.
    fn detect(&self, table: &DailyFeatureTable, baselines: &BaselineMap) -> Vec<AnomalyResult>;
}

/// Storage table a metric's raw readings live in
pub fn source_table_for_metric(metric: &str) -> &'static str {
    match metric {
        "sleep_hours" | "sleep_quality" | "awakenings" | "deep_sleep_hours" | "rem_sleep_hours" => {
            "sleep_entries"
        }
        m if m.starts_with("total_") => "food_entries",
        m if m.starts_with("exercise_") => "exercise_entries",
        "resting_hr" | "hrv" | "bp_systolic" | "bp_diastolic" | "spo2" | "respiratory_rate"
        | "body_temperature" => "vital_signs",
        "weight_kg" | "body_fat_pct" | "muscle_mass_kg" | "bmi" => "body_metrics",
        m if m.starts_with("blood_glucose") || m == "hba1c" || m == "ketones" => "chronic_metrics",
        _ => "unknown",
    }
}

/// Counts over a list of anomalies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub total: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_metric: BTreeMap<String, usize>,
    pub by_detector: BTreeMap<String, usize>,
}

impl AnomalySummary {
    pub fn from_results(results: &[AnomalyResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for r in results {
            *summary.by_severity.entry(r.severity).or_default() += 1;
            *summary.by_metric.entry(r.metric_name.clone()).or_default() += 1;
            let detector = match r.detector_type {
                DetectorType::ZScore => "zscore",
                DetectorType::IsolationForest => "isolation_forest",
                DetectorType::Ensemble => "ensemble",
            };
            *summary.by_detector.entry(detector.to_string()).or_default() += 1;
        }
        summary
    }

    /// Number of results with the given severity
    pub fn count(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }
}
