//! Univariate z-score detection against personal baselines

use super::{
    source_table_for_metric, AnomalyDetails, AnomalyDetector, AnomalyResult, CenterMethod,
    DetectorType, Severity, SourceMapping, SourceRef,
};
use crate::data::{BaselineMap, BaselineStats, DailyFeatureTable};
use crate::stats::round_to;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// Metrics whose deviations matter clinically; thresholds are tightened
const CRITICAL_METRICS: &[&str] = &[
    "bp_systolic",
    "bp_diastolic",
    "blood_glucose_fasting",
    "blood_glucose_post_meal",
    "resting_hr",
    "spo2",
];

/// Metrics that swing widely day to day; thresholds are loosened
const HIGH_VARIANCE_METRICS: &[&str] =
    &["total_calories", "exercise_minutes", "exercise_calories", "hrv"];

/// Inclusive medical reference range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbsoluteBounds {
    pub min: f64,
    pub max: f64,
}

impl AbsoluteBounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn violated_by(&self, value: f64) -> bool {
        value < self.min || value > self.max
    }
}

/// Base z thresholds per recognised metric
pub fn default_thresholds() -> BTreeMap<String, f64> {
    [
        ("sleep_hours", 2.5),
        ("sleep_quality", 2.5),
        ("total_calories", 3.0),
        ("exercise_minutes", 3.0),
        ("resting_hr", 2.5),
        ("hrv", 2.5),
        ("bp_systolic", 2.5),
        ("bp_diastolic", 2.5),
        ("spo2", 2.5),
        ("blood_glucose_fasting", 2.5),
        ("weight_kg", 2.0),
    ]
    .into_iter()
    .map(|(m, t)| (m.to_string(), t))
    .collect()
}

/// Medical reference ranges
pub fn absolute_bounds() -> BTreeMap<String, AbsoluteBounds> {
    [
        ("blood_glucose_fasting", AbsoluteBounds::new(70.0, 140.0)),
        ("resting_hr", AbsoluteBounds::new(40.0, 100.0)),
        ("bp_systolic", AbsoluteBounds::new(90.0, 140.0)),
        ("bp_diastolic", AbsoluteBounds::new(60.0, 90.0)),
        ("spo2", AbsoluteBounds::new(94.0, 100.0)),
    ]
    .into_iter()
    .map(|(m, b)| (m.to_string(), b))
    .collect()
}

/// Configuration for [`ZScoreDetector`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZScoreConfig {
    /// Base threshold per metric; only these metrics are examined
    pub thresholds: BTreeMap<String, f64>,
    /// Absolute medical bounds per metric
    pub bounds: BTreeMap<String, AbsoluteBounds>,
    /// Use median and MAD-derived spread instead of mean and std
    pub use_robust: bool,
    /// Scale the base threshold by variability, sample size and sensitivity
    pub use_adaptive: bool,
    /// Replace the center with the baseline EWMA
    pub use_ewma_baseline: bool,
    /// Tukey fence multiplier
    pub iqr_multiplier: f64,
    /// Lower clamp of the adaptive threshold
    pub min_threshold: f64,
    /// Upper clamp of the adaptive threshold
    pub max_threshold: f64,
}

impl Default for ZScoreConfig {
    fn default() -> Self {
        Self {
            thresholds: default_thresholds(),
            bounds: absolute_bounds(),
            use_robust: true,
            use_adaptive: true,
            use_ewma_baseline: false,
            iqr_multiplier: 1.5,
            min_threshold: 1.5,
            max_threshold: 5.0,
        }
    }
}

impl ZScoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to override one metric's base threshold
    pub fn with_threshold(mut self, metric: impl Into<String>, threshold: f64) -> Self {
        self.thresholds.insert(metric.into(), threshold);
        self
    }

    /// Builder method to set medical bounds for a metric
    pub fn with_bounds(mut self, metric: impl Into<String>, min: f64, max: f64) -> Self {
        self.bounds.insert(metric.into(), AbsoluteBounds::new(min, max));
        self
    }

    /// Builder method to toggle robust statistics
    pub fn with_robust(mut self, enabled: bool) -> Self {
        self.use_robust = enabled;
        self
    }

    /// Builder method to toggle adaptive thresholds
    pub fn with_adaptive(mut self, enabled: bool) -> Self {
        self.use_adaptive = enabled;
        self
    }

    /// Builder method to toggle the EWMA center
    pub fn with_ewma_baseline(mut self, enabled: bool) -> Self {
        self.use_ewma_baseline = enabled;
        self
    }

    /// Adjust `base` for this metric and baseline, clamped to the configured range
    pub fn adaptive_threshold(&self, metric: &str, base: f64, baseline: &BaselineStats) -> f64 {
        let mut threshold = base;

        if let Some(cv) = baseline.coefficient_of_variation() {
            if cv > 0.5 {
                threshold *= 1.4;
            } else if cv > 0.3 {
                threshold *= 1.2;
            } else if cv < 0.1 {
                threshold *= 0.9;
            }
        }

        if baseline.n_samples < 7 {
            threshold *= 1.5;
        } else if baseline.n_samples < 14 {
            threshold *= 1.2;
        }

        if CRITICAL_METRICS.contains(&metric) {
            threshold *= 0.85;
        } else if HIGH_VARIANCE_METRICS.contains(&metric) {
            threshold *= 1.15;
        }

        threshold.clamp(self.min_threshold, self.max_threshold)
    }
}

/// Per-metric z-score detector with Tukey fences and medical bounds
#[derive(Debug, Clone, Default)]
pub struct ZScoreDetector {
    config: ZScoreConfig,
    sources: SourceMapping,
}

impl ZScoreDetector {
    pub fn new(config: ZScoreConfig) -> Self {
        Self {
            config,
            sources: SourceMapping::new(),
        }
    }

    /// Attribute flagged readings to their source records
    pub fn with_sources(mut self, sources: SourceMapping) -> Self {
        self.sources = sources;
        self
    }

    pub fn config(&self) -> &ZScoreConfig {
        &self.config
    }

    fn center_and_spread(&self, baseline: &BaselineStats) -> (f64, f64, CenterMethod) {
        let (center, spread, method) = if self.config.use_robust && baseline.robust_std > 0.0 {
            (baseline.median, baseline.robust_std, CenterMethod::Robust)
        } else {
            // MAD collapses to zero on coarse-grained metrics; fall back to std
            (baseline.mean, baseline.std, CenterMethod::Standard)
        };
        if self.config.use_ewma_baseline {
            (baseline.ewma, spread, CenterMethod::Ewma)
        } else {
            (center, spread, method)
        }
    }

    fn source_for(&self, date: NaiveDate, metric: &str) -> SourceRef {
        self.sources
            .get(&(date, metric.to_string()))
            .cloned()
            .unwrap_or_else(|| SourceRef {
                table: source_table_for_metric(metric).to_string(),
                id: Uuid::new_v4(),
            })
    }

    fn detect_metric(
        &self,
        table: &DailyFeatureTable,
        metric: &str,
        base_threshold: f64,
        baseline: &BaselineStats,
    ) -> Vec<AnomalyResult> {
        let (center, spread, method) = self.center_and_spread(baseline);
        if spread <= 0.0 || !spread.is_finite() {
            debug!(metric = %metric, "Zero spread, skipping metric");
            return Vec::new();
        }

        let threshold = if self.config.use_adaptive {
            self.config.adaptive_threshold(metric, base_threshold, baseline)
        } else {
            base_threshold
        };

        let fence = self.config.iqr_multiplier * baseline.iqr;
        let bounds = self.config.bounds.get(metric);

        let mut results = Vec::new();
        for (date, value) in table.present_values(metric) {
            let z = (value - center).abs() / spread;
            let bounds_violation = bounds.is_some_and(|b| b.violated_by(value));
            let iqr_outlier =
                baseline.iqr > 0.0 && (value < baseline.q1 - fence || value > baseline.q3 + fence);

            if !(z > threshold || bounds_violation) {
                continue;
            }

            let mut score = (z / (threshold + 2.0)).min(1.0);
            if bounds_violation {
                score = score.max(0.7);
            }
            if iqr_outlier {
                score = score.max(0.5);
            }
            let score = round_to(score, 3);

            let source = self.source_for(date, metric);
            results.push(AnomalyResult {
                date,
                source_table: source.table,
                source_id: source.id,
                metric_name: metric.to_string(),
                metric_value: value,
                baseline_value: center,
                detector_type: DetectorType::ZScore,
                severity: Severity::from_score(score),
                anomaly_score: score,
                details: AnomalyDetails::ZScore {
                    z_score: round_to(z, 3),
                    threshold: round_to(threshold, 3),
                    base_threshold,
                    center,
                    spread,
                    method,
                    bounds_violation,
                    iqr_outlier,
                },
            });
        }
        results
    }
}

impl AnomalyDetector for ZScoreDetector {
    fn name(&self) -> &'static str {
        "zscore"
    }

    fn detect(&self, table: &DailyFeatureTable, baselines: &BaselineMap) -> Vec<AnomalyResult> {
        let mut results = Vec::new();
        for (metric, &base) in &self.config.thresholds {
            let Some(baseline) = baselines.get(metric) else {
                debug!(metric = %metric, "No baseline, skipping metric");
                continue;
            };
            results.extend(self.detect_metric(table, metric, base, baseline));
        }
        debug!(count = results.len(), "Z-score detection complete");
        results
    }
}
