//! Merge z-score and isolation-forest findings into one ranked list

use super::{
    AnomalyDetails, AnomalyDetector, AnomalyResult, DetectorType, IsolationForestDetector,
    Severity, ZScoreDetector,
};
use crate::data::{BaselineMap, DailyFeatureTable};
use crate::stats::round_to;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Configuration for [`AnomalyEnsemble`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub zscore_weight: f64,
    pub iforest_weight: f64,
    /// Results kept after ranking
    pub max_anomalies: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            zscore_weight: 0.4,
            iforest_weight: 0.6,
            max_anomalies: 50,
        }
    }
}

impl EnsembleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set detector weights
    pub fn with_weights(mut self, zscore: f64, iforest: f64) -> Self {
        self.zscore_weight = zscore;
        self.iforest_weight = iforest;
        self
    }

    /// Builder method to cap the number of results
    pub fn with_max_anomalies(mut self, max: usize) -> Self {
        self.max_anomalies = max;
        self
    }
}

/// Runs both anomaly detectors and reconciles their output
#[derive(Debug, Clone, Default)]
pub struct AnomalyEnsemble {
    zscore: ZScoreDetector,
    iforest: IsolationForestDetector,
    config: EnsembleConfig,
}

impl AnomalyEnsemble {
    pub fn new(zscore: ZScoreDetector, iforest: IsolationForestDetector, config: EnsembleConfig) -> Self {
        Self {
            zscore,
            iforest,
            config,
        }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Combine detector outputs, deduplicate, rank and truncate.
    ///
    /// Dates flagged by both detectors get one `ensemble` result, plus the
    /// single-metric z-score results; the bare multivariate result is dropped.
    pub fn combine(
        &self,
        zscore_results: Vec<AnomalyResult>,
        iforest_results: Vec<AnomalyResult>,
    ) -> Vec<AnomalyResult> {
        let mut by_date: BTreeMap<NaiveDate, (Vec<AnomalyResult>, Vec<AnomalyResult>)> =
            BTreeMap::new();
        for r in zscore_results {
            by_date.entry(r.date).or_default().0.push(r);
        }
        for r in iforest_results {
            by_date.entry(r.date).or_default().1.push(r);
        }

        let mut combined = Vec::new();
        for (date, (zs, ifs)) in by_date {
            if zs.is_empty() || ifs.is_empty() {
                combined.extend(zs);
                combined.extend(ifs);
                continue;
            }
            if let Some(merged) = self.merge_day(date, &zs, &ifs) {
                combined.push(merged);
            }
            combined.extend(
                zs.into_iter()
                    .filter(|r| r.metric_name != "multivariate_anomaly"),
            );
        }

        let mut seen = HashSet::new();
        combined.retain(|r| seen.insert((r.date, r.metric_name.clone(), r.detector_type)));

        rank(&mut combined);
        combined.truncate(self.config.max_anomalies);
        combined
    }

    fn merge_day(
        &self,
        date: NaiveDate,
        zscore: &[AnomalyResult],
        iforest: &[AnomalyResult],
    ) -> Option<AnomalyResult> {
        let primary_z = zscore.iter().max_by(|a, b| by_score(a, b))?;
        let primary_if = iforest.iter().max_by(|a, b| by_score(a, b))?;

        let z_score = primary_z.anomaly_score;
        let if_score = primary_if.anomaly_score;
        let combined = round_to(
            self.config.zscore_weight * z_score + self.config.iforest_weight * if_score,
            3,
        );

        let (iforest_primary_metric, feature_contributions) = match &primary_if.details {
            AnomalyDetails::Multivariate {
                primary_metric,
                feature_contributions,
                ..
            } => (Some(primary_metric.clone()), feature_contributions.clone()),
            _ => (None, Vec::new()),
        };

        Some(AnomalyResult {
            date,
            source_table: "ensemble".to_string(),
            source_id: primary_z.source_id,
            metric_name: format!("{}+multivariate", primary_z.metric_name),
            metric_value: primary_z.metric_value,
            baseline_value: primary_z.baseline_value,
            detector_type: DetectorType::Ensemble,
            severity: Severity::from_score(combined),
            anomaly_score: combined,
            details: AnomalyDetails::Ensemble {
                zscore_score: z_score,
                iforest_score: if_score,
                zscore_metrics: zscore.iter().map(|r| r.metric_name.clone()).collect(),
                iforest_primary_metric,
                feature_contributions,
                detection_agreement: true,
            },
        })
    }
}

fn by_score(a: &AnomalyResult, b: &AnomalyResult) -> Ordering {
    a.anomaly_score
        .partial_cmp(&b.anomaly_score)
        .unwrap_or(Ordering::Equal)
}

/// Sort by severity, then score, then date, all descending
fn rank(results: &mut [AnomalyResult]) {
    results.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| by_score(b, a))
            .then_with(|| b.date.cmp(&a.date))
    });
}

impl AnomalyDetector for AnomalyEnsemble {
    fn name(&self) -> &'static str {
        "ensemble"
    }

    fn detect(&self, table: &DailyFeatureTable, baselines: &BaselineMap) -> Vec<AnomalyResult> {
        let (zscore_results, iforest_results) = rayon::join(
            || self.zscore.detect(table, baselines),
            || self.iforest.detect(table, baselines),
        );
        debug!(
            zscore = zscore_results.len(),
            iforest = iforest_results.len(),
            "Combining anomaly detectors"
        );
        self.combine(zscore_results, iforest_results)
    }
}
