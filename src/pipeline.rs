//! Per-user detection run
//!
//! Anomaly detection and correlation discovery are CPU-bound and run on the
//! blocking pool side by side. The whole run races a cancellation token; a
//! cancelled run returns [`InsightError::Cancelled`] and no partial results.

use crate::anomaly::{
    AnomalyDetector, AnomalyEnsemble, AnomalyResult, AnomalySummary, IsolationForestDetector,
    SourceMapping, ZScoreDetector,
};
use crate::config::PipelineConfig;
use crate::correlation::{
    CorrelationAggregator, CorrelationResult, FindingsSummary, PopulationComparator, PopulationStore,
};
use crate::data::{compute_baselines, BaselineMap, DailyFeatureTable};
use crate::error::{InsightError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Everything one run found for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightReport {
    pub run_id: Uuid,
    pub user_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    /// Ranked by severity, score and date
    pub anomalies: Vec<AnomalyResult>,
    pub anomaly_summary: AnomalySummary,
    /// Deduplicated and ranked, above the confidence floor
    pub correlations: Vec<CorrelationResult>,
    pub correlation_summary: FindingsSummary,
}

impl InsightReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs the anomaly ensemble and the correlation aggregator for one user
#[derive(Debug, Clone)]
pub struct InsightPipeline {
    config: PipelineConfig,
    ensemble: AnomalyEnsemble,
    aggregator: CorrelationAggregator,
    comparator: PopulationComparator,
}

impl InsightPipeline {
    /// Build from a validated configuration
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, SourceMapping::new()))
    }

    fn build(config: PipelineConfig, sources: SourceMapping) -> Self {
        let ensemble = AnomalyEnsemble::new(
            ZScoreDetector::new(config.zscore.clone()).with_sources(sources),
            IsolationForestDetector::new(config.isolation_forest.clone()),
            config.ensemble.clone(),
        );
        let aggregator = CorrelationAggregator::new(config.aggregator.clone());
        let comparator = PopulationComparator::new(config.population.clone());
        Self {
            config,
            ensemble,
            aggregator,
            comparator,
        }
    }

    /// Attribute z-score findings to source records
    pub fn with_sources(self, sources: SourceMapping) -> Self {
        Self::build(self.config, sources)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &CorrelationAggregator {
        &self.aggregator
    }

    pub fn comparator(&self) -> &PopulationComparator {
        &self.comparator
    }

    /// Ranked anomalies, or none when anomaly detection is disabled
    pub fn detect_anomalies(&self, table: &DailyFeatureTable, baselines: &BaselineMap) -> Vec<AnomalyResult> {
        if !self.config.detect_anomalies {
            return Vec::new();
        }
        self.ensemble.detect(table, baselines)
    }

    /// Ranked correlations at or above the confidence floor
    pub fn discover_correlations(&self, table: &DailyFeatureTable) -> Vec<CorrelationResult> {
        if !self.config.detect_correlations {
            return Vec::new();
        }
        let mut results = self.aggregator.analyze(table, None);
        let before = results.len();
        results.retain(|r| r.confidence >= self.config.min_confidence);
        debug!(
            dropped = before - results.len(),
            min_confidence = self.config.min_confidence,
            "Applied confidence floor"
        );
        results
    }

    /// Full run for `user_id`.
    ///
    /// Baselines are computed from `table` when not supplied. Population
    /// lookups exclude `user_id`'s own stored values.
    pub async fn run<S: PopulationStore>(
        &self,
        user_id: Uuid,
        table: Arc<DailyFeatureTable>,
        baselines: Option<BaselineMap>,
        store: &S,
        cancel: &CancellationToken,
    ) -> Result<InsightReport> {
        if cancel.is_cancelled() {
            return Err(InsightError::Cancelled);
        }
        let started = Instant::now();
        info!(user = %user_id, rows = table.len(), "Starting detection run");

        let baselines = baselines.unwrap_or_else(|| compute_baselines(&table, &self.config.baseline));

        let anomaly_task = {
            let pipeline = self.clone();
            let table = Arc::clone(&table);
            tokio::task::spawn_blocking(move || pipeline.detect_anomalies(&table, &baselines))
        };
        let correlation_task = {
            let pipeline = self.clone();
            let table = Arc::clone(&table);
            tokio::task::spawn_blocking(move || pipeline.discover_correlations(&table))
        };

        let detection = async {
            let (anomalies, correlations) = tokio::try_join!(anomaly_task, correlation_task)?;
            Ok::<_, InsightError>((anomalies, correlations))
        };

        let (anomalies, mut correlations) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(user = %user_id, "Detection run cancelled");
                return Err(InsightError::Cancelled);
            }
            res = detection => res?,
        };

        if self.config.include_population_comparison && !correlations.is_empty() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(user = %user_id, "Detection run cancelled during enrichment");
                    return Err(InsightError::Cancelled);
                }
                _ = self.comparator.enrich(&mut correlations, user_id, store) => {}
            }
        }

        let report = InsightReport {
            run_id: Uuid::new_v4(),
            user_id,
            generated_at: Utc::now(),
            period_start: table.first_date(),
            period_end: table.last_date(),
            anomaly_summary: AnomalySummary::from_results(&anomalies),
            correlation_summary: self.aggregator.summarize(&correlations),
            anomalies,
            correlations,
        };

        info!(
            user = %user_id,
            anomalies = report.anomalies.len(),
            correlations = report.correlations.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Detection run complete"
        );
        Ok(report)
    }
}
