//! Run configuration for [`crate::pipeline::InsightPipeline`]

use crate::anomaly::{EnsembleConfig, IsolationForestConfig, ZScoreConfig};
use crate::correlation::{AggregatorConfig, PopulationConfig};
use crate::data::BaselineConfig;
use crate::error::{InsightError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Every tunable of a detection run. Missing JSON fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub baseline: BaselineConfig,
    pub zscore: ZScoreConfig,
    pub isolation_forest: IsolationForestConfig,
    pub ensemble: EnsembleConfig,
    pub aggregator: AggregatorConfig,
    pub population: PopulationConfig,
    pub detect_anomalies: bool,
    pub detect_correlations: bool,
    /// Correlations below this confidence are dropped before enrichment
    pub min_confidence: f64,
    pub include_population_comparison: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            baseline: BaselineConfig::default(),
            zscore: ZScoreConfig::default(),
            isolation_forest: IsolationForestConfig::default(),
            ensemble: EnsembleConfig::default(),
            aggregator: AggregatorConfig::default(),
            population: PopulationConfig::default(),
            detect_anomalies: true,
            detect_correlations: true,
            min_confidence: 0.3,
            include_population_comparison: true,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the confidence floor
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Builder method to toggle population enrichment
    pub fn with_population_comparison(mut self, enabled: bool) -> Self {
        self.include_population_comparison = enabled;
        self
    }

    /// Builder method to toggle the anomaly and correlation halves
    pub fn with_stages(mut self, anomalies: bool, correlations: bool) -> Self {
        self.detect_anomalies = anomalies;
        self.detect_correlations = correlations;
        self
    }

    /// Parse and validate
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values no detector can work with
    pub fn validate(&self) -> Result<()> {
        fn check(ok: bool, msg: &str) -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(InsightError::ConfigError(msg.to_string()))
            }
        }

        check(
            (0.0..=1.0).contains(&self.min_confidence),
            "min_confidence must be in [0, 1]",
        )?;

        check(self.baseline.lookback_days >= 1, "baseline.lookback_days must be at least 1")?;
        check(self.baseline.ewma_span >= 1, "baseline.ewma_span must be at least 1")?;

        let z = &self.zscore;
        check(
            z.min_threshold > 0.0 && z.min_threshold <= z.max_threshold,
            "zscore thresholds must satisfy 0 < min_threshold <= max_threshold",
        )?;
        check(z.iqr_multiplier > 0.0, "zscore.iqr_multiplier must be positive")?;
        check(
            z.thresholds.values().all(|t| *t > 0.0 && t.is_finite()),
            "zscore.thresholds must be positive",
        )?;
        check(
            z.bounds.values().all(|b| b.min <= b.max),
            "zscore.bounds must satisfy min <= max",
        )?;

        let f = &self.isolation_forest;
        check(
            f.contamination > 0.0 && f.contamination <= 0.5,
            "isolation_forest.contamination must be in (0, 0.5]",
        )?;
        check(f.n_estimators >= 1, "isolation_forest.n_estimators must be at least 1")?;
        check(f.max_samples >= 2, "isolation_forest.max_samples must be at least 2")?;

        let e = &self.ensemble;
        check(
            e.zscore_weight >= 0.0 && e.iforest_weight >= 0.0 && e.zscore_weight + e.iforest_weight > 0.0,
            "ensemble weights must be non-negative and not both zero",
        )?;

        let a = &self.aggregator;
        check(
            a.significance_level > 0.0 && a.significance_level < 1.0,
            "aggregator.significance_level must be in (0, 1)",
        )?;
        check(a.max_lag >= 1, "aggregator.max_lag must be at least 1")?;
        check(a.min_samples >= 3, "aggregator.min_samples must be at least 3")?;
        check(a.weekly_min_samples >= 3, "aggregator.weekly_min_samples must be at least 3")?;

        let p = &self.population;
        check(p.min_std > 0.0 && p.fallback_std > 0.0, "population std floors must be positive")?;
        check(p.unusual_z > 0.0, "population.unusual_z must be positive")?;

        Ok(())
    }
}
