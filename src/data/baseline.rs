//! Per-metric personal baseline statistics

use super::table::DailyFeatureTable;
use crate::stats::{ewma, mean, median, median_absolute_deviation, quantile, sample_std};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Scale factor making the MAD a consistent estimator of the normal std
pub const MAD_SCALE: f64 = 1.4826;

/// Baselines keyed by metric name
pub type BaselineMap = HashMap<String, BaselineStats>;

/// Summary statistics of one metric over a lookback window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub mean: f64,
    /// Sample standard deviation
    pub std: f64,
    pub median: f64,
    /// `1.4826 * MAD`
    pub robust_std: f64,
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
    pub ewma: f64,
    pub n_samples: usize,
}

impl BaselineStats {
    /// Compute from chronologically ordered values; `None` when empty
    pub fn from_values(values: &[f64], ewma_span: usize) -> Option<Self> {
        let mean = mean(values)?;
        let q1 = quantile(values, 0.25)?;
        let q3 = quantile(values, 0.75)?;
        Some(Self {
            mean,
            std: sample_std(values),
            median: median(values)?,
            robust_std: MAD_SCALE * median_absolute_deviation(values)?,
            q1,
            q3,
            iqr: q3 - q1,
            ewma: ewma(values, ewma_span)?,
            n_samples: values.len(),
        })
    }

    /// Baseline from a mean and standard deviation alone, assuming normality
    pub fn from_mean_std(mean: f64, std: f64, n_samples: usize) -> Self {
        // quartiles of a normal distribution sit at +/- 0.6745 sigma
        let half_iqr = 0.6745 * std;
        Self {
            mean,
            std,
            median: mean,
            robust_std: std,
            q1: mean - half_iqr,
            q3: mean + half_iqr,
            iqr: 2.0 * half_iqr,
            ewma: mean,
            n_samples,
        }
    }

    /// Coefficient of variation, `None` when the mean is zero
    pub fn coefficient_of_variation(&self) -> Option<f64> {
        (self.mean != 0.0).then(|| self.std / self.mean.abs())
    }
}

/// Configuration for [`compute_baselines`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Days of history ending at the table's last date
    pub lookback_days: u32,
    /// Span of the exponentially weighted mean
    pub ewma_span: usize,
    /// Metrics with fewer present values get no baseline
    pub min_samples: usize,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            ewma_span: 7,
            min_samples: 3,
        }
    }
}

impl BaselineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the lookback window
    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    /// Builder method to set the EWMA span
    pub fn with_ewma_span(mut self, span: usize) -> Self {
        self.ewma_span = span;
        self
    }

    /// Builder method to set the minimum sample count
    pub fn with_min_samples(mut self, n: usize) -> Self {
        self.min_samples = n;
        self
    }
}

/// Baselines for every column over the trailing lookback window
pub fn compute_baselines(table: &DailyFeatureTable, config: &BaselineConfig) -> BaselineMap {
    let Some(last) = table.last_date() else {
        return BaselineMap::new();
    };
    let since = last - Duration::days(i64::from(config.lookback_days.max(1)) - 1);
    let window = table.since(since);

    let mut baselines = BaselineMap::new();
    for metric in window.columns() {
        let values: Vec<f64> = window
            .present_values(&metric)
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        if values.len() < config.min_samples.max(1) {
            debug!(metric = %metric, n = values.len(), "Too few samples for baseline");
            continue;
        }
        if let Some(stats) = BaselineStats::from_values(&values, config.ewma_span) {
            baselines.insert(metric, stats);
        }
    }

    debug!(count = baselines.len(), since = %since, "Computed baselines");
    baselines
}
