//! Isolation Forest anomaly detection across several daily metrics

use super::{
    AnomalyDetails, AnomalyDetector, AnomalyResult, DetectorType, FeatureContribution, Severity,
};
use crate::data::{BaselineMap, DailyFeatureTable};
use crate::error::{InsightError, Result};
use crate::stats::{median, round_to};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand::seq::index::sample;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;
use uuid::Uuid;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Metrics the multivariate detector looks at by default
pub const DEFAULT_IFOREST_FEATURES: &[&str] = &[
    "sleep_hours",
    "sleep_quality",
    "total_calories",
    "total_protein_g",
    "total_sugar_g",
    "exercise_minutes",
    "resting_hr",
    "hrv",
    "bp_systolic",
    "blood_glucose_fasting",
];

/// Isolation Tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IsolationTree {
    /// Internal node with split
    Internal {
        feature: usize,
        threshold: f64,
        /// values < threshold
        left: Box<IsolationTree>,
        /// values >= threshold
        right: Box<IsolationTree>,
    },
    /// Leaf holding `size` training samples
    External { size: usize },
}

impl IsolationTree {
    /// Build an isolation tree over the rows in `indices`
    pub fn build(
        x: &Array2<f64>,
        indices: &[usize],
        height: usize,
        max_height: usize,
        rng: &mut impl Rng,
    ) -> Self {
        let n_samples = indices.len();
        if height >= max_height || n_samples <= 1 {
            return IsolationTree::External { size: n_samples };
        }

        let feature = rng.gen_range(0..x.ncols());
        let (min_val, max_val) = indices
            .iter()
            .map(|&i| x[[i, feature]])
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });

        if (max_val - min_val).abs() < 1e-10 {
            return IsolationTree::External { size: n_samples };
        }

        let threshold = rng.gen_range(min_val..max_val);
        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) =
            indices.iter().partition(|&&i| x[[i, feature]] < threshold);

        if left_indices.is_empty() || right_indices.is_empty() {
            return IsolationTree::External { size: n_samples };
        }

        let left = Box::new(Self::build(x, &left_indices, height + 1, max_height, rng));
        let right = Box::new(Self::build(x, &right_indices, height + 1, max_height, rng));

        IsolationTree::Internal {
            feature,
            threshold,
            left,
            right,
        }
    }

    /// Depth at which `sample` is isolated, plus the expected remaining depth at the leaf
    pub fn path_length(&self, sample: &[f64], current_height: usize) -> f64 {
        match self {
            IsolationTree::External { size } => current_height as f64 + Self::c(*size),
            IsolationTree::Internal {
                feature,
                threshold,
                left,
                right,
            } => {
                if sample[*feature] < *threshold {
                    left.path_length(sample, current_height + 1)
                } else {
                    right.path_length(sample, current_height + 1)
                }
            }
        }
    }

    /// Average path length of an unsuccessful BST search over `n` keys:
    /// `c(n) = 2 H(n-1) - 2 (n-1) / n`
    pub fn c(n: usize) -> f64 {
        match n {
            0 | 1 => 0.0,
            2 => 1.0,
            _ => {
                let n_f = n as f64;
                2.0 * ((n_f - 1.0).ln() + EULER_GAMMA) - 2.0 * (n_f - 1.0) / n_f
            }
        }
    }
}

/// Seeded isolation forest over a dense feature matrix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    n_estimators: usize,
    max_samples: usize,
    contamination: f64,
    seed: u64,
    trees: Option<Vec<IsolationTree>>,
    threshold: Option<f64>,
    n_samples: Option<usize>,
}

impl IsolationForest {
    pub fn new(seed: u64) -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.05,
            seed,
            trees: None,
            threshold: None,
            n_samples: None,
        }
    }

    /// Set number of trees
    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n.max(1);
        self
    }

    /// Set maximum samples per tree
    pub fn with_max_samples(mut self, n: usize) -> Self {
        self.max_samples = n.max(2);
        self
    }

    /// Set expected outlier proportion
    pub fn with_contamination(mut self, c: f64) -> Self {
        self.contamination = c.clamp(0.0, 0.5);
        self
    }

    /// Grow the trees and set the outlier threshold from the contamination rate
    pub fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        let n_samples = x.nrows();
        if n_samples < 2 || x.ncols() == 0 {
            return Err(InsightError::InsufficientData {
                needed: 2,
                got: n_samples,
            });
        }
        let samples_per_tree = self.max_samples.min(n_samples);
        let max_height = (samples_per_tree as f64).log2().ceil() as usize;

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed);
        let tree_seeds: Vec<u64> = (0..self.n_estimators).map(|_| rng.gen()).collect();

        let trees: Vec<IsolationTree> = tree_seeds
            .into_par_iter()
            .map(|tree_seed| {
                let mut tree_rng = Xoshiro256PlusPlus::seed_from_u64(tree_seed);
                let indices = sample(&mut tree_rng, n_samples, samples_per_tree).into_vec();
                IsolationTree::build(x, &indices, 0, max_height, &mut tree_rng)
            })
            .collect();

        self.trees = Some(trees);
        self.n_samples = Some(samples_per_tree);

        let scores = self.score_samples(x)?;
        let mut sorted: Vec<f64> = scores.to_vec();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
        let idx = ((self.contamination * n_samples as f64) as usize).min(n_samples - 1);
        self.threshold = Some(sorted[idx]);

        Ok(())
    }

    /// Anomaly score `2^(-E[h(x)] / c(n))` per row; higher is more anomalous
    pub fn score_samples(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let trees = self
            .trees
            .as_ref()
            .ok_or_else(|| InsightError::ComputationError("Model not fitted".to_string()))?;
        let c_n = IsolationTree::c(self.n_samples.unwrap_or(256));

        let scores: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let point: Vec<f64> = x.row(i).to_vec();
                let avg_path = trees
                    .iter()
                    .map(|tree| tree.path_length(&point, 0))
                    .sum::<f64>()
                    / trees.len() as f64;
                2.0_f64.powf(-avg_path / c_n)
            })
            .collect();

        Ok(Array1::from_vec(scores))
    }

    /// Score cut-off; rows scoring at or above it are outlier candidates
    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    /// Row indices of outliers in row order: at or above the threshold,
    /// at most `ceil(contamination * n)` of them. Ties keep the earlier row.
    pub fn outliers(&self, scores: &Array1<f64>) -> Vec<usize> {
        let Some(threshold) = self.threshold else {
            return Vec::new();
        };
        let cap = (self.contamination * scores.len() as f64).ceil() as usize;

        let mut candidates: Vec<usize> = (0..scores.len()).filter(|&i| scores[i] >= threshold).collect();
        candidates.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));
        candidates.truncate(cap);
        candidates.sort_unstable();
        candidates
    }
}

/// Configuration for [`IsolationForestDetector`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationForestConfig {
    /// Candidate metrics
    pub features: Vec<String>,
    /// Expected outlier proportion
    pub contamination: f64,
    pub n_estimators: usize,
    pub max_samples: usize,
    /// Seed for tree construction
    pub seed: u64,
    /// Fewer present candidate metrics than this yields no results
    pub min_features: usize,
    /// Fewer usable rows than this yields no results
    pub min_rows: usize,
    /// Contributions reported per anomaly
    pub top_contributions: usize,
}

impl Default for IsolationForestConfig {
    fn default() -> Self {
        Self {
            features: DEFAULT_IFOREST_FEATURES.iter().map(|s| s.to_string()).collect(),
            contamination: 0.05,
            n_estimators: 100,
            max_samples: 256,
            seed: 42,
            min_features: 3,
            min_rows: 10,
            top_contributions: 5,
        }
    }
}

impl IsolationForestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set candidate metrics
    pub fn with_features<S: Into<String>>(mut self, features: impl IntoIterator<Item = S>) -> Self {
        self.features = features.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to set contamination
    pub fn with_contamination(mut self, contamination: f64) -> Self {
        self.contamination = contamination;
        self
    }

    /// Builder method to set number of trees
    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    /// Builder method to set the seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Multivariate outlier detector over the candidate metrics
#[derive(Debug, Clone, Default)]
pub struct IsolationForestDetector {
    config: IsolationForestConfig,
}

impl IsolationForestDetector {
    pub fn new(config: IsolationForestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IsolationForestConfig {
        &self.config
    }

    /// Feature matrix in row order with missing values replaced by the column median
    fn feature_matrix(&self, table: &DailyFeatureTable, features: &[String]) -> Result<Array2<f64>> {
        let columns: Vec<Vec<f64>> = features
            .iter()
            .map(|feature| {
                let column = table.column(feature);
                let present: Vec<f64> = column.iter().flatten().copied().collect();
                let fill = median(&present).unwrap_or(0.0);
                column.iter().map(|v| v.unwrap_or(fill)).collect()
            })
            .collect();

        let data: Vec<f64> = (0..table.len())
            .flat_map(|i| columns.iter().map(move |column| column[i]))
            .collect();
        Ok(Array2::from_shape_vec((table.len(), features.len()), data)?)
    }

    fn contributions(
        &self,
        row: &[f64],
        features: &[String],
        baselines: &BaselineMap,
    ) -> Vec<FeatureContribution> {
        let mut contributions: Vec<FeatureContribution> = features
            .iter()
            .zip(row)
            .filter_map(|(feature, &value)| {
                let baseline = baselines.get(feature)?;
                let deviation = if baseline.std > 0.0 {
                    (value - baseline.mean).abs() / baseline.std
                } else {
                    0.0
                };
                Some(FeatureContribution {
                    metric: feature.clone(),
                    value,
                    baseline: baseline.mean,
                    deviation: round_to(deviation, 3),
                })
            })
            .collect();
        contributions.sort_by(|a, b| b.deviation.partial_cmp(&a.deviation).unwrap_or(Ordering::Equal));
        contributions
    }
}

/// Zero-mean, unit-variance columns; constant columns are only centred
fn standardize(x: &Array2<f64>) -> Array2<f64> {
    let mut scaled = x.clone();
    for mut col in scaled.columns_mut() {
        let n = col.len() as f64;
        let mean = col.sum() / n;
        let std = (col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        let scale = if std > 0.0 { std } else { 1.0 };
        col.mapv_inplace(|v| (v - mean) / scale);
    }
    scaled
}

impl AnomalyDetector for IsolationForestDetector {
    fn name(&self) -> &'static str {
        "isolation_forest"
    }

    fn detect(&self, table: &DailyFeatureTable, baselines: &BaselineMap) -> Vec<AnomalyResult> {
        let features: Vec<String> = self
            .config
            .features
            .iter()
            .filter(|f| table.has_column(f))
            .cloned()
            .collect();

        if features.len() < self.config.min_features {
            debug!(present = features.len(), "Too few features for isolation forest");
            return Vec::new();
        }
        if table.len() < self.config.min_rows {
            debug!(rows = table.len(), "Too few rows for isolation forest");
            return Vec::new();
        }

        let raw = match self.feature_matrix(table, &features) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "Feature matrix construction failed");
                return Vec::new();
            }
        };
        let scaled = standardize(&raw);

        let mut forest = IsolationForest::new(self.config.seed)
            .with_n_estimators(self.config.n_estimators)
            .with_max_samples(self.config.max_samples)
            .with_contamination(self.config.contamination);

        let scores = match forest.fit(&scaled).and_then(|_| forest.score_samples(&scaled)) {
            Ok(scores) => scores,
            Err(e) => {
                debug!(error = %e, "Isolation forest fit failed");
                return Vec::new();
            }
        };
        let Some(threshold) = forest.threshold() else {
            return Vec::new();
        };

        let (min_s, max_s) = scores
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &s| (lo.min(s), hi.max(s)));
        let range = max_s - min_s;

        let dates = table.dates();
        let mut results = Vec::new();
        for i in forest.outliers(&scores) {
            let s = scores[i];
            let normalized = if range > 0.0 { (s - min_s) / range } else { 0.0 };
            let score = round_to(normalized, 3);

            let row = raw.row(i).to_vec();
            let contributions = self.contributions(&row, &features, baselines);
            let (primary_metric, metric_value, baseline_value) = match contributions.first() {
                Some(top) => (top.metric.clone(), top.value, top.baseline),
                None => ("multivariate".to_string(), 0.0, 0.0),
            };

            results.push(AnomalyResult {
                date: dates[i],
                source_table: "multivariate".to_string(),
                source_id: Uuid::new_v4(),
                metric_name: "multivariate_anomaly".to_string(),
                metric_value,
                baseline_value,
                detector_type: DetectorType::IsolationForest,
                severity: Severity::from_score(score),
                anomaly_score: score,
                details: AnomalyDetails::Multivariate {
                    primary_metric,
                    feature_contributions: contributions
                        .into_iter()
                        .take(self.config.top_contributions)
                        .collect(),
                    features_used: features.clone(),
                    isolation_score: round_to(threshold - s, 3),
                },
            });
        }

        debug!(count = results.len(), features = features.len(), "Isolation forest detection complete");
        results
    }
}
