//! healthsense - anomaly detection and correlation discovery for daily health data
//!
//! Works on an in-memory table of one user's daily metrics (sleep, nutrition,
//! exercise, vitals, body composition, chronic-condition readings) and a map
//! of per-metric baseline statistics.
//!
//! # Modules
//!
//! ## Input
//! - [`data`] - Daily feature table and baseline statistics
//!
//! ## Detection
//! - [`anomaly`] - Z-score, Isolation Forest and their ensemble
//! - [`correlation`] - Pearson/Spearman, cross-correlation, Granger causality,
//!   mutual information, aggregation and population comparison
//! - [`stats`] - Statistical kernel shared by the detectors
//!
//! ## Orchestration
//! - [`pipeline`] - Cancellable per-user detection run
//! - [`config`] - JSON-loadable run configuration
//!
//! Logging goes through `tracing`; install a subscriber to see it.

// Core error handling
pub mod error;

// Input data
pub mod data;

// Detection
pub mod anomaly;
pub mod correlation;
pub mod stats;

// Orchestration
pub mod config;
pub mod pipeline;

pub use error::{InsightError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{InsightError, Result};

    // Input data
    pub use crate::data::{compute_baselines, BaselineConfig, BaselineMap, BaselineStats, DailyFeatureTable, FeatureRow};

    // Anomaly detection
    pub use crate::anomaly::{
        AnomalyDetector, AnomalyEnsemble, AnomalyResult, AnomalySummary, DetectorType,
        EnsembleConfig, IsolationForestConfig, IsolationForestDetector, Severity, ZScoreConfig,
        ZScoreDetector,
    };

    // Correlation discovery
    pub use crate::correlation::{
        AggregatorConfig, CausalDirection, CorrelationAggregator, CorrelationDetector,
        CorrelationResult, CorrelationStrength, CorrelationType, CrossCorrelationDetector,
        FindingsSummary, Granularity, GrangerDetector, InMemoryPopulationStore, MutualInfoDetector,
        PearsonSpearmanDetector, PopulationComparator, PopulationStore,
    };

    // Statistics
    pub use crate::stats::{NoResultReason, TestOutcome};

    // Orchestration
    pub use crate::config::PipelineConfig;
    pub use crate::pipeline::{InsightPipeline, InsightReport};
}
