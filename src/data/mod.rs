//! Input data model: the daily feature table and per-metric baselines

mod baseline;
mod table;

pub use baseline::{compute_baselines, BaselineConfig, BaselineMap, BaselineStats, MAD_SCALE};
pub use table::{DailyFeatureTable, FeatureRow};
