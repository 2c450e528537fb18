//! Integration tests for the async detection pipeline

use chrono::{Duration, NaiveDate};
use healthsense::config::PipelineConfig;
use healthsense::correlation::{CorrelationType, InMemoryPopulationStore, StoredCorrelation};
use healthsense::data::{DailyFeatureTable, FeatureRow};
use healthsense::pipeline::{InsightPipeline, InsightReport};
use healthsense::InsightError;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "healthsense=info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// 60 days of telemetry with a lagged exercise effect and one bad night
fn telemetry(seed: u64) -> DailyFeatureTable {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let start = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
    let exercise: Vec<f64> = (0..60).map(|_| rng.gen_range(10.0..80.0)).collect();
    let rows = (0..60)
        .map(|i| {
            let driver = if i == 0 { 45.0 } else { exercise[i - 1] };
            let sleep_hours = if i == 50 { 2.5 } else { 7.0 + rng.gen_range(-0.4..0.4) };
            FeatureRow::new(start + Duration::days(i as i64))
                .with("exercise_minutes", exercise[i])
                .with("sleep_hours", sleep_hours)
                .with("sleep_quality", 5.0 + 0.04 * driver + rng.gen_range(-1.0..1.0))
                .with("resting_hr", 62.0 + rng.gen_range(-2.0..2.0))
                .with("hrv", 45.0 + rng.gen_range(-4.0..4.0))
        })
        .collect();
    DailyFeatureTable::new(rows).unwrap()
}

async fn run(pipeline: &InsightPipeline, store: &InMemoryPopulationStore, user: Uuid) -> InsightReport {
    pipeline
        .run(user, Arc::new(telemetry(9)), None, store, &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_full_run_produces_both_halves() {
    init_tracing();
    let pipeline = InsightPipeline::new(PipelineConfig::default()).unwrap();
    let store = InMemoryPopulationStore::new();
    let user = Uuid::new_v4();

    let report = run(&pipeline, &store, user).await;
    assert_eq!(report.user_id, user);
    assert_eq!(report.period_start, NaiveDate::from_ymd_opt(2024, 4, 1));
    assert_eq!(report.period_end, NaiveDate::from_ymd_opt(2024, 5, 30));

    let bad_night = NaiveDate::from_ymd_opt(2024, 5, 21).unwrap();
    assert!(report
        .anomalies
        .iter()
        .any(|a| a.date == bad_night && a.metric_name.starts_with("sleep_hours")));
    assert_eq!(report.anomaly_summary.total, report.anomalies.len());

    assert!(!report.correlations.is_empty());
    assert!(report.correlations.iter().all(|c| c.confidence >= 0.3));
    assert!(report.correlations.iter().all(|c| c.details.population.is_some()));
    assert_eq!(report.correlation_summary.total_correlations, report.correlations.len());
}

#[tokio::test]
async fn test_population_statistics_replace_defaults() {
    init_tracing();
    let pipeline = InsightPipeline::new(PipelineConfig::default()).unwrap();
    let store = InMemoryPopulationStore::new();
    let user = Uuid::new_v4();

    let first = run(&pipeline, &store, user).await;
    let target = first.correlations[0].clone();
    for i in 0..12 {
        store.record(StoredCorrelation {
            user_id: Uuid::new_v4(),
            metric_a: target.metric_a.clone(),
            metric_b: target.metric_b.clone(),
            correlation_type: target.correlation_type,
            correlation_value: 0.2 + 0.01 * i as f64,
        });
    }
    // the user's own value must not count toward the population
    store.record_results(user, &first.correlations);

    let second = run(&pipeline, &store, user).await;
    let enriched = second
        .correlations
        .iter()
        .find(|c| {
            c.metric_a == target.metric_a
                && c.metric_b == target.metric_b
                && c.correlation_type == target.correlation_type
                && c.granularity == target.granularity
        })
        .and_then(|c| c.details.population)
        .expect("population comparison");
    assert!(!enriched.is_default_baseline);
    assert_eq!(enriched.population_count, 12);
    assert!((enriched.population_avg - 0.255).abs() < 1e-9);
}

#[tokio::test]
async fn test_cancellation_discards_results() {
    init_tracing();
    let pipeline = InsightPipeline::new(PipelineConfig::default()).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = pipeline
        .run(
            Uuid::new_v4(),
            Arc::new(telemetry(1)),
            None,
            &InMemoryPopulationStore::new(),
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, InsightError::Cancelled));
}

#[tokio::test]
async fn test_cancel_from_another_task() {
    init_tracing();
    let pipeline = InsightPipeline::new(PipelineConfig::default()).unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move { trigger.cancel() });

    let outcome = pipeline
        .run(
            Uuid::new_v4(),
            Arc::new(telemetry(2)),
            None,
            &InMemoryPopulationStore::new(),
            &cancel,
        )
        .await;
    // either the run finished first or it was cancelled; never a partial error
    match outcome {
        Ok(report) => assert_eq!(report.anomaly_summary.total, report.anomalies.len()),
        Err(e) => assert!(matches!(e, InsightError::Cancelled)),
    }
}

#[tokio::test]
async fn test_json_config_controls_the_run() {
    init_tracing();
    let config = PipelineConfig::from_json(
        r#"{
            "detect_anomalies": false,
            "include_population_comparison": false,
            "min_confidence": 0.5,
            "aggregator": { "include_mutual_info": false, "include_weekly": false }
        }"#,
    )
    .unwrap();
    assert_eq!(config.aggregator.max_lag, 3);

    let pipeline = InsightPipeline::new(config).unwrap();
    let report = run(&pipeline, &InMemoryPopulationStore::new(), Uuid::new_v4()).await;

    assert!(report.anomalies.is_empty());
    assert!(report.correlations.iter().all(|c| c.confidence >= 0.5));
    assert!(report.correlations.iter().all(|c| c.details.population.is_none()));
    assert!(report
        .correlations
        .iter()
        .all(|c| c.correlation_type != CorrelationType::MutualInformation));
}

#[tokio::test]
async fn test_report_serializes() {
    let pipeline = InsightPipeline::new(PipelineConfig::default()).unwrap();
    let report = run(&pipeline, &InMemoryPopulationStore::new(), Uuid::new_v4()).await;
    let json = report.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert!(value["anomalies"].is_array());
    assert!(value["correlation_summary"]["top_findings"].is_array());
}

#[test]
fn test_invalid_json_config() {
    let err = PipelineConfig::from_json(r#"{"aggregator": {"max_lag": 0}}"#).unwrap_err();
    assert!(matches!(err, InsightError::ConfigError(_)));
}
