//! Integration tests for anomaly detection

use chrono::{Duration, NaiveDate};
use healthsense::anomaly::{
    AnomalyDetails, AnomalyDetector, AnomalyEnsemble, AnomalySummary, DetectorType,
    IsolationForestConfig, IsolationForestDetector, Severity, SourceMapping, SourceRef,
    ZScoreDetector,
};
use healthsense::data::{compute_baselines, BaselineConfig, BaselineMap, BaselineStats, DailyFeatureTable, FeatureRow};
use uuid::Uuid;

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

/// Evenly spread offsets cycling with `period`, centred on zero
fn cycle(i: usize, period: usize, step: f64) -> f64 {
    let k = (i % period) as f64;
    step * (k - (period as f64 - 1.0) / 2.0)
}

/// 40 quiet days; `outlier_day` has a sleep_hours reading of 2.0
fn household_table(outlier_day: usize) -> DailyFeatureTable {
    let rows = (0..40)
        .map(|i| {
            let sleep = if i == outlier_day { 2.0 } else { 7.0 + cycle(i, 5, 0.1) };
            FeatureRow::new(start() + Duration::days(i as i64))
                .with("sleep_hours", sleep)
                .with("sleep_quality", 7.0 + cycle(i, 7, 0.2))
                .with("resting_hr", 60.0 + cycle(i, 3, 1.0))
                .with("hrv", 45.0 + cycle(i, 7, 1.5))
        })
        .collect();
    DailyFeatureTable::new(rows).unwrap()
}

#[test]
fn test_scenario_a_resting_hr_spike_is_high_severity() {
    let day = start();
    let table = DailyFeatureTable::new(vec![FeatureRow::new(day).with("resting_hr", 95.0)]).unwrap();
    let mut baselines = BaselineMap::new();
    baselines.insert("resting_hr".to_string(), BaselineStats::from_mean_std(65.0, 5.0, 30));

    let results = ZScoreDetector::default().detect(&table, &baselines);
    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.metric_name, "resting_hr");
    assert_eq!(r.severity, Severity::High);
    assert_eq!(r.source_table, "vital_signs");
    match &r.details {
        AnomalyDetails::ZScore {
            z_score,
            threshold,
            base_threshold,
            bounds_violation,
            ..
        } => {
            assert!((z_score - 6.0).abs() < 1e-9);
            assert_eq!(*base_threshold, 2.5);
            // critical metric: adjusted below the base threshold
            assert!(*threshold < 2.5);
            assert!(!bounds_violation);
        }
        other => panic!("unexpected details {other:?}"),
    }
}

#[test]
fn test_bounds_violation_flags_without_large_z() {
    let day = start();
    let table = DailyFeatureTable::new(vec![FeatureRow::new(day).with("bp_systolic", 150.0)]).unwrap();
    let mut baselines = BaselineMap::new();
    baselines.insert("bp_systolic".to_string(), BaselineStats::from_mean_std(145.0, 10.0, 30));

    let results = ZScoreDetector::default().detect(&table, &baselines);
    assert_eq!(results.len(), 1);
    assert!(results[0].anomaly_score >= 0.7);
    assert!(results[0].severity >= Severity::Medium);
}

#[test]
fn test_zero_spread_never_flags() {
    let table = DailyFeatureTable::new(vec![FeatureRow::new(start()).with("sleep_hours", 3.0)]).unwrap();
    let mut baselines = BaselineMap::new();
    baselines.insert("sleep_hours".to_string(), BaselineStats::from_mean_std(7.0, 0.0, 30));
    assert!(ZScoreDetector::default().detect(&table, &baselines).is_empty());
}

#[test]
fn test_source_mapping_is_used() {
    let day = start();
    let table = DailyFeatureTable::new(vec![FeatureRow::new(day).with("resting_hr", 95.0)]).unwrap();
    let mut baselines = BaselineMap::new();
    baselines.insert("resting_hr".to_string(), BaselineStats::from_mean_std(65.0, 5.0, 30));

    let id = Uuid::new_v4();
    let mut sources = SourceMapping::new();
    sources.insert(
        (day, "resting_hr".to_string()),
        SourceRef {
            table: "vital_signs".to_string(),
            id,
        },
    );
    let results = ZScoreDetector::default().with_sources(sources).detect(&table, &baselines);
    assert_eq!(results[0].source_id, id);
}

#[test]
fn test_scenario_e_same_day_findings_are_linked() {
    let outlier_day = 25;
    let table = household_table(outlier_day);
    let baselines = compute_baselines(&table, &BaselineConfig::default());
    let date = start() + Duration::days(outlier_day as i64);

    let results = AnomalyEnsemble::default().detect(&table, &baselines);
    let on_day: Vec<_> = results.iter().filter(|r| r.date == date).collect();

    let ensemble: Vec<_> = on_day
        .iter()
        .filter(|r| r.detector_type == DetectorType::Ensemble)
        .collect();
    assert_eq!(ensemble.len(), 1);
    assert_eq!(ensemble[0].metric_name, "sleep_hours+multivariate");
    assert_eq!(ensemble[0].source_table, "ensemble");

    assert!(on_day
        .iter()
        .any(|r| r.detector_type == DetectorType::ZScore && r.metric_name == "sleep_hours"));
    assert!(!on_day
        .iter()
        .any(|r| r.detector_type == DetectorType::IsolationForest));

    // nothing else in the table looks abnormal to the z-score detector
    assert!(results
        .iter()
        .filter(|r| r.detector_type == DetectorType::ZScore)
        .all(|r| r.date == date));
}

#[test]
fn test_isolation_forest_needs_three_features() {
    let rows = (0..30)
        .map(|i| {
            FeatureRow::new(start() + Duration::days(i))
                .with("sleep_hours", 7.0 + (i % 3) as f64 * 0.1)
                .with("hrv", 40.0 + (i % 4) as f64)
        })
        .collect();
    let table = DailyFeatureTable::new(rows).unwrap();
    let baselines = compute_baselines(&table, &BaselineConfig::default());
    assert!(IsolationForestDetector::default().detect(&table, &baselines).is_empty());
}

#[test]
fn test_isolation_forest_is_reproducible() {
    let table = household_table(12);
    let baselines = compute_baselines(&table, &BaselineConfig::default());
    let detector = IsolationForestDetector::new(IsolationForestConfig::new().with_seed(7));

    let first = detector.detect(&table, &baselines);
    let second = detector.detect(&table, &baselines);
    assert!(!first.is_empty());
    let key = |r: &healthsense::anomaly::AnomalyResult| (r.date, r.anomaly_score.to_bits());
    assert_eq!(
        first.iter().map(key).collect::<Vec<_>>(),
        second.iter().map(key).collect::<Vec<_>>()
    );
    assert!(first
        .iter()
        .any(|r| r.date == start() + Duration::days(12) && r.anomaly_score == 1.0));
}

#[test]
fn test_summary_counts() {
    let table = household_table(25);
    let baselines = compute_baselines(&table, &BaselineConfig::default());
    let results = AnomalyEnsemble::default().detect(&table, &baselines);
    let summary = AnomalySummary::from_results(&results);

    assert_eq!(summary.total, results.len());
    assert_eq!(
        summary.count(Severity::High) + summary.count(Severity::Medium) + summary.count(Severity::Low),
        results.len()
    );
    assert_eq!(summary.by_detector.get("ensemble"), Some(&1));
}

#[test]
fn test_results_serialize_to_json() {
    let table = household_table(25);
    let baselines = compute_baselines(&table, &BaselineConfig::default());
    let results = AnomalyEnsemble::default().detect(&table, &baselines);
    let json = serde_json::to_value(&results).unwrap();
    let first = &json[0];
    assert_eq!(first["detector_type"], "ensemble");
    assert_eq!(first["details"]["kind"], "ensemble");
}
