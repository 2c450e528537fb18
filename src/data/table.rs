//! Daily feature table: one row per calendar date, open-ended metric columns

use crate::error::{InsightError, Result};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One day of metrics. Missing values are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    #[serde(default)]
    pub values: BTreeMap<String, Option<f64>>,
}

impl FeatureRow {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            values: BTreeMap::new(),
        }
    }

    /// Builder method to set a metric value
    pub fn with(mut self, metric: impl Into<String>, value: f64) -> Self {
        self.values.insert(metric.into(), Some(value));
        self
    }

    /// Builder method to record an explicitly missing metric
    pub fn with_missing(mut self, metric: impl Into<String>) -> Self {
        self.values.insert(metric.into(), None);
        self
    }

    /// Present, finite value of `metric`
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied().flatten()
    }
}

/// Chronologically ordered daily metric table.
///
/// Dates are unique and ascending. Non-finite inputs are stored as missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FeatureRow>", into = "Vec<FeatureRow>")]
pub struct DailyFeatureTable {
    rows: Vec<FeatureRow>,
}

impl DailyFeatureTable {
    /// Build a table, sorting rows by date.
    ///
    /// Returns `InvalidInput` when two rows share a date.
    pub fn new(mut rows: Vec<FeatureRow>) -> Result<Self> {
        rows.sort_by_key(|r| r.date);
        if let Some(w) = rows.windows(2).find(|w| w[0].date == w[1].date) {
            return Err(InsightError::InvalidInput(format!(
                "duplicate date {} in feature table",
                w[0].date
            )));
        }

        for row in &mut rows {
            for value in row.values.values_mut() {
                if value.is_some_and(|v| !v.is_finite()) {
                    *value = None;
                }
            }
        }

        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.rows.iter().map(|r| r.date).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.first().map(|r| r.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.last().map(|r| r.date)
    }

    /// Sorted union of metric names across all rows
    pub fn columns(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self.rows.iter().flat_map(|r| r.values.keys()).collect();
        names.into_iter().cloned().collect()
    }

    /// True when at least one row has a present value for `metric`
    pub fn has_column(&self, metric: &str) -> bool {
        self.rows.iter().any(|r| r.get(metric).is_some())
    }

    pub fn row(&self, date: NaiveDate) -> Option<&FeatureRow> {
        self.rows
            .binary_search_by_key(&date, |r| r.date)
            .ok()
            .map(|i| &self.rows[i])
    }

    pub fn get(&self, date: NaiveDate, metric: &str) -> Option<f64> {
        self.row(date).and_then(|r| r.get(metric))
    }

    /// Column in row order, missing values included
    pub fn column(&self, metric: &str) -> Vec<Option<f64>> {
        self.rows.iter().map(|r| r.get(metric)).collect()
    }

    /// Present values of `metric` with their dates, chronological
    pub fn present_values(&self, metric: &str) -> Vec<(NaiveDate, f64)> {
        self.rows
            .iter()
            .filter_map(|r| r.get(metric).map(|v| (r.date, v)))
            .collect()
    }

    /// Same-day pairs where both metrics are present
    pub fn paired(&self, a: &str, b: &str) -> (Vec<f64>, Vec<f64>) {
        self.rows
            .iter()
            .filter_map(|r| Some((r.get(a)?, r.get(b)?)))
            .unzip()
    }

    /// Pairs `(a on day d, b on day d + lag)` aligned by calendar date
    pub fn lagged_pairs(&self, a: &str, b: &str, lag_days: i64) -> (Vec<f64>, Vec<f64>) {
        self.rows
            .iter()
            .filter_map(|r| {
                let va = r.get(a)?;
                let vb = self.get(r.date + Duration::days(lag_days), b)?;
                Some((va, vb))
            })
            .unzip()
    }

    /// Rows dated on or after `since`
    pub fn since(&self, since: NaiveDate) -> DailyFeatureTable {
        let start = self.rows.partition_point(|r| r.date < since);
        Self {
            rows: self.rows[start..].to_vec(),
        }
    }

    /// Mean of each metric per ISO week, keyed by the week's Monday
    pub fn weekly_means(&self) -> DailyFeatureTable {
        let mut weeks: BTreeMap<NaiveDate, BTreeMap<String, (f64, usize)>> = BTreeMap::new();
        let mut seen: BTreeMap<NaiveDate, BTreeSet<String>> = BTreeMap::new();

        for row in &self.rows {
            let iso = row.date.iso_week();
            let Some(monday) = NaiveDate::from_isoywd_opt(iso.year(), iso.week(), Weekday::Mon)
            else {
                continue;
            };
            let sums = weeks.entry(monday).or_default();
            let names = seen.entry(monday).or_default();
            for (metric, value) in &row.values {
                names.insert(metric.clone());
                if let Some(v) = value {
                    let slot = sums.entry(metric.clone()).or_insert((0.0, 0));
                    slot.0 += v;
                    slot.1 += 1;
                }
            }
        }

        let rows = weeks
            .into_iter()
            .map(|(monday, sums)| {
                let mut row = FeatureRow::new(monday);
                for metric in seen.get(&monday).into_iter().flatten() {
                    let value = sums
                        .get(metric)
                        .filter(|(_, count)| *count > 0)
                        .map(|(sum, count)| sum / *count as f64);
                    row.values.insert(metric.clone(), value);
                }
                row
            })
            .collect();

        Self { rows }
    }
}

impl TryFrom<Vec<FeatureRow>> for DailyFeatureTable {
    type Error = InsightError;

    fn try_from(rows: Vec<FeatureRow>) -> Result<Self> {
        Self::new(rows)
    }
}

impl From<DailyFeatureTable> for Vec<FeatureRow> {
    fn from(table: DailyFeatureTable) -> Self {
        table.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_rows_sorted_and_duplicates_rejected() {
        let table = DailyFeatureTable::new(vec![
            FeatureRow::new(day(3)).with("hrv", 40.0),
            FeatureRow::new(day(1)).with("hrv", 42.0),
        ])
        .unwrap();
        assert_eq!(table.dates(), vec![day(1), day(3)]);

        let err = DailyFeatureTable::new(vec![FeatureRow::new(day(1)), FeatureRow::new(day(1))]);
        assert!(matches!(err, Err(InsightError::InvalidInput(_))));
    }

    #[test]
    fn test_non_finite_stored_as_missing() {
        let table = DailyFeatureTable::new(vec![FeatureRow::new(day(1))
            .with("hrv", f64::NAN)
            .with("resting_hr", 60.0)])
        .unwrap();
        assert_eq!(table.get(day(1), "hrv"), None);
        assert_eq!(table.get(day(1), "resting_hr"), Some(60.0));
        assert!(!table.has_column("hrv"));
        assert_eq!(table.columns(), vec!["hrv".to_string(), "resting_hr".to_string()]);
    }

    #[test]
    fn test_lagged_pairs_use_calendar_dates() {
        let table = DailyFeatureTable::new(vec![
            FeatureRow::new(day(1)).with("a", 1.0).with("b", 10.0),
            FeatureRow::new(day(2)).with("a", 2.0).with("b", 20.0),
            // gap on day 3
            FeatureRow::new(day(4)).with("a", 4.0).with("b", 40.0),
        ])
        .unwrap();
        let (a, b) = table.lagged_pairs("a", "b", 1);
        assert_eq!(a, vec![1.0]);
        assert_eq!(b, vec![20.0]);

        let (a, b) = table.paired("a", "b");
        assert_eq!(a.len(), 3);
        assert_eq!(b, vec![10.0, 20.0, 40.0]);
    }

    #[test]
    fn test_weekly_means() {
        // 2024-01-01 is a Monday
        let rows = (1..=10)
            .map(|d| FeatureRow::new(day(d)).with("steps", d as f64))
            .collect();
        let weekly = DailyFeatureTable::new(rows).unwrap().weekly_means();
        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly.get(day(1), "steps"), Some(4.0));
        assert_eq!(weekly.get(day(8), "steps"), Some(9.0));
    }

    #[test]
    fn test_deserialize_rejects_duplicate_dates() {
        let json = r#"[{"date":"2024-01-02","values":{"hrv":41.5}},{"date":"2024-01-02"}]"#;
        assert!(serde_json::from_str::<DailyFeatureTable>(json).is_err());
    }
}
