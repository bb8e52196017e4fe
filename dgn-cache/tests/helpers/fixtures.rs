//! Slice and point builders

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use dgn_common::dates::{add_days, format_date, parse_date};
use dgn_common::{DataSource, LatencyConfig, ParameterValue, TimeSeriesPoint};

/// Fixed "now" for every scenario: 17-Dec-25 12:00 UTC
pub fn reference() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, 17, 12, 0, 0).unwrap()
}

pub fn today() -> NaiveDate {
    reference().date_naive()
}

pub fn day(text: &str) -> NaiveDate {
    parse_date(text).unwrap()
}

pub fn days_ago(days: i64) -> NaiveDate {
    add_days(today(), -days)
}

pub fn latency(t95: f64) -> LatencyConfig {
    LatencyConfig {
        enabled: true,
        t95: Some(t95),
        path_t95: None,
        anchor_node_id: None,
    }
}

pub fn source_fetched_at(retrieved_at: DateTime<Utc>) -> DataSource {
    DataSource {
        source_type: "amplitude".to_string(),
        retrieved_at: Some(retrieved_at),
        ..Default::default()
    }
}

/// Stored slice with `n = 100`, `k = 10` on every day
pub fn stored_slice(dsl: &str, dates: &[NaiveDate]) -> ParameterValue {
    ParameterValue {
        dates: dates.iter().map(|d| format_date(*d)).collect(),
        n_daily: vec![100; dates.len()],
        k_daily: vec![10; dates.len()],
        slice_dsl: dsl.to_string(),
        ..Default::default()
    }
}

/// Same as [`stored_slice`], fetched `minutes_ago` before [`reference`]
pub fn stored_slice_fetched(dsl: &str, dates: &[NaiveDate], minutes_ago: i64) -> ParameterValue {
    ParameterValue {
        data_source: Some(source_fetched_at(reference() - Duration::minutes(minutes_ago))),
        ..stored_slice(dsl, dates)
    }
}

pub fn points(entries: &[(&str, i64, i64)]) -> Vec<TimeSeriesPoint> {
    entries
        .iter()
        .map(|(date, n, k)| TimeSeriesPoint::new(day(date), *n, *k))
        .collect()
}

pub fn span(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = start;
    while current <= end {
        days.push(current);
        current = add_days(current, 1);
    }
    days
}
