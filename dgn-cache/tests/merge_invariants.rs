//! Merge engine invariants over realistic slice lists

mod helpers;

use chrono::Duration;
use dgn_cache::{merge_time_series, MergeOptions};
use dgn_common::dates::{parse_date, DateRange};
use dgn_common::slice_dsl::extract_dimensions;
use dgn_common::{LatencyConfig, ParameterValue, TimeSeriesPoint};
use helpers::*;
use tracing::Level;

fn window_options() -> MergeOptions {
    MergeOptions {
        data_source: Some(source_fetched_at(reference())),
        ..MergeOptions::new(reference())
    }
}

fn cohort_options() -> MergeOptions {
    MergeOptions {
        is_cohort_mode: true,
        ..window_options()
    }
}

/// Uncontexted window slice, a contexted window slice and a cohort slice
fn mixed_file() -> Vec<ParameterValue> {
    vec![
        stored_slice_fetched("window(1-Dec-25:5-Dec-25)", &span(day("1-Dec-25"), day("5-Dec-25")), 2 * 24 * 60),
        stored_slice_fetched(
            "window(1-Dec-25:5-Dec-25).context(channel=paid)",
            &span(day("1-Dec-25"), day("5-Dec-25")),
            2 * 24 * 60,
        ),
        stored_slice_fetched("cohort(landing,1-Nov-25:10-Nov-25)", &span(day("1-Nov-25"), day("10-Nov-25")), 60 * 24 * 60),
    ]
}

fn fetched_window() -> DateRange {
    DateRange::parse("4-Dec-25", "7-Dec-25").unwrap()
}

fn fetched_points() -> Vec<TimeSeriesPoint> {
    points(&[("4-Dec-25", 200, 50), ("5-Dec-25", 200, 50), ("6-Dec-25", 200, 50), ("7-Dec-25", 200, 50)])
}

fn assert_consistent(slice: &ParameterValue) {
    assert_eq!(slice.dates.len(), slice.n_daily.len());
    assert_eq!(slice.dates.len(), slice.k_daily.len());

    let n: i64 = slice.n_daily.iter().sum();
    let k: i64 = slice.k_daily.iter().sum();
    assert_eq!(slice.n, Some(n));
    assert_eq!(slice.k, Some(k));

    let expected_mean = if n > 0 { (k as f64 / n as f64 * 1000.0).round() / 1000.0 } else { 0.0 };
    assert_eq!(slice.mean, Some(expected_mean));

    let parsed: Vec<_> = slice.dates.iter().map(|d| parse_date(d).unwrap()).collect();
    assert!(parsed.windows(2).all(|pair| pair[0] < pair[1]), "dates not strictly ascending: {:?}", slice.dates);
}

#[test]
fn window_merge_extends_slice_and_new_values_win() {
    let existing = mixed_file();
    let merged = merge_time_series(&existing, &fetched_points(), &fetched_window(), Some("sig-1"), "window(4-Dec-25:7-Dec-25)", &window_options()).unwrap();

    assert_eq!(merged.len(), 3);
    let slice = &merged[0];
    assert_consistent(slice);

    assert_eq!(slice.dates, vec!["1-Dec-25", "2-Dec-25", "3-Dec-25", "4-Dec-25", "5-Dec-25", "6-Dec-25", "7-Dec-25"]);
    assert_eq!(slice.n_daily, vec![100, 100, 100, 200, 200, 200, 200]);
    assert_eq!(slice.k_daily, vec![10, 10, 10, 50, 50, 50, 50]);
    assert_eq!(slice.n, Some(1100));
    assert_eq!(slice.k, Some(230));
    assert_eq!(slice.mean, Some(0.209));

    assert_eq!(slice.window_from.as_deref(), Some("1-Dec-25"));
    assert_eq!(slice.window_to.as_deref(), Some("7-Dec-25"));
    assert_eq!(slice.slice_dsl, "window(1-Dec-25:7-Dec-25)");
    assert_eq!(slice.query_signature.as_deref(), Some("sig-1"));
    assert_eq!(slice.retrieved_at(), Some(reference()));
}

#[test]
fn other_families_pass_through_untouched() {
    let existing = mixed_file();
    let merged = merge_time_series(&existing, &fetched_points(), &fetched_window(), None, "window(4-Dec-25:7-Dec-25)", &window_options()).unwrap();

    assert_eq!(merged[1], existing[1]);
    assert_eq!(merged[2], existing[2]);
}

#[test]
fn duplicate_family_slices_collapse_with_newest_winning() {
    let older = ParameterValue {
        k_daily: vec![1; 3],
        ..stored_slice_fetched("window(1-Dec-25:3-Dec-25)", &span(day("1-Dec-25"), day("3-Dec-25")), 3 * 24 * 60)
    };
    let newer = ParameterValue {
        k_daily: vec![2; 3],
        ..stored_slice_fetched("window(2-Dec-25:4-Dec-25)", &span(day("2-Dec-25"), day("4-Dec-25")), 24 * 60)
    };
    let contexted = stored_slice("window(1-Dec-25:3-Dec-25).context(channel=paid)", &span(day("1-Dec-25"), day("3-Dec-25")));

    // Newer first in the list: seeding follows retrieved_at, not position
    let existing = vec![newer, contexted.clone(), older];
    let new = points(&[("5-Dec-25", 100, 3)]);

    let merged = merge_time_series(&existing, &new, &DateRange::single(day("5-Dec-25")), None, "window(5-Dec-25:5-Dec-25)", &window_options()).unwrap();

    assert_eq!(merged.len(), 2);
    assert_eq!(merged[1], contexted);

    let slice = &merged[0];
    assert_consistent(slice);
    assert_eq!(slice.dates, vec!["1-Dec-25", "2-Dec-25", "3-Dec-25", "4-Dec-25", "5-Dec-25"]);
    assert_eq!(slice.k_daily, vec![1, 2, 2, 2, 3]);
}

#[test]
fn merged_slice_is_appended_for_new_family() {
    let existing = mixed_file();
    let merged = merge_time_series(
        &existing,
        &fetched_points(),
        &fetched_window(),
        None,
        "window(4-Dec-25:7-Dec-25).context(channel=organic)",
        &window_options(),
    )
    .unwrap();

    assert_eq!(merged.len(), 4);
    assert_eq!(&merged[..3], &existing[..]);
    assert_eq!(merged[3].slice_dsl, "window(4-Dec-25:7-Dec-25).context(channel=organic)");
}

#[test]
fn slice_dsl_is_canonical_and_stable() {
    let dsl = "window(4-Dec-25:7-Dec-25).context(device:mobile).context(channel=paid)";
    let first = merge_time_series(&[], &fetched_points(), &fetched_window(), None, dsl, &window_options()).unwrap();
    assert_eq!(first[0].slice_dsl, "window(4-Dec-25:7-Dec-25).context(channel=paid).context(device=mobile)");

    let again = merge_time_series(&first, &fetched_points(), &fetched_window(), None, &first[0].slice_dsl, &window_options()).unwrap();
    assert_eq!(again, first);
    assert_eq!(extract_dimensions(&again[0].slice_dsl), extract_dimensions(dsl));
}

#[test]
fn merge_is_idempotent() {
    let existing = mixed_file();
    let once = merge_time_series(&existing, &fetched_points(), &fetched_window(), Some("sig"), "window(4-Dec-25:7-Dec-25)", &window_options()).unwrap();
    let twice = merge_time_series(&once, &fetched_points(), &fetched_window(), Some("sig"), "window(4-Dec-25:7-Dec-25)", &window_options()).unwrap();

    assert_eq!(once, twice);
}

#[test]
fn empty_fetch_is_a_no_op() {
    let existing = mixed_file();
    let merged = merge_time_series(&existing, &[], &fetched_window(), Some("sig"), "window(4-Dec-25:7-Dec-25)", &window_options()).unwrap();

    assert_eq!(merged, existing);
}

#[test]
fn cohort_merge_keeps_history_and_anchor() {
    let existing = mixed_file();
    let new = points(&[("5-Dec-25", 40, 4), ("6-Dec-25", 40, 4)]);

    let merged = merge_time_series(
        &existing,
        &new,
        &DateRange::parse("5-Dec-25", "6-Dec-25").unwrap(),
        None,
        "cohort(5-Dec-25:6-Dec-25)",
        &cohort_options(),
    )
    .unwrap();

    assert_eq!(merged.len(), 3);
    assert_eq!(merged[0], existing[0]);

    let slice = &merged[2];
    assert_consistent(slice);
    assert_eq!(slice.dates.len(), 12);
    assert_eq!(slice.dates.first().map(String::as_str), Some("1-Nov-25"));
    assert_eq!(slice.dates.last().map(String::as_str), Some("6-Dec-25"));
    assert_eq!(slice.cohort_from.as_deref(), Some("1-Nov-25"));
    assert_eq!(slice.cohort_to.as_deref(), Some("6-Dec-25"));
    assert_eq!(slice.window_from, None);
    assert_eq!(slice.forecast, None);
    assert_eq!(slice.slice_dsl, "cohort(landing,1-Nov-25:6-Dec-25)");
}

#[test]
fn cohort_anchor_falls_back_to_latency_config() {
    let options = MergeOptions {
        latency_config: Some(LatencyConfig {
            anchor_node_id: Some("signup".to_string()),
            ..latency(7.0)
        }),
        ..cohort_options()
    };

    let merged = merge_time_series(&[], &points(&[("1-Dec-25", 10, 1)]), &DateRange::single(day("1-Dec-25")), None, "cohort(1-Dec-25:1-Dec-25)", &options).unwrap();
    assert_eq!(merged[0].slice_dsl, "cohort(signup,1-Dec-25:1-Dec-25)");
}

#[test]
fn cohort_lag_arrays_stay_aligned() {
    let stored = ParameterValue {
        median_lag_days: Some(vec![1.0, 2.0]),
        ..stored_slice("cohort(1-Dec-25:2-Dec-25)", &span(day("1-Dec-25"), day("2-Dec-25")))
    };
    let mut point = TimeSeriesPoint::new(day("3-Dec-25"), 10, 1);
    point.mean_lag_days = Some(4.5);

    let merged = merge_time_series(&[stored], &[point], &DateRange::single(day("3-Dec-25")), None, "cohort(3-Dec-25:3-Dec-25)", &cohort_options()).unwrap();

    let slice = &merged[0];
    assert_eq!(slice.median_lag_days, Some(vec![1.0, 2.0, 0.0]));
    assert_eq!(slice.mean_lag_days, Some(vec![0.0, 0.0, 4.5]));
    assert_eq!(slice.anchor_median_lag_days, None);
}

#[test]
fn window_slices_never_carry_lag_arrays() {
    let stored = ParameterValue {
        median_lag_days: Some(vec![1.0, 2.0]),
        ..stored_slice("window(1-Dec-25:2-Dec-25)", &span(day("1-Dec-25"), day("2-Dec-25")))
    };
    let mut point = TimeSeriesPoint::new(day("3-Dec-25"), 10, 1);
    point.median_lag_days = Some(2.0);
    point.anchor_mean_lag_days = Some(3.0);

    let merged = merge_time_series(&[stored], &[point], &DateRange::single(day("3-Dec-25")), None, "window(3-Dec-25:3-Dec-25)", &window_options()).unwrap();

    let slice = &merged[0];
    assert_eq!(slice.dates.len(), 3);
    assert_eq!(slice.median_lag_days, None);
    assert_eq!(slice.mean_lag_days, None);
    assert_eq!(slice.anchor_median_lag_days, None);
    assert_eq!(slice.anchor_mean_lag_days, None);
}

#[test]
fn forecast_recompute_excludes_immature_days() {
    let options = MergeOptions {
        latency_config: Some(latency(7.0)),
        recompute_forecast: true,
        ..window_options()
    };
    // 1-5 Dec are mature (cutoff 9-Dec) at p=0.1; 15-Dec is immature at p=0.9
    let new = points(&[
        ("1-Dec-25", 100, 10),
        ("2-Dec-25", 100, 10),
        ("3-Dec-25", 100, 10),
        ("4-Dec-25", 100, 10),
        ("5-Dec-25", 100, 10),
        ("15-Dec-25", 100, 90),
    ]);

    let merged = merge_time_series(&[], &new, &DateRange::parse("1-Dec-25", "15-Dec-25").unwrap(), None, "window(1-Dec-25:15-Dec-25)", &options).unwrap();

    let forecast = merged[0].forecast.unwrap();
    assert!((forecast - 0.1).abs() < 1e-9, "forecast {}", forecast);
}

#[test]
fn forecast_is_carried_without_recompute() {
    let stored = ParameterValue {
        forecast: Some(0.42),
        ..stored_slice_fetched("window(1-Dec-25:2-Dec-25)", &span(day("1-Dec-25"), day("2-Dec-25")), 24 * 60)
    };

    let merged = merge_time_series(&[stored], &points(&[("3-Dec-25", 100, 90)]), &DateRange::single(day("3-Dec-25")), None, "window(3-Dec-25:3-Dec-25)", &window_options()).unwrap();
    assert_eq!(merged[0].forecast, Some(0.42));
}

#[test]
fn forecast_kept_when_no_day_is_mature() {
    let stored = ParameterValue {
        forecast: Some(0.42),
        ..stored_slice_fetched("window(14-Dec-25:14-Dec-25)", &[day("14-Dec-25")], 24 * 60)
    };
    let options = MergeOptions {
        latency_config: Some(latency(7.0)),
        recompute_forecast: true,
        ..window_options()
    };

    let merged = merge_time_series(&[stored], &points(&[("15-Dec-25", 100, 90), ("16-Dec-25", 100, 90)]), &DateRange::parse("15-Dec-25", "16-Dec-25").unwrap(), None, "window(15-Dec-25:16-Dec-25)", &options).unwrap();
    assert_eq!(merged[0].forecast, Some(0.42));
}

#[test]
fn provenance_and_signature_carried_when_not_supplied() {
    let stored = ParameterValue {
        query_signature: Some("sig-old".to_string()),
        ..stored_slice_fetched("window(1-Dec-25:2-Dec-25)", &span(day("1-Dec-25"), day("2-Dec-25")), 90)
    };
    let options = MergeOptions::new(reference());

    let merged = merge_time_series(&[stored], &points(&[("3-Dec-25", 10, 1)]), &DateRange::single(day("3-Dec-25")), None, "window(3-Dec-25:3-Dec-25)", &options).unwrap();

    assert_eq!(merged[0].query_signature.as_deref(), Some("sig-old"));
    assert_eq!(merged[0].retrieved_at(), Some(reference() - Duration::minutes(90)));
}

#[test]
fn inconsistent_input_warns_but_merges() {
    let misaligned = ParameterValue {
        n_daily: vec![100],
        ..stored_slice("window(1-Dec-25:2-Dec-25)", &span(day("1-Dec-25"), day("2-Dec-25")))
    };
    let new = points(&[("3-Dec-25", 10, 20)]);

    let (merged, logs) = capture_logs(|| {
        merge_time_series(&[misaligned], &new, &DateRange::single(day("3-Dec-25")), None, "window(3-Dec-25:3-Dec-25)", &window_options()).unwrap()
    });

    logs.assert_logged(Level::WARN, "misaligned arrays");
    logs.assert_logged(Level::WARN, "exceeds n");

    let slice = &merged[0];
    assert_consistent(slice);
    assert_eq!(slice.dates, vec!["1-Dec-25", "3-Dec-25"]);
}

#[test]
fn clean_merge_does_not_warn() {
    let (_, logs) = capture_logs(|| {
        merge_time_series(&mixed_file(), &fetched_points(), &fetched_window(), None, "window(4-Dec-25:7-Dec-25)", &window_options()).unwrap()
    });

    logs.assert_none_at(Level::WARN);
}

#[test]
fn points_outside_fetched_window_are_kept_and_logged() {
    let (merged, logs) = capture_logs(|| {
        merge_time_series(&[], &points(&[("1-Dec-25", 10, 1), ("9-Dec-25", 10, 1)]), &DateRange::single(day("1-Dec-25")), None, "window(1-Dec-25:1-Dec-25)", &window_options()).unwrap()
    });

    assert_eq!(merged[0].dates, vec!["1-Dec-25", "9-Dec-25"]);
    logs.assert_logged(Level::DEBUG, "outside fetched window");
}
