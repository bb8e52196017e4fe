//! Time-Series Merge Engine
//!
//! Folds freshly fetched daily points into the single canonical slice of a
//! family and returns the new slice list. Inputs are never mutated.
//!
//! **Window mode:** family slices are unioned by date (older `retrieved_at`
//! first) and the new points overlay them, so a refetched day always carries
//! the newest counts. Totals, span and `sliceDSL` are rebuilt; the forecast is
//! either recomputed or carried from the previous slice.
//!
//! **Cohort mode:** same union, every historic cohort day is retained and the
//! anchor is preserved in `sliceDSL`. No forecast is kept on cohort slices.
//!
//! The merged slice takes the position of the first family slice in the
//! list (or is appended); slices of other families pass through untouched.

use chrono::{DateTime, NaiveDate, Utc};
use dgn_common::dates::{format_date, DateRange};
use dgn_common::slice_dsl::{build_slice_dsl, extract_dimensions, parse_slice_dsl, SliceFamily};
use dgn_common::{
    DataSource, LatencyConfig, LatencySummary, ParameterValue, Result, SliceMode, TimeSeriesPoint,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::forecast::{compute_forecast, DailyCounts};
use crate::maturity::{effective_maturity_days, DEFAULT_T95_DAYS};

/// Merge options
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOptions {
    pub is_cohort_mode: bool,
    /// Supplies the forecast maturity (`t95`) and the fallback cohort anchor
    pub latency_config: Option<LatencyConfig>,
    pub latency_summary: Option<LatencySummary>,
    pub anchor_latency_summary: Option<LatencySummary>,
    /// Recompute the window forecast instead of carrying the previous one
    pub recompute_forecast: bool,
    /// Provenance of the new points; the previous slice's is kept when `None`
    pub data_source: Option<DataSource>,
    pub reference_time: DateTime<Utc>,
    pub forecast_half_life_days: f64,
}

impl MergeOptions {
    /// Window-mode options with no latency information
    pub fn new(reference_time: DateTime<Utc>) -> Self {
        Self {
            is_cohort_mode: false,
            latency_config: None,
            latency_summary: None,
            anchor_latency_summary: None,
            recompute_forecast: false,
            data_source: None,
            reference_time,
            forecast_half_life_days: dgn_common::config::DEFAULT_FORECAST_HALF_LIFE_DAYS,
        }
    }
}

/// One merged day
#[derive(Debug, Clone, Default, PartialEq)]
struct DayRecord {
    n: i64,
    k: i64,
    median_lag_days: Option<f64>,
    mean_lag_days: Option<f64>,
    anchor_median_lag_days: Option<f64>,
    anchor_mean_lag_days: Option<f64>,
}

impl From<&TimeSeriesPoint> for DayRecord {
    fn from(point: &TimeSeriesPoint) -> Self {
        Self {
            n: point.n,
            k: point.k,
            median_lag_days: point.median_lag_days,
            mean_lag_days: point.mean_lag_days,
            anchor_median_lag_days: point.anchor_median_lag_days,
            anchor_mean_lag_days: point.anchor_mean_lag_days,
        }
    }
}

/// Merge fetched points into the canonical slice of one family
///
/// # Arguments
/// * `existing` - Every stored slice of the parameter
/// * `new_points` - Fetched days; an empty slice makes the merge a no-op
/// * `new_window` - Window the fetch covered (diagnostics only)
/// * `signature` - Query signature of the fetch; the previous one is kept when `None`
/// * `slice_dsl` - Names the family (dimensions and, for cohorts, the anchor)
/// * `options` - Mode, latency data, forecast settings
///
/// # Returns
/// The new slice list: other families unchanged and in order, exactly one
/// slice for the merged family.
///
/// # Errors
/// Returns `DateParse` if a family slice holds unparseable dates.
pub fn merge_time_series(
    existing: &[ParameterValue],
    new_points: &[TimeSeriesPoint],
    new_window: &DateRange,
    signature: Option<&str>,
    slice_dsl: &str,
    options: &MergeOptions,
) -> Result<Vec<ParameterValue>> {
    if new_points.is_empty() {
        debug!("Merge: no new points for {}, slice list unchanged", slice_dsl);
        return Ok(existing.to_vec());
    }

    let mode = if options.is_cohort_mode {
        SliceMode::Cohort
    } else {
        SliceMode::Window
    };
    let family = SliceFamily {
        mode,
        dimensions: extract_dimensions(slice_dsl),
    };

    let mut family_slices: Vec<&ParameterValue> =
        existing.iter().filter(|slice| family.contains(slice)).collect();
    family_slices.sort_by_key(|slice| slice.retrieved_at());
    let previous = family_slices.last().copied();

    let mut days: BTreeMap<NaiveDate, DayRecord> = BTreeMap::new();
    for slice in &family_slices {
        seed_days(&mut days, slice)?;
    }

    let mut outside_window = 0usize;
    for point in new_points {
        if !new_window.contains(point.date) {
            outside_window += 1;
        }
        days.insert(point.date, DayRecord::from(point));
    }
    if outside_window > 0 {
        debug!(
            "Merge: {} of {} points fall outside fetched window {}",
            outside_window,
            new_points.len(),
            new_window
        );
    }

    let merged = build_slice(&days, &family, slice_dsl, signature, previous, options);
    debug!(
        "Merge: {} now holds {} days (n={}, k={}) from {} stored slice(s) and {} new points",
        merged.slice_dsl,
        merged.dates.len(),
        merged.n.unwrap_or(0),
        merged.k.unwrap_or(0),
        family_slices.len(),
        new_points.len()
    );

    let mut result = Vec::with_capacity(existing.len() + 1);
    let mut merged = Some(merged);
    for slice in existing {
        if family.contains(slice) {
            if let Some(merged) = merged.take() {
                result.push(merged);
            }
        } else {
            result.push(slice.clone());
        }
    }
    if let Some(merged) = merged {
        result.push(merged);
    }

    Ok(result)
}

/// Add a stored slice's days to the date map, overwriting earlier slices
fn seed_days(days: &mut BTreeMap<NaiveDate, DayRecord>, slice: &ParameterValue) -> Result<()> {
    let dates = slice.parsed_dates()?;

    if slice.n_daily.len() != dates.len() || slice.k_daily.len() != dates.len() {
        warn!(
            "Merge: misaligned arrays in {} (dates={}, n_daily={}, k_daily={}), using common prefix",
            slice.slice_dsl,
            dates.len(),
            slice.n_daily.len(),
            slice.k_daily.len()
        );
    }

    let lag_arrays = [
        ("median_lag_days", &slice.median_lag_days),
        ("mean_lag_days", &slice.mean_lag_days),
        ("anchor_median_lag_days", &slice.anchor_median_lag_days),
        ("anchor_mean_lag_days", &slice.anchor_mean_lag_days),
    ];
    for (name, values) in lag_arrays {
        if let Some(values) = values {
            if values.len() != dates.len() {
                warn!(
                    "Merge: {} has {} entries for {} dates in {}",
                    name,
                    values.len(),
                    dates.len(),
                    slice.slice_dsl
                );
            }
        }
    }

    let lag_at = |values: &Option<Vec<f64>>, index: usize| {
        values.as_ref().and_then(|values| values.get(index)).copied()
    };

    for (index, ((date, &n), &k)) in dates
        .iter()
        .zip(&slice.n_daily)
        .zip(&slice.k_daily)
        .enumerate()
    {
        days.insert(
            *date,
            DayRecord {
                n,
                k,
                median_lag_days: lag_at(&slice.median_lag_days, index),
                mean_lag_days: lag_at(&slice.mean_lag_days, index),
                anchor_median_lag_days: lag_at(&slice.anchor_median_lag_days, index),
                anchor_mean_lag_days: lag_at(&slice.anchor_mean_lag_days, index),
            },
        );
    }

    Ok(())
}

/// Build the canonical slice from a non-empty date map
fn build_slice(
    days: &BTreeMap<NaiveDate, DayRecord>,
    family: &SliceFamily,
    slice_dsl: &str,
    signature: Option<&str>,
    previous: Option<&ParameterValue>,
    options: &MergeOptions,
) -> ParameterValue {
    let mut dates = Vec::with_capacity(days.len());
    let mut n_daily = Vec::with_capacity(days.len());
    let mut k_daily = Vec::with_capacity(days.len());

    for (date, record) in days {
        if record.k > record.n {
            warn!(
                "Merge: k ({}) exceeds n ({}) on {} in {}",
                record.k,
                record.n,
                format_date(*date),
                slice_dsl
            );
        }
        dates.push(format_date(*date));
        n_daily.push(record.n);
        k_daily.push(record.k);
    }

    let n: i64 = n_daily.iter().sum();
    let k: i64 = k_daily.iter().sum();
    let mean = if n > 0 { round3(k as f64 / n as f64) } else { 0.0 };
    let stdev = if n > 0 {
        round3((mean * (1.0 - mean) / n as f64).max(0.0).sqrt())
    } else {
        0.0
    };

    // BTreeMap keys are sorted and the map is never empty here
    let span = match (days.keys().next(), days.keys().next_back()) {
        (Some(&start), Some(&end)) => DateRange { start, end },
        _ => DateRange::single(options.reference_time.date_naive()),
    };
    let from = format_date(span.start);
    let to = format_date(span.end);

    let anchor = match family.mode {
        SliceMode::Window => None,
        SliceMode::Cohort => parse_slice_dsl(slice_dsl)
            .anchor
            .or_else(|| {
                options
                    .latency_config
                    .as_ref()
                    .and_then(|config| config.anchor_node_id.clone())
            })
            .or_else(|| previous.and_then(|slice| parse_slice_dsl(&slice.slice_dsl).anchor)),
    };

    let previous_forecast = previous.and_then(|slice| slice.forecast);
    let forecast = match family.mode {
        SliceMode::Cohort => None,
        SliceMode::Window if options.recompute_forecast => {
            recompute_forecast(days, options).or(previous_forecast)
        }
        SliceMode::Window => previous_forecast,
    };

    // Lag arrays belong to cohort slices only
    let lag_column = |field: fn(&DayRecord) -> Option<f64>| -> Option<Vec<f64>> {
        if family.mode == SliceMode::Cohort && days.values().any(|record| field(record).is_some()) {
            Some(days.values().map(|record| field(record).unwrap_or(0.0)).collect())
        } else {
            None
        }
    };

    let (window_from, window_to, cohort_from, cohort_to) = match family.mode {
        SliceMode::Window => (Some(from), Some(to), None, None),
        SliceMode::Cohort => (None, None, Some(from), Some(to)),
    };

    ParameterValue {
        mean: Some(mean),
        stdev: Some(stdev),
        n: Some(n),
        k: Some(k),
        dates,
        n_daily,
        k_daily,
        window_from,
        window_to,
        cohort_from,
        cohort_to,
        slice_dsl: build_slice_dsl(family.mode, &span, anchor.as_deref(), &family.dimensions),
        query_signature: signature
            .map(str::to_string)
            .or_else(|| previous.and_then(|slice| slice.query_signature.clone())),
        data_source: options
            .data_source
            .clone()
            .or_else(|| previous.and_then(|slice| slice.data_source.clone())),
        forecast,
        median_lag_days: lag_column(|record| record.median_lag_days),
        mean_lag_days: lag_column(|record| record.mean_lag_days),
        anchor_median_lag_days: lag_column(|record| record.anchor_median_lag_days),
        anchor_mean_lag_days: lag_column(|record| record.anchor_mean_lag_days),
        latency: options
            .latency_summary
            .clone()
            .or_else(|| previous.and_then(|slice| slice.latency.clone())),
        anchor_latency: options
            .anchor_latency_summary
            .clone()
            .or_else(|| previous.and_then(|slice| slice.anchor_latency.clone())),
    }
}

fn recompute_forecast(days: &BTreeMap<NaiveDate, DayRecord>, options: &MergeOptions) -> Option<f64> {
    let maturity_days = options
        .latency_config
        .as_ref()
        .map(|config| effective_maturity_days(config, false))
        .unwrap_or(DEFAULT_T95_DAYS);

    let counts: Vec<DailyCounts> = days
        .iter()
        .map(|(date, record)| DailyCounts {
            date: *date,
            n: record.n,
            k: record.k,
        })
        .collect();

    compute_forecast(
        &counts,
        maturity_days,
        options.reference_time.date_naive(),
        options.forecast_half_life_days,
    )
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
