//! Maturity model
//!
//! Converts a latency configuration into the number of days after which a
//! day's outcome is considered final. Unknown lag is never treated as zero
//! lag: absent, zero, negative or NaN percentiles fall back to
//! [`DEFAULT_T95_DAYS`].

use chrono::NaiveDate;
use dgn_common::dates::add_days;
use dgn_common::LatencyConfig;

/// Conservative maturity horizon when no usable percentile is known
pub const DEFAULT_T95_DAYS: u32 = 30;

/// Effective maturity horizon in days
///
/// - Window queries: `ceil(t95)`
/// - Cohort queries: `ceil(path_t95)`, else `ceil(t95)`
///
/// Callers check [`LatencyConfig::enabled`] first; with tracking disabled
/// maturity does not apply at all.
pub fn effective_maturity_days(latency: &LatencyConfig, is_cohort_query: bool) -> u32 {
    let local = usable_days(latency.t95);

    let horizon = if is_cohort_query {
        usable_days(latency.path_t95).or(local)
    } else {
        local
    };

    horizon.unwrap_or(DEFAULT_T95_DAYS)
}

/// Last day considered mature: `reference − (maturity_days + 1)`
pub fn maturity_cutoff(reference: NaiveDate, maturity_days: u32) -> NaiveDate {
    add_days(reference, -(i64::from(maturity_days) + 1))
}

/// `ceil(value)` for a positive finite percentile
fn usable_days(value: Option<f64>) -> Option<u32> {
    match value {
        Some(days) if days.is_finite() && days > 0.0 => Some(days.ceil().min(u32::MAX as f64) as u32),
        _ => None,
    }
}
