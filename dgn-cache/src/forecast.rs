//! Maturity-excluded, recency-weighted baseline for window slices
//!
//! ```text
//! cutoff   = reference − (maturity_days + 1)
//! weight_d = exp(−age_d / half_life)          for every day d ≤ cutoff
//! forecast = Σ weight_d · k_d / Σ weight_d · n_d
//! ```
//!
//! Days after the cutoff never contribute.

use chrono::NaiveDate;
use dgn_common::dates::{days_between, format_date};
use tracing::debug;

use crate::maturity::maturity_cutoff;

/// One day of counts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyCounts {
    pub date: NaiveDate,
    pub n: i64,
    pub k: i64,
}

/// Compute the forecast, `None` when no mature day carries any volume
///
/// A non-positive or non-finite `half_life_days` weights every mature day
/// equally.
pub fn compute_forecast(
    days: &[DailyCounts],
    maturity_days: u32,
    reference: NaiveDate,
    half_life_days: f64,
) -> Option<f64> {
    let cutoff = maturity_cutoff(reference, maturity_days);

    let mut weighted_k = 0.0;
    let mut weighted_n = 0.0;
    let mut mature_days = 0usize;

    for day in days.iter().filter(|day| day.date <= cutoff) {
        let age = days_between(day.date, reference) as f64;
        let weight = if half_life_days.is_finite() && half_life_days > 0.0 {
            (-age / half_life_days).exp()
        } else {
            1.0
        };

        weighted_k += weight * day.k as f64;
        weighted_n += weight * day.n as f64;
        mature_days += 1;
    }

    if weighted_n <= 0.0 {
        debug!(
            "Forecast: no mature volume on or before {} ({} mature days)",
            format_date(cutoff),
            mature_days
        );
        return None;
    }

    Some(weighted_k / weighted_n)
}
