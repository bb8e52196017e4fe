//! Coverage/Gap Analyzer (per slice)
//!
//! Classifies every requested day against one cached slice and a maturity
//! cutoff, then turns a policy decision plus that classification into the
//! single date window the orchestrator should fetch.
//!
//! Day classes:
//! - **immature**: after the cutoff, whether cached or not (the cached ones
//!   are also listed in `cached_immature_dates`)
//! - **missing mature**: on/before the cutoff and absent from the slice
//! - **covered**: on/before the cutoff and present in the slice

use chrono::NaiveDate;
use dgn_common::dates::{serde_days, DateRange};
use dgn_common::{ParameterValue, Result};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::refetch_policy::RefetchDecision;

/// How much of the mature part of a request the cache holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatureCoverage {
    /// Every mature day is cached (also when no requested day is mature)
    Full,
    /// Some mature days are cached
    Partial,
    /// No mature day is cached
    None,
}

/// Per-day classification of a request against one slice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SliceCoverage {
    pub mature_coverage: MatureCoverage,
    #[serde(with = "serde_days")]
    pub immature_dates: Vec<NaiveDate>,
    /// Immature days the slice already holds
    #[serde(with = "serde_days")]
    pub cached_immature_dates: Vec<NaiveDate>,
    #[serde(with = "serde_days")]
    pub missing_mature_dates: Vec<NaiveDate>,
    #[serde(with = "serde_days")]
    pub covered_dates: Vec<NaiveDate>,
}

/// Classify every requested day
///
/// All date vectors come back in chronological order.
///
/// # Errors
/// Returns `DateParse` if the slice holds unparseable dates.
pub fn analyze_slice_coverage(
    slice: Option<&ParameterValue>,
    requested: &DateRange,
    mature_cutoff: NaiveDate,
) -> Result<SliceCoverage> {
    let cached: BTreeSet<NaiveDate> = match slice {
        Some(slice) => slice.parsed_dates()?.into_iter().collect(),
        None => BTreeSet::new(),
    };

    let mut immature_dates = Vec::new();
    let mut cached_immature_dates = Vec::new();
    let mut missing_mature_dates = Vec::new();
    let mut covered_dates = Vec::new();

    for day in requested.days() {
        if day > mature_cutoff {
            immature_dates.push(day);
            if cached.contains(&day) {
                cached_immature_dates.push(day);
            }
        } else if cached.contains(&day) {
            covered_dates.push(day);
        } else {
            missing_mature_dates.push(day);
        }
    }

    let mature_coverage = if missing_mature_dates.is_empty() {
        MatureCoverage::Full
    } else if covered_dates.is_empty() {
        MatureCoverage::None
    } else {
        MatureCoverage::Partial
    };

    Ok(SliceCoverage {
        mature_coverage,
        immature_dates,
        cached_immature_dates,
        missing_mature_dates,
        covered_dates,
    })
}

/// Window the orchestrator should fetch for a decision, `None` for nothing
///
/// - `use_cache`: nothing
/// - `replace_slice`: the whole request
/// - `partial`: the refetch window, pulled back to the earliest missing
///   mature day
/// - `gaps_only`: span of missing mature and immature days; with a cooldown
///   active, immature days the slice already holds are left out
pub fn compute_fetch_window(
    decision: &RefetchDecision,
    coverage: &SliceCoverage,
    requested: &DateRange,
) -> Option<DateRange> {
    match decision {
        RefetchDecision::UseCache { .. } => None,

        RefetchDecision::ReplaceSlice { .. } => Some(*requested),

        RefetchDecision::Partial { refetch_window, .. } => {
            let mut window = *refetch_window;
            if let Some(&earliest_gap) = coverage.missing_mature_dates.iter().min() {
                window.start = window.start.min(earliest_gap);
            }
            Some(window)
        }

        RefetchDecision::GapsOnly { cooldown, .. } => {
            let cooling_down = cooldown.is_some();
            let immature = coverage
                .immature_dates
                .iter()
                .filter(|day| !cooling_down || !coverage.cached_immature_dates.contains(day));

            let mut days = coverage.missing_mature_dates.iter().chain(immature);
            let first = *days.next()?;
            let (start, end) = days.fold((first, first), |(start, end), &day| {
                (start.min(day), end.max(day))
            });
            Some(DateRange { start, end })
        }
    }
}
