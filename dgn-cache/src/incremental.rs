//! Incremental fetch planning over a parameter's full slice list
//!
//! Works out which requested days are not yet cached for a target slice
//! family and groups them into contiguous fetch windows, one provider request
//! per window.
//!
//! Evaluation order (first match wins):
//! 1. `bust_cache` - every requested day is missing
//! 2. Signature filtering - when the caller passes a query signature and any
//!    stored slice carries one, only matching slices count as cached
//! 3. Family selection - slices whose mode and dimensions match the target
//! 4. MECE aggregation - uncontexted target, no uncontexted slice, but
//!    context-partitioned slices exist: a day is cached only if every
//!    partition has it
//! 5. Aggregate fast path (never in MECE mode) - a family slice carrying
//!    `mean`/`n` whose span contains the request answers it outright
//! 6. Day-by-day reconciliation
//!
//! Signature filtering runs before both fast paths, so a slice whose query
//! meaning changed can never short-circuit the plan.

use chrono::NaiveDate;
use dgn_common::dates::{add_days, serde_days, DateRange};
use dgn_common::slice_dsl::{extract_dimensions, SliceFamily};
use dgn_common::{ParameterValue, Result, SliceMode};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Why the plan came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IncrementalReason {
    /// Caller asked to ignore the cache
    BustCache,
    /// A family slice with aggregate totals spans the whole request
    FastPathAggregate,
    /// Every requested day is cached
    FullyCached,
    /// Some days are missing from the family slices
    GapsFound,
    /// Context partitions do not all cover the missing days
    MeceIncomplete,
    /// Nothing in the file answers this family
    NoMatchingSlices,
}

impl IncrementalReason {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            IncrementalReason::BustCache => "bust_cache",
            IncrementalReason::FastPathAggregate => "fast_path_aggregate",
            IncrementalReason::FullyCached => "fully_cached",
            IncrementalReason::GapsFound => "gaps_found",
            IncrementalReason::MeceIncomplete => "mece_incomplete",
            IncrementalReason::NoMatchingSlices => "no_matching_slices",
        }
    }
}

/// Incremental fetch plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncrementalFetch {
    /// Requested days already cached
    #[serde(with = "serde_days")]
    pub existing_dates: Vec<NaiveDate>,
    /// Requested days to fetch, chronological
    #[serde(with = "serde_days")]
    pub missing_dates: Vec<NaiveDate>,
    /// Contiguous runs of `missing_dates`
    pub fetch_windows: Vec<DateRange>,
    pub needs_fetch: bool,
    pub total_days: usize,
    pub days_available: usize,
    pub days_to_fetch: usize,
    pub reason: IncrementalReason,
    /// Availability was computed across context partitions
    pub mece_aggregation: bool,
    /// Cached slices were restricted to the caller's query signature
    pub signature_filtered: bool,
}

impl IncrementalFetch {
    fn from_days(
        requested_days: Vec<NaiveDate>,
        available: impl Fn(&NaiveDate) -> bool,
        reason_if_missing: IncrementalReason,
        mece_aggregation: bool,
        signature_filtered: bool,
    ) -> Self {
        let total_days = requested_days.len();
        let (existing_dates, missing_dates): (Vec<NaiveDate>, Vec<NaiveDate>) =
            requested_days.into_iter().partition(|day| available(day));

        let reason = if missing_dates.is_empty() {
            IncrementalReason::FullyCached
        } else {
            reason_if_missing
        };

        Self {
            days_available: existing_dates.len(),
            days_to_fetch: missing_dates.len(),
            needs_fetch: !missing_dates.is_empty(),
            fetch_windows: group_contiguous_dates(&missing_dates),
            existing_dates,
            missing_dates,
            total_days,
            reason,
            mece_aggregation,
            signature_filtered,
        }
    }

    fn with_reason(mut self, reason: IncrementalReason) -> Self {
        self.reason = reason;
        self
    }
}

/// Plan an incremental fetch for one slice family
///
/// # Arguments
/// * `slices` - Every stored slice of the parameter
/// * `requested` - Window the caller wants answered
/// * `query_signature` - Signature of the query about to be sent, if known
/// * `bust_cache` - Ignore the cache entirely
/// * `target_slice_dsl` - Names the family; window mode if it has no mode clause
///
/// # Errors
/// Returns `DateParse` if a considered slice holds unparseable dates.
pub fn calculate_incremental_fetch(
    slices: &[ParameterValue],
    requested: &DateRange,
    query_signature: Option<&str>,
    bust_cache: bool,
    target_slice_dsl: &str,
) -> Result<IncrementalFetch> {
    let requested_days: Vec<NaiveDate> = requested.days().collect();

    if bust_cache {
        debug!("Incremental fetch: cache bust requested for {}", requested);
        return Ok(IncrementalFetch::from_days(
            requested_days,
            |_| false,
            IncrementalReason::BustCache,
            false,
            false,
        ));
    }

    let signature_filtered =
        query_signature.is_some() && slices.iter().any(|s| s.query_signature.is_some());
    let candidates: Vec<&ParameterValue> = slices
        .iter()
        .filter(|s| !signature_filtered || s.query_signature.as_deref() == query_signature)
        .collect();

    let family = SliceFamily::from_dsl(target_slice_dsl, SliceMode::Window);
    let family_slices: Vec<&ParameterValue> = candidates
        .iter()
        .copied()
        .filter(|s| family.contains(s))
        .collect();

    if family.is_uncontexted() && family_slices.is_empty() {
        let partitions = context_partitions(&candidates, family.mode)?;
        if !partitions.is_empty() {
            debug!(
                "Incremental fetch: aggregating {} context partitions for uncontexted {} query",
                partitions.len(),
                family.mode.as_str()
            );
            return Ok(IncrementalFetch::from_days(
                requested_days,
                |day| partitions.values().all(|dates| dates.contains(day)),
                IncrementalReason::MeceIncomplete,
                true,
                signature_filtered,
            ));
        }
    }

    for slice in &family_slices {
        if !slice.has_aggregate() {
            continue;
        }
        if let Some(span) = slice.stored_span()? {
            if span.contains_range(requested) {
                debug!(
                    "Incremental fetch: {} answered by aggregate slice {}",
                    requested, slice.slice_dsl
                );
                return Ok(IncrementalFetch::from_days(
                    requested_days,
                    |_| true,
                    IncrementalReason::FastPathAggregate,
                    false,
                    signature_filtered,
                )
                .with_reason(IncrementalReason::FastPathAggregate));
            }
        }
    }

    let mut cached: BTreeSet<NaiveDate> = BTreeSet::new();
    for slice in &family_slices {
        cached.extend(slice.parsed_dates()?);
    }

    let reason_if_missing = if family_slices.is_empty() {
        IncrementalReason::NoMatchingSlices
    } else {
        IncrementalReason::GapsFound
    };

    let plan = IncrementalFetch::from_days(
        requested_days,
        |day| cached.contains(day),
        reason_if_missing,
        false,
        signature_filtered,
    );
    debug!(
        "Incremental fetch: {} of {} days cached, {} window(s) to fetch ({})",
        plan.days_available,
        plan.total_days,
        plan.fetch_windows.len(),
        plan.reason.as_str()
    );
    Ok(plan)
}

/// Cached dates per context partition of one mode
fn context_partitions(
    candidates: &[&ParameterValue],
    mode: SliceMode,
) -> Result<BTreeMap<String, BTreeSet<NaiveDate>>> {
    let mut partitions: BTreeMap<String, BTreeSet<NaiveDate>> = BTreeMap::new();

    for slice in candidates.iter().filter(|s| s.mode() == mode) {
        let dimensions = extract_dimensions(&slice.slice_dsl);
        if dimensions.is_empty() {
            continue;
        }
        partitions
            .entry(dimensions)
            .or_default()
            .extend(slice.parsed_dates()?);
    }

    Ok(partitions)
}

/// Group days into contiguous inclusive ranges
///
/// Input order does not matter and duplicates are ignored; output is
/// chronological.
pub fn group_contiguous_dates(dates: &[NaiveDate]) -> Vec<DateRange> {
    let sorted: BTreeSet<NaiveDate> = dates.iter().copied().collect();
    let mut windows: Vec<DateRange> = Vec::new();

    for day in sorted {
        match windows.last_mut() {
            Some(window) if add_days(window.end, 1) == day => window.end = day,
            _ => windows.push(DateRange::single(day)),
        }
    }

    windows
}
