//! Refetch Policy Engine
//!
//! Decides whether a cached slice can be reused for a requested window, and
//! if not, how much of it to refetch.
//!
//! # Decision table
//!
//! | Situation                                   | Decision        | Reason                 |
//! |---------------------------------------------|-----------------|------------------------|
//! | latency tracking absent/disabled            | `gaps_only`     | `latency_disabled`     |
//! | window, request ends before cutoff          | `gaps_only`     | `window_fully_mature`  |
//! | window, request reaches past cutoff         | `partial`       | `immature_window_tail` |
//! | cohort, no slice                            | `replace_slice` | `no_existing_slice`    |
//! | cohort, slice without dates                 | `replace_slice` | `no_cohort_dates`      |
//! | cohort, a stored date newer than cutoff     | `replace_slice` | `immature_cohorts`     |
//! | cohort, fetched longer ago than maturity    | `replace_slice` | `stale_data`           |
//! | cohort, everything mature and fresh         | `use_cache`     | `cohorts_mature`       |
//!
//! `partial` and `replace_slice` are downgraded to `gaps_only`
//! (`recent_fetch_cooldown`) when the slice was fetched within the cooldown
//! window. The suppressed decision is kept in [`CooldownInfo`] so callers can
//! tell "mature" from "suppressed" apart. Cooldown never hides genuine gaps:
//! the coverage analyzer still fills missing mature dates.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use dgn_common::config::RefetchSettings;
use dgn_common::dates::{format_date, serde_day, serde_opt_day, DateRange};
use dgn_common::{LatencyConfig, ParameterValue, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::maturity::{effective_maturity_days, maturity_cutoff};

/// Outcome kind, without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    GapsOnly,
    Partial,
    ReplaceSlice,
    UseCache,
}

impl DecisionKind {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::GapsOnly => "gaps_only",
            DecisionKind::Partial => "partial",
            DecisionKind::ReplaceSlice => "replace_slice",
            DecisionKind::UseCache => "use_cache",
        }
    }
}

/// Why a decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefetchReason {
    LatencyDisabled,
    WindowFullyMature,
    ImmatureWindowTail,
    RecentFetchCooldown,
    NoExistingSlice,
    NoCohortDates,
    ImmatureCohorts,
    StaleData,
    CohortsMature,
}

impl RefetchReason {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RefetchReason::LatencyDisabled => "latency_disabled",
            RefetchReason::WindowFullyMature => "window_fully_mature",
            RefetchReason::ImmatureWindowTail => "immature_window_tail",
            RefetchReason::RecentFetchCooldown => "recent_fetch_cooldown",
            RefetchReason::NoExistingSlice => "no_existing_slice",
            RefetchReason::NoCohortDates => "no_cohort_dates",
            RefetchReason::ImmatureCohorts => "immature_cohorts",
            RefetchReason::StaleData => "stale_data",
            RefetchReason::CohortsMature => "cohorts_mature",
        }
    }
}

/// What a cooldown suppressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CooldownInfo {
    /// Decision that would have fired without the cooldown
    pub suppressed: DecisionKind,
    pub suppressed_reason: RefetchReason,
    /// `partial` refetch window that was not issued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub would_refetch_window: Option<DateRange>,
    pub had_immature_cohorts: bool,
    /// Minutes between `retrieved_at` and the reference time (negative if
    /// the slice claims to come from the future)
    pub minutes_since_fetch: i64,
}

/// Refetch policy outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefetchDecision {
    /// Only fill dates missing from the cache
    GapsOnly {
        reason: RefetchReason,
        #[serde(with = "serde_opt_day", skip_serializing_if = "Option::is_none")]
        mature_cutoff: Option<NaiveDate>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cooldown: Option<CooldownInfo>,
    },

    /// Refetch the immature tail of a window
    Partial {
        reason: RefetchReason,
        #[serde(with = "serde_day")]
        mature_cutoff: NaiveDate,
        refetch_window: DateRange,
    },

    /// Refetch the whole requested window and replace the cohort slice
    ReplaceSlice {
        reason: RefetchReason,
        has_immature_cohorts: bool,
        #[serde(with = "serde_opt_day", skip_serializing_if = "Option::is_none")]
        mature_cutoff: Option<NaiveDate>,
    },

    /// Cached slice answers the request as-is
    UseCache {
        reason: RefetchReason,
        #[serde(with = "serde_day")]
        mature_cutoff: NaiveDate,
    },
}

impl RefetchDecision {
    /// Outcome kind
    pub fn kind(&self) -> DecisionKind {
        match self {
            RefetchDecision::GapsOnly { .. } => DecisionKind::GapsOnly,
            RefetchDecision::Partial { .. } => DecisionKind::Partial,
            RefetchDecision::ReplaceSlice { .. } => DecisionKind::ReplaceSlice,
            RefetchDecision::UseCache { .. } => DecisionKind::UseCache,
        }
    }

    /// Why this decision was reached
    pub fn reason(&self) -> RefetchReason {
        match self {
            RefetchDecision::GapsOnly { reason, .. }
            | RefetchDecision::Partial { reason, .. }
            | RefetchDecision::ReplaceSlice { reason, .. }
            | RefetchDecision::UseCache { reason, .. } => *reason,
        }
    }

    /// Maturity cutoff the decision was computed against, if any
    pub fn mature_cutoff(&self) -> Option<NaiveDate> {
        match self {
            RefetchDecision::GapsOnly { mature_cutoff, .. }
            | RefetchDecision::ReplaceSlice { mature_cutoff, .. } => *mature_cutoff,
            RefetchDecision::Partial { mature_cutoff, .. }
            | RefetchDecision::UseCache { mature_cutoff, .. } => Some(*mature_cutoff),
        }
    }

    /// Cooldown metadata when a refetch was suppressed
    pub fn cooldown(&self) -> Option<&CooldownInfo> {
        match self {
            RefetchDecision::GapsOnly { cooldown, .. } => cooldown.as_ref(),
            _ => None,
        }
    }

    /// Whether a cooldown downgraded this decision
    pub fn cooldown_applied(&self) -> bool {
        self.cooldown().is_some()
    }
}

/// Evaluate the refetch policy
///
/// # Arguments
/// * `existing` - Cached slice of the target family, if any
/// * `latency` - Edge latency config; `None` or disabled means no maturity
/// * `requested` - Window the caller wants answered
/// * `is_cohort_query` - Cohort vs window semantics
/// * `reference` - "Now"; the only temporal input
/// * `settings` - Cooldown duration
///
/// # Errors
/// Returns `DateParse` if the cached cohort slice holds unparseable dates.
pub fn should_refetch(
    existing: Option<&ParameterValue>,
    latency: Option<&LatencyConfig>,
    requested: &DateRange,
    is_cohort_query: bool,
    reference: DateTime<Utc>,
    settings: &RefetchSettings,
) -> Result<RefetchDecision> {
    let Some(latency) = latency.filter(|l| l.enabled) else {
        debug!("Refetch policy: latency tracking disabled, gaps only for {}", requested);
        return Ok(RefetchDecision::GapsOnly {
            reason: RefetchReason::LatencyDisabled,
            mature_cutoff: None,
            cooldown: None,
        });
    };

    let maturity_days = effective_maturity_days(latency, is_cohort_query);
    let cutoff = maturity_cutoff(reference.date_naive(), maturity_days);

    let decision = if is_cohort_query {
        evaluate_cohort(existing, maturity_days, cutoff, reference)?
    } else {
        evaluate_window(requested, cutoff)
    };

    debug!(
        "Refetch policy: {} ({}) for {} [maturity {}d, cutoff {}]",
        decision.kind().as_str(),
        decision.reason().as_str(),
        requested,
        maturity_days,
        format_date(cutoff)
    );

    Ok(apply_cooldown(decision, existing, reference, settings))
}

fn evaluate_window(requested: &DateRange, cutoff: NaiveDate) -> RefetchDecision {
    if requested.end < cutoff {
        return RefetchDecision::GapsOnly {
            reason: RefetchReason::WindowFullyMature,
            mature_cutoff: Some(cutoff),
            cooldown: None,
        };
    }

    RefetchDecision::Partial {
        reason: RefetchReason::ImmatureWindowTail,
        mature_cutoff: cutoff,
        refetch_window: DateRange {
            start: cutoff.max(requested.start),
            end: requested.end,
        },
    }
}

fn evaluate_cohort(
    existing: Option<&ParameterValue>,
    maturity_days: u32,
    cutoff: NaiveDate,
    reference: DateTime<Utc>,
) -> Result<RefetchDecision> {
    let replace = |reason, has_immature_cohorts, mature_cutoff| RefetchDecision::ReplaceSlice {
        reason,
        has_immature_cohorts,
        mature_cutoff,
    };

    let Some(slice) = existing else {
        return Ok(replace(RefetchReason::NoExistingSlice, false, None));
    };

    let dates = slice.parsed_dates()?;
    if dates.is_empty() {
        return Ok(replace(RefetchReason::NoCohortDates, false, None));
    }

    // A cohort is immature while its age is within the maturity horizon
    if dates.iter().any(|date| *date > cutoff) {
        return Ok(replace(RefetchReason::ImmatureCohorts, true, Some(cutoff)));
    }

    let fetched_long_ago = match slice.retrieved_at() {
        Some(retrieved_at) => reference - retrieved_at > Duration::days(i64::from(maturity_days)),
        None => true,
    };
    if fetched_long_ago {
        return Ok(replace(RefetchReason::StaleData, false, Some(cutoff)));
    }

    Ok(RefetchDecision::UseCache {
        reason: RefetchReason::CohortsMature,
        mature_cutoff: cutoff,
    })
}

/// Downgrade maturity-driven refetches that fire too soon after a fetch
fn apply_cooldown(
    decision: RefetchDecision,
    existing: Option<&ParameterValue>,
    reference: DateTime<Utc>,
    settings: &RefetchSettings,
) -> RefetchDecision {
    let (would_refetch_window, had_immature_cohorts) = match &decision {
        RefetchDecision::Partial { refetch_window, .. } => (Some(*refetch_window), false),
        RefetchDecision::ReplaceSlice {
            has_immature_cohorts,
            ..
        } => (None, *has_immature_cohorts),
        _ => return decision,
    };

    if settings.cooldown_minutes <= 0 {
        return decision;
    }
    let Some(retrieved_at) = existing.and_then(ParameterValue::retrieved_at) else {
        return decision;
    };

    let since_fetch = reference - retrieved_at;
    let past_cooldown = Duration::try_minutes(settings.cooldown_minutes).is_some_and(|cooldown| since_fetch > cooldown);
    if past_cooldown {
        return decision;
    }
    let minutes_since_fetch = since_fetch.num_minutes();

    info!(
        "Refetch cooldown: suppressing {} ({}), fetched {} min ago (cooldown {} min)",
        decision.kind().as_str(),
        decision.reason().as_str(),
        minutes_since_fetch,
        settings.cooldown_minutes
    );

    RefetchDecision::GapsOnly {
        reason: RefetchReason::RecentFetchCooldown,
        mature_cutoff: decision.mature_cutoff(),
        cooldown: Some(CooldownInfo {
            suppressed: decision.kind(),
            suppressed_reason: decision.reason(),
            would_refetch_window,
            had_immature_cohorts,
            minutes_since_fetch,
        }),
    }
}
