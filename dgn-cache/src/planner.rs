//! Refetch planning for one request
//!
//! Composes the maturity model, the refetch policy, the coverage analyzer and
//! incremental fetch planning the way an orchestrator consults them before
//! calling a provider.

use chrono::{DateTime, Utc};
use dgn_common::config::RefetchSettings;
use dgn_common::dates::DateRange;
use dgn_common::slice_dsl::SliceFamily;
use dgn_common::{LatencyConfig, ParameterValue, Result, SliceMode};
use serde::Serialize;
use tracing::{debug, info};

use crate::coverage::{analyze_slice_coverage, compute_fetch_window, SliceCoverage};
use crate::incremental::{calculate_incremental_fetch, IncrementalFetch};
use crate::refetch_policy::{should_refetch, RefetchDecision};

/// Everything the orchestrator needs to decide what to fetch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefetchPlan {
    pub decision: RefetchDecision,
    pub coverage: SliceCoverage,
    /// Window to request from the provider, `None` when the cache answers
    pub fetch_window: Option<DateRange>,
    pub incremental: IncrementalFetch,
}

/// Stateless planner bound to one set of refetch settings
#[derive(Debug, Clone)]
pub struct RefetchPlanner {
    settings: RefetchSettings,
}

impl RefetchPlanner {
    pub fn new(settings: RefetchSettings) -> Self {
        Self { settings }
    }

    /// Plan a fetch for one slice family
    ///
    /// # Arguments
    /// * `existing_slices` - Every stored slice of the parameter
    /// * `latency` - Edge latency config
    /// * `requested` - Window the caller wants answered
    /// * `target_slice_dsl` - Family to answer from; window mode unless it says `cohort(...)`
    /// * `reference` - "Now"
    /// * `signature` - Signature of the query that would be sent
    /// * `bust_cache` - Ignore the cache entirely
    ///
    /// # Errors
    /// Returns `DateParse` if a considered slice holds unparseable dates.
    #[allow(clippy::too_many_arguments)]
    pub fn plan(
        &self,
        existing_slices: &[ParameterValue],
        latency: Option<&LatencyConfig>,
        requested: &DateRange,
        target_slice_dsl: &str,
        reference: DateTime<Utc>,
        signature: Option<&str>,
        bust_cache: bool,
    ) -> Result<RefetchPlan> {
        let family = SliceFamily::from_dsl(target_slice_dsl, SliceMode::Window);
        let is_cohort = family.mode == SliceMode::Cohort;

        // Newest slice of the family; after any merge there is at most one
        let existing = existing_slices
            .iter()
            .filter(|slice| family.contains(slice))
            .max_by_key(|slice| slice.retrieved_at());

        let decision = should_refetch(
            existing,
            latency,
            requested,
            is_cohort,
            reference,
            &self.settings,
        )?;

        // Without a maturity cutoff every requested day counts as mature
        let cutoff = decision.mature_cutoff().unwrap_or(requested.end);
        let coverage = analyze_slice_coverage(existing, requested, cutoff)?;

        let fetch_window = if bust_cache {
            info!("Cache bust requested, fetching all of {}", requested);
            Some(*requested)
        } else {
            compute_fetch_window(&decision, &coverage, requested)
        };

        let incremental = calculate_incremental_fetch(
            existing_slices,
            requested,
            signature,
            bust_cache,
            target_slice_dsl,
        )?;

        debug!(
            "Plan for {} {}: {} ({}), fetch window {}",
            family.mode.as_str(),
            requested,
            decision.kind().as_str(),
            decision.reason().as_str(),
            fetch_window.map_or_else(|| "none".to_string(), |window| window.to_string())
        );

        Ok(RefetchPlan {
            decision,
            coverage,
            fetch_window,
            incremental,
        })
    }
}
