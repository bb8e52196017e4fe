//! dgn-cache library interface
//!
//! Maturity-aware slice cache core: refetch policy, coverage and gap
//! analysis, incremental fetch planning and time-series merge. Every
//! function is synchronous and pure; the caller supplies the reference time.

pub mod coverage;
pub mod forecast;
pub mod incremental;
pub mod maturity;
pub mod merge;
pub mod planner;
pub mod refetch_policy;

pub use coverage::{analyze_slice_coverage, compute_fetch_window, MatureCoverage, SliceCoverage};
pub use forecast::{compute_forecast, DailyCounts};
pub use incremental::{
    calculate_incremental_fetch, group_contiguous_dates, IncrementalFetch, IncrementalReason,
};
pub use maturity::{effective_maturity_days, maturity_cutoff, DEFAULT_T95_DAYS};
pub use merge::{merge_time_series, MergeOptions};
pub use planner::{RefetchPlan, RefetchPlanner};
pub use refetch_policy::{should_refetch, CooldownInfo, DecisionKind, RefetchDecision, RefetchReason};
