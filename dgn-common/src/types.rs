//! Parameter file data model
//!
//! These types mirror the on-disk parameter file. Field names follow the file
//! format (`sliceDSL` is camelCase there, everything else snake_case), and
//! unknown provenance fields are carried through untouched.
//!
//! Stored slice dates stay as text: slices outside the family being merged
//! must round-trip byte for byte, including legacy ISO dates. Fetched points
//! arrive already parsed.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::dates::{parse_date, serde_day, DateRange};
use crate::slice_dsl::{parse_slice_dsl, SliceMode};
use crate::Result;

/// Provenance of a stored slice
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    /// Provider name (e.g. "amplitude")
    #[serde(rename = "type")]
    pub source_type: String,

    /// When the provider was queried; drives cooldown and staleness
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieved_at: Option<DateTime<Utc>>,

    /// Query text sent to the provider, for diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_query: Option<String>,

    /// Provider-specific fields the core does not interpret
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Slice-level latency summary, supplied by the caller at merge time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub median_lag_days: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_lag_days: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t95: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_t95: Option<f64>,
    /// Fraction of eventual conversions already observed (0.0-1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completeness: Option<f64>,
}

/// Latency tracking configuration of an edge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyConfig {
    /// Whether maturity tracking applies at all
    #[serde(default, alias = "latency_parameter")]
    pub enabled: bool,

    /// 95th percentile lag of this edge, in days
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t95: Option<f64>,

    /// 95th percentile lag from the cohort anchor through this edge, in days
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_t95: Option<f64>,

    /// Node that defines cohort entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_node_id: Option<String>,
}

/// One fetched day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    #[serde(with = "serde_day")]
    pub date: NaiveDate,
    pub n: i64,
    pub k: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub median_lag_days: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_lag_days: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_median_lag_days: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_mean_lag_days: Option<f64>,
}

impl TimeSeriesPoint {
    /// Point with counts only
    pub fn new(date: NaiveDate, n: i64, k: i64) -> Self {
        Self {
            date,
            n,
            k,
            p: None,
            median_lag_days: None,
            mean_lag_days: None,
            anchor_median_lag_days: None,
            anchor_mean_lag_days: None,
        }
    }
}

/// One stored slice of a parameter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdev: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<i64>,

    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default)]
    pub n_daily: Vec<i64>,
    #[serde(default)]
    pub k_daily: Vec<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cohort_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cohort_to: Option<String>,

    /// Canonical slice identity, regenerated on every merge
    #[serde(rename = "sliceDSL", default)]
    pub slice_dsl: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_signature: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<DataSource>,

    /// Maturity-excluded, recency-weighted baseline (window mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast: Option<f64>,

    // Per-day latency arrays (cohort mode only), aligned with `dates`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub median_lag_days: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_lag_days: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_median_lag_days: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_mean_lag_days: Option<Vec<f64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencySummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_latency: Option<LatencySummary>,
}

impl ParameterValue {
    /// Aggregation mode
    ///
    /// The DSL decides; legacy slices without a mode clause fall back to
    /// whichever `*_from` field is populated.
    pub fn mode(&self) -> SliceMode {
        match parse_slice_dsl(&self.slice_dsl).mode {
            Some(mode) => mode,
            None if self.cohort_from.is_some() => SliceMode::Cohort,
            None => SliceMode::Window,
        }
    }

    /// Parse the stored `dates` array
    pub fn parsed_dates(&self) -> Result<Vec<NaiveDate>> {
        self.dates
            .iter()
            .map(|date| parse_date(date).map_err(Into::into))
            .collect()
    }

    /// Date span the slice claims to cover
    ///
    /// Uses the mode's `*_from`/`*_to` fields when both are present, otherwise
    /// the extremes of `dates`. `None` for a slice with no dates at all.
    pub fn stored_span(&self) -> Result<Option<DateRange>> {
        let (from, to) = match self.mode() {
            SliceMode::Window => (&self.window_from, &self.window_to),
            SliceMode::Cohort => (&self.cohort_from, &self.cohort_to),
        };

        if let (Some(from), Some(to)) = (from, to) {
            return Ok(Some(DateRange::parse(from, to)?));
        }

        let dates = self.parsed_dates()?;
        match (dates.iter().min(), dates.iter().max()) {
            (Some(&start), Some(&end)) => Ok(Some(DateRange { start, end })),
            _ => Ok(None),
        }
    }

    /// Whether aggregate totals (`mean` and `n`) are present
    pub fn has_aggregate(&self) -> bool {
        self.mean.is_some() && self.n.is_some()
    }

    /// Provider query time, if recorded
    pub fn retrieved_at(&self) -> Option<DateTime<Utc>> {
        self.data_source.as_ref().and_then(|source| source.retrieved_at)
    }
}

/// Parameter file as read by the inspection tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub values: Vec<ParameterValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyConfig>,

    /// Fields owned by other tools (graph metadata, notes, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ParameterFile {
    /// Decode a parameter file from JSON text
    ///
    /// # Errors
    /// Returns `Error::Json` when the text is not a valid parameter file.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and decode a parameter file
    ///
    /// # Errors
    /// Returns `Error::Io` if the file cannot be read, `Error::Json` if it
    /// cannot be decoded.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
