//! # DGN Common Library
//!
//! Shared code for the slice cache crates including:
//! - Calendar date parsing and canonical formatting
//! - Slice DSL generation, parsing and family isolation
//! - Parameter file data model (slices, time-series points, latency config)
//! - Configuration loading
//! - Error types

pub mod config;
pub mod dates;
pub mod error;
pub mod slice_dsl;
pub mod types;

pub use dates::{DateParseError, DateRange};
pub use error::{Error, Result};
pub use slice_dsl::SliceMode;
pub use types::{
    DataSource, LatencyConfig, LatencySummary, ParameterFile, ParameterValue, TimeSeriesPoint,
};
