//! dgn-cache - slice cache inspection tool
//!
//! Reads a parameter file and prints, as JSON on stdout:
//! - `plan`: the refetch plan for a requested window
//! - `merge`: the parameter file with fetched points merged in
//!
//! Never writes files. Logs go to stderr.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use dgn_cache::{merge_time_series, MergeOptions, RefetchPlanner};
use dgn_common::config::{load_config, TomlConfig};
use dgn_common::dates::{parse_date, DateRange};
use dgn_common::slice_dsl::{build_slice_dsl, parse_slice_dsl};
use dgn_common::{DataSource, ParameterFile, SliceMode, TimeSeriesPoint};
use serde::Serialize;
use tracing::info;

/// Command-line arguments for dgn-cache
#[derive(Parser, Debug)]
#[command(name = "dgn-cache")]
#[command(about = "Inspect refetch plans and merges for cached parameter slices")]
#[command(version)]
struct Args {
    /// Configuration file (overrides DGN_CONFIG and the platform default)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the refetch plan for a requested window
    Plan {
        /// Parameter file (JSON)
        #[arg(long, value_name = "FILE")]
        param: PathBuf,

        /// First requested day
        #[arg(long)]
        from: String,

        /// Last requested day (inclusive)
        #[arg(long)]
        to: String,

        /// Slice DSL naming the context dimensions (and cohort anchor)
        #[arg(long, default_value = "")]
        slice: String,

        /// Cohort semantics instead of window
        #[arg(long)]
        cohort: bool,

        /// Reference time (RFC 3339 or a date); defaults to now
        #[arg(long)]
        reference: Option<String>,

        /// Signature of the query that would be sent
        #[arg(long)]
        signature: Option<String>,

        /// Ignore cached data
        #[arg(long)]
        bust_cache: bool,
    },

    /// Print the parameter file with fetched points merged in
    Merge {
        /// Parameter file (JSON)
        #[arg(long, value_name = "FILE")]
        param: PathBuf,

        /// Fetched points (JSON array)
        #[arg(long, value_name = "FILE")]
        points: PathBuf,

        /// Slice DSL of the family being merged
        #[arg(long)]
        slice: String,

        /// First fetched day
        #[arg(long)]
        from: String,

        /// Last fetched day (inclusive)
        #[arg(long)]
        to: String,

        /// Cohort semantics instead of window
        #[arg(long)]
        cohort: bool,

        /// Recompute the window forecast
        #[arg(long)]
        recompute_forecast: bool,

        /// Reference time (RFC 3339 or a date); defaults to now
        #[arg(long)]
        reference: Option<String>,

        /// Provider recorded in the merged slice's data_source; its
        /// retrieved_at is the reference time
        #[arg(long, value_name = "TYPE", default_value = "dgn-cache")]
        source: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        "Starting dgn-cache v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    match args.command {
        Command::Plan {
            param,
            from,
            to,
            slice,
            cohort,
            reference,
            signature,
            bust_cache,
        } => {
            let file = read_parameter_file(&param)?;
            let requested = DateRange::parse(&from, &to).context("Invalid requested window")?;
            let reference = parse_reference(reference.as_deref())?;
            let target = target_slice_dsl(&slice, cohort, &requested, &file);

            let plan = RefetchPlanner::new(config.refetch.clone())
                .plan(
                    &file.values,
                    file.latency.as_ref(),
                    &requested,
                    &target,
                    reference,
                    signature.as_deref(),
                    bust_cache,
                )
                .with_context(|| format!("Failed to plan {} for {}", target, param.display()))?;

            print_json(&plan)
        }

        Command::Merge {
            param,
            points,
            slice,
            from,
            to,
            cohort,
            recompute_forecast,
            reference,
            source,
        } => {
            let mut file = read_parameter_file(&param)?;
            let new_points: Vec<TimeSeriesPoint> = read_json(&points)?;
            let window = DateRange::parse(&from, &to).context("Invalid fetched window")?;
            let reference = parse_reference(reference.as_deref())?;
            let target = target_slice_dsl(&slice, cohort, &window, &file);

            let options = merge_options(&config, &file, cohort, recompute_forecast, &source, reference);
            file.values = merge_time_series(&file.values, &new_points, &window, None, &target, &options)
                .with_context(|| format!("Failed to merge {} into {}", points.display(), param.display()))?;

            print_json(&file)
        }
    }
}

fn merge_options(
    config: &TomlConfig,
    file: &ParameterFile,
    cohort: bool,
    recompute_forecast: bool,
    source: &str,
    reference: DateTime<Utc>,
) -> MergeOptions {
    MergeOptions {
        is_cohort_mode: cohort,
        latency_config: file.latency.clone(),
        recompute_forecast,
        data_source: Some(DataSource {
            source_type: source.to_string(),
            retrieved_at: Some(reference),
            ..Default::default()
        }),
        forecast_half_life_days: config.refetch.forecast_half_life_days,
        ..MergeOptions::new(reference)
    }
}

/// Canonical DSL for the requested family
///
/// `--cohort` wins over the mode written in `--slice`; the cohort anchor
/// comes from `--slice`, else from the file's latency config.
fn target_slice_dsl(slice: &str, cohort: bool, range: &DateRange, file: &ParameterFile) -> String {
    let parsed = parse_slice_dsl(slice);
    let mode = if cohort {
        SliceMode::Cohort
    } else {
        parsed.mode.unwrap_or(SliceMode::Window)
    };
    let anchor = parsed.anchor.or_else(|| {
        file.latency
            .as_ref()
            .and_then(|latency| latency.anchor_node_id.clone())
    });

    build_slice_dsl(mode, range, anchor.as_deref(), &parsed.dimensions)
}

/// Parse `--reference`: RFC 3339, or a bare date meaning midnight UTC
fn parse_reference(reference: Option<&str>) -> Result<DateTime<Utc>> {
    let Some(text) = reference else {
        return Ok(Utc::now());
    };

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
        return Ok(timestamp.with_timezone(&Utc));
    }

    let day = parse_date(text).with_context(|| format!("Invalid reference time: {}", text))?;
    let midnight = day
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("Invalid reference time: {}", text))?;
    Ok(Utc.from_utc_datetime(&midnight))
}

fn read_parameter_file(path: &Path) -> Result<ParameterFile> {
    ParameterFile::load(path).with_context(|| format!("Failed to load parameter file {}", path.display()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_options_stamp_provenance() {
        let reference = Utc.with_ymd_and_hms(2025, 12, 17, 12, 0, 0).unwrap();
        let options = merge_options(&TomlConfig::default(), &ParameterFile::default(), false, false, "amplitude", reference);

        let source = options.data_source.unwrap();
        assert_eq!(source.source_type, "amplitude");
        assert_eq!(source.retrieved_at, Some(reference));
        assert_eq!(options.reference_time, reference);
    }

    #[test]
    fn test_merged_slice_gets_cooldown_timestamp() {
        let reference = Utc.with_ymd_and_hms(2025, 12, 17, 12, 0, 0).unwrap();
        let file = ParameterFile::default();
        let options = merge_options(&TomlConfig::default(), &file, false, false, "dgn-cache", reference);
        let window = DateRange::parse("16-Dec-25", "16-Dec-25").unwrap();
        let points = vec![TimeSeriesPoint::new(window.start, 10, 1)];

        let merged = merge_time_series(&file.values, &points, &window, None, "window(16-Dec-25:16-Dec-25)", &options).unwrap();

        assert_eq!(merged[0].retrieved_at(), Some(reference));
    }

    #[test]
    fn test_parse_reference_accepts_bare_date() {
        let reference = parse_reference(Some("17-Dec-25")).unwrap();
        assert_eq!(reference, Utc.with_ymd_and_hms(2025, 12, 17, 0, 0, 0).unwrap());
        assert!(parse_reference(Some("yesterday")).is_err());
    }
}
