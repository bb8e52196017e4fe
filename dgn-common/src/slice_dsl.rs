//! Slice DSL codec and default slice isolation
//!
//! A slice DSL string names exactly one stored slice:
//!
//! ```text
//! window(<from>:<to>)[.context(<dim>=<value>)...][.case(<dim>=<value>)...]
//! cohort([<anchor>,]<from>:<to>)[.context(<dim>=<value>)...]
//! ```
//!
//! Clauses are separated by top-level dots (dots inside parentheses belong to
//! the value). Context and case clauses form the *dimension string*; together
//! with the mode it is the slice family key. Dimension clauses accept either
//! `dim=value` or `dim:value` on input and are always emitted as `dim=value`,
//! sorted, so two spellings of the same family compare equal.
//!
//! Clauses this module does not understand (`visited(...)`, `exclude(...)`)
//! are ignored for family identity.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dates::{format_date, parse_date, DateRange};
use crate::types::ParameterValue;

/// Aggregation mode of a slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceMode {
    /// Keyed by calendar date range, incrementally extended
    Window,
    /// Keyed by entry-cohort date range, full history retained
    Cohort,
}

impl SliceMode {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SliceMode::Window => "window",
            SliceMode::Cohort => "cohort",
        }
    }
}

/// Decomposed slice DSL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSliceDsl {
    /// `None` when the DSL carries neither `window(...)` nor `cohort(...)`
    pub mode: Option<SliceMode>,
    /// Cohort anchor node id (`cohort(anchor,from:to)`)
    pub anchor: Option<String>,
    /// Only set when both endpoints are absolute dates
    pub range: Option<DateRange>,
    /// Canonical, sorted context/case clauses joined by `.`
    pub dimensions: String,
}

/// Parse a slice DSL string
///
/// Never fails: relative or malformed window arguments simply leave `range`
/// empty, since the caller only needs the family identity in that case.
pub fn parse_slice_dsl(dsl: &str) -> ParsedSliceDsl {
    let mut parsed = ParsedSliceDsl::default();
    let mut dimensions: Vec<String> = Vec::new();

    for clause in split_top_level(dsl.trim()) {
        let Some((name, args)) = split_clause(clause) else {
            continue;
        };

        match name {
            "window" => {
                parsed.mode = Some(SliceMode::Window);
                parsed.range = parse_range_args(args);
            }
            "cohort" => {
                parsed.mode = Some(SliceMode::Cohort);
                let range_args = match args.split_once(',') {
                    Some((anchor, rest)) => {
                        let anchor = anchor.trim();
                        if !anchor.is_empty() {
                            parsed.anchor = Some(anchor.to_string());
                        }
                        rest
                    }
                    None => args,
                };
                parsed.range = parse_range_args(range_args);
            }
            "context" | "case" => dimensions.push(canonical_dimension(name, args)),
            "contextAny" => dimensions.push(format!("contextAny({})", args.trim())),
            _ => {}
        }
    }

    dimensions.sort();
    dimensions.dedup();
    parsed.dimensions = dimensions.join(".");
    parsed
}

/// Extract the canonical dimension string of a slice DSL
///
/// ```
/// use dgn_common::slice_dsl::extract_dimensions;
///
/// assert_eq!(
///     extract_dimensions("window(1-Dec-25:7-Dec-25).context(device:mobile).context(channel=paid)"),
///     "context(channel=paid).context(device=mobile)"
/// );
/// assert_eq!(extract_dimensions("cohort(1-Dec-25:7-Dec-25)"), "");
/// ```
pub fn extract_dimensions(dsl: &str) -> String {
    parse_slice_dsl(dsl).dimensions
}

/// Build canonical slice DSL text
///
/// ```
/// use dgn_common::dates::DateRange;
/// use dgn_common::slice_dsl::{build_slice_dsl, SliceMode};
///
/// let range = DateRange::parse("2025-12-01", "2025-12-07").unwrap();
/// assert_eq!(
///     build_slice_dsl(SliceMode::Cohort, &range, Some("landing"), "context(channel=paid)"),
///     "cohort(landing,1-Dec-25:7-Dec-25).context(channel=paid)"
/// );
/// ```
pub fn build_slice_dsl(
    mode: SliceMode,
    range: &DateRange,
    anchor: Option<&str>,
    dimensions: &str,
) -> String {
    let from = format_date(range.start);
    let to = format_date(range.end);

    let mut dsl = match (mode, anchor) {
        (SliceMode::Window, _) => format!("window({}:{})", from, to),
        (SliceMode::Cohort, Some(anchor)) if !anchor.is_empty() => {
            format!("cohort({},{}:{})", anchor, from, to)
        }
        (SliceMode::Cohort, _) => format!("cohort({}:{})", from, to),
    };

    if !dimensions.is_empty() {
        dsl.push('.');
        dsl.push_str(dimensions);
    }
    dsl
}

/// Slice family identity: `(mode, dimension string)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SliceFamily {
    pub mode: SliceMode,
    pub dimensions: String,
}

impl SliceFamily {
    /// Family named by a DSL; `default_mode` applies when the DSL has no mode clause
    pub fn from_dsl(dsl: &str, default_mode: SliceMode) -> Self {
        let parsed = parse_slice_dsl(dsl);
        Self {
            mode: parsed.mode.unwrap_or(default_mode),
            dimensions: parsed.dimensions,
        }
    }

    /// Family of a stored slice
    pub fn of(value: &ParameterValue) -> Self {
        Self {
            mode: value.mode(),
            dimensions: extract_dimensions(&value.slice_dsl),
        }
    }

    /// Whether a stored slice belongs to this family
    pub fn contains(&self, value: &ParameterValue) -> bool {
        value.mode() == self.mode && extract_dimensions(&value.slice_dsl) == self.dimensions
    }

    /// True when the family carries no context/case dimensions
    pub fn is_uncontexted(&self) -> bool {
        self.dimensions.is_empty()
    }
}

/// Select the stored slices that answer a query DSL
///
/// Matches on dimension string, and on mode when the query names one.
pub fn isolate_slice<'a>(slices: &'a [ParameterValue], query_dsl: &str) -> Vec<&'a ParameterValue> {
    let query = parse_slice_dsl(query_dsl);
    slices
        .iter()
        .filter(|value| query.mode.map_or(true, |mode| value.mode() == mode))
        .filter(|value| extract_dimensions(&value.slice_dsl) == query.dimensions)
        .collect()
}

fn split_top_level(dsl: &str) -> Vec<&str> {
    let mut clauses = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (idx, c) in dsl.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '.' if depth == 0 => {
                clauses.push(&dsl[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    clauses.push(&dsl[start..]);

    clauses
        .into_iter()
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .collect()
}

fn split_clause(clause: &str) -> Option<(&str, &str)> {
    let open = clause.find('(')?;
    let inner = clause[open + 1..].strip_suffix(')')?;
    Some((clause[..open].trim(), inner))
}

fn parse_range_args(args: &str) -> Option<DateRange> {
    let (from, to) = args.split_once(':')?;
    let from: NaiveDate = parse_date(from).ok()?;
    let to: NaiveDate = parse_date(to).ok()?;
    DateRange::new(from, to).ok()
}

fn canonical_dimension(name: &str, args: &str) -> String {
    match args.split_once(['=', ':']) {
        Some((key, value)) => format!("{}({}={})", name, key.trim(), value.trim()),
        None => format!("{}({})", name, args.trim()),
    }
}
