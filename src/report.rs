//! # Report Parser
//!
//! Turns the free-form text a wrk2-style load generator prints into a
//! structured [`TrialResult`]: two latency histograms and a throughput
//! figure.
//!
//! ## Report shape
//!
//! ```text
//!   Latency Distribution (HdrHistogram - Recorded Latency)
//!  50.000%    1.23ms
//!  ...
//!   Detailed Percentile spectrum:
//!        Value   Percentile   TotalCount 1/(1-Percentile)
//!
//!        0.456     0.000000            1         1.00
//!        1.230     0.500000         9912         2.00
//!        5.208     1.000000        19800          inf
//! #[Mean    =        0.915, StdDeviation   =        0.448]
//! ----------------------------------------------------------
//! ```
//!
//! A section opens at its header line and closes at the first separator
//! line of dashes. Inside a section every line is tried as a four-field
//! histogram row; lines of any other shape are skipped. Two row layouts
//! are understood:
//!
//! - **Spectrum rows**: `value percentile count remainder`, where the
//!   percentile is already a fraction and the value is in milliseconds.
//! - **Percent-first rows**: `P% value<unit> count R%`, where the
//!   percentile is normalised to a fraction and the value converted to
//!   milliseconds.
//!
//! Histogram keys are therefore always fractions in `[0, 1]`: a
//! `50.000%` row is stored under `0.5`, never `50.0`, and serialises as
//! `"0.5"` in the result file.
//!
//! `remainder` may be a decimal or an `inf` marker. The throughput figure
//! comes from the first `Requests/sec: <number>` anywhere in the text,
//! where the number is an unsigned integer or decimal (`nan`, `inf` and
//! negative values are ignored).
//!
//! Parsing is pure: the same text always yields the same result.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::cmp::Ordering;
use regex::Regex;
use std::collections::BTreeMap;

use crate::error::SweepResult;

/// Header of the coordination-omission corrected section.
pub const CORRECTED_HEADER: &str = "Latency Distribution (HdrHistogram - Recorded Latency)";

/// Header of the uncorrected section.
pub const UNCORRECTED_HEADER: &str = "Latency Distribution (HdrHistogram - Uncorrected Latency (measured without taking delayed starts into account))";

/// Line that closes a histogram section.
pub const SECTION_SEPARATOR: &str = "----------------------------------------------------------";

/// Label preceding the achieved throughput.
pub const THROUGHPUT_LABEL: &str = "Requests/sec:";

/// A quantile in `[0, 1]`, totally ordered so it can key a map.
#[derive(Debug, Clone, Copy)]
pub struct Quantile(f64);

impl PartialEq for Quantile {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Quantile {}

impl PartialOrd for Quantile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Quantile -> latency (milliseconds).
///
/// Only the rows the report exposed are present; a missing median is a
/// legitimate outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyHistogram {
    entries: BTreeMap<Quantile, f64>,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `latency_ms` at `quantile`, replacing any earlier row.
    pub fn insert(&mut self, quantile: f64, latency_ms: f64) {
        self.entries.insert(Quantile(quantile), latency_ms);
    }

    pub fn get(&self, quantile: f64) -> Option<f64> {
        self.entries.get(&Quantile(quantile)).copied()
    }

    /// Latency at the 50th percentile, if the report listed it.
    pub fn median(&self) -> Option<f64> {
        self.get(0.5)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending quantile order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.entries.iter().map(|(q, v)| (q.0, *v))
    }
}

// JSON object keys must be strings; `{:?}` keeps the fractional part
// (`1.0`, not `1`) so every key reads as a quantile.
impl Serialize for LatencyHistogram {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (quantile, latency) in &self.entries {
            map.serialize_entry(&format!("{:?}", quantile.0), latency)?;
        }
        map.end()
    }
}

/// Everything one trial produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrialResult {
    /// Coordination-omission compensated latencies.
    pub corrected: LatencyHistogram,
    /// Latencies as measured.
    pub uncorrected: LatencyHistogram,
    /// Achieved requests per second; `None` when the report had no
    /// parseable throughput line.
    pub rps: Option<f64>,
    /// Set when the subject never answered the readiness probe and the load
    /// was applied anyway.
    pub readiness_timed_out: bool,
}

#[derive(Clone, Copy)]
enum Section {
    Corrected,
    Uncorrected,
}

/// Spectrum row: `1.230   0.500000   9912   2.00`, or `inf` in the last column.
const SPECTRUM_ROW: &str =
    r"^\s*([0-9]+\.[0-9]+)\s+([0-9]+\.[0-9]+)\s+[0-9]+\s+(?:[0-9]+\.[0-9]+|inf)\s*$";

/// Percent-first row: `50.000%   12.345ms   100   0.000%`.
const PERCENT_ROW: &str =
    r"^\s*([0-9]+\.[0-9]+)%\s+([0-9]+\.[0-9]+)(us|ms|s|m)?\s+[0-9]+\s+(?:[0-9]+\.[0-9]+%|inf)\s*$";

/// Compiled row and throughput patterns.
///
/// Build one per sweep and reuse it for every report.
#[derive(Debug, Clone)]
pub struct ReportParser {
    spectrum_row: Regex,
    percent_row: Regex,
    throughput: Regex,
}

impl ReportParser {
    pub fn new() -> SweepResult<Self> {
        let throughput = format!(
            r"{}\s+([0-9]+(?:\.[0-9]+)?)(?:\s|$)",
            regex::escape(THROUGHPUT_LABEL)
        );
        Ok(Self {
            spectrum_row: Regex::new(SPECTRUM_ROW)?,
            percent_row: Regex::new(PERCENT_ROW)?,
            throughput: Regex::new(&throughput)?,
        })
    }

    /// Parse a load generator report.
    pub fn parse(&self, raw: &str) -> TrialResult {
        let mut result = TrialResult::default();
        let mut section = None;

        for line in raw.lines() {
            if line.contains(UNCORRECTED_HEADER) {
                section = Some(Section::Uncorrected);
            } else if line.contains(CORRECTED_HEADER) {
                section = Some(Section::Corrected);
            }
            if line.contains(SECTION_SEPARATOR) {
                section = None;
            }

            let histogram = match section {
                Some(Section::Corrected) => &mut result.corrected,
                Some(Section::Uncorrected) => &mut result.uncorrected,
                None => continue,
            };
            if let Some((quantile, latency)) = self.parse_row(line) {
                histogram.insert(quantile, latency);
            }
        }

        result.rps = self.parse_throughput(raw);
        result
    }

    /// Achieved requests per second from the first well-formed throughput
    /// figure. Only unsigned integers and decimals qualify.
    pub fn parse_throughput(&self, raw: &str) -> Option<f64> {
        self.throughput
            .captures_iter(raw)
            .find_map(|caps| caps[1].parse::<f64>().ok())
    }

    /// Parse one histogram row into `(quantile, latency_ms)`.
    pub fn parse_row(&self, line: &str) -> Option<(f64, f64)> {
        if let Some(caps) = self.spectrum_row.captures(line) {
            let latency = caps[1].parse::<f64>().ok()?;
            let quantile = caps[2].parse::<f64>().ok()?;
            return in_unit_interval(quantile).then_some((quantile, latency));
        }

        let caps = self.percent_row.captures(line)?;
        let quantile = caps[1].parse::<f64>().ok()? / 100.0;
        let value = caps[2].parse::<f64>().ok()?;
        let latency = to_millis(value, caps.get(3).map_or("ms", |unit| unit.as_str()));
        in_unit_interval(quantile).then_some((quantile, latency))
    }
}

fn in_unit_interval(quantile: f64) -> bool {
    (0.0..=1.0).contains(&quantile)
}

/// `12.345 ms` -> 12.345, `850.00 us` -> 0.85, `1.02 s` -> 1020.0.
fn to_millis(value: f64, unit: &str) -> f64 {
    match unit {
        "us" => value / 1_000.0,
        "s" => value * 1_000.0,
        "m" => value * 60_000.0,
        _ => value,
    }
}
