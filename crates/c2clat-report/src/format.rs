//! Text log format.
//!
//! The log is CSV with `#` comments. Run information lines start with
//! [`INFO_PREFIX`]; every other non-empty line is one valid sample:
//!
//! ```text
//! # Info: Core count: 4
//!    0,  1,      100,   101,     41.50 ns,  40.25,    3.20 GHz, 3.10,    3.00, 3.05
//! ```
//!
//! Columns: source index, destination index, source core id, destination
//! core id, source-direction ns, destination-direction ns, source frequency
//! before/after, destination frequency before/after. Disabled frequency
//! estimates print as `NaN`.

use std::fmt::Write as _;

use c2clat_core::LatencySample;
use c2clat_error::{LatencyError, Result};
use c2clat_probe::{FillerCalibration, PhysicalCoreId};
use serde::Serialize;

/// Prefix of every non-sample line written to the log.
pub const INFO_PREFIX: &str = "# Info:";

const SAMPLE_FIELDS: usize = 10;

/// One sample as a log line, without the trailing newline.
pub fn format_sample_line(sample: &LatencySample) -> String {
    format!(
        "  {:2}, {:2},    {:5}, {:5},    {:6.2} ns, {:6.2},    {:.2} GHz, {:.2},    {:.2}, {:.2}",
        sample.from_index,
        sample.to_index,
        sample.from_core_id,
        sample.to_core_id,
        sample.from_ns_per_iteration,
        sample.to_ns_per_iteration,
        sample.from_frequency_before_ghz,
        sample.from_frequency_after_ghz,
        sample.to_frequency_before_ghz,
        sample.to_frequency_after_ghz,
    )
}

/// `# Info: {text}`.
pub fn info_line(text: impl std::fmt::Display) -> String {
    format!("{INFO_PREFIX} {text}")
}

/// Parse one log line.
///
/// Blank lines and `#` comments yield `Ok(None)`. `line_number` is 1-based
/// and only used for the error.
pub fn parse_sample_line(line_number: usize, line: &str) -> Result<Option<LatencySample>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = trimmed.split(',').map(str::trim).collect();
    if fields.len() != SAMPLE_FIELDS {
        return Err(LatencyError::malformed(
            line_number,
            format!("expected {SAMPLE_FIELDS} fields, found {}", fields.len()),
        ));
    }

    let bad = |i: usize, name: &str| {
        LatencyError::malformed(line_number, format!("bad {name} `{}`", fields[i]))
    };
    let index = |i: usize, name: &str| -> Result<usize> {
        fields[i].parse().map_err(|_| bad(i, name))
    };
    let core = |i: usize, name: &str| -> Result<PhysicalCoreId> {
        fields[i]
            .parse()
            .map(PhysicalCoreId::new)
            .map_err(|_| bad(i, name))
    };
    let number = |i: usize, suffix: &str, name: &str| -> Result<f64> {
        let raw = fields[i].strip_suffix(suffix).unwrap_or(fields[i]).trim();
        raw.parse().map_err(|_| bad(i, name))
    };

    Ok(Some(LatencySample {
        from_index: index(0, "source index")?,
        to_index: index(1, "destination index")?,
        from_core_id: core(2, "source core id")?,
        to_core_id: core(3, "destination core id")?,
        from_ns_per_iteration: number(4, "ns", "source latency")?,
        to_ns_per_iteration: number(5, "", "destination latency")?,
        from_frequency_before_ghz: number(6, "GHz", "source frequency before")?,
        from_frequency_after_ghz: number(7, "", "source frequency after")?,
        to_frequency_before_ghz: number(8, "", "destination frequency before")?,
        to_frequency_after_ghz: number(9, "", "destination frequency after")?,
    }))
}

/// Everything the startup banner reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Banner {
    pub core_count: usize,
    pub iterations_per_experiment: u32,
    pub samples_per_pair: u32,
    pub clock_name: &'static str,
    pub clock_period_ns: f64,
    pub clock_overhead_ns: f64,
    pub filler: FillerCalibration,
}

impl Banner {
    /// Info lines, newline terminated.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", info_line(format_args!("Core count: {}", self.core_count)));
        let _ = writeln!(
            out,
            "{}",
            info_line(format_args!(
                "Iterations per experiment: {}",
                self.iterations_per_experiment
            ))
        );
        let _ = writeln!(
            out,
            "{}",
            info_line(format_args!("Experiments per core pair: {}", self.samples_per_pair))
        );
        let _ = writeln!(out, "{}", info_line(format_args!("Clock: {}", self.clock_name)));
        let _ = writeln!(
            out,
            "{}",
            info_line(format_args!("Clock period: {:.0}ns", self.clock_period_ns))
        );
        let _ = writeln!(
            out,
            "{}",
            info_line(format_args!("Clock query overhead: {:.0}ns", self.clock_overhead_ns))
        );
        let _ = writeln!(
            out,
            "{}",
            info_line(format_args!(
                "Filler workload duration: {:.0}ns",
                self.filler.duration_ns
            ))
        );
        let _ = writeln!(
            out,
            "{}",
            info_line(format_args!(
                "Filler workload latency equivalent: {:.0}ns",
                self.filler.latency_equivalent_ns(self.iterations_per_experiment)
            ))
        );
        out
    }
}

/// Closing line with the wall-clock time of the run.
pub fn total_time_line(seconds: f64) -> String {
    info_line(format_args!("Total time: {seconds:.2} s"))
}
