//! Streaming samples to a writer as they are measured.

use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use c2clat_core::{LatencySample, RunReport, SampleSink};
use c2clat_error::{LatencyError, Result};
use parking_lot::Mutex;
use serde::Serialize;

use crate::format::{Banner, format_sample_line};
use crate::summary::LatencySummary;

/// Shape of the sample stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// CSV with `# Info:` comment lines.
    #[default]
    Text,
    /// One JSON object per line, tagged by `kind`.
    Jsonl,
}

impl FromStr for OutputFormat {
    type Err = LatencyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "jsonl" => Ok(Self::Jsonl),
            other => Err(LatencyError::usage(format!(
                "unknown format `{other}`, expected `text` or `jsonl`"
            ))),
        }
    }
}

/// A JSONL record. Non-finite floats serialize as `null`.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record<'a> {
    Banner(&'a Banner),
    Sample(&'a LatencySample),
    Report(&'a RunReport),
    Summary(&'a LatencySummary),
}

impl Record<'_> {
    pub fn to_json_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| LatencyError::Serialization(e.to_string()))
    }
}

/// [`SampleSink`] that writes each sample as soon as it is recorded,
/// optionally keeping a copy for a summary at the end.
///
/// Write errors cannot be returned from inside a streak; they are counted,
/// logged once, and reported by [`StreamSink::finish`].
pub struct StreamSink<W> {
    out: Mutex<W>,
    format: OutputFormat,
    retained: Option<Mutex<Vec<LatencySample>>>,
    write_errors: AtomicU64,
}

impl<W: Write + Send> StreamSink<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out: Mutex::new(out),
            format,
            retained: None,
            write_errors: AtomicU64::new(0),
        }
    }

    /// Also keep every recorded sample.
    #[must_use]
    pub fn retaining(mut self) -> Self {
        self.retained = Some(Mutex::new(Vec::new()));
        self
    }

    /// Write the run banner in the sink's format.
    pub fn write_banner(&self, banner: &Banner) -> Result<()> {
        let text = match self.format {
            OutputFormat::Text => banner.render(),
            OutputFormat::Jsonl => Record::Banner(banner).to_json_line()? + "\n",
        };
        let mut out = self.out.lock();
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    /// Write an arbitrary line (text format only; JSONL ignores it).
    pub fn write_info(&self, line: &str) -> Result<()> {
        if self.format == OutputFormat::Text {
            let mut out = self.out.lock();
            writeln!(out, "{line}")?;
            out.flush()?;
        }
        Ok(())
    }

    /// Write the run report as a final JSONL record (JSONL format only).
    pub fn write_report(&self, report: &RunReport) -> Result<()> {
        if self.format == OutputFormat::Jsonl {
            let line = Record::Report(report).to_json_line()?;
            let mut out = self.out.lock();
            writeln!(out, "{line}")?;
            out.flush()?;
        }
        Ok(())
    }

    /// Write a summary: `#`-commented text, or a JSONL record.
    pub fn write_summary(&self, summary: &LatencySummary, detailed: bool) -> Result<()> {
        let text = match self.format {
            OutputFormat::Text => summary
                .render(detailed)
                .lines()
                .map(|line| format!("# {line}\n"))
                .collect::<String>(),
            OutputFormat::Jsonl => Record::Summary(summary).to_json_line()? + "\n",
        };
        let mut out = self.out.lock();
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    /// Copy of the samples kept so far; empty unless [`retaining`](Self::retaining).
    pub fn retained(&self) -> Vec<LatencySample> {
        self.retained
            .as_ref()
            .map(|kept| kept.lock().clone())
            .unwrap_or_default()
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    /// Flush, and hand back the writer and retained samples. Fails if any
    /// sample could not be written.
    pub fn finish(self) -> Result<(W, Vec<LatencySample>)> {
        let errors = self.write_errors.into_inner();
        let mut out = self.out.into_inner();
        out.flush()?;
        if errors > 0 {
            return Err(LatencyError::Io(std::io::Error::other(format!(
                "{errors} samples could not be written"
            ))));
        }
        let samples = self.retained.map(Mutex::into_inner).unwrap_or_default();
        Ok((out, samples))
    }

    fn write_sample(&self, sample: &LatencySample) -> Result<()> {
        let line = match self.format {
            OutputFormat::Text => format_sample_line(sample),
            OutputFormat::Jsonl => Record::Sample(sample).to_json_line()?,
        };
        let mut out = self.out.lock();
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> SampleSink for StreamSink<W> {
    fn record(&self, sample: &LatencySample) {
        if let Some(retained) = &self.retained {
            retained.lock().push(*sample);
        }
        if let Err(err) = self.write_sample(sample) {
            if self.write_errors.fetch_add(1, Ordering::Relaxed) == 0 {
                tracing::warn!(target: "c2clat.report", error = %err, "failed to write sample");
            }
        }
    }
}
