//! Error types shared by every c2clat crate.
//!
//! Only configuration, probing and thread management can fail. Migration
//! invalidation and role-claim misses are ordinary outcomes of a round and
//! are never reported through this type.

use std::io;

use thiserror::Error;

/// Primary error type for c2clat operations.
#[derive(Error, Debug)]
pub enum LatencyError {
    // === Configuration ===
    /// A run or probe configuration value is out of range.
    #[error("invalid configuration: {field}: {detail}")]
    InvalidConfig { field: &'static str, detail: String },

    /// Malformed command line.
    #[error("{0}")]
    Usage(String),

    // === Hardware ===
    /// The platform cannot provide a required probe primitive.
    #[error("unsupported on this platform: {what}")]
    ProbeUnsupported { what: &'static str },

    // === Threads ===
    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker {worker}: {source}")]
    WorkerSpawn {
        worker: usize,
        #[source]
        source: io::Error,
    },

    /// A worker thread panicked before the run finished.
    #[error("worker {worker} panicked")]
    WorkerPanicked { worker: usize },

    // === I/O and reports ===
    /// Reading a log or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A sample line in a captured log could not be parsed.
    #[error("malformed sample on line {line}: {detail}")]
    MalformedSample { line: usize, detail: String },

    /// Serializing a machine-readable record failed.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Rendering the latency heatmap failed.
    #[error("plot failed: {0}")]
    Plot(String),
}

impl LatencyError {
    /// Create an invalid-configuration error.
    pub fn invalid_config(field: &'static str, detail: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            detail: detail.into(),
        }
    }

    /// Create a usage error.
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Create a malformed-sample error.
    pub fn malformed(line: usize, detail: impl Into<String>) -> Self {
        Self::MalformedSample {
            line,
            detail: detail.into(),
        }
    }

    /// Whether the user can fix this by changing arguments or input.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. } | Self::Usage(_) | Self::MalformedSample { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Usage(_) => Some("Run with --help to list the accepted flags"),
            Self::InvalidConfig { .. } => {
                Some("Every count must be at least 1 and --cores at least 2")
            }
            Self::ProbeUnsupported { .. } => Some("Try --clock steady"),
            Self::MalformedSample { .. } => {
                Some("Pass a log captured from c2clat's default text output")
            }
            Self::Plot(_) => Some("Check that the plot's directory exists and is writable"),
            _ => None,
        }
    }
}

/// Result type alias using `LatencyError`.
pub type Result<T> = std::result::Result<T, LatencyError>;
