//! Output side of c2clat: the sample log format, its parser, and the
//! per-pair statistics computed from a log, and the heatmap drawn from them.
//!
//! The text format is the contract between a measuring run and later
//! analysis; `analyze` reads exactly what `format` writes.

pub mod analyze;
pub mod format;
pub mod output;
pub mod plot;
pub mod summary;

pub use analyze::{analyze_file, parse_log};
pub use format::{
    Banner, INFO_PREFIX, format_sample_line, info_line, parse_sample_line, total_time_line,
};
pub use output::{OutputFormat, Record, StreamSink};
pub use plot::{CpuLabel, default_plot_path, heat_color, write_heatmap};
pub use summary::{LatencySummary, PairSummary, SampleCounts, quantile};
