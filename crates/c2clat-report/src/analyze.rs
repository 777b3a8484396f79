//! Reading captured logs back.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use c2clat_core::LatencySample;
use c2clat_error::Result;

use crate::format::parse_sample_line;
use crate::summary::LatencySummary;

/// Every sample in a text log. Stops at the first malformed line.
pub fn parse_log<R: BufRead>(reader: R) -> Result<Vec<LatencySample>> {
    let mut samples = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if let Some(sample) = parse_sample_line(idx + 1, &line)? {
            samples.push(sample);
        }
    }
    Ok(samples)
}

/// Parse the log at `path` and summarize it.
pub fn analyze_file(path: &Path) -> Result<LatencySummary> {
    let file = File::open(path)?;
    let samples = parse_log(BufReader::new(file))?;
    tracing::info!(
        target: "c2clat.report",
        path = %path.display(),
        samples = samples.len(),
        "parsed sample log"
    );
    Ok(LatencySummary::from_samples(&samples))
}

#[cfg(test)]
mod tests {
    use super::*;
    use c2clat_error::LatencyError;

    const LOG: &str = "\
# Info: Core count: 2
# Info: Iterations per experiment: 2000
   0,  1,        4,     6,     40.00 ns,  41.00,    NaN GHz, NaN,    NaN, NaN

   1,  0,        6,     4,     39.00 ns,  38.00,    3.20 GHz, 3.21,    3.10, 3.11
# Info: Total time: 1.00 s
";

    #[test]
    fn parses_samples_and_skips_info() {
        let samples = parse_log(LOG.as_bytes()).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].from_index, 1);
        assert!((samples[1].to_ns_per_iteration - 38.0).abs() < 1e-12);
    }

    #[test]
    fn malformed_line_number_is_one_based() {
        let log = "# Info: x\n   0,  1, 4\n";
        let err = parse_log(log.as_bytes()).unwrap_err();
        assert!(matches!(err, LatencyError::MalformedSample { line: 2, .. }));
    }
}
