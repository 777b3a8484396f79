//! Per-pair latency statistics and the median matrix.
//!
//! Pairs are keyed by physical core ids, not logical indices, so logs from
//! different runs on the same machine line up. Only the destination-direction
//! latency is summarized.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use c2clat_core::LatencySample;
use c2clat_probe::PhysicalCoreId;
use serde::Serialize;

/// Distribution of one ordered pair's destination-direction latency, in ns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PairSummary {
    pub from_core: PhysicalCoreId,
    pub to_core: PhysicalCoreId,
    pub count: usize,
    pub min: f64,
    pub p5: f64,
    pub p25: f64,
    pub mean: f64,
    pub median: f64,
    pub p75: f64,
    pub p95: f64,
    pub max: f64,
}

impl PairSummary {
    /// `None` for an empty slice.
    pub fn from_latencies(
        from_core: PhysicalCoreId,
        to_core: PhysicalCoreId,
        latencies: &[f64],
    ) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }
        let mut sorted = latencies.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
        Some(Self {
            from_core,
            to_core,
            count: sorted.len(),
            min: sorted[0],
            p5: quantile(&sorted, 0.05),
            p25: quantile(&sorted, 0.25),
            mean,
            median: quantile(&sorted, 0.5),
            p75: quantile(&sorted, 0.75),
            p95: quantile(&sorted, 0.95),
            max: sorted[sorted.len() - 1],
        })
    }
}

/// Continuous quantile with linear interpolation between closest ranks.
/// `sorted` must be ascending and non-empty; `q` is clamped to `[0, 1]`.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let q = q.clamp(0.0, 1.0);
    let rank = q * (n - 1) as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (lower, upper) = (rank.floor() as usize, rank.ceil() as usize);
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

/// Min, mean and max of the per-pair sample counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SampleCounts {
    pub min: usize,
    pub avg: f64,
    pub max: usize,
}

/// Statistics over a whole log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySummary {
    /// Source core ids seen, ascending.
    pub cores: Vec<PhysicalCoreId>,
    /// One entry per ordered pair, ordered by (from, to).
    pub pairs: Vec<PairSummary>,
    pub samples_per_pair: Option<SampleCounts>,
}

impl LatencySummary {
    pub fn from_samples(samples: &[LatencySample]) -> Self {
        let mut by_pair: BTreeMap<(PhysicalCoreId, PhysicalCoreId), Vec<f64>> = BTreeMap::new();
        let mut cores = BTreeSet::new();
        for s in samples {
            cores.insert(s.from_core_id);
            by_pair
                .entry((s.from_core_id, s.to_core_id))
                .or_default()
                .push(s.to_ns_per_iteration);
        }

        let pairs: Vec<PairSummary> = by_pair
            .iter()
            .filter_map(|(&(from, to), latencies)| PairSummary::from_latencies(from, to, latencies))
            .collect();

        let samples_per_pair = pairs.iter().map(|p| p.count).min().map(|min| SampleCounts {
            min,
            avg: pairs.iter().map(|p| p.count).sum::<usize>() as f64 / pairs.len() as f64,
            max: pairs.iter().map(|p| p.count).max().unwrap_or(min),
        });

        Self {
            cores: cores.into_iter().collect(),
            pairs,
            samples_per_pair,
        }
    }

    pub fn pair(&self, from: PhysicalCoreId, to: PhysicalCoreId) -> Option<&PairSummary> {
        self.pairs
            .iter()
            .find(|p| p.from_core == from && p.to_core == to)
    }

    pub fn median(&self, from: PhysicalCoreId, to: PhysicalCoreId) -> Option<f64> {
        self.pair(from, to).map(|p| p.median)
    }

    /// Core count, samples per pair and the median matrix. With `detailed`,
    /// also the full per-pair table.
    pub fn render(&self, detailed: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Num cores: {}", self.cores.len());
        match self.samples_per_pair {
            Some(c) => {
                let _ = writeln!(
                    out,
                    "Samples per core pair: min: {} avg: {:.2} max: {}",
                    c.min, c.avg, c.max
                );
            }
            None => {
                let _ = writeln!(out, "Samples per core pair: none");
                return out;
            }
        }

        if detailed {
            let _ = writeln!(out);
            let _ = writeln!(out, "Detailed core-to-core latency aggregates (ns):");
            out.push_str(&self.render_pair_table());
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Median core-to-core latency (ns):");
        out.push_str(&self.render_median_matrix());
        out
    }

    fn render_pair_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>6} {:>6} {:>6} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
            "from", "to", "count", "min", "5%", "25%", "mean", "median", "75%", "95%", "max"
        );
        for p in &self.pairs {
            let _ = writeln!(
                out,
                "{:>6} {:>6} {:>6} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2}",
                p.from_core,
                p.to_core,
                p.count,
                p.min,
                p.p5,
                p.p25,
                p.mean,
                p.median,
                p.p75,
                p.p95,
                p.max
            );
        }
        out
    }

    /// Rows are source cores, columns destination cores. Missing pairs
    /// (including the diagonal) print as `-`.
    pub fn render_median_matrix(&self) -> String {
        let mut out = String::new();
        let width = self
            .cores
            .iter()
            .map(|c| c.to_string().len())
            .max()
            .unwrap_or(1)
            .max(4);

        let _ = write!(out, "{:>width$}", "");
        for to in &self.cores {
            let _ = write!(out, " {to:>width$}");
        }
        let _ = writeln!(out);

        for from in &self.cores {
            let _ = write!(out, "{from:>width$}");
            for to in &self.cores {
                match self.median(*from, *to) {
                    Some(m) => {
                        let _ = write!(out, " {m:>width$.0}");
                    }
                    None => {
                        let _ = write!(out, " {:>width$}", "-");
                    }
                }
            }
            let _ = writeln!(out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> PhysicalCoreId {
        PhysicalCoreId::new(raw)
    }

    fn sample(from: u64, to: u64, ns: f64) -> LatencySample {
        LatencySample {
            from_index: 0,
            to_index: 1,
            from_core_id: id(from),
            to_core_id: id(to),
            from_ns_per_iteration: ns + 1.0,
            to_ns_per_iteration: ns,
            from_frequency_before_ghz: f64::NAN,
            from_frequency_after_ghz: f64::NAN,
            to_frequency_before_ghz: f64::NAN,
            to_frequency_after_ghz: f64::NAN,
        }
    }

    #[test]
    fn quantile_interpolates_linearly() {
        let v = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert!((quantile(&v, 0.0) - 10.0).abs() < 1e-12);
        assert!((quantile(&v, 0.5) - 30.0).abs() < 1e-12);
        assert!((quantile(&v, 1.0) - 50.0).abs() < 1e-12);
        // rank 0.2 between 10 and 20
        assert!((quantile(&v, 0.05) - 12.0).abs() < 1e-12);
        assert!((quantile(&v, 0.95) - 48.0).abs() < 1e-12);
        assert!((quantile(&[7.0], 0.3) - 7.0).abs() < 1e-12);
    }

    #[test]
    fn pair_summary_statistics() {
        let p = PairSummary::from_latencies(id(1), id(2), &[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(p.count, 4);
        assert!((p.min - 1.0).abs() < 1e-12);
        assert!((p.max - 4.0).abs() < 1e-12);
        assert!((p.mean - 2.5).abs() < 1e-12);
        assert!((p.median - 2.5).abs() < 1e-12);
        assert!((p.p25 - 1.75).abs() < 1e-12);
        assert!(PairSummary::from_latencies(id(1), id(2), &[]).is_none());
    }

    #[test]
    fn summary_uses_destination_latency_and_core_ids() {
        let samples = vec![
            sample(8, 3, 40.0),
            sample(8, 3, 60.0),
            sample(3, 8, 100.0),
        ];
        let s = LatencySummary::from_samples(&samples);
        assert_eq!(s.cores, vec![id(3), id(8)]);
        assert_eq!(s.pairs.len(), 2);
        assert_eq!(s.median(id(8), id(3)), Some(50.0));
        assert_eq!(s.median(id(3), id(8)), Some(100.0));
        assert_eq!(s.median(id(3), id(3)), None);

        let counts = s.samples_per_pair.unwrap();
        assert_eq!((counts.min, counts.max), (1, 2));
        assert!((counts.avg - 1.5).abs() < 1e-12);
    }

    #[test]
    fn median_matrix_layout() {
        let samples = vec![sample(0, 1, 41.6), sample(1, 0, 38.2)];
        let matrix = LatencySummary::from_samples(&samples).render_median_matrix();
        let lines: Vec<&str> = matrix.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "        0    1");
        assert_eq!(lines[1], "   0    -   42");
        assert_eq!(lines[2], "   1   38    -");
    }

    #[test]
    fn empty_log_renders_without_matrix() {
        let text = LatencySummary::from_samples(&[]).render(true);
        assert!(text.contains("Num cores: 0"));
        assert!(text.contains("Samples per core pair: none"));
        assert!(!text.contains("Median"));
    }

    #[test]
    fn detailed_render_includes_pair_table() {
        let samples = vec![sample(0, 1, 41.0), sample(1, 0, 38.0)];
        let text = LatencySummary::from_samples(&samples).render(true);
        assert!(text.contains("Detailed core-to-core latency aggregates (ns):"));
        assert!(text.contains("median"));
        assert!(text.contains("Median core-to-core latency (ns):"));
    }
}
