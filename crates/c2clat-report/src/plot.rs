//! Median latency heatmap.
//!
//! Rows are source cores and columns destination cores, both labelled by
//! physical core id. Each measured cell is filled on a viridis ramp between
//! the smallest and largest median and annotated with the median in whole
//! nanoseconds. Pairs without samples, including the diagonal, are grey. A
//! colour bar on the right is labelled with the min and max.

use std::fmt;
use std::path::{Path, PathBuf};

use c2clat_error::{LatencyError, Result};
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};

use crate::summary::LatencySummary;

const MISSING: RGBColor = RGBColor(128, 128, 128);

const VIRIDIS: [(u8, u8, u8); 5] = [
    (68, 1, 84),
    (59, 82, 139),
    (33, 145, 140),
    (94, 201, 98),
    (253, 231, 37),
];

const LEFT_MARGIN: i32 = 64;
const TOP_MARGIN: i32 = 84;
const BOTTOM_MARGIN: i32 = 24;
const BAR_GAP: i32 = 24;
const BAR_WIDTH: i32 = 22;
const BAR_LABELS: i32 = 64;
const GRID_TARGET: i32 = 768;

/// CPU description used in the plot title.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuLabel {
    pub name: Option<String>,
    pub cores: Option<usize>,
}

impl CpuLabel {
    /// Best effort: the `model name` line of `/proc/cpuinfo` on Linux.
    pub fn detect() -> Self {
        let name = std::fs::read_to_string("/proc/cpuinfo").ok().and_then(|info| {
            info.lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(key, _)| matches!(key.trim(), "model name" | "Model" | "Hardware"))
                .map(|(_, value)| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        });
        Self { name, cores: None }
    }

    /// Replace whichever parts the user supplied.
    #[must_use]
    pub fn with_overrides(mut self, name: Option<String>, cores: Option<usize>) -> Self {
        if name.is_some() {
            self.name = name;
        }
        if cores.is_some() {
            self.cores = cores;
        }
        self
    }

    pub fn title(&self) -> String {
        if self.name.is_some() {
            format!("{self} Core-to-Core Latency (ns)")
        } else {
            "Core-to-Core Latency (ns)".to_owned()
        }
    }
}

impl fmt::Display for CpuLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, self.cores) {
            (Some(name), Some(cores)) => write!(f, "{name} ({cores}C)"),
            (Some(name), None) => f.write_str(name),
            (None, _) => f.write_str("N/A"),
        }
    }
}

/// `run.log` -> `run.svg`.
pub fn default_plot_path(log: &Path) -> PathBuf {
    log.with_extension("svg")
}

/// Colour for `value` on the ramp from `min` to `max`. Degenerate ranges map
/// to the low end.
pub fn heat_color(value: f64, min: f64, max: f64) -> RGBColor {
    let span = max - min;
    let t = if span > 0.0 {
        ((value - min) / span).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let scaled = t * (VIRIDIS.len() - 1) as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lower = (scaled.floor() as usize).min(VIRIDIS.len() - 2);
    let frac = scaled - lower as f64;
    let (a, b) = (VIRIDIS[lower], VIRIDIS[lower + 1]);
    RGBColor(lerp(a.0, b.0, frac), lerp(a.1, b.1, frac), lerp(a.2, b.2, frac))
}

fn lerp(a: u8, b: u8, t: f64) -> u8 {
    let v = f64::from(a) + (f64::from(b) - f64::from(a)) * t;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let v = v.round().clamp(0.0, 255.0) as u8;
    v
}

fn plot_error(err: impl fmt::Display) -> LatencyError {
    LatencyError::Plot(err.to_string())
}

/// Draw the median matrix of `summary` to an SVG file at `path`.
pub fn write_heatmap(summary: &LatencySummary, cpu: &CpuLabel, path: &Path) -> Result<()> {
    let medians: Vec<f64> = summary.pairs.iter().map(|p| p.median).collect();
    let (Some(min), Some(max)) = (
        medians.iter().copied().reduce(f64::min),
        medians.iter().copied().reduce(f64::max),
    ) else {
        return Err(LatencyError::Plot("no samples to plot".to_owned()));
    };

    let n = i32::try_from(summary.cores.len()).map_err(plot_error)?;
    let cell = (GRID_TARGET / n).clamp(14, 56);
    let grid = cell * n;
    let bar_x = LEFT_MARGIN + grid + BAR_GAP;
    let width = bar_x + BAR_WIDTH + BAR_LABELS;
    let height = TOP_MARGIN + grid + BOTTOM_MARGIN;

    let size = (
        u32::try_from(width).map_err(plot_error)?,
        u32::try_from(height).map_err(plot_error)?,
    );
    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let centered = Pos::new(HPos::Center, VPos::Center);
    let title_style = ("sans-serif", 20).into_font().color(&BLACK).pos(centered);
    root.draw(&Text::new(cpu.title(), (width / 2, 24), title_style))
        .map_err(plot_error)?;

    let label_size = f64::from(cell.min(28)) * 0.45;
    let axis_style = ("sans-serif", label_size).into_font().color(&BLACK);
    for (i, core) in (0..n).zip(&summary.cores) {
        let mid = LEFT_MARGIN + i * cell + cell / 2;
        root.draw(&Text::new(
            core.to_string(),
            (mid, TOP_MARGIN - 10),
            axis_style.pos(Pos::new(HPos::Center, VPos::Bottom)),
        ))
        .map_err(plot_error)?;
        let row_mid = TOP_MARGIN + i * cell + cell / 2;
        root.draw(&Text::new(
            core.to_string(),
            (LEFT_MARGIN - 8, row_mid),
            axis_style.pos(Pos::new(HPos::Right, VPos::Center)),
        ))
        .map_err(plot_error)?;
    }

    let value_size = f64::from(cell) * if max >= 100.0 { 0.28 } else { 0.32 };
    let dark_below = (min + 3.0 * max) / 4.0;
    for (row, from) in (0..n).zip(&summary.cores) {
        for (col, to) in (0..n).zip(&summary.cores) {
            let x0 = LEFT_MARGIN + col * cell;
            let y0 = TOP_MARGIN + row * cell;
            let median = summary.median(*from, *to);
            let fill = median.map_or(MISSING, |m| heat_color(m, min, max));
            root.draw(&Rectangle::new([(x0, y0), (x0 + cell, y0 + cell)], fill.filled()))
                .map_err(plot_error)?;

            if let Some(m) = median {
                let ink = if m < dark_below { WHITE } else { BLACK };
                root.draw(&Text::new(
                    format!("{m:.0}"),
                    (x0 + cell / 2, y0 + cell / 2),
                    ("sans-serif", value_size).into_font().color(&ink).pos(centered),
                ))
                .map_err(plot_error)?;
            }
        }
    }

    // Colour bar, max at the top.
    for step in 0..grid {
        let t = 1.0 - f64::from(step) / f64::from(grid.max(1) - 1).max(1.0);
        let y = TOP_MARGIN + step;
        root.draw(&Rectangle::new(
            [(bar_x, y), (bar_x + BAR_WIDTH, y + 1)],
            heat_color(min + t * (max - min), min, max).filled(),
        ))
        .map_err(plot_error)?;
    }
    let tick_style = ("sans-serif", 12).into_font().color(&BLACK);
    for (value, y) in [(max, TOP_MARGIN), (min, TOP_MARGIN + grid)] {
        root.draw(&Text::new(
            format!("{value:.0}"),
            (bar_x + BAR_WIDTH + 6, y),
            tick_style.pos(Pos::new(HPos::Left, VPos::Center)),
        ))
        .map_err(plot_error)?;
    }

    root.present().map_err(plot_error)?;
    tracing::info!(target: "c2clat.report", path = %path.display(), cores = n, "stored plot");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use c2clat_core::LatencySample;
    use c2clat_probe::PhysicalCoreId;

    fn sample(from: u64, to: u64, ns: f64) -> LatencySample {
        LatencySample {
            from_index: 0,
            to_index: 1,
            from_core_id: PhysicalCoreId::new(from),
            to_core_id: PhysicalCoreId::new(to),
            from_ns_per_iteration: ns,
            to_ns_per_iteration: ns,
            from_frequency_before_ghz: f64::NAN,
            from_frequency_after_ghz: f64::NAN,
            to_frequency_before_ghz: f64::NAN,
            to_frequency_after_ghz: f64::NAN,
        }
    }

    #[test]
    fn ramp_endpoints_and_clamping() {
        let (lo, hi) = (VIRIDIS[0], VIRIDIS[VIRIDIS.len() - 1]);
        assert_eq!(heat_color(10.0, 10.0, 90.0), RGBColor(lo.0, lo.1, lo.2));
        assert_eq!(heat_color(90.0, 10.0, 90.0), RGBColor(hi.0, hi.1, hi.2));
        assert_eq!(heat_color(500.0, 10.0, 90.0), RGBColor(hi.0, hi.1, hi.2));
        assert_eq!(heat_color(42.0, 42.0, 42.0), RGBColor(lo.0, lo.1, lo.2));
        let mid = VIRIDIS[2];
        assert_eq!(heat_color(50.0, 10.0, 90.0), RGBColor(mid.0, mid.1, mid.2));
    }

    #[test]
    fn cpu_label_title() {
        let label = CpuLabel::default();
        assert_eq!(label.to_string(), "N/A");
        assert_eq!(label.title(), "Core-to-Core Latency (ns)");

        let label = label.with_overrides(Some("Apple M1".into()), Some(8));
        assert_eq!(label.title(), "Apple M1 (8C) Core-to-Core Latency (ns)");

        let kept = label.clone().with_overrides(None, None);
        assert_eq!(kept, label);
    }

    #[test]
    fn plot_path_swaps_extension() {
        assert_eq!(default_plot_path(Path::new("/tmp/m1.log")), PathBuf::from("/tmp/m1.svg"));
        assert_eq!(default_plot_path(Path::new("run")), PathBuf::from("run.svg"));
    }

    #[test]
    fn writes_svg_with_medians_and_title() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.svg");
        let summary = LatencySummary::from_samples(&[
            sample(4, 6, 41.6),
            sample(6, 4, 38.2),
            sample(9, 4, 120.0),
        ]);
        let cpu = CpuLabel::default().with_overrides(Some("Test CPU".into()), Some(3));

        write_heatmap(&summary, &cpu, &path).unwrap();

        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        let texts: Vec<&str> = svg
            .split('>')
            .filter_map(|chunk| chunk.split('<').next())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect();
        assert!(texts.contains(&"Test CPU (3C) Core-to-Core Latency (ns)"));
        for label in ["42", "38", "120"] {
            assert!(texts.contains(&label), "missing cell {label}");
        }
    }

    #[test]
    fn empty_summary_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.svg");
        let err = write_heatmap(&LatencySummary::from_samples(&[]), &CpuLabel::default(), &path)
            .unwrap_err();
        assert!(matches!(err, LatencyError::Plot(_)));
        assert!(!path.exists());
    }
}
