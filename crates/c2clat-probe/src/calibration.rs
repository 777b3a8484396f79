//! Startup measurements printed in the banner.

use serde::Serialize;

use crate::HardwareProbe;

/// Back-to-back timestamp reads averaged for the clock overhead.
pub const CLOCK_OVERHEAD_SAMPLES: u32 = 1000;

/// Filler runs timed; the fastest one is kept.
pub const FILLER_CALIBRATION_RUNS: u32 = 30;

/// Mean cost of one timestamp read, in nanoseconds.
pub fn clock_overhead_ns<P: HardwareProbe + ?Sized>(probe: &P) -> f64 {
    let start = probe.timestamp();
    for _ in 0..CLOCK_OVERHEAD_SAMPLES {
        std::hint::black_box(probe.timestamp());
    }
    let end = probe.timestamp();
    probe.ticks_to_ns(start, end) / f64::from(CLOCK_OVERHEAD_SAMPLES)
}

/// How long one filler run takes on this machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FillerCalibration {
    pub loop_length: u64,
    /// Fastest of [`FILLER_CALIBRATION_RUNS`] runs.
    pub duration_ns: f64,
}

impl FillerCalibration {
    /// The filler duration expressed as a per-hop latency, i.e. divided the
    /// same way a ping-pong window is (`iterations`, then halved).
    #[must_use]
    pub fn latency_equivalent_ns(&self, iterations_per_experiment: u32) -> f64 {
        self.duration_ns / f64::from(iterations_per_experiment) / 2.0
    }
}

/// Time `loop_length` filler iterations, keeping the minimum.
pub fn calibrate_filler<P: HardwareProbe + ?Sized>(
    probe: &P,
    loop_length: u64,
) -> FillerCalibration {
    let mut best = f64::MAX;
    for _ in 0..FILLER_CALIBRATION_RUNS {
        let start = probe.timestamp();
        probe.filler_work(loop_length);
        let end = probe.timestamp();
        best = best.min(probe.ticks_to_ns(start, end));
    }
    tracing::debug!(
        target: "c2clat.probe",
        loop_length,
        duration_ns = best,
        "calibrated filler workload"
    );
    FillerCalibration {
        loop_length,
        duration_ns: best,
    }
}
