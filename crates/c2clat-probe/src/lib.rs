//! Hardware probe primitives consumed by the latency engine.
//!
//! The engine never talks to the hardware directly. Everything it needs from
//! the machine goes through [`HardwareProbe`]:
//!
//! - which physical core is executing the caller right now,
//! - a monotonic timestamp and its tick period,
//! - a rough clock-frequency estimate (reported, never used for validity),
//! - a filler busy loop for threads that are not measuring.
//!
//! [`SystemProbe`] reads the real registers. [`SimulatedProbe`] hands every
//! thread a stable synthetic core id, which makes full runs deterministic
//! enough to test.

pub mod arch;
pub mod calibration;
pub mod simulated;
pub mod system;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use arch::{FREQUENCY_LOOP_ITERATIONS, filler_work};
pub use calibration::{
    CLOCK_OVERHEAD_SAMPLES, FILLER_CALIBRATION_RUNS, FillerCalibration, calibrate_filler,
    clock_overhead_ns,
};
pub use simulated::{MIGRATION_ID_OFFSET, SimulatedProbe};
pub use system::{ClockSource, ProbeConfig, SystemProbe};

// ---------------------------------------------------------------------------
// PhysicalCoreId
// ---------------------------------------------------------------------------

/// Opaque identifier of a physical core as reported by the hardware or OS.
///
/// Values carry no meaning beyond equality. They are not dense and need not
/// start at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhysicalCoreId(u64);

impl PhysicalCoreId {
    /// Printed for a logical index that has no core assigned yet.
    pub const UNKNOWN: Self = Self(u64::MAX);

    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_unknown(self) -> bool {
        self.0 == u64::MAX
    }
}

impl fmt::Display for PhysicalCoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Forward width/alignment so report columns line up.
        fmt::Display::fmt(&self.0, f)
    }
}

// ---------------------------------------------------------------------------
// HardwareProbe
// ---------------------------------------------------------------------------

/// The narrow hardware interface the round protocol runs on.
///
/// Implementations are shared by every worker thread, so all methods take
/// `&self`. `current_core_id` and `timestamp` sit inside the timed window and
/// must be cheap and allocation free.
pub trait HardwareProbe: Send + Sync {
    /// Identifier of the core executing the caller. Stable while the thread
    /// is not migrated.
    fn current_core_id(&self) -> PhysicalCoreId;

    /// Monotonic timestamp in ticks. Only deltas are meaningful.
    fn timestamp(&self) -> u64;

    /// Length of one timestamp tick in nanoseconds.
    fn timestamp_period_ns(&self) -> f64;

    /// Clock frequency of the executing core in GHz, or NaN when disabled.
    fn estimate_frequency_ghz(&self) -> f64;

    /// Busy loop whose duration is linear in `loop_length`.
    fn filler_work(&self, loop_length: u64);

    /// Human readable name of the timestamp source.
    fn clock_name(&self) -> &'static str;

    /// Called once on every worker thread before its first round.
    fn prepare_worker_thread(&self, _worker: usize) {}

    /// Convert a tick delta into nanoseconds.
    #[inline]
    fn ticks_to_ns(&self, start: u64, end: u64) -> f64 {
        end.wrapping_sub(start) as f64 * self.timestamp_period_ns()
    }
}

impl<P: HardwareProbe + ?Sized> HardwareProbe for &P {
    #[inline]
    fn current_core_id(&self) -> PhysicalCoreId {
        (**self).current_core_id()
    }

    #[inline]
    fn timestamp(&self) -> u64 {
        (**self).timestamp()
    }

    #[inline]
    fn timestamp_period_ns(&self) -> f64 {
        (**self).timestamp_period_ns()
    }

    fn estimate_frequency_ghz(&self) -> f64 {
        (**self).estimate_frequency_ghz()
    }

    fn filler_work(&self, loop_length: u64) {
        (**self).filler_work(loop_length);
    }

    fn clock_name(&self) -> &'static str {
        (**self).clock_name()
    }

    fn prepare_worker_thread(&self, worker: usize) {
        (**self).prepare_worker_thread(worker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_id_display_honours_width() {
        let id = PhysicalCoreId::new(42);
        assert_eq!(format!("{id:5}"), "   42");
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn unknown_sentinel() {
        assert!(PhysicalCoreId::UNKNOWN.is_unknown());
        assert!(!PhysicalCoreId::new(0).is_unknown());
        assert_eq!(PhysicalCoreId::UNKNOWN.get(), u64::MAX);
    }

    #[test]
    fn core_id_serializes_transparently() {
        let json = serde_json::to_string(&PhysicalCoreId::new(7)).unwrap();
        assert_eq!(json, "7");
        let back: PhysicalCoreId = serde_json::from_str("7").unwrap();
        assert_eq!(back, PhysicalCoreId::new(7));
    }

    #[test]
    fn ticks_to_ns_uses_period() {
        let probe = SimulatedProbe::new();
        assert!((probe.ticks_to_ns(100, 350) - 250.0).abs() < f64::EPSILON);
    }
}
