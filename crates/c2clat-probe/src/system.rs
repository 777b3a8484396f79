//! Probe backed by the real machine.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use c2clat_error::{LatencyError, Result};
use serde::{Deserialize, Serialize};

use crate::arch;
use crate::{FREQUENCY_LOOP_ITERATIONS, HardwareProbe, PhysicalCoreId};

/// How long the x86-64 TSC is compared against the OS clock.
const COUNTER_CALIBRATION_WINDOW: Duration = Duration::from_millis(20);

/// Instructions retired per iteration of the dependent loop.
const FREQUENCY_LOOP_IPC: f64 = 1.0;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Timestamp source used for the timed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    /// `std::time::Instant`, reported in nanoseconds.
    #[default]
    Steady,
    /// The architectural cycle counter (`CNTVCT_EL0` or `RDTSC`).
    Counter,
}

impl ClockSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Steady => "steady",
            Self::Counter => "counter",
        }
    }
}

impl fmt::Display for ClockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClockSource {
    type Err = LatencyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "steady" => Ok(Self::Steady),
            "counter" => Ok(Self::Counter),
            other => Err(LatencyError::invalid_config(
                "clock",
                format!("expected `steady` or `counter`, got `{other}`"),
            )),
        }
    }
}

/// Knobs for [`SystemProbe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub clock: ClockSource,
    /// When false, [`HardwareProbe::estimate_frequency_ghz`] returns NaN.
    pub estimate_frequency: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            clock: ClockSource::Steady,
            estimate_frequency: true,
        }
    }
}

// ---------------------------------------------------------------------------
// SystemProbe
// ---------------------------------------------------------------------------

/// Reads core ids and timestamps from the executing hardware.
#[derive(Debug)]
pub struct SystemProbe {
    clock: ClockSource,
    clock_name: &'static str,
    origin: Instant,
    period_ns: f64,
    estimate_frequency: bool,
}

impl SystemProbe {
    /// Build a probe, checking that the platform supports every primitive the
    /// chosen configuration needs.
    pub fn new(config: ProbeConfig) -> Result<Self> {
        if arch::read_core_id().is_none() {
            return Err(LatencyError::ProbeUnsupported {
                what: "current core id",
            });
        }

        let (clock_name, period_ns) = match config.clock {
            ClockSource::Steady => ("std::time::Instant", 1.0),
            ClockSource::Counter => {
                let name = arch::CYCLE_COUNTER_NAME.ok_or(LatencyError::ProbeUnsupported {
                    what: "cycle counter",
                })?;
                let period = match arch::published_counter_period_ns() {
                    Some(period) => period,
                    None => calibrate_counter_period_ns()?,
                };
                (name, period)
            }
        };

        tracing::debug!(
            target: "c2clat.probe",
            clock = clock_name,
            period_ns,
            estimate_frequency = config.estimate_frequency,
            "system probe ready"
        );

        Ok(Self {
            clock: config.clock,
            clock_name,
            origin: Instant::now(),
            period_ns,
            estimate_frequency: config.estimate_frequency,
        })
    }
}

/// Compare the cycle counter against the OS clock over a short sleep.
fn calibrate_counter_period_ns() -> Result<f64> {
    let wall_start = Instant::now();
    let ticks_start = arch::read_cycle_counter();
    std::thread::sleep(COUNTER_CALIBRATION_WINDOW);
    let ticks_end = arch::read_cycle_counter();
    let wall_ns = wall_start.elapsed().as_nanos() as f64;

    let ticks = ticks_end.wrapping_sub(ticks_start);
    if ticks == 0 {
        return Err(LatencyError::ProbeUnsupported {
            what: "cycle counter (did not advance)",
        });
    }
    let period = wall_ns / ticks as f64;
    tracing::info!(
        target: "c2clat.probe",
        ticks,
        wall_ns,
        period_ns = period,
        "calibrated cycle counter"
    );
    Ok(period)
}

impl HardwareProbe for SystemProbe {
    #[inline]
    fn current_core_id(&self) -> PhysicalCoreId {
        arch::read_core_id().map_or(PhysicalCoreId::UNKNOWN, PhysicalCoreId::new)
    }

    #[inline]
    fn timestamp(&self) -> u64 {
        match self.clock {
            ClockSource::Steady => {
                u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
            }
            ClockSource::Counter => arch::read_cycle_counter(),
        }
    }

    #[inline]
    fn timestamp_period_ns(&self) -> f64 {
        self.period_ns
    }

    fn estimate_frequency_ghz(&self) -> f64 {
        if !self.estimate_frequency {
            return f64::NAN;
        }
        let start = self.timestamp();
        arch::dependent_loop();
        let end = self.timestamp();
        let ns = self.ticks_to_ns(start, end);
        FREQUENCY_LOOP_ITERATIONS as f64 / ns * FREQUENCY_LOOP_IPC
    }

    fn filler_work(&self, loop_length: u64) {
        arch::filler_work(loop_length);
    }

    fn clock_name(&self) -> &'static str {
        self.clock_name
    }

    #[cfg(target_os = "macos")]
    fn prepare_worker_thread(&self, worker: usize) {
        // SAFETY: only changes the scheduling class of the calling thread.
        let rc = unsafe {
            libc::pthread_set_qos_class_self_np(libc::qos_class_t::QOS_CLASS_USER_INTERACTIVE, 0)
        };
        if rc == 0 {
            tracing::info!(target: "c2clat.probe", worker, "QoS class set to user-interactive");
        } else {
            tracing::warn!(target: "c2clat.probe", worker, rc, "failed to raise QoS class");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_source_parses() {
        assert_eq!("steady".parse::<ClockSource>().unwrap(), ClockSource::Steady);
        assert_eq!("counter".parse::<ClockSource>().unwrap(), ClockSource::Counter);
        let err = "tsc".parse::<ClockSource>().unwrap_err();
        assert!(err.to_string().contains("`tsc`"));
    }

    #[test]
    fn clock_source_round_trips_display() {
        for clock in [ClockSource::Steady, ClockSource::Counter] {
            assert_eq!(clock.to_string().parse::<ClockSource>().unwrap(), clock);
        }
    }

    #[cfg(any(target_os = "linux", target_arch = "x86_64", target_arch = "aarch64"))]
    #[test]
    fn steady_probe_is_monotonic() {
        let Ok(probe) = SystemProbe::new(ProbeConfig::default()) else {
            return;
        };
        let a = probe.timestamp();
        probe.filler_work(10_000);
        let b = probe.timestamp();
        assert!(b >= a);
        assert!((probe.timestamp_period_ns() - 1.0).abs() < f64::EPSILON);
        assert_eq!(probe.clock_name(), "std::time::Instant");
    }

    #[test]
    fn disabled_frequency_is_nan() {
        let Ok(probe) = SystemProbe::new(ProbeConfig {
            clock: ClockSource::Steady,
            estimate_frequency: false,
        }) else {
            return;
        };
        assert!(probe.estimate_frequency_ghz().is_nan());
    }

    #[test]
    fn frequency_estimate_is_positive() {
        let Ok(probe) = SystemProbe::new(ProbeConfig::default()) else {
            return;
        };
        let ghz = probe.estimate_frequency_ghz();
        assert!(ghz > 0.0, "estimate {ghz}");
    }
}
