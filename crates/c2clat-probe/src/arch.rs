//! Per-architecture register reads and busy loops.
//!
//! Everything here may run inside the timed ping-pong window, so it is
//! inlined, allocation free and does not log.

use std::hint::black_box;

/// Iterations of the dependent decrement loop used for frequency estimation.
pub const FREQUENCY_LOOP_ITERATIONS: u64 = 10_000;

// ---------------------------------------------------------------------------
// Core identifier
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
#[inline]
pub(crate) fn read_core_id() -> Option<u64> {
    // SAFETY: sched_getcpu has no preconditions and only reads kernel state.
    let cpu = unsafe { libc::sched_getcpu() };
    u64::try_from(cpu).ok()
}

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
#[inline]
pub(crate) fn read_core_id() -> Option<u64> {
    let value: u64;
    // SAFETY: TPIDR_EL0 is readable at EL0; the isb pair keeps the read from
    // being reordered across the surrounding loop.
    unsafe {
        std::arch::asm!(
            "isb",
            "mrs {v}, TPIDR_EL0",
            "isb",
            v = out(reg) value,
            options(nostack, preserves_flags),
        );
    }
    Some(value)
}

#[cfg(all(not(target_os = "linux"), target_arch = "x86_64"))]
#[inline]
pub(crate) fn read_core_id() -> Option<u64> {
    let mut aux = 0_u32;
    // SAFETY: rdtscp is present on every x86-64 CPU with an invariant TSC;
    // the OS stores the processor number in IA32_TSC_AUX.
    unsafe {
        core::arch::x86_64::__rdtscp(&mut aux);
    }
    Some(u64::from(aux))
}

#[cfg(not(any(
    target_os = "linux",
    all(target_os = "macos", target_arch = "aarch64"),
    target_arch = "x86_64"
)))]
#[inline]
pub(crate) fn read_core_id() -> Option<u64> {
    None
}

// ---------------------------------------------------------------------------
// Cycle counter
// ---------------------------------------------------------------------------

#[cfg(target_arch = "aarch64")]
pub(crate) const CYCLE_COUNTER_NAME: Option<&str> = Some("CNTVCT_EL0");
#[cfg(target_arch = "x86_64")]
pub(crate) const CYCLE_COUNTER_NAME: Option<&str> = Some("RDTSC");
#[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
pub(crate) const CYCLE_COUNTER_NAME: Option<&str> = None;

#[cfg(target_arch = "aarch64")]
#[inline]
pub(crate) fn read_cycle_counter() -> u64 {
    let value: u64;
    // SAFETY: the virtual counter is readable at EL0 on every supported OS.
    unsafe {
        std::arch::asm!(
            "isb",
            "mrs {v}, CNTVCT_EL0",
            "isb",
            v = out(reg) value,
            options(nostack, preserves_flags),
        );
    }
    value
}

#[cfg(target_arch = "x86_64")]
#[inline]
#[allow(unused_unsafe)]
pub(crate) fn read_cycle_counter() -> u64 {
    // SAFETY: rdtsc has no preconditions.
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
#[inline]
pub(crate) fn read_cycle_counter() -> u64 {
    0
}

/// Tick period of the cycle counter when the hardware publishes it.
#[cfg(target_arch = "aarch64")]
pub(crate) fn published_counter_period_ns() -> Option<f64> {
    let frequency: u64;
    // SAFETY: CNTFRQ_EL0 is readable at EL0.
    unsafe {
        std::arch::asm!(
            "isb",
            "mrs {v}, CNTFRQ_EL0",
            "isb",
            v = out(reg) frequency,
            options(nostack, preserves_flags),
        );
    }
    (frequency != 0).then(|| 1.0e9 / frequency as f64)
}

#[cfg(not(target_arch = "aarch64"))]
pub(crate) fn published_counter_period_ns() -> Option<f64> {
    None
}

// ---------------------------------------------------------------------------
// Busy loops
// ---------------------------------------------------------------------------

/// Run [`FREQUENCY_LOOP_ITERATIONS`] dependent decrements (one per cycle).
#[cfg(target_arch = "aarch64")]
#[inline]
pub(crate) fn dependent_loop() {
    // SAFETY: register-only loop.
    unsafe {
        std::arch::asm!(
            "2:",
            "subs {n}, {n}, #1",
            "b.ne 2b",
            n = inout(reg) FREQUENCY_LOOP_ITERATIONS => _,
            options(nomem, nostack),
        );
    }
}

/// Run [`FREQUENCY_LOOP_ITERATIONS`] dependent decrements (one per cycle).
#[cfg(target_arch = "x86_64")]
#[inline]
pub(crate) fn dependent_loop() {
    // SAFETY: register-only loop.
    unsafe {
        std::arch::asm!(
            "2:",
            "dec {n}",
            "jnz 2b",
            n = inout(reg) FREQUENCY_LOOP_ITERATIONS => _,
            options(nomem, nostack),
        );
    }
}

#[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
#[inline]
pub(crate) fn dependent_loop() {
    let mut n = black_box(FREQUENCY_LOOP_ITERATIONS);
    while n != 0 {
        n = black_box(n - 1);
    }
}

/// Busy loop that the optimizer cannot fold away. Duration is linear in
/// `loop_length`.
#[inline(never)]
pub fn filler_work(loop_length: u64) {
    let mut x = 1_u64;
    for _ in 0..loop_length {
        x = black_box(x).wrapping_add(1);
    }
    black_box(x);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filler_work_scales() {
        // Smoke test only: both lengths must terminate.
        filler_work(0);
        filler_work(10_000);
    }

    #[test]
    fn dependent_loop_terminates() {
        dependent_loop();
    }

    #[cfg(any(target_arch = "aarch64", target_arch = "x86_64"))]
    #[test]
    fn cycle_counter_advances() {
        let a = read_cycle_counter();
        filler_work(100_000);
        let b = read_cycle_counter();
        assert!(b > a, "counter did not advance: {a} -> {b}");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn core_id_is_available_on_linux() {
        assert!(read_core_id().is_some());
    }
}
