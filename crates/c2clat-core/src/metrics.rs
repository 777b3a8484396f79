//! Process-wide run counters.
//!
//! Lock-free `Relaxed` counters, cheap enough to bump from every worker on
//! every round. Read them with [`latency_metrics`]; tests compare deltas
//! because other tests in the same binary bump them too.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

static C2CLAT_ROUNDS_TOTAL: AtomicU64 = AtomicU64::new(0);
static C2CLAT_ROUNDS_MEASURED_TOTAL: AtomicU64 = AtomicU64::new(0);
static C2CLAT_ROUNDS_MISSED_TOTAL: AtomicU64 = AtomicU64::new(0);
static C2CLAT_UNINDEXED_OBSERVATIONS_TOTAL: AtomicU64 = AtomicU64::new(0);
static C2CLAT_SAMPLES_VALID_TOTAL: AtomicU64 = AtomicU64::new(0);
static C2CLAT_SAMPLES_INVALID_TOTAL: AtomicU64 = AtomicU64::new(0);
static C2CLAT_CLAIM_CONFLICTS_TOTAL: AtomicU64 = AtomicU64::new(0);
static C2CLAT_RESORTS_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Snapshot of the run counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencyMetrics {
    /// Rounds started (counted once per round, by worker 0).
    pub c2clat_rounds_total: u64,
    /// Rounds where both roles were claimed.
    pub c2clat_rounds_measured_total: u64,
    /// Rounds where at least one role was missing.
    pub c2clat_rounds_missed_total: u64,
    /// Worker rounds spent on a core the registry could not index.
    pub c2clat_unindexed_observations_total: u64,
    pub c2clat_samples_valid_total: u64,
    pub c2clat_samples_invalid_total: u64,
    /// Claim attempts that lost to another thread on the same index.
    pub c2clat_claim_conflicts_total: u64,
    pub c2clat_resorts_total: u64,
}

/// Read the current counters.
#[must_use]
pub fn latency_metrics() -> LatencyMetrics {
    LatencyMetrics {
        c2clat_rounds_total: C2CLAT_ROUNDS_TOTAL.load(Ordering::Relaxed),
        c2clat_rounds_measured_total: C2CLAT_ROUNDS_MEASURED_TOTAL.load(Ordering::Relaxed),
        c2clat_rounds_missed_total: C2CLAT_ROUNDS_MISSED_TOTAL.load(Ordering::Relaxed),
        c2clat_unindexed_observations_total: C2CLAT_UNINDEXED_OBSERVATIONS_TOTAL
            .load(Ordering::Relaxed),
        c2clat_samples_valid_total: C2CLAT_SAMPLES_VALID_TOTAL.load(Ordering::Relaxed),
        c2clat_samples_invalid_total: C2CLAT_SAMPLES_INVALID_TOTAL.load(Ordering::Relaxed),
        c2clat_claim_conflicts_total: C2CLAT_CLAIM_CONFLICTS_TOTAL.load(Ordering::Relaxed),
        c2clat_resorts_total: C2CLAT_RESORTS_TOTAL.load(Ordering::Relaxed),
    }
}

/// Reset counters (for tests).
pub fn reset_latency_metrics() {
    for counter in [
        &C2CLAT_ROUNDS_TOTAL,
        &C2CLAT_ROUNDS_MEASURED_TOTAL,
        &C2CLAT_ROUNDS_MISSED_TOTAL,
        &C2CLAT_UNINDEXED_OBSERVATIONS_TOTAL,
        &C2CLAT_SAMPLES_VALID_TOTAL,
        &C2CLAT_SAMPLES_INVALID_TOTAL,
        &C2CLAT_CLAIM_CONFLICTS_TOTAL,
        &C2CLAT_RESORTS_TOTAL,
    ] {
        counter.store(0, Ordering::Relaxed);
    }
}

pub(crate) fn record_round(measured: bool) -> u64 {
    let round = C2CLAT_ROUNDS_TOTAL.fetch_add(1, Ordering::Relaxed) + 1;
    if measured {
        C2CLAT_ROUNDS_MEASURED_TOTAL.fetch_add(1, Ordering::Relaxed);
    } else {
        C2CLAT_ROUNDS_MISSED_TOTAL.fetch_add(1, Ordering::Relaxed);
    }
    round
}

pub(crate) fn record_unindexed() {
    C2CLAT_UNINDEXED_OBSERVATIONS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_sample(valid: bool) -> u64 {
    let counter = if valid {
        &C2CLAT_SAMPLES_VALID_TOTAL
    } else {
        &C2CLAT_SAMPLES_INVALID_TOTAL
    };
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

pub(crate) fn record_claim_conflict() {
    C2CLAT_CLAIM_CONFLICTS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_resort() {
    C2CLAT_RESORTS_TOTAL.fetch_add(1, Ordering::Relaxed);
}
