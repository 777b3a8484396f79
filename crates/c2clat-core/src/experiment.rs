//! One ordered (source, destination) core pair and its measurement state.
//!
//! An [`Experiment`] is created once per pair at startup and lives in the
//! matrix arena for the whole run. Its fields cycle through
//! reset → claim → measure → settle every time the pair is active.
//!
//! ## Ownership of fields
//!
//! - `valid_results` / `invalid_results` are only ever incremented, and only
//!   by the destination-role thread.
//! - `from_found` / `to_found` are reset by worker 0 between the Arrive and
//!   IdentifyRole barriers and claimed by CAS before the Claim barrier.
//! - The scratch values are written by one role and read by the other after
//!   a 2-party barrier.
//!
//! Everything is a relaxed atomic. Cross-thread visibility comes from the
//! barriers, not from the atomics' orderings.

use std::fmt;
use std::sync::Barrier;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::cache_aligned::{AtomicF64, CacheAligned};

/// Which side of the ping-pong a thread plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Owns the baton while it is `true`; flips it to `false`.
    Source,
    /// Owns the baton while it is `false`; flips it to `true`.
    Destination,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Destination => "destination",
        }
    }

    /// Baton value that means "my turn".
    #[inline]
    #[must_use]
    pub const fn turn(self) -> bool {
        matches!(self, Self::Source)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a role claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Won,
    /// Another thread already holds the role this round.
    AlreadyClaimed,
}

/// Measurement record for one ordered pair of logical cores.
pub struct Experiment {
    from: usize,
    to: usize,

    valid_results: AtomicU32,
    invalid_results: AtomicU32,

    from_found: AtomicBool,
    to_found: AtomicBool,

    /// The shared cache line under measurement.
    bounce: CacheAligned<AtomicBool>,

    from_frequency_before_ghz: AtomicF64,
    from_frequency_after_ghz: AtomicF64,
    from_did_not_change: AtomicBool,
    to_did_not_change: AtomicBool,
    from_ns_per_iteration: AtomicF64,

    before_barrier: Barrier,
    after_barrier: Barrier,
    after_streak_barrier: Barrier,
}

impl Experiment {
    /// Fresh record for the pair `from -> to`.
    ///
    /// # Panics
    ///
    /// If `from == to`; the matrix never builds such a pair.
    #[must_use]
    pub fn new(from: usize, to: usize) -> Self {
        assert_ne!(from, to, "an experiment needs two distinct cores");
        Self {
            from,
            to,
            valid_results: AtomicU32::new(0),
            invalid_results: AtomicU32::new(0),
            from_found: AtomicBool::new(false),
            to_found: AtomicBool::new(false),
            bounce: CacheAligned::new(AtomicBool::new(true)),
            from_frequency_before_ghz: AtomicF64::new(0.0),
            from_frequency_after_ghz: AtomicF64::new(0.0),
            from_did_not_change: AtomicBool::new(false),
            to_did_not_change: AtomicBool::new(false),
            from_ns_per_iteration: AtomicF64::new(0.0),
            before_barrier: Barrier::new(2),
            after_barrier: Barrier::new(2),
            after_streak_barrier: Barrier::new(2),
        }
    }

    #[inline]
    #[must_use]
    pub fn from_index(&self) -> usize {
        self.from
    }

    #[inline]
    #[must_use]
    pub fn to_index(&self) -> usize {
        self.to
    }

    /// Logical index whose thread may claim `role`.
    #[inline]
    #[must_use]
    pub fn index_for(&self, role: Role) -> usize {
        match role {
            Role::Source => self.from,
            Role::Destination => self.to,
        }
    }

    // -- counters ----------------------------------------------------------

    #[inline]
    pub fn valid_results(&self) -> u32 {
        self.valid_results.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn invalid_results(&self) -> u32 {
        self.invalid_results.load(Ordering::Relaxed)
    }

    /// Valid samples still missing to reach `target`.
    #[inline]
    pub fn remaining(&self, target: u32) -> u32 {
        target.saturating_sub(self.valid_results())
    }

    pub(crate) fn record_valid(&self) -> u32 {
        self.valid_results.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_invalid(&self) -> u32 {
        self.invalid_results.fetch_add(1, Ordering::Relaxed) + 1
    }

    // -- per-round reset and claims ----------------------------------------

    /// Return claim flags, baton and scratch values to their initial state.
    /// Counters are untouched. Idempotent.
    pub fn reset_round(&self) {
        self.from_found.store(false, Ordering::Relaxed);
        self.to_found.store(false, Ordering::Relaxed);
        self.bounce.store(true, Ordering::Relaxed);
        self.from_frequency_before_ghz.store(0.0, Ordering::Relaxed);
        self.from_frequency_after_ghz.store(0.0, Ordering::Relaxed);
        self.from_did_not_change.store(false, Ordering::Relaxed);
        self.to_did_not_change.store(false, Ordering::Relaxed);
        self.from_ns_per_iteration.store(0.0, Ordering::Relaxed);
    }

    fn found_flag(&self, role: Role) -> &AtomicBool {
        match role {
            Role::Source => &self.from_found,
            Role::Destination => &self.to_found,
        }
    }

    /// Try to take `role` for this round. At most one caller wins per reset.
    #[inline]
    pub fn claim(&self, role: Role) -> ClaimOutcome {
        match self.found_flag(role).compare_exchange(
            false,
            true,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => ClaimOutcome::Won,
            Err(_) => ClaimOutcome::AlreadyClaimed,
        }
    }

    #[inline]
    pub fn is_claimed(&self, role: Role) -> bool {
        self.found_flag(role).load(Ordering::Relaxed)
    }

    /// Both roles found this round, i.e. the pair can be measured.
    #[inline]
    pub fn both_claimed(&self) -> bool {
        self.is_claimed(Role::Source) && self.is_claimed(Role::Destination)
    }

    // -- baton -------------------------------------------------------------

    /// Wait for `role`'s turn and hand the baton to the other side.
    #[inline]
    pub fn pass_baton(&self, role: Role) {
        let mine = role.turn();
        while self
            .bounce
            .compare_exchange_weak(mine, !mine, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {}
    }

    /// Current baton value (`true` = source's turn).
    pub fn baton(&self) -> bool {
        self.bounce.load(Ordering::Relaxed)
    }

    // -- scratch published across 2-party barriers -------------------------

    pub(crate) fn publish_source_frequency_before(&self, ghz: f64) {
        self.from_frequency_before_ghz.store(ghz, Ordering::Relaxed);
    }

    pub(crate) fn publish_source_after(
        &self,
        ghz_after: f64,
        did_not_change: bool,
        ns_per_iter: f64,
    ) {
        self.from_frequency_after_ghz.store(ghz_after, Ordering::Relaxed);
        self.from_did_not_change.store(did_not_change, Ordering::Relaxed);
        self.from_ns_per_iteration.store(ns_per_iter, Ordering::Relaxed);
    }

    pub(crate) fn publish_destination_after(&self, did_not_change: bool) {
        self.to_did_not_change.store(did_not_change, Ordering::Relaxed);
    }

    pub(crate) fn source_frequency_before(&self) -> f64 {
        self.from_frequency_before_ghz.load(Ordering::Relaxed)
    }

    pub(crate) fn source_frequency_after(&self) -> f64 {
        self.from_frequency_after_ghz.load(Ordering::Relaxed)
    }

    pub(crate) fn source_ns_per_iteration(&self) -> f64 {
        self.from_ns_per_iteration.load(Ordering::Relaxed)
    }

    /// Neither participant migrated during the last timed window.
    pub(crate) fn window_is_valid(&self) -> bool {
        self.from_did_not_change.load(Ordering::Relaxed)
            && self.to_did_not_change.load(Ordering::Relaxed)
    }

    pub(crate) fn before_barrier(&self) -> &Barrier {
        &self.before_barrier
    }

    pub(crate) fn after_barrier(&self) -> &Barrier {
        &self.after_barrier
    }

    pub(crate) fn after_streak_barrier(&self) -> &Barrier {
        &self.after_streak_barrier
    }

    /// Scratch state, for tests and diagnostics.
    pub fn scratch(&self) -> ScratchSnapshot {
        ScratchSnapshot {
            from_found: self.from_found.load(Ordering::Relaxed),
            to_found: self.to_found.load(Ordering::Relaxed),
            bounce: self.baton(),
            from_frequency_before_ghz: self.source_frequency_before(),
            from_frequency_after_ghz: self.source_frequency_after(),
            from_did_not_change: self.from_did_not_change.load(Ordering::Relaxed),
            to_did_not_change: self.to_did_not_change.load(Ordering::Relaxed),
            from_ns_per_iteration: self.source_ns_per_iteration(),
        }
    }

    pub fn snapshot(&self) -> ExperimentSnapshot {
        ExperimentSnapshot {
            from_index: self.from,
            to_index: self.to,
            valid_results: self.valid_results(),
            invalid_results: self.invalid_results(),
        }
    }
}

impl fmt::Debug for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("valid_results", &self.valid_results())
            .field("invalid_results", &self.invalid_results())
            .finish_non_exhaustive()
    }
}

/// Point-in-time counters of one experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSnapshot {
    pub from_index: usize,
    pub to_index: usize,
    pub valid_results: u32,
    pub invalid_results: u32,
}

/// Per-round scratch fields of one experiment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScratchSnapshot {
    pub from_found: bool,
    pub to_found: bool,
    pub bounce: bool,
    pub from_frequency_before_ghz: f64,
    pub from_frequency_after_ghz: f64,
    pub from_did_not_change: bool,
    pub to_did_not_change: bool,
    pub from_ns_per_iteration: f64,
}

impl ScratchSnapshot {
    /// The state [`Experiment::reset_round`] leaves behind.
    pub const RESET: Self = Self {
        from_found: false,
        to_found: false,
        bounce: true,
        from_frequency_before_ghz: 0.0,
        from_frequency_after_ghz: 0.0,
        from_did_not_change: false,
        to_did_not_change: false,
        from_ns_per_iteration: 0.0,
    };
}
