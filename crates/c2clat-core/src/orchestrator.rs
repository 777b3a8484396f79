//! Per-thread round loop.
//!
//! Every worker runs [`RoundOrchestrator::run_worker`]. A round moves all
//! workers through the same phases in lockstep:
//!
//! ```text
//!   Arrive ─▶ IdentifyRole ─▶ Claim ─▶ Gate ─┬─▶ Measure (source, destination)
//!   (b1)       (b2)            (b3)          ├─▶ Filler  (everybody else)
//!                                            └─▶ Miss filler (pair not found)
//!                                                    │
//!                                                    ▼
//!                                                 Rejoin (b4)
//! ```
//!
//! Threads are never pinned. A pair is measured only when the scheduler
//! happens to place threads on both of its cores in the same round; until
//! then the round is a miss and is simply retried.
//!
//! The done flag is set only inside a round (by the destination's resort, or
//! by worker 0 when a stop was requested) and read only at the top of the
//! loop, after the Rejoin barrier. Every worker therefore leaves after the same
//! round.

use c2clat_probe::HardwareProbe;
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::experiment::{ClaimOutcome, Experiment, Role};
use crate::matrix::ExperimentMatrix;
use crate::metrics;
use crate::ping_pong::PingPong;
use crate::registry::CoreRegistry;
use crate::sample::SampleSink;

/// What one worker did during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub worker: usize,
    pub rounds: u64,
    /// Rounds this worker spent as source or destination.
    pub streaks: u64,
    /// Measured rounds this worker sat out running filler.
    pub filler_rounds: u64,
    /// Rounds where the active pair was not found.
    pub missed_rounds: u64,
    /// Rounds on a core the registry could not index.
    pub unindexed_rounds: u64,
    pub claim_conflicts: u64,
    pub valid_samples: u64,
    pub invalid_samples: u64,
}

impl WorkerStats {
    #[must_use]
    pub fn new(worker: usize) -> Self {
        Self {
            worker,
            ..Self::default()
        }
    }
}

/// Shared state every worker's round loop runs against.
pub struct RoundOrchestrator<'a, P: ?Sized, S: ?Sized> {
    registry: &'a CoreRegistry,
    matrix: &'a ExperimentMatrix,
    probe: &'a P,
    config: &'a RunConfig,
    sink: &'a S,
}

impl<'a, P, S> RoundOrchestrator<'a, P, S>
where
    P: HardwareProbe + ?Sized,
    S: SampleSink + ?Sized,
{
    pub fn new(
        registry: &'a CoreRegistry,
        matrix: &'a ExperimentMatrix,
        probe: &'a P,
        config: &'a RunConfig,
        sink: &'a S,
    ) -> Self {
        Self {
            registry,
            matrix,
            probe,
            config,
            sink,
        }
    }

    /// Run rounds until the matrix is done. All `total_cores` workers must
    /// call this concurrently, each with a distinct `worker` id; worker 0
    /// does the per-round bookkeeping.
    pub fn run_worker(&self, worker: usize) -> WorkerStats {
        let barriers = self.matrix.barriers();
        let mut stats = WorkerStats::new(worker);
        let mut measured_rounds = 0_u64;
        let mut missed_rounds = 0_u64;

        while !self.matrix.is_done() {
            // Arrive
            barriers.arrive.wait();
            stats.rounds += 1;

            // IdentifyRole
            let (core, index) = self.registry.resolve_current(self.probe);
            let experiment = self.matrix.top();
            if worker == 0 {
                experiment.reset_round();
                self.enforce_round_cap(stats.rounds);
            }
            barriers.identify.wait();

            // Claim
            let role = match index {
                Some(index) => self.claim(experiment, index, &mut stats),
                None => {
                    stats.unindexed_rounds += 1;
                    metrics::record_unindexed();
                    None
                }
            };
            barriers.claim.wait();

            // Gate
            let measured = experiment.both_claimed();
            if worker == 0 {
                metrics::record_round(measured);
                if measured {
                    measured_rounds += 1;
                } else {
                    missed_rounds += 1;
                }
                self.log_gate(experiment, measured, measured_rounds, missed_rounds);
            }

            if !measured {
                stats.missed_rounds += 1;
                self.probe.filler_work(self.config.miss_filler_loop_length);
            } else if let Some(role) = role {
                // Measure
                let source_core_id = self.registry.core_id_or_unknown(experiment.from_index());
                let outcome = PingPong::new(experiment, self.probe, self.config).run_streak(
                    role,
                    core,
                    source_core_id,
                    self.sink,
                );
                stats.streaks += 1;
                stats.valid_samples += u64::from(outcome.valid);
                stats.invalid_samples += u64::from(outcome.invalid);
                if role == Role::Destination {
                    self.matrix.resort();
                }
            } else {
                stats.filler_rounds += 1;
                self.probe.filler_work(self.config.filler_loop_length);
            }

            // Rejoin
            barriers.rejoin.wait();
        }

        tracing::debug!(
            target: "c2clat.round",
            worker,
            rounds = stats.rounds,
            streaks = stats.streaks,
            missed = stats.missed_rounds,
            unindexed = stats.unindexed_rounds,
            "worker finished"
        );
        stats
    }

    /// Role for a thread on logical `index`, if it wins the claim. A thread
    /// only ever tries for one role.
    fn claim(
        &self,
        experiment: &Experiment,
        index: usize,
        stats: &mut WorkerStats,
    ) -> Option<Role> {
        let role = if index == experiment.from_index() {
            Role::Source
        } else if index == experiment.to_index() {
            Role::Destination
        } else {
            return None;
        };
        match experiment.claim(role) {
            ClaimOutcome::Won => Some(role),
            ClaimOutcome::AlreadyClaimed => {
                stats.claim_conflicts += 1;
                metrics::record_claim_conflict();
                None
            }
        }
    }

    /// Worker 0 only, between Arrive and IdentifyRole.
    fn enforce_round_cap(&self, round: u64) {
        let capped = self.config.max_rounds.is_some_and(|max| round >= max);
        if capped && !self.matrix.stop_requested() {
            tracing::info!(target: "c2clat.round", round, "round cap reached");
            self.matrix.request_stop();
        }
        self.matrix.promote_stop_request();
    }

    fn log_gate(
        &self,
        experiment: &Experiment,
        measured: bool,
        measured_rounds: u64,
        missed_rounds: u64,
    ) {
        // An interval of 0 disables the progress lines.
        let due = |count: u64| count.checked_rem(self.config.progress_log_interval) == Some(0);
        if measured && due(measured_rounds) {
            tracing::debug!(
                target: "c2clat.round",
                from = experiment.from_index(),
                to = experiment.to_index(),
                measured_rounds,
                least_valid = self.matrix.min_valid_results(),
                "both roles found"
            );
        } else if !measured && due(missed_rounds) {
            tracing::debug!(
                target: "c2clat.round",
                from = experiment.from_index(),
                to = experiment.to_index(),
                missed_rounds,
                "pair not found, repeating"
            );
        }
    }
}
