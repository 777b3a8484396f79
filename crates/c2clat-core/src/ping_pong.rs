//! The two-thread ping-pong measurement.
//!
//! Source and destination take turns flipping the experiment's baton with
//! relaxed CAS. After a few untimed warmup flips each side times
//! `iterations_per_experiment` flips between two timestamp reads. One flip
//! is a full round trip of the cache line, so the per-direction latency is
//! half the per-iteration time.
//!
//! A measurement is valid only if neither thread changed cores between role
//! identification and the end of its timed window. Frequency estimates are
//! carried into the sample for reporting and never affect validity.
//!
//! ## Scratch handoff
//!
//! ```text
//!   source                         destination
//!   publish freq_before
//!   ───────────── before barrier ─────────────
//!   warmup + timed flips           warmup + timed flips
//!   publish after-values           read source freq_before
//!                                  publish did_not_change
//!   ───────────── after barrier ──────────────
//!   read validity                  read validity + source after-values,
//!                                  count, emit sample
//! ```
//!
//! The source overwrites its scratch only after the next before barrier,
//! which the destination cannot pass until it has consumed the previous
//! values.

use c2clat_probe::{HardwareProbe, PhysicalCoreId};

use crate::config::RunConfig;
use crate::experiment::{Experiment, Role};
use crate::metrics;
use crate::sample::{LatencySample, SampleSink};

/// Valid and invalid measurements taken during one streak.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreakOutcome {
    pub valid: u32,
    pub invalid: u32,
}

impl StreakOutcome {
    #[must_use]
    pub fn attempts(self) -> u32 {
        self.valid + self.invalid
    }
}

/// Consecutive valid measurements allowed in a streak starting now.
///
/// Both participants call this before their first barrier, while
/// `valid_results` cannot change, so they agree on the cap.
#[must_use]
pub fn streak_cap(experiment: &Experiment, config: &RunConfig) -> u32 {
    experiment
        .remaining(config.target_samples)
        .min(config.streak_max)
}

/// One participant of a streak on a claimed experiment.
pub struct PingPong<'a, P: ?Sized> {
    experiment: &'a Experiment,
    probe: &'a P,
    config: &'a RunConfig,
}

impl<'a, P: HardwareProbe + ?Sized> PingPong<'a, P> {
    pub fn new(experiment: &'a Experiment, probe: &'a P, config: &'a RunConfig) -> Self {
        Self {
            experiment,
            probe,
            config,
        }
    }

    /// Measure until a window is invalidated or the streak cap is reached,
    /// then meet the partner on the after-streak barrier.
    ///
    /// `core` is the id this thread read when it identified its role.
    /// `source_core_id` is only used by the destination, to label samples.
    pub fn run_streak<S: SampleSink + ?Sized>(
        &self,
        role: Role,
        core: PhysicalCoreId,
        source_core_id: PhysicalCoreId,
        sink: &S,
    ) -> StreakOutcome {
        let cap = streak_cap(self.experiment, self.config);
        let mut outcome = StreakOutcome::default();

        loop {
            let valid = match role {
                Role::Source => self.measure_as_source(core),
                Role::Destination => self.measure_as_destination(core, source_core_id, sink),
            };
            if valid {
                outcome.valid += 1;
            } else {
                outcome.invalid += 1;
            }
            if !valid || outcome.valid >= cap {
                break;
            }
        }

        self.experiment.after_streak_barrier().wait();

        tracing::trace!(
            target: "c2clat.ping_pong",
            from = self.experiment.from_index(),
            to = self.experiment.to_index(),
            role = %role,
            cap,
            valid = outcome.valid,
            invalid = outcome.invalid,
            "streak finished"
        );
        outcome
    }

    /// Warmup flips, then timed flips. Returns the elapsed ns per iteration,
    /// halved to one direction.
    fn ping_pong(&self, role: Role) -> f64 {
        let e = self.experiment;
        for _ in 0..self.config.warmup_iterations {
            e.pass_baton(role);
        }

        let start = self.probe.timestamp();
        for _ in 0..self.config.iterations_per_experiment {
            e.pass_baton(role);
        }
        let end = self.probe.timestamp();

        self.probe.ticks_to_ns(start, end) / f64::from(self.config.iterations_per_experiment) / 2.0
    }

    fn measure_as_source(&self, core: PhysicalCoreId) -> bool {
        let e = self.experiment;
        e.publish_source_frequency_before(self.probe.estimate_frequency_ghz());
        e.before_barrier().wait();

        let ns_per_iteration = self.ping_pong(Role::Source);

        let core_after = self.probe.current_core_id();
        let frequency_after = self.probe.estimate_frequency_ghz();
        e.publish_source_after(frequency_after, core_after == core, ns_per_iteration);

        e.after_barrier().wait();
        e.window_is_valid()
    }

    fn measure_as_destination<S: SampleSink + ?Sized>(
        &self,
        core: PhysicalCoreId,
        source_core_id: PhysicalCoreId,
        sink: &S,
    ) -> bool {
        let e = self.experiment;
        let frequency_before = self.probe.estimate_frequency_ghz();
        e.before_barrier().wait();

        let ns_per_iteration = self.ping_pong(Role::Destination);

        let core_after = self.probe.current_core_id();
        let frequency_after = self.probe.estimate_frequency_ghz();
        let source_frequency_before = e.source_frequency_before();
        e.publish_destination_after(core_after == core);

        e.after_barrier().wait();

        if !e.window_is_valid() {
            let invalid = e.record_invalid();
            let total = metrics::record_sample(false);
            if total.checked_rem(self.config.progress_log_interval) == Some(0) {
                tracing::debug!(
                    target: "c2clat.ping_pong",
                    from = e.from_index(),
                    to = e.to_index(),
                    pair_invalid = invalid,
                    total_invalid = total,
                    "measurement invalidated by core migration"
                );
            }
            return false;
        }

        e.record_valid();
        metrics::record_sample(true);
        sink.record(&LatencySample {
            from_index: e.from_index(),
            to_index: e.to_index(),
            from_core_id: source_core_id,
            to_core_id: core,
            from_ns_per_iteration: e.source_ns_per_iteration(),
            to_ns_per_iteration: ns_per_iteration,
            from_frequency_before_ghz: source_frequency_before,
            from_frequency_after_ghz: e.source_frequency_after(),
            to_frequency_before_ghz: frequency_before,
            to_frequency_after_ghz: frequency_after,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::CollectingSink;
    use c2clat_probe::SimulatedProbe;
    use std::thread;

    fn small_config(target: u32) -> RunConfig {
        RunConfig::new(2)
            .with_target_samples(target)
            .with_iterations(8)
            .with_warmup_iterations(2)
            .with_streak_max(4)
    }

    fn run_pair<P: HardwareProbe>(
        probe: &P,
        experiment: &Experiment,
        config: &RunConfig,
        sink: &CollectingSink,
    ) -> (StreakOutcome, StreakOutcome) {
        thread::scope(|s| {
            let src = s.spawn(|| {
                let core = probe.current_core_id();
                PingPong::new(experiment, probe, config).run_streak(
                    Role::Source,
                    core,
                    PhysicalCoreId::UNKNOWN,
                    sink,
                )
            });
            let dst = s.spawn(|| {
                let core = probe.current_core_id();
                PingPong::new(experiment, probe, config).run_streak(
                    Role::Destination,
                    core,
                    PhysicalCoreId::new(7),
                    sink,
                )
            });
            (src.join().unwrap(), dst.join().unwrap())
        })
    }

    #[test]
    fn cap_is_min_of_remaining_and_streak_max() {
        let e = Experiment::new(0, 1);
        let cfg = small_config(6);
        assert_eq!(streak_cap(&e, &cfg), 4);
        for _ in 0..4 {
            e.record_valid();
        }
        assert_eq!(streak_cap(&e, &cfg), 2);
        for _ in 0..4 {
            e.record_valid();
        }
        assert_eq!(streak_cap(&e, &cfg), 0);
    }

    #[test]
    fn stable_threads_fill_a_streak() {
        let probe = SimulatedProbe::new();
        let e = Experiment::new(0, 1);
        let cfg = small_config(10);
        let sink = CollectingSink::new();

        let (src, dst) = run_pair(&probe, &e, &cfg, &sink);

        assert_eq!(src, StreakOutcome { valid: 4, invalid: 0 });
        assert_eq!(dst, src, "both sides must agree on every window");
        assert_eq!(e.valid_results(), 4);
        assert_eq!(e.invalid_results(), 0);

        let samples = sink.samples();
        assert_eq!(samples.len(), 4);
        for s in &samples {
            assert_eq!((s.from_index, s.to_index), (0, 1));
            assert_eq!(s.from_core_id, PhysicalCoreId::new(7));
            assert!(s.from_ns_per_iteration >= 0.0);
            assert!(s.to_ns_per_iteration >= 0.0);
            assert!((s.to_frequency_before_ghz - 3.2).abs() < 1e-9);
            assert!((s.from_frequency_after_ghz - 3.2).abs() < 1e-9);
        }
    }

    #[test]
    fn short_cap_stops_early() {
        let probe = SimulatedProbe::new();
        let e = Experiment::new(0, 1);
        let cfg = small_config(1);
        let sink = CollectingSink::new();

        let (src, dst) = run_pair(&probe, &e, &cfg, &sink);
        assert_eq!(src.valid, 1);
        assert_eq!(dst.valid, 1);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn migration_invalidates_and_emits_nothing() {
        let probe = SimulatedProbe::migrating();
        let e = Experiment::new(0, 1);
        let cfg = small_config(10);
        let sink = CollectingSink::new();

        let (src, dst) = run_pair(&probe, &e, &cfg, &sink);

        assert_eq!(src, StreakOutcome { valid: 0, invalid: 1 });
        assert_eq!(dst.attempts(), 1);
        assert_eq!(e.valid_results(), 0);
        assert_eq!(e.invalid_results(), 1);
        assert!(sink.is_empty());
    }
}
