//! Running a full latency measurement.
//!
//! [`LatencyRun`] owns the registry and matrix of one run and spawns the
//! worker threads inside a [`std::thread::scope`], so workers borrow the
//! shared state instead of reference counting it.
//!
//! Workers are held at a start gate until every one of them has been
//! spawned. The round barriers are sized for all `total_cores` workers; if a
//! spawn fails, the gate is aborted and the already-running workers return
//! without touching a barrier.

use std::thread;
use std::time::{Duration, Instant};

use c2clat_error::{LatencyError, Result};
use c2clat_probe::{HardwareProbe, PhysicalCoreId};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::experiment::ExperimentSnapshot;
use crate::matrix::ExperimentMatrix;
use crate::orchestrator::{RoundOrchestrator, WorkerStats};
use crate::registry::CoreRegistry;
use crate::sample::SampleSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Closed,
    Open,
    Aborted,
}

/// One-shot gate releasing (or dismissing) every waiting worker at once.
#[derive(Debug)]
struct StartGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

impl StartGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Closed),
            cv: Condvar::new(),
        }
    }

    /// Block until the gate opens (`true`) or is aborted (`false`).
    fn wait(&self) -> bool {
        let mut state = self.state.lock();
        while *state == GateState::Closed {
            self.cv.wait(&mut state);
        }
        *state == GateState::Open
    }

    fn open(&self) {
        self.set(GateState::Open);
    }

    fn abort(&self) {
        self.set(GateState::Aborted);
    }

    fn set(&self, next: GateState) {
        *self.state.lock() = next;
        self.cv.notify_all();
    }
}

/// Outcome of [`LatencyRun::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub total_cores: usize,
    pub target_samples: u32,
    /// Every experiment, in row-major pair order.
    pub experiments: Vec<ExperimentSnapshot>,
    /// Physical core ids in logical index order.
    pub cores: Vec<PhysicalCoreId>,
    pub workers: Vec<WorkerStats>,
    pub rounds: u64,
    pub resorts: u64,
    pub elapsed_secs: f64,
    /// Every pair reached the target. `false` when the run was stopped.
    pub completed: bool,
}

impl RunReport {
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.elapsed_secs.max(0.0))
    }

    pub fn total_valid(&self) -> u64 {
        self.experiments
            .iter()
            .map(|e| u64::from(e.valid_results))
            .sum()
    }

    pub fn total_invalid(&self) -> u64 {
        self.experiments
            .iter()
            .map(|e| u64::from(e.invalid_results))
            .sum()
    }

    pub fn min_valid(&self) -> u32 {
        self.experiments
            .iter()
            .map(|e| e.valid_results)
            .min()
            .unwrap_or(0)
    }

    pub fn pair(&self, from: usize, to: usize) -> Option<&ExperimentSnapshot> {
        self.experiments
            .iter()
            .find(|e| e.from_index == from && e.to_index == to)
    }
}

/// A configured measurement over `total_cores` workers.
///
/// A run is single-shot: once [`run`](Self::run) returned, the matrix is
/// done and running again returns immediately with zero rounds.
pub struct LatencyRun<P> {
    config: RunConfig,
    probe: P,
    registry: CoreRegistry,
    matrix: ExperimentMatrix,
}

impl<P: HardwareProbe> LatencyRun<P> {
    /// Validate `config` and allocate every experiment.
    pub fn new(config: RunConfig, probe: P) -> Result<Self> {
        config.validate()?;
        let registry = CoreRegistry::new(config.total_cores);
        let matrix = ExperimentMatrix::new(config.total_cores, config.target_samples);
        Ok(Self {
            config,
            probe,
            registry,
            matrix,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn registry(&self) -> &CoreRegistry {
        &self.registry
    }

    pub fn matrix(&self) -> &ExperimentMatrix {
        &self.matrix
    }

    /// Stop at the end of the next full round. Safe from any thread,
    /// including a sink callback.
    pub fn request_stop(&self) {
        self.matrix.request_stop();
    }

    /// Spawn one worker per core, run rounds until every pair reaches the
    /// target (or a stop is requested), and report.
    pub fn run<S: SampleSink + ?Sized>(&self, sink: &S) -> Result<RunReport> {
        let total = self.config.total_cores;
        tracing::info!(
            target: "c2clat.round",
            workers = total,
            experiments = self.matrix.len(),
            target = self.config.target_samples,
            clock = self.probe.clock_name(),
            "run starting"
        );

        let started = Instant::now();
        let orchestrator =
            RoundOrchestrator::new(&self.registry, &self.matrix, &self.probe, &self.config, sink);
        let gate = StartGate::new();

        let workers = thread::scope(|s| -> Result<Vec<WorkerStats>> {
            let mut handles = Vec::with_capacity(total);
            for worker in 0..total {
                let orchestrator = &orchestrator;
                let gate = &gate;
                let probe = &self.probe;
                let spawned = thread::Builder::new()
                    .name(format!("c2clat-worker-{worker}"))
                    .spawn_scoped(s, move || {
                        probe.prepare_worker_thread(worker);
                        gate.wait().then(|| orchestrator.run_worker(worker))
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(source) => {
                        gate.abort();
                        tracing::error!(
                            target: "c2clat.round",
                            worker,
                            error = %source,
                            "worker spawn failed; aborting run"
                        );
                        return Err(LatencyError::WorkerSpawn { worker, source });
                    }
                }
            }
            gate.open();

            let mut stats = Vec::with_capacity(total);
            let mut panicked = None;
            for (worker, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(Some(worker_stats)) => stats.push(worker_stats),
                    Ok(None) => {}
                    Err(_) => {
                        panicked.get_or_insert(worker);
                    }
                }
            }
            match panicked {
                Some(worker) => Err(LatencyError::WorkerPanicked { worker }),
                None => Ok(stats),
            }
        })?;

        let elapsed = started.elapsed();
        let mut experiments: Vec<ExperimentSnapshot> =
            self.matrix.experiments().iter().map(|e| e.snapshot()).collect();
        experiments.sort_by_key(|e| (e.from_index, e.to_index));

        let report = RunReport {
            total_cores: total,
            target_samples: self.config.target_samples,
            experiments,
            cores: self.registry.snapshot(),
            rounds: workers.first().map_or(0, |w| w.rounds),
            workers,
            resorts: self.matrix.resort_count(),
            elapsed_secs: elapsed.as_secs_f64(),
            completed: self.matrix.target_reached(),
        };

        tracing::info!(
            target: "c2clat.round",
            rounds = report.rounds,
            valid = report.total_valid(),
            invalid = report.total_invalid(),
            completed = report.completed,
            elapsed_secs = report.elapsed_secs,
            "run finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::NullSink;
    use c2clat_probe::SimulatedProbe;
    use std::sync::Arc;

    #[test]
    fn gate_releases_all_waiters() {
        let gate = Arc::new(StartGate::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let g = Arc::clone(&gate);
                std::thread::spawn(move || g.wait())
            })
            .collect();
        gate.open();
        for w in waiters {
            assert!(w.join().unwrap());
        }
    }

    #[test]
    fn aborted_gate_dismisses_waiters() {
        let gate = Arc::new(StartGate::new());
        let waiter = {
            let g = Arc::clone(&gate);
            std::thread::spawn(move || g.wait())
        };
        gate.abort();
        assert!(!waiter.join().unwrap());
        // Late arrivals see the final state without blocking.
        assert!(!gate.wait());
    }

    #[test]
    fn rejects_invalid_config() {
        let err = LatencyRun::new(RunConfig::new(1), SimulatedProbe::new())
            .err()
            .unwrap();
        assert!(matches!(err, LatencyError::InvalidConfig { .. }));
    }

    #[test]
    fn second_run_is_a_no_op() {
        let config = RunConfig::new(2)
            .with_target_samples(1)
            .with_iterations(8)
            .with_warmup_iterations(1)
            .with_filler_loop_length(16);
        let run = LatencyRun::new(config, SimulatedProbe::new()).unwrap();
        let first = run.run(&NullSink).unwrap();
        assert!(first.completed);
        assert!(first.rounds >= 2);

        let second = run.run(&NullSink).unwrap();
        assert_eq!(second.rounds, 0);
        assert_eq!(second.total_valid(), first.total_valid());
    }
}
