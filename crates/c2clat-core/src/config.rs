//! Run configuration.
//!
//! Every tunable of a run lives in [`RunConfig`], which is handed to the
//! orchestrator at construction. There are no process-wide knobs.

use std::num::NonZeroUsize;

use c2clat_error::{LatencyError, Result};
use serde::{Deserialize, Serialize};

/// Valid samples wanted for every ordered pair.
pub const DEFAULT_TARGET_SAMPLES: u32 = 300;

/// Timed baton flips per measurement.
pub const DEFAULT_ITERATIONS_PER_EXPERIMENT: u32 = 2000;

/// Untimed baton flips before the timed window.
pub const DEFAULT_WARMUP_ITERATIONS: u32 = 10;

/// Upper bound on consecutive valid measurements per visit to a pair.
pub const DEFAULT_STREAK_MAX: u32 = 10;

/// Filler length per timed iteration for idle threads. Empirical: roughly
/// covers a streak at 100 ns core-to-core latency; larger parts may need 2-4x.
pub const FILLER_LOOP_PER_ITERATION: u64 = 1024;

/// Filler length when a round could not recruit both roles.
pub const DEFAULT_MISS_FILLER_LOOP_LENGTH: u64 = 256;

/// Rounds between periodic progress log lines.
pub const DEFAULT_PROGRESS_LOG_INTERVAL: u64 = 1000;

/// Configuration of a single latency run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Worker threads, and the number of logical cores the matrix covers.
    pub total_cores: usize,
    /// Valid samples required for every ordered pair before the run ends.
    pub target_samples: u32,
    pub iterations_per_experiment: u32,
    pub warmup_iterations: u32,
    pub streak_max: u32,
    /// Filler length for threads sitting out a measured round.
    pub filler_loop_length: u64,
    /// Filler length for everybody when the round's pair was not found.
    pub miss_filler_loop_length: u64,
    pub progress_log_interval: u64,
    /// Stop after this many rounds even if some pair is short of target.
    pub max_rounds: Option<u64>,
}

impl RunConfig {
    /// Defaults for `total_cores` workers.
    #[must_use]
    pub fn new(total_cores: usize) -> Self {
        Self {
            total_cores,
            target_samples: DEFAULT_TARGET_SAMPLES,
            iterations_per_experiment: DEFAULT_ITERATIONS_PER_EXPERIMENT,
            warmup_iterations: DEFAULT_WARMUP_ITERATIONS,
            streak_max: DEFAULT_STREAK_MAX,
            filler_loop_length: u64::from(DEFAULT_ITERATIONS_PER_EXPERIMENT)
                * FILLER_LOOP_PER_ITERATION,
            miss_filler_loop_length: DEFAULT_MISS_FILLER_LOOP_LENGTH,
            progress_log_interval: DEFAULT_PROGRESS_LOG_INTERVAL,
            max_rounds: None,
        }
    }

    /// Defaults sized to the machine's available parallelism.
    pub fn from_available_parallelism() -> Result<Self> {
        let cores = std::thread::available_parallelism().map(NonZeroUsize::get)?;
        Ok(Self::new(cores))
    }

    #[must_use]
    pub fn with_target_samples(mut self, target: u32) -> Self {
        self.target_samples = target;
        self
    }

    /// Also rescales the idle filler unless it was set explicitly afterwards.
    #[must_use]
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations_per_experiment = iterations;
        self.filler_loop_length = u64::from(iterations) * FILLER_LOOP_PER_ITERATION;
        self
    }

    #[must_use]
    pub fn with_warmup_iterations(mut self, warmup: u32) -> Self {
        self.warmup_iterations = warmup;
        self
    }

    #[must_use]
    pub fn with_streak_max(mut self, streak_max: u32) -> Self {
        self.streak_max = streak_max;
        self
    }

    #[must_use]
    pub fn with_filler_loop_length(mut self, length: u64) -> Self {
        self.filler_loop_length = length;
        self
    }

    #[must_use]
    pub fn with_miss_filler_loop_length(mut self, length: u64) -> Self {
        self.miss_filler_loop_length = length;
        self
    }

    #[must_use]
    pub fn with_progress_log_interval(mut self, interval: u64) -> Self {
        self.progress_log_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_rounds(mut self, max_rounds: Option<u64>) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Ordered pairs measured by a run: `n * (n - 1)`.
    #[must_use]
    pub fn experiment_count(&self) -> usize {
        self.total_cores * self.total_cores.saturating_sub(1)
    }

    /// Reject configurations the round protocol cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.total_cores < 2 {
            return Err(LatencyError::invalid_config(
                "total_cores",
                format!("need at least 2 cores to form a pair, got {}", self.total_cores),
            ));
        }
        let positive: [(&'static str, u64); 4] = [
            ("target_samples", u64::from(self.target_samples)),
            ("iterations_per_experiment", u64::from(self.iterations_per_experiment)),
            ("streak_max", u64::from(self.streak_max)),
            ("progress_log_interval", self.progress_log_interval),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(LatencyError::invalid_config(field, "must be at least 1"));
            }
        }
        if self.max_rounds == Some(0) {
            return Err(LatencyError::invalid_config("max_rounds", "must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_constants() {
        let cfg = RunConfig::new(8);
        assert_eq!(cfg.total_cores, 8);
        assert_eq!(cfg.target_samples, 300);
        assert_eq!(cfg.iterations_per_experiment, 2000);
        assert_eq!(cfg.warmup_iterations, 10);
        assert_eq!(cfg.streak_max, 10);
        assert_eq!(cfg.filler_loop_length, 2000 * 1024);
        assert_eq!(cfg.miss_filler_loop_length, 256);
        assert_eq!(cfg.max_rounds, None);
        assert_eq!(cfg.experiment_count(), 56);
        cfg.validate().unwrap();
    }

    #[test]
    fn iterations_rescale_filler() {
        let cfg = RunConfig::new(4).with_iterations(16);
        assert_eq!(cfg.filler_loop_length, 16 * 1024);
        let cfg = cfg.with_filler_loop_length(5);
        assert_eq!(cfg.filler_loop_length, 5);
    }

    #[test]
    fn rejects_single_core() {
        let err = RunConfig::new(1).validate().unwrap_err();
        assert!(matches!(
            err,
            LatencyError::InvalidConfig {
                field: "total_cores",
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_counts() {
        for cfg in [
            RunConfig::new(4).with_target_samples(0),
            RunConfig::new(4).with_iterations(0),
            RunConfig::new(4).with_streak_max(0),
            RunConfig::new(4).with_progress_log_interval(0),
            RunConfig::new(4).with_max_rounds(Some(0)),
        ] {
            assert!(cfg.validate().is_err(), "{cfg:?} should be rejected");
        }
    }

    #[test]
    fn zero_warmup_is_allowed() {
        RunConfig::new(2).with_warmup_iterations(0).validate().unwrap();
    }

    #[test]
    fn serde_round_trip() {
        let cfg = RunConfig::new(3).with_max_rounds(Some(99));
        let json = serde_json::to_string(&cfg).unwrap();
        let back: RunConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
