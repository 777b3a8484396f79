//! Core-to-core latency engine.
//!
//! One worker thread per logical core runs barrier-synchronized rounds. In
//! each round the least-sampled ordered pair of cores is looked up, the
//! threads that currently sit on those two cores claim the source and
//! destination roles, and the pair ping-pongs a single cache line while
//! everyone else burns filler work. Nothing is pinned: roles are discovered
//! opportunistically and a measurement is thrown away if either thread
//! migrates during it.
//!
//! Entry point is [`LatencyRun`].

pub mod cache_aligned;
pub mod config;
pub mod experiment;
pub mod matrix;
pub mod metrics;
pub mod orchestrator;
pub mod ping_pong;
pub mod registry;
pub mod run;
pub mod sample;

pub use cache_aligned::{AtomicF64, CACHE_LINE_BYTES, CacheAligned};
pub use config::{
    DEFAULT_ITERATIONS_PER_EXPERIMENT, DEFAULT_MISS_FILLER_LOOP_LENGTH,
    DEFAULT_PROGRESS_LOG_INTERVAL, DEFAULT_STREAK_MAX, DEFAULT_TARGET_SAMPLES,
    DEFAULT_WARMUP_ITERATIONS, FILLER_LOOP_PER_ITERATION, RunConfig,
};
pub use experiment::{ClaimOutcome, Experiment, ExperimentSnapshot, Role, ScratchSnapshot};
pub use matrix::{ExperimentMatrix, RoundBarriers};
pub use metrics::{LatencyMetrics, latency_metrics, reset_latency_metrics};
pub use orchestrator::{RoundOrchestrator, WorkerStats};
pub use ping_pong::{PingPong, StreakOutcome, streak_cap};
pub use registry::CoreRegistry;
pub use run::{LatencyRun, RunReport};
pub use sample::{CollectingSink, FnSink, LatencySample, NullSink, SampleSink};
