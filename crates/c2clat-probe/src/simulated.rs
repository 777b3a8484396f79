//! Deterministic probe for tests and dry runs.
//!
//! Each thread that touches a [`SimulatedProbe`] is given its own synthetic
//! core id on first use (`base_core_id`, `base_core_id + 1`, ...), and keeps
//! it for the lifetime of the thread. A run with `N` workers therefore sees
//! exactly `N` distinct cores, one thread per core, and every pair becomes
//! measurable on its first visit.
//!
//! In migrating mode the first core read after two timestamp reads (the
//! start and end of a timed window) returns a different id, so every
//! ping-pong measurement is invalidated while role discovery still works.
//!
//! In roaming mode threads share a pool of `cores` ids and hop to a
//! pseudo-random one at every scheduling point, i.e. every core read that
//! does not close a timed window. Two threads may land on the same id, an id
//! may be left empty, and a pool larger than the worker count yields more
//! distinct ids than the registry can index. The read that closes a window
//! keeps the id the thread had when it opened, so measurements stay valid.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::{HardwareProbe, PhysicalCoreId, arch};

/// Added to a thread's core id when a migration is simulated.
pub const MIGRATION_ID_OFFSET: u64 = 1 << 32;

const DEFAULT_BASE_CORE_ID: u64 = 100;
const DEFAULT_FREQUENCY_GHZ: f64 = 3.2;

/// Probe ids start at 1 so a zeroed thread slot never matches a probe.
static NEXT_PROBE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, Default)]
struct ThreadSlot {
    probe: u64,
    home: u64,
    core: u64,
    hops: u64,
    timestamps_since_core_read: u32,
}

thread_local! {
    static SLOT: Cell<ThreadSlot> = const {
        Cell::new(ThreadSlot {
            probe: 0,
            home: 0,
            core: 0,
            hops: 0,
            timestamps_since_core_read: 0,
        })
    };
}

const DEFAULT_ROAM_SEED: u64 = 0x5eed_c2c1;

/// Synthetic probe: one stable core per thread, or a shared roaming pool.
#[derive(Debug)]
pub struct SimulatedProbe {
    id: u64,
    base_core_id: u64,
    next_core: AtomicU64,
    migrate_after_window: bool,
    roam_pool: Option<u64>,
    roam_seed: u64,
    frequency_ghz: f64,
    origin: Instant,
}

impl Default for SimulatedProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedProbe {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_PROBE_ID.fetch_add(1, Ordering::Relaxed),
            base_core_id: DEFAULT_BASE_CORE_ID,
            next_core: AtomicU64::new(0),
            migrate_after_window: false,
            roam_pool: None,
            roam_seed: DEFAULT_ROAM_SEED,
            frequency_ghz: DEFAULT_FREQUENCY_GHZ,
            origin: Instant::now(),
        }
    }

    /// Probe whose threads always appear to migrate during a timed window.
    #[must_use]
    pub fn migrating() -> Self {
        Self {
            migrate_after_window: true,
            ..Self::new()
        }
    }

    /// Probe whose threads hop across `cores` shared ids between rounds.
    #[must_use]
    pub fn roaming(cores: u64) -> Self {
        Self {
            roam_pool: Some(cores.max(1)),
            ..Self::new()
        }
    }

    /// Seed of the roaming schedule. A thread's sequence of ids depends only
    /// on the seed and the order in which it first touched the probe.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.roam_seed = seed;
        self
    }

    #[must_use]
    pub fn with_base_core_id(mut self, base: u64) -> Self {
        self.base_core_id = base;
        self
    }

    #[must_use]
    pub fn with_frequency_ghz(mut self, ghz: f64) -> Self {
        self.frequency_ghz = ghz;
        self
    }

    /// Number of threads that have touched the probe so far.
    #[must_use]
    pub fn assigned_cores(&self) -> u64 {
        self.next_core.load(Ordering::Relaxed)
    }

    fn with_slot<R>(&self, f: impl FnOnce(&mut ThreadSlot) -> R) -> R {
        SLOT.with(|cell| {
            let mut slot = cell.get();
            if slot.probe != self.id {
                let home = self.next_core.fetch_add(1, Ordering::Relaxed);
                slot = ThreadSlot {
                    probe: self.id,
                    home,
                    core: self.base_core_id + home,
                    hops: 0,
                    timestamps_since_core_read: 0,
                };
            }
            let out = f(&mut slot);
            cell.set(slot);
            out
        })
    }
}

impl HardwareProbe for SimulatedProbe {
    fn current_core_id(&self) -> PhysicalCoreId {
        let migrate = self.migrate_after_window;
        self.with_slot(|slot| {
            let closes_window = slot.timestamps_since_core_read >= 2;
            slot.timestamps_since_core_read = 0;
            if let Some(pool) = self.roam_pool {
                if !closes_window {
                    let draw = splitmix64(self.roam_seed ^ (slot.home << 32) ^ slot.hops);
                    slot.core = self.base_core_id + draw % pool;
                    slot.hops += 1;
                }
            }
            if migrate && closes_window {
                PhysicalCoreId::new(slot.core + MIGRATION_ID_OFFSET)
            } else {
                PhysicalCoreId::new(slot.core)
            }
        })
    }

    fn timestamp(&self) -> u64 {
        self.with_slot(|slot| {
            slot.timestamps_since_core_read = slot.timestamps_since_core_read.saturating_add(1);
        });
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn timestamp_period_ns(&self) -> f64 {
        1.0
    }

    fn estimate_frequency_ghz(&self) -> f64 {
        self.frequency_ghz
    }

    fn filler_work(&self, loop_length: u64) {
        arch::filler_work(loop_length);
    }

    fn clock_name(&self) -> &'static str {
        "simulated"
    }
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
