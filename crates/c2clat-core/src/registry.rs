//! Core registry: opaque physical core ids to dense logical indices.
//!
//! Ids are discovered lazily, as worker threads happen to run on them, and
//! receive indices in discovery order. The mapping is append-only: once an
//! id has an index it keeps it for the rest of the run.
//!
//! ## Locking
//!
//! Resolution is read-mostly. [`CoreRegistry::resolve`] first looks the id up
//! under the shared lock; on a miss it takes the exclusive lock and looks
//! again before assigning, because another thread may have inserted the same
//! id between the two acquisitions.
//!
//! ## Overflow
//!
//! The experiment matrix is sized once. If more distinct ids show up than
//! `expected` cores, the extra ids are never indexed. A warning is logged the
//! first time this happens; threads on such cores simply never claim a role.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use c2clat_probe::{HardwareProbe, PhysicalCoreId};
use parking_lot::RwLock;

#[derive(Debug, Default)]
struct RegistryState {
    index_to_core: Vec<PhysicalCoreId>,
    core_to_index: HashMap<PhysicalCoreId, usize>,
}

/// Bidirectional, append-only map between physical core ids and logical
/// indices `0..expected`.
#[derive(Debug)]
pub struct CoreRegistry {
    expected: usize,
    state: RwLock<RegistryState>,
    overflow_warned: AtomicBool,
}

impl CoreRegistry {
    #[must_use]
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            state: RwLock::new(RegistryState {
                index_to_core: Vec::with_capacity(expected),
                core_to_index: HashMap::with_capacity(expected),
            }),
            overflow_warned: AtomicBool::new(false),
        }
    }

    /// Logical index for `core`, assigning the next free index on first
    /// sight. `None` once all `expected` indices are taken by other ids.
    pub fn resolve(&self, core: PhysicalCoreId) -> Option<usize> {
        if let Some(&index) = self.state.read().core_to_index.get(&core) {
            return Some(index);
        }

        let mut state = self.state.write();
        if let Some(&index) = state.core_to_index.get(&core) {
            return Some(index);
        }

        if state.index_to_core.len() >= self.expected {
            drop(state);
            self.warn_overflow(core);
            return None;
        }

        let index = state.index_to_core.len();
        state.index_to_core.push(core);
        state.core_to_index.insert(core, index);
        drop(state);

        tracing::info!(
            target: "c2clat.registry",
            core = core.get(),
            index,
            "new core discovered"
        );
        Some(index)
    }

    /// Read the executing core from `probe` and resolve it.
    pub fn resolve_current<P: HardwareProbe + ?Sized>(
        &self,
        probe: &P,
    ) -> (PhysicalCoreId, Option<usize>) {
        let core = probe.current_core_id();
        (core, self.resolve(core))
    }

    /// Reverse lookup; `None` if `index` has not been assigned yet.
    pub fn core_id(&self, index: usize) -> Option<PhysicalCoreId> {
        self.state.read().index_to_core.get(index).copied()
    }

    /// Like [`core_id`](Self::core_id) but yields [`PhysicalCoreId::UNKNOWN`]
    /// for unassigned indices, for printing.
    pub fn core_id_or_unknown(&self, index: usize) -> PhysicalCoreId {
        self.core_id(index).unwrap_or(PhysicalCoreId::UNKNOWN)
    }

    /// Number of ids that have an index.
    pub fn len(&self) -> usize {
        self.state.read().index_to_core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Whether an unindexed id has been seen.
    pub fn overflowed(&self) -> bool {
        self.overflow_warned.load(Ordering::Relaxed)
    }

    /// Indexed ids in index order.
    pub fn snapshot(&self) -> Vec<PhysicalCoreId> {
        self.state.read().index_to_core.clone()
    }

    fn warn_overflow(&self, core: PhysicalCoreId) {
        if self
            .overflow_warned
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::warn!(
                target: "c2clat.registry",
                core = core.get(),
                expected = self.expected,
                "more physical cores than expected; only the first {} are tested",
                self.expected
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn id(raw: u64) -> PhysicalCoreId {
        PhysicalCoreId::new(raw)
    }

    #[test]
    fn assigns_in_discovery_order() {
        let reg = CoreRegistry::new(3);
        assert!(reg.is_empty());
        assert_eq!(reg.resolve(id(40)), Some(0));
        assert_eq!(reg.resolve(id(7)), Some(1));
        assert_eq!(reg.resolve(id(40)), Some(0));
        assert_eq!(reg.resolve(id(1000)), Some(2));
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.snapshot(), vec![id(40), id(7), id(1000)]);
    }

    #[test]
    fn reverse_lookup() {
        let reg = CoreRegistry::new(2);
        reg.resolve(id(5));
        assert_eq!(reg.core_id(0), Some(id(5)));
        assert_eq!(reg.core_id(1), None);
        assert_eq!(reg.core_id_or_unknown(1), PhysicalCoreId::UNKNOWN);
    }

    #[test]
    fn overflow_is_not_indexed() {
        let reg = CoreRegistry::new(2);
        assert_eq!(reg.resolve(id(1)), Some(0));
        assert_eq!(reg.resolve(id(2)), Some(1));
        assert!(!reg.overflowed());

        assert_eq!(reg.resolve(id(3)), None);
        assert!(reg.overflowed());
        assert_eq!(reg.resolve(id(4)), None);
        assert_eq!(reg.len(), 2);

        // Known ids keep resolving after overflow.
        assert_eq!(reg.resolve(id(2)), Some(1));
    }

    #[test]
    fn resolve_current_uses_probe() {
        let probe = c2clat_probe::SimulatedProbe::new().with_base_core_id(900);
        let reg = CoreRegistry::new(4);
        let (core, index) = reg.resolve_current(&probe);
        assert_eq!(core, id(900));
        assert_eq!(index, Some(0));
    }

    #[test]
    fn concurrent_discovery_of_same_id_gets_one_index() {
        let reg = Arc::new(CoreRegistry::new(4));
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let r = Arc::clone(&reg);
                let b = Arc::clone(&barrier);
                thread::spawn(move || {
                    b.wait();
                    // Half the threads race on id 77, the rest on 78.
                    r.resolve(id(77 + (t % 2)))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let idx77 = results[0];
        let idx78 = results[1];
        for (t, r) in results.iter().enumerate() {
            assert_eq!(*r, if t % 2 == 0 { idx77 } else { idx78 });
        }
        assert_ne!(idx77, idx78);
        assert_eq!(reg.len(), 2);
    }
}
