//! Property tests for the core registry.

use std::collections::HashMap;

use proptest::prelude::*;

use c2clat_core::CoreRegistry;
use c2clat_probe::PhysicalCoreId;

proptest! {
    #[test]
    fn prop_registry_is_bijection_over_indexed_ids(
        expected in 1_usize..16,
        raw_ids in proptest::collection::vec(0_u64..40, 0..200),
    ) {
        let registry = CoreRegistry::new(expected);
        let mut first_index: HashMap<u64, Option<usize>> = HashMap::new();

        for raw in &raw_ids {
            let got = registry.resolve(PhysicalCoreId::new(*raw));
            let first = *first_index.entry(*raw).or_insert(got);
            prop_assert_eq!(got, first, "id {} changed index", raw);
        }

        let indexed = registry.snapshot();
        prop_assert!(indexed.len() <= expected);

        // Distinct indices map back to distinct ids and forward again.
        for (index, id) in indexed.iter().enumerate() {
            prop_assert_eq!(registry.core_id(index), Some(*id));
            prop_assert_eq!(registry.resolve(*id), Some(index));
        }
        let mut ids: Vec<_> = indexed.iter().map(|id| id.get()).collect();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), indexed.len());

        // Indices follow discovery order.
        let mut discovered = Vec::new();
        for raw in &raw_ids {
            if !discovered.contains(raw) && discovered.len() < expected {
                discovered.push(*raw);
            }
        }
        let snapshot_raw: Vec<_> = indexed.iter().map(|id| id.get()).collect();
        prop_assert_eq!(snapshot_raw, discovered);

        let distinct = first_index.len();
        prop_assert_eq!(registry.overflowed(), distinct > expected);
    }
}
