//! Property Tests for the Label Store
//!
//! Uses property-based testing (proptest) to check the identity guarantees
//! that hold for any label sets, shard counts and link sequences.

use std::collections::HashMap;

use kuba_pipeline::{
    labels::Labels,
    labelstore::{
        decode_global_ref_id, encode_global_ref_id, LabelStore, LabelStoreConfig,
        LabelStoreService, MAX_SHARDS,
    },
};
use prometheus::Registry;
use proptest::prelude::*;

// =============================================================================
// Test Data Strategies
// =============================================================================

/// Strategy for a small non-empty label set
fn label_set() -> impl Strategy<Value = Labels> {
    (
        "[a-z_]{1,12}",
        prop::collection::btree_map("[a-z]{1,6}", "[a-zA-Z0-9]{0,8}", 0..4),
    )
        .prop_map(|(name, extra)| {
            let mut pairs: Vec<(String, String)> = extra.into_iter().collect();
            pairs.push(("__name__".to_string(), name));
            Labels::from_pairs(pairs)
        })
}

fn store(shards: usize) -> LabelStoreService {
    let config = LabelStoreConfig {
        shards,
        ..Default::default()
    };
    LabelStoreService::new(config, &Registry::new()).unwrap()
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_ids_are_stable_and_distinct(
        sets in prop::collection::vec(label_set(), 1..40),
        shards in 1usize..=32,
    ) {
        let ls = store(shards);
        let mut seen: HashMap<Labels, u64> = HashMap::new();

        for labels in &sets {
            let id = ls.get_or_add_global_ref_id(labels);
            prop_assert_ne!(id, 0);
            match seen.get(labels) {
                Some(prev) => prop_assert_eq!(*prev, id),
                None => {
                    prop_assert!(!seen.values().any(|v| *v == id));
                    seen.insert(labels.clone(), id);
                },
            }
        }
        prop_assert_eq!(ls.stats().global_ids, seen.len());
    }

    #[test]
    fn prop_encode_decode(shard in 0u64..MAX_SHARDS as u64, local in 0u64..(1u64 << 56)) {
        prop_assert_eq!(decode_global_ref_id(encode_global_ref_id(shard, local)), (shard, local));
    }

    #[test]
    fn prop_single_shard_ids_are_dense(sets in prop::collection::vec(label_set(), 1..30)) {
        // With one shard no shard bits are packed into the ID
        let ls = store(1);
        let mut next = 1u64;
        let mut seen: HashMap<Labels, u64> = HashMap::new();

        for labels in &sets {
            let id = ls.get_or_add_global_ref_id(labels);
            if !seen.contains_key(labels) {
                prop_assert_eq!(id, next);
                seen.insert(labels.clone(), id);
                next += 1;
            }
        }
    }

    #[test]
    fn prop_sharded_ids_route_back_to_their_shard(
        sets in prop::collection::vec(label_set(), 1..30),
        shards in 2usize..=MAX_SHARDS,
    ) {
        let ls = store(shards);
        for labels in &sets {
            let (shard, local) = decode_global_ref_id(ls.get_or_add_global_ref_id(labels));
            prop_assert!(shard < shards as u64);
            prop_assert!(local >= 1);
        }
    }

    #[test]
    fn prop_local_links_round_trip(
        sets in prop::collection::vec(label_set(), 1..30),
        shards in 1usize..=16,
    ) {
        let ls = store(shards);
        let mut expected: HashMap<u64, u64> = HashMap::new();

        for (i, labels) in sets.iter().enumerate() {
            // Sinks never hand out the same local ref twice
            let local = 1_000 + i as u64;
            let global = ls.get_or_add_global_ref_id(labels);
            match expected.get(&global).copied() {
                Some(old) => {
                    ls.replace_local_link("rw", global, old, local);
                    // Replaying the same replacement changes nothing
                    ls.replace_local_link("rw", global, old, local);
                },
                None => ls.add_local_link("rw", global, local),
            }
            expected.insert(global, local);
        }

        for (global, local) in &expected {
            prop_assert_eq!(ls.get_local_ref_id("rw", *global), *local);
        }
        prop_assert_eq!(ls.stats().component_ids.get("rw").copied(), Some(expected.len()));
    }
}
