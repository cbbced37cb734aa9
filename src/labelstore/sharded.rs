//! Sharded label store
//!
//! Spreads series over independent [`Single`] shards to bound lock
//! contention at high cardinality. Each shard numbers its series
//! sequentially; the returned global ID carries the owning shard so later
//! calls route without hashing labels again.
//!
//! # Global ID Layout
//!
//! ```text
//! 63        56 55                                                  0
//! ┌──────────┬──────────────────────────────────────────────────────┐
//! │  shard   │                   per-shard ID                       │
//! └──────────┴──────────────────────────────────────────────────────┘
//! ```
//!
//! Shard 0 IDs carry no shard bits, so with a single shard the IDs are
//! numerically identical to those of an unsharded store.

use std::collections::HashMap;
use std::time::Duration;

use rayon::prelude::*;

use super::{LabelStore, LabelStoreStats, Single, StalenessTracker};
use crate::labels::Labels;

/// Bits of a global ID reserved for the shard index
pub const SHARD_BITS: u32 = 8;

/// Maximum number of shards
pub const MAX_SHARDS: usize = 1 << SHARD_BITS;

const LOCAL_SHIFT: u32 = 64 - SHARD_BITS;
const SHARD_MASK: u64 = ((MAX_SHARDS as u64) - 1) << LOCAL_SHIFT;
const LOCAL_ID_MASK: u64 = !SHARD_MASK;

/// Pack a shard index and a per-shard ID into a global ID
#[inline]
pub fn encode_global_ref_id(shard: u64, local_id: u64) -> u64 {
    (shard << LOCAL_SHIFT) | (local_id & LOCAL_ID_MASK)
}

/// Split a global ID into its shard index and per-shard ID
#[inline]
pub fn decode_global_ref_id(global_ref_id: u64) -> (u64, u64) {
    (
        (global_ref_id & SHARD_MASK) >> LOCAL_SHIFT,
        global_ref_id & LOCAL_ID_MASK,
    )
}

/// Label store partitioned by label hash
#[derive(Debug)]
pub(crate) struct Sharded {
    shards: Vec<Single>,
    num_shards: u64,
}

impl Sharded {
    /// Create a store with `num_shards` shards
    ///
    /// The caller validates `num_shards`; it is clamped to `[1, MAX_SHARDS]`.
    pub(crate) fn new(num_shards: usize, stale_duration: Duration) -> Self {
        let num_shards = num_shards.clamp(1, MAX_SHARDS);
        Self {
            shards: (0..num_shards).map(|_| Single::new(stale_duration)).collect(),
            num_shards: num_shards as u64,
        }
    }

    /// Resolve a global ID to its shard and per-shard ID
    ///
    /// Foreign or corrupted IDs whose shard bits point past the last shard
    /// resolve to `None`.
    fn route(&self, global_ref_id: u64) -> Option<(&Single, u64)> {
        let (shard, local_id) = decode_global_ref_id(global_ref_id);
        if shard >= self.num_shards {
            return None;
        }
        Some((&self.shards[shard as usize], local_id))
    }
}

impl LabelStore for Sharded {
    fn get_or_add_global_ref_id(&self, labels: &Labels) -> u64 {
        if labels.is_empty() {
            return 0;
        }
        let shard = labels.hash() % self.num_shards;
        let local_id = self.shards[shard as usize].get_or_add_global_ref_id(labels);
        encode_global_ref_id(shard, local_id)
    }

    fn get_local_ref_id(&self, component_id: &str, global_ref_id: u64) -> u64 {
        match self.route(global_ref_id) {
            Some((shard, id)) => shard.get_local_ref_id(component_id, id),
            None => 0,
        }
    }

    fn add_local_link(&self, component_id: &str, global_ref_id: u64, local_ref_id: u64) {
        if let Some((shard, id)) = self.route(global_ref_id) {
            shard.add_local_link(component_id, id, local_ref_id);
        }
    }

    fn replace_local_link(
        &self,
        component_id: &str,
        global_ref_id: u64,
        cached_local_ref: u64,
        new_local_ref: u64,
    ) {
        if let Some((shard, id)) = self.route(global_ref_id) {
            shard.replace_local_link(component_id, id, cached_local_ref, new_local_ref);
        }
    }

    fn track_staleness(&self, ids: &[StalenessTracker]) {
        if ids.is_empty() {
            return;
        }

        // One lock acquisition per shard touched
        let mut groups: HashMap<u64, Vec<StalenessTracker>> = HashMap::new();
        for tracker in ids {
            let (shard, local_id) = decode_global_ref_id(tracker.global_ref_id);
            if shard >= self.num_shards {
                continue;
            }
            groups.entry(shard).or_default().push(StalenessTracker {
                global_ref_id: local_id,
                value: tracker.value,
                labels: tracker.labels.clone(),
            });
        }

        for (shard, trackers) in groups {
            self.shards[shard as usize].track_staleness(&trackers);
        }
    }

    fn check_and_remove_stale_markers(&self) {
        self.shards
            .par_iter()
            .for_each(|shard| shard.check_and_remove_stale_markers());
    }

    fn clear(&self) {
        for shard in &self.shards {
            shard.clear();
        }
    }

    fn stats(&self) -> LabelStoreStats {
        self.shards
            .par_iter()
            .map(|shard| shard.stats())
            .reduce(LabelStoreStats::default, |mut acc, s| {
                acc.merge(s);
                acc
            })
    }
}
