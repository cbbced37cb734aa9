//! Process-wide series identity
//!
//! The label store hands out one global reference ID per distinct label set
//! and keeps, for every downstream component, a bidirectional mapping between
//! that global ID and the component's own local reference.
//!
//! ```text
//! ┌──────────────┐  hash   ┌──────────────┐  per component  ┌──────────────┐
//! │  Label Set   │────────▶│  Global ID   │◀───────────────▶│  Local Ref   │
//! │ {job="x"...} │         │  (u64, != 0) │                 │  (sink-owned)│
//! └──────────────┘         └──────────────┘                 └──────────────┘
//! ```
//!
//! # Implementations
//!
//! - `Single`: one lock around every table
//! - `Sharded`: N independent `Single` shards; the shard index is packed in
//!   the upper 8 bits of every global ID it returns
//! - [`LabelStoreService`]: the facade handed to components, which also owns
//!   the periodic staleness sweep and the exported metrics
//!
//! # Staleness
//!
//! Series that report the stale marker are remembered. Once a series has
//! been stale for longer than the configured stale duration, a sweep removes
//! its global ID and every component mapping referencing it. The next sample
//! for the same label set receives a fresh ID.

mod service;
mod sharded;
mod single;

use std::collections::HashMap;
use std::time::Duration;

use crate::labels::Labels;

pub use service::{LabelStoreConfig, LabelStoreService, SERVICE_NAME};
pub use sharded::{decode_global_ref_id, encode_global_ref_id, MAX_SHARDS, SHARD_BITS};

pub(crate) use sharded::Sharded;
pub(crate) use single::Single;

/// How long a series must stay stale before its identity is collected
pub const DEFAULT_STALE_DURATION: Duration = Duration::from_secs(10 * 60);

/// Interval between staleness sweeps
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Shared series identity table
///
/// None of these operations fail. Absent mappings, empty label sets and
/// out-of-range IDs resolve to `0` or are ignored.
pub trait LabelStore: Send + Sync {
    /// Return the global ID for `labels`, allocating one on first sight
    ///
    /// The empty label set always maps to `0`.
    fn get_or_add_global_ref_id(&self, labels: &Labels) -> u64;

    /// Return the local ref `component_id` uses for `global_ref_id`, or `0`
    fn get_local_ref_id(&self, component_id: &str, global_ref_id: u64) -> u64;

    /// Record that `component_id` knows `global_ref_id` as `local_ref_id`
    fn add_local_link(&self, component_id: &str, global_ref_id: u64, local_ref_id: u64);

    /// Swap the local ref of an existing link
    ///
    /// Behaves like [`LabelStore::add_local_link`] when the component has no
    /// mappings yet.
    fn replace_local_link(
        &self,
        component_id: &str,
        global_ref_id: u64,
        cached_local_ref: u64,
        new_local_ref: u64,
    );

    /// Mark or unmark series as stale based on the values they last reported
    fn track_staleness(&self, ids: &[StalenessTracker]);

    /// Collect series that have been stale for longer than the stale duration
    fn check_and_remove_stale_markers(&self);

    /// Drop all state
    fn clear(&self);

    /// Snapshot of table sizes
    fn stats(&self) -> LabelStoreStats;
}

/// A sample's identity and value, batched for staleness tracking
#[derive(Debug, Clone)]
pub struct StalenessTracker {
    /// Global ID of the series
    pub global_ref_id: u64,
    /// The value that was appended
    pub value: f64,
    /// Label set of the series
    pub labels: Labels,
}

/// Table sizes of a label store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelStoreStats {
    /// Number of live global IDs
    pub global_ids: usize,

    /// Number of series currently marked stale
    pub stale_markers: usize,

    /// Mapped series per component
    pub component_ids: HashMap<String, usize>,
}

impl LabelStoreStats {
    /// Fold another snapshot into this one
    pub(crate) fn merge(&mut self, other: LabelStoreStats) {
        self.global_ids += other.global_ids;
        self.stale_markers += other.stale_markers;
        for (name, count) in other.component_ids {
            *self.component_ids.entry(name).or_default() += count;
        }
    }
}
