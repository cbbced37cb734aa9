//! Single-lock label store
//!
//! Every table lives behind one `RwLock`. Lookups take the read side, all
//! mutations the write side. A staleness sweep removes a global ID, its hash
//! entry and all component mappings in one locked step.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::{LabelStore, LabelStoreStats, StalenessTracker};
use crate::labels::Labels;
use crate::types::is_stale_nan;

/// A series that reported the stale marker
#[derive(Debug, Clone)]
struct StaleMarker {
    global_id: u64,
    label_hash: u64,
    last_marked_stale: Instant,
}

/// Local/global mapping for one downstream component
#[derive(Debug, Default)]
struct ComponentMapping {
    local_to_global: HashMap<u64, u64>,
    global_to_local: HashMap<u64, u64>,
}

impl ComponentMapping {
    fn link(&mut self, global_ref_id: u64, local_ref_id: u64) {
        self.local_to_global.insert(local_ref_id, global_ref_id);
        self.global_to_local.insert(global_ref_id, local_ref_id);
    }

    fn remove_global(&mut self, global_ref_id: u64) {
        if let Some(local) = self.global_to_local.remove(&global_ref_id) {
            self.local_to_global.remove(&local);
        }
    }
}

#[derive(Debug, Default)]
struct State {
    /// Last allocated ID; IDs start at 1
    last_id: u64,
    mappings: HashMap<String, ComponentMapping>,
    hash_to_global: HashMap<u64, u64>,
    stale_globals: HashMap<u64, StaleMarker>,
}

impl State {
    fn add_local_link(&mut self, component_id: &str, global_ref_id: u64, local_ref_id: u64) {
        // Avoid allocating the key on the common path where it already exists
        match self.mappings.get_mut(component_id) {
            Some(m) => m.link(global_ref_id, local_ref_id),
            None => {
                let mut m = ComponentMapping::default();
                m.link(global_ref_id, local_ref_id);
                self.mappings.insert(component_id.to_string(), m);
            },
        }
    }
}

/// Label store guarded by a single lock
#[derive(Debug)]
pub(crate) struct Single {
    state: RwLock<State>,
    stale_duration: Duration,
}

impl Single {
    /// Create an empty store
    pub(crate) fn new(stale_duration: Duration) -> Self {
        Self {
            state: RwLock::new(State::default()),
            stale_duration,
        }
    }
}

impl LabelStore for Single {
    fn get_or_add_global_ref_id(&self, labels: &Labels) -> u64 {
        if labels.is_empty() {
            return 0;
        }
        let label_hash = labels.hash();

        {
            let state = self.state.read();
            if let Some(&id) = state.hash_to_global.get(&label_hash) {
                return id;
            }
        }

        let mut state = self.state.write();
        // Another writer may have allocated between the two locks
        if let Some(&id) = state.hash_to_global.get(&label_hash) {
            return id;
        }
        state.last_id += 1;
        let id = state.last_id;
        state.hash_to_global.insert(label_hash, id);
        id
    }

    fn get_local_ref_id(&self, component_id: &str, global_ref_id: u64) -> u64 {
        let state = self.state.read();
        state
            .mappings
            .get(component_id)
            .and_then(|m| m.global_to_local.get(&global_ref_id))
            .copied()
            .unwrap_or(0)
    }

    fn add_local_link(&self, component_id: &str, global_ref_id: u64, local_ref_id: u64) {
        self.state
            .write()
            .add_local_link(component_id, global_ref_id, local_ref_id);
    }

    fn replace_local_link(
        &self,
        component_id: &str,
        global_ref_id: u64,
        cached_local_ref: u64,
        new_local_ref: u64,
    ) {
        let mut state = self.state.write();
        match state.mappings.get_mut(component_id) {
            Some(m) => {
                m.local_to_global.remove(&cached_local_ref);
                m.link(global_ref_id, new_local_ref);
            },
            // Nothing to replace yet
            None => state.add_local_link(component_id, global_ref_id, new_local_ref),
        }
    }

    fn track_staleness(&self, ids: &[StalenessTracker]) {
        if ids.is_empty() {
            return;
        }

        // Hash outside the lock
        let now = Instant::now();
        let mut to_add = Vec::new();
        let mut to_remove = Vec::new();
        for tracker in ids {
            if is_stale_nan(tracker.value) {
                to_add.push(StaleMarker {
                    global_id: tracker.global_ref_id,
                    label_hash: tracker.labels.hash(),
                    last_marked_stale: now,
                });
            } else {
                to_remove.push(tracker.global_ref_id);
            }
        }

        let mut state = self.state.write();
        for marker in to_add {
            state.stale_globals.insert(marker.global_id, marker);
        }
        for id in to_remove {
            state.stale_globals.remove(&id);
        }
    }

    fn check_and_remove_stale_markers(&self) {
        let mut state = self.state.write();
        let now = Instant::now();

        let expired: Vec<StaleMarker> = state
            .stale_globals
            .values()
            .filter(|m| now.duration_since(m.last_marked_stale) >= self.stale_duration)
            .cloned()
            .collect();

        tracing::debug!(
            stale = state.stale_globals.len(),
            removing = expired.len(),
            "labelstore removing stale markers"
        );

        for marker in expired {
            state.stale_globals.remove(&marker.global_id);
            state.hash_to_global.remove(&marker.label_hash);
            for mapping in state.mappings.values_mut() {
                mapping.remove_global(marker.global_id);
            }
        }
    }

    fn clear(&self) {
        *self.state.write() = State::default();
    }

    fn stats(&self) -> LabelStoreStats {
        let state = self.state.read();
        LabelStoreStats {
            global_ids: state.hash_to_global.len(),
            stale_markers: state.stale_globals.len(),
            component_ids: state
                .mappings
                .iter()
                .map(|(name, m)| (name.clone(), m.global_to_local.len()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::stale_nan;

    fn store() -> Single {
        Single::new(crate::labelstore::DEFAULT_STALE_DURATION)
    }

    fn name(v: &str) -> Labels {
        Labels::from_pairs([("__name__", v)])
    }

    #[test]
    fn test_adding_marker() {
        let s = store();
        let l = name("test");
        let id = s.get_or_add_global_ref_id(&l);
        assert_eq!(id, s.get_or_add_global_ref_id(&l));
        assert_eq!(s.state.read().hash_to_global.len(), 1);
    }

    #[test]
    fn test_adding_different_markers() {
        let s = store();
        let a = s.get_or_add_global_ref_id(&name("test"));
        let b = s.get_or_add_global_ref_id(&name("roar"));
        assert_ne!(a, b);
        assert_eq!((a, b), (1, 2));
        assert_eq!(s.state.read().hash_to_global.len(), 2);
    }

    #[test]
    fn test_empty_labels_map_to_zero() {
        let s = store();
        assert_eq!(s.get_or_add_global_ref_id(&Labels::empty()), 0);
        assert_eq!(s.stats().global_ids, 0);
    }

    #[test]
    fn test_adding_local_mapping() {
        let s = store();
        let g = s.get_or_add_global_ref_id(&name("test"));
        s.add_local_link("1", g, 1);

        assert_eq!(s.get_local_ref_id("1", g), 1);
        let state = s.state.read();
        assert_eq!(state.mappings.len(), 1);
        assert_eq!(state.mappings["1"].global_to_local[&g], 1);
        assert_eq!(state.mappings["1"].local_to_global[&1], g);
    }

    #[test]
    fn test_adding_local_mappings_for_two_components() {
        let s = store();
        let g = s.get_or_add_global_ref_id(&name("test"));
        s.add_local_link("1", g, 1);
        s.add_local_link("2", g, 1);

        assert_eq!(s.get_local_ref_id("1", g), 1);
        assert_eq!(s.get_local_ref_id("2", g), 1);
        assert_eq!(s.get_local_ref_id("3", g), 0);
        assert_eq!(s.state.read().mappings.len(), 2);
    }

    #[test]
    fn test_replace_local_mappings() {
        let s = store();
        let g = s.get_or_add_global_ref_id(&name("test"));
        s.add_local_link("1", g, 1);
        s.add_local_link("2", g, 1);

        s.replace_local_link("1", g, 1, 2);
        s.replace_local_link("2", g, 1, 2);

        let state = s.state.read();
        for component in ["1", "2"] {
            let m = &state.mappings[component];
            assert_eq!(m.global_to_local[&g], 2);
            assert_eq!(m.local_to_global.len(), 1);
            assert_eq!(m.local_to_global[&2], g);
        }
    }

    #[test]
    fn test_replace_is_idempotent() {
        let s = store();
        let g = s.get_or_add_global_ref_id(&name("test"));
        s.add_local_link("rw", g, 42);
        s.replace_local_link("rw", g, 42, 99);
        s.replace_local_link("rw", g, 42, 99);

        assert_eq!(s.get_local_ref_id("rw", g), 99);
        let state = s.state.read();
        assert_eq!(state.mappings["rw"].local_to_global.len(), 1);
    }

    #[test]
    fn test_replace_without_adding_local_mapping() {
        let s = store();
        let g = s.get_or_add_global_ref_id(&name("test"));
        s.replace_local_link("1", g, 1, 2);
        s.replace_local_link("2", g, 1, 2);
        assert_eq!(s.get_local_ref_id("1", g), 2);
        assert_eq!(s.get_local_ref_id("2", g), 2);
    }

    #[test]
    fn test_staleness() {
        let s = Single::new(Duration::from_millis(1));
        let l1 = name("test");
        let l2 = name("test2");
        let g1 = s.get_or_add_global_ref_id(&l1);
        let g2 = s.get_or_add_global_ref_id(&l2);
        s.add_local_link("1", g1, 1);
        s.add_local_link("2", g2, 1);

        s.track_staleness(&[StalenessTracker {
            global_ref_id: g1,
            value: stale_nan(),
            labels: l1.clone(),
        }]);
        assert_eq!(s.state.read().stale_globals.len(), 1);
        assert_eq!(s.state.read().hash_to_global.len(), 2);

        std::thread::sleep(Duration::from_millis(10));
        s.check_and_remove_stale_markers();

        assert_eq!(s.state.read().stale_globals.len(), 0);
        assert_eq!(s.state.read().hash_to_global.len(), 1);
        assert_eq!(s.get_local_ref_id("1", g1), 0);
        assert!(s.state.read().mappings["1"].local_to_global.is_empty());
        // Untouched series keep their mapping
        assert_eq!(s.get_local_ref_id("2", g2), 1);

        // A collected label set comes back with a new ID
        let again = s.get_or_add_global_ref_id(&l1);
        assert_ne!(again, g1);
    }

    #[test]
    fn test_removing_staleness() {
        let s = store();
        let l = name("test");
        let g = s.get_or_add_global_ref_id(&l);
        s.add_local_link("1", g, 1);

        s.track_staleness(&[StalenessTracker {
            global_ref_id: g,
            value: stale_nan(),
            labels: l.clone(),
        }]);
        assert_eq!(s.stats().stale_markers, 1);

        s.track_staleness(&[StalenessTracker {
            global_ref_id: g,
            value: 1.0,
            labels: l,
        }]);
        assert_eq!(s.stats().stale_markers, 0);
    }

    #[test]
    fn test_sweep_keeps_recent_markers() {
        let s = store();
        let l = name("test");
        let g = s.get_or_add_global_ref_id(&l);
        s.track_staleness(&[StalenessTracker {
            global_ref_id: g,
            value: stale_nan(),
            labels: l.clone(),
        }]);

        s.check_and_remove_stale_markers();
        assert_eq!(s.stats().stale_markers, 1);
        assert_eq!(s.get_or_add_global_ref_id(&l), g);
    }

    #[test]
    fn test_clear() {
        let s = store();
        let g = s.get_or_add_global_ref_id(&name("test"));
        s.add_local_link("1", g, 5);
        s.clear();
        assert_eq!(s.stats(), LabelStoreStats::default());
        // IDs restart after a clear
        assert_eq!(s.get_or_add_global_ref_id(&name("other")), 1);
    }

    #[test]
    fn test_concurrent_allocation_is_consistent() {
        let s = std::sync::Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = s.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .map(|i| s.get_or_add_global_ref_id(&name(&i.to_string())))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<Vec<u64>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for r in &results[1..] {
            assert_eq!(r, &results[0]);
        }
        assert_eq!(s.stats().global_ids, 100);
    }
}
