//! Relabel component
//!
//! Rewrites the label set of every series passing through and forwards the
//! result to its own fanout under a freshly resolved global ref. Rule
//! results are memoized per original series:
//!
//! ```text
//! key = "<original global ref>"
//! value = Some(LabelAndId)   relabeled labels and their global ref
//!       | None             series is dropped
//! ```
//!
//! A stale marker for a series evicts its entry so a series that comes back
//! is relabeled again.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use prometheus::Registry;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::ExitSignal;
use crate::cache::{new_cache, Cache, CacheBackend, CacheConfig};
use crate::error::{Result, ValidationError};
use crate::labels::Labels;
use crate::labelstore::LabelStore;
use crate::metrics::RelabelMetrics;
use crate::storage::{Appendable, Fanout, Interceptor};
use crate::types::is_stale_nan;

/// Rewrites a label set; `None` drops the series
pub type Relabeler = Arc<dyn Fn(&Labels) -> Option<Labels> + Send + Sync>;

/// A cached relabel result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelAndId {
    /// Labels after relabeling
    pub labels: Labels,
    /// Global ref of the relabeled series
    pub id: u64,
}

type RelabelCache = Box<dyn Cache<Option<LabelAndId>>>;

/// Static configuration of relabel components
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RelabelConfig {
    /// Relabel result cache
    #[serde(default)]
    pub cache: CacheConfig,
}

impl RelabelConfig {
    /// Check the cache settings
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        self.cache.validate()
    }
}

/// Arguments a relabel component is created and updated with
#[derive(Clone)]
pub struct RelabelArguments {
    /// Where relabeled data is sent
    pub forward_to: Vec<Arc<dyn Appendable>>,
    /// The rules
    pub relabeler: Relabeler,
    /// Relabel result cache
    pub cache: CacheConfig,
}

impl RelabelArguments {
    /// Arguments with the default in-memory cache
    pub fn new(forward_to: Vec<Arc<dyn Appendable>>, relabeler: Relabeler) -> Self {
        Self {
            forward_to,
            relabeler,
            cache: CacheConfig::default(),
        }
    }
}

/// Rules and the results memoized from them; always swapped together
struct RelabelState {
    relabeler: Relabeler,
    cache: RelabelCache,
}

struct Inner {
    id: String,
    state: RwLock<RelabelState>,
    fanout: Arc<Fanout>,
    ls: Arc<dyn LabelStore>,
    metrics: RelabelMetrics,
    exited: ExitSignal,
}

impl Inner {
    /// Relabel `labels`, consulting the cache first
    fn relabel(&self, value: f64, labels: &Labels) -> Option<Labels> {
        // Held until the result is cached so an update cannot slip in between
        let state = self.state.read();
        let cache = state.cache.as_ref();
        self.metrics.processed.inc();

        let global_ref = self.ls.get_or_add_global_ref_id(labels);
        let key = global_ref.to_string();

        let relabelled = match self.get_from_cache(cache, &key) {
            Some(entry) => {
                self.metrics.cache_hits.inc();
                entry.map(|e| e.labels)
            },
            None => {
                let result = (state.relabeler)(labels).filter(|l| !l.is_empty());
                self.metrics.cache_misses.inc();
                self.add_to_cache(cache, &key, result.clone());
                result
            },
        };

        if is_stale_nan(value) {
            self.delete_from_cache(cache, &key);
        }

        relabelled
    }

    fn get_from_cache(
        &self,
        cache: &dyn Cache<Option<LabelAndId>>,
        key: &str,
    ) -> Option<Option<LabelAndId>> {
        match cache.get(key) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(component = %self.id, error = %e, "relabel cache lookup failed");
                None
            },
        }
    }

    fn add_to_cache(
        &self,
        cache: &dyn Cache<Option<LabelAndId>>,
        key: &str,
        labels: Option<Labels>,
    ) {
        let entry = labels.map(|labels| LabelAndId {
            id: self.ls.get_or_add_global_ref_id(&labels),
            labels,
        });

        if let Err(e) = cache.set(key, entry, None) {
            tracing::warn!(component = %self.id, error = %e, "relabel cache insert failed");
        }
        self.update_size(cache);
    }

    fn delete_from_cache(&self, cache: &dyn Cache<Option<LabelAndId>>, key: &str) {
        self.metrics.cache_deletes.inc();
        if let Err(e) = cache.remove(key) {
            tracing::warn!(component = %self.id, error = %e, "relabel cache delete failed");
        }
        self.update_size(cache);
    }

    fn update_size(&self, cache: &dyn Cache<Option<LabelAndId>>) {
        if let Some(len) = cache.len() {
            self.metrics.cache_size.set(len as i64);
        }
    }
}

/// A running relabel component
pub struct RelabelComponent {
    inner: Arc<Inner>,
    receiver: Arc<Interceptor>,
}

impl RelabelComponent {
    /// Create the component with ID `id`
    ///
    /// Fails if the cache cannot be built or the metrics cannot be created.
    pub fn new(
        id: impl Into<String>,
        args: RelabelArguments,
        ls: Arc<dyn LabelStore>,
        registry: &Registry,
    ) -> Result<Self> {
        let id = id.into();
        args.cache.validate()?;
        let cache: RelabelCache = new_cache(&args.cache)?;
        let metrics = RelabelMetrics::new(registry, &id)?;
        let fanout = Arc::new(Fanout::new(
            args.forward_to.clone(),
            id.clone(),
            registry,
            ls.clone(),
        )?);

        let inner = Arc::new(Inner {
            id: id.clone(),
            state: RwLock::new(RelabelState {
                relabeler: args.relabeler.clone(),
                cache,
            }),
            fanout: fanout.clone(),
            ls: ls.clone(),
            metrics,
            exited: ExitSignal::default(),
        });

        let on_append = inner.clone();
        let on_exemplar = inner.clone();
        let on_metadata = inner.clone();
        let on_histogram = inner.clone();
        let receiver = Interceptor::builder(Some(fanout), ls)
            .component_id(id)
            .on_append(move |_, labels, t, v, next| {
                on_append.exited.check(&on_append.id)?;
                match on_append.relabel(v, labels) {
                    Some(new_labels) => {
                        on_append.metrics.written.inc();
                        next.append(0, &new_labels, t, v)
                    },
                    None => Ok(0),
                }
            })
            .on_exemplar(move |_, labels, exemplar, next| {
                on_exemplar.exited.check(&on_exemplar.id)?;
                match on_exemplar.relabel(0.0, labels) {
                    Some(new_labels) => next.append_exemplar(0, &new_labels, exemplar),
                    None => Ok(0),
                }
            })
            .on_metadata(move |_, labels, metadata, next| {
                on_metadata.exited.check(&on_metadata.id)?;
                match on_metadata.relabel(0.0, labels) {
                    Some(new_labels) => next.update_metadata(0, &new_labels, metadata),
                    None => Ok(0),
                }
            })
            .on_histogram(move |_, labels, t, histogram, next| {
                on_histogram.exited.check(&on_histogram.id)?;
                match on_histogram.relabel(0.0, labels) {
                    Some(new_labels) => next.append_histogram(0, &new_labels, t, histogram),
                    None => Ok(0),
                }
            })
            .build();

        let component = Self {
            inner,
            receiver: Arc::new(receiver),
        };
        component.update(args)?;
        Ok(component)
    }

    /// The appendable upstream components send to
    pub fn receiver(&self) -> Arc<dyn Appendable> {
        self.receiver.clone()
    }

    /// Apply new arguments
    ///
    /// An in-memory cache is cleared and resized; other backends keep their
    /// entries. Waits for in-flight relabel calls to finish.
    pub fn update(&self, args: RelabelArguments) -> Result<()> {
        let mut state = self.inner.state.write();
        if args.cache.backend == CacheBackend::InMemory {
            state.cache.clear(args.cache.in_memory.cache_size)?;
            self.inner.update_size(state.cache.as_ref());
        }
        state.relabeler = args.relabeler;
        self.inner.fanout.update_children(args.forward_to);
        tracing::debug!(component = %self.inner.id, "relabel component updated");
        Ok(())
    }

    /// Run until `shutdown` fires, then refuse further data
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) {
        self.inner.exited.run_until(shutdown).await;
        tracing::debug!(component = %self.inner.id, "relabel component exited");
    }

    /// Stop accepting data immediately
    pub fn exit(&self) {
        self.inner.exited.exit();
    }

    /// Component ID
    pub fn id(&self) -> &str {
        &self.inner.id
    }
}

impl fmt::Debug for RelabelComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelabelComponent")
            .field("id", &self.inner.id)
            .field("exited", &self.inner.exited.has_exited())
            .finish()
    }
}
