//! Label store facade and staleness sweep service
//!
//! [`LabelStoreService`] is the one object components share. It hides
//! whether the identity table is sharded, exports table sizes as metrics and
//! runs the periodic staleness sweep as a background [`Service`].

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, IntGauge, IntGaugeVec, Opts, Registry};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant};

use super::{LabelStore, LabelStoreStats, Sharded, Single, StalenessTracker, MAX_SHARDS};
use crate::error::{Result, ValidationError};
use crate::labels::Labels;
use crate::metrics::register_or_warn;
use crate::services::{Service, ServiceError, ServiceStatus};

/// Name under which the sweep loop registers with the service manager
pub const SERVICE_NAME: &str = "labelstore";

/// Label store configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LabelStoreConfig {
    /// Number of shards (1 disables sharding)
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// Seconds a series must stay stale before it is collected
    #[serde(default = "default_stale_duration_secs")]
    pub stale_duration_secs: u64,

    /// Seconds between staleness sweeps
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn default_shards() -> usize {
    1
}

fn default_stale_duration_secs() -> u64 {
    super::DEFAULT_STALE_DURATION.as_secs()
}

fn default_check_interval_secs() -> u64 {
    super::DEFAULT_CHECK_INTERVAL.as_secs()
}

impl Default for LabelStoreConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            stale_duration_secs: default_stale_duration_secs(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl LabelStoreConfig {
    /// Stale duration as a [`Duration`]
    pub fn stale_duration(&self) -> Duration {
        Duration::from_secs(self.stale_duration_secs)
    }

    /// Sweep interval as a [`Duration`]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Check the shard count and sweep interval
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.shards == 0 || self.shards > MAX_SHARDS {
            return Err(ValidationError::OutOfRange {
                field: "labelstore.shards".to_string(),
                value: self.shards.to_string(),
                min: "1".to_string(),
                max: MAX_SHARDS.to_string(),
            });
        }
        if self.check_interval_secs == 0 {
            return Err(ValidationError::InvalidFormat {
                field: "labelstore.check_interval_secs".to_string(),
                message: "must be at least one second".to_string(),
            });
        }
        Ok(())
    }
}

/// Exports table sizes computed at scrape time
struct StoreCollector {
    store: Arc<dyn LabelStore>,
    global_ids: IntGauge,
    remote_ids: IntGaugeVec,
}

impl StoreCollector {
    fn new(store: Arc<dyn LabelStore>) -> prometheus::Result<Self> {
        Ok(Self {
            store,
            global_ids: IntGauge::new(
                "labelstore_global_ids_count",
                "Total number of global ids.",
            )?,
            remote_ids: IntGaugeVec::new(
                Opts::new(
                    "labelstore_remote_store_ids_count",
                    "Total number of ids per remote write",
                ),
                &["remote_name"],
            )?,
        })
    }
}

impl Collector for StoreCollector {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = self.global_ids.desc();
        descs.extend(self.remote_ids.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let stats = self.store.stats();
        self.global_ids.set(stats.global_ids as i64);
        self.remote_ids.reset();
        for (component, count) in &stats.component_ids {
            self.remote_ids
                .with_label_values(&[component.as_str()])
                .set(*count as i64);
        }

        let mut families = self.global_ids.collect();
        families.extend(self.remote_ids.collect());
        families
    }
}

/// The label store handed to every component
///
/// Construct once per process (or per test) and share it as
/// `Arc<dyn LabelStore>`.
pub struct LabelStoreService {
    store: Arc<dyn LabelStore>,
    config: LabelStoreConfig,
    last_stale_check: Gauge,
    status: RwLock<ServiceStatus>,
}

impl LabelStoreService {
    /// Build the label store and register its metrics on `registry`
    ///
    /// Fails if the configuration is out of range. Metric registration
    /// failures are logged and otherwise ignored.
    pub fn new(config: LabelStoreConfig, registry: &Registry) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn LabelStore> = if config.shards == 1 {
            Arc::new(Single::new(config.stale_duration()))
        } else {
            Arc::new(Sharded::new(config.shards, config.stale_duration()))
        };
        tracing::debug!(
            shards = config.shards,
            stale_duration_secs = config.stale_duration_secs,
            "labelstore created"
        );

        let last_stale_check = Gauge::new(
            "labelstore_last_stale_check_timestamp",
            "Last time stale check was ran expressed in unix timestamp.",
        )?;
        register_or_warn(registry, Box::new(last_stale_check.clone()));
        register_or_warn(registry, Box::new(StoreCollector::new(store.clone())?));

        Ok(Self {
            store,
            config,
            last_stale_check,
            status: RwLock::new(ServiceStatus::Stopped),
        })
    }

    /// The configuration this store was built with
    pub fn config(&self) -> &LabelStoreConfig {
        &self.config
    }
}

impl std::fmt::Debug for LabelStoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelStoreService")
            .field("config", &self.config)
            .field("status", &*self.status.read())
            .finish()
    }
}

impl LabelStore for LabelStoreService {
    fn get_or_add_global_ref_id(&self, labels: &Labels) -> u64 {
        self.store.get_or_add_global_ref_id(labels)
    }

    fn get_local_ref_id(&self, component_id: &str, global_ref_id: u64) -> u64 {
        self.store.get_local_ref_id(component_id, global_ref_id)
    }

    fn add_local_link(&self, component_id: &str, global_ref_id: u64, local_ref_id: u64) {
        self.store.add_local_link(component_id, global_ref_id, local_ref_id)
    }

    fn replace_local_link(
        &self,
        component_id: &str,
        global_ref_id: u64,
        cached_local_ref: u64,
        new_local_ref: u64,
    ) {
        self.store
            .replace_local_link(component_id, global_ref_id, cached_local_ref, new_local_ref)
    }

    fn track_staleness(&self, ids: &[StalenessTracker]) {
        self.store.track_staleness(ids)
    }

    fn check_and_remove_stale_markers(&self) {
        self.store.check_and_remove_stale_markers();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        self.last_stale_check.set(now);
    }

    fn clear(&self) {
        self.store.clear()
    }

    fn stats(&self) -> LabelStoreStats {
        self.store.stats()
    }
}

#[async_trait::async_trait]
impl Service for LabelStoreService {
    async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> std::result::Result<(), ServiceError> {
        *self.status.write() = ServiceStatus::Running;

        let period = self.config.check_interval();
        if period.is_zero() {
            *self.status.write() = ServiceStatus::Failed("zero check interval".to_string());
            return Err(ServiceError::InitializationFailed(
                "labelstore check interval must be positive".to_string(),
            ));
        }
        // Nothing can be stale at startup, skip the immediate tick
        let mut ticker = interval_at(Instant::now() + period, period);
        tracing::debug!(interval_secs = period.as_secs(), "labelstore sweep started");

        loop {
            tokio::select! {
                result = shutdown.recv() => {
                    match result {
                        Ok(()) | Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!(missed = n, "labelstore shutdown receiver lagged");
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.check_and_remove_stale_markers();
                }
            }
        }

        *self.status.write() = ServiceStatus::Stopped;
        tracing::debug!("labelstore sweep stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }
}
