//! Background service supervision
//!
//! The agent runs a handful of maintenance loops (today only the label
//! store's staleness sweep). Each implements [`Service`]; a
//! [`ServiceManager`] spawns them on the tokio runtime, hands every loop a
//! receiver on one shutdown broadcast and joins them on the way out.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A long-running loop owned by a [`ServiceManager`]
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    /// Run until `shutdown` fires
    ///
    /// Implementations report [`ServiceStatus::Running`] as soon as their
    /// loop is live.
    async fn start(&self, shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError>;

    /// Name used in logs and status reports; unique per manager
    fn name(&self) -> &'static str;

    /// Current state of the loop
    fn status(&self) -> ServiceStatus;
}

/// Where a service's loop is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Loop is live
    Running,

    /// Not started yet, or returned after shutdown
    Stopped,

    /// Loop gave up; carries the reason
    Failed(String),
}

impl ServiceStatus {
    /// True only for a live loop
    pub fn is_healthy(&self) -> bool {
        matches!(self, ServiceStatus::Running)
    }
}

/// Service lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// A service could not get its loop going
    #[error("Service initialization failed: {0}")]
    InitializationFailed(String),

    /// Some loops were still running when the shutdown timeout passed
    #[error("Service shutdown error: {0}")]
    ShutdownError(String),

    /// Duplicate name, or the manager was already started
    #[error("Service already running")]
    AlreadyRunning,
}

/// Timeouts applied by a [`ServiceManager`]
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// How long `start_all` waits for every service to report in
    pub startup_timeout: Duration,
    /// How long `shutdown` waits before aborting loops
    pub shutdown_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

struct Supervised {
    service: Arc<dyn Service>,
    task: Option<JoinHandle<Result<(), ServiceError>>>,
}

/// Starts registered services together and stops them together
pub struct ServiceManager {
    config: ServiceConfig,
    services: Mutex<Vec<Supervised>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ServiceManager {
    /// Create an empty manager
    pub fn new(config: ServiceConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            services: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Create an empty manager with default timeouts
    pub fn with_defaults() -> Self {
        Self::new(ServiceConfig::default())
    }

    /// Add a service; names must be unique
    pub fn register(&self, service: Arc<dyn Service>) -> Result<(), ServiceError> {
        let name = service.name();
        let mut services = self.services.lock();
        if services.iter().any(|s| s.service.name() == name) {
            return Err(ServiceError::AlreadyRunning);
        }
        services.push(Supervised { service, task: None });
        tracing::debug!(service = name, "Service registered");
        Ok(())
    }

    /// Spawn every registered service
    ///
    /// Waits up to the startup timeout for the loops to report in and fails
    /// if any of them reports [`ServiceStatus::Failed`] in that window.
    pub async fn start_all(&self) -> Result<(), ServiceError> {
        let spawned: Vec<Arc<dyn Service>> = {
            let mut services = self.services.lock();
            if services.iter().any(|s| s.task.is_some()) {
                return Err(ServiceError::AlreadyRunning);
            }
            for s in services.iter_mut() {
                let service = s.service.clone();
                let shutdown = self.shutdown_tx.subscribe();
                s.task = Some(tokio::spawn(async move { service.start(shutdown).await }));
            }
            services.iter().map(|s| s.service.clone()).collect()
        };

        let deadline = Instant::now() + self.config.startup_timeout;
        loop {
            if let Some(failed) = spawned.iter().find_map(|s| match s.status() {
                ServiceStatus::Failed(reason) => Some(format!("{}: {}", s.name(), reason)),
                _ => None,
            }) {
                return Err(ServiceError::InitializationFailed(failed));
            }
            if spawned.iter().all(|s| s.status().is_healthy()) || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tracing::debug!(services = spawned.len(), "Services started");
        Ok(())
    }

    /// Signal shutdown and wait for every loop to return
    ///
    /// Loops still running at the shutdown timeout are aborted and named in
    /// the returned error.
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        tracing::info!("Initiating graceful shutdown");
        let _ = self.shutdown_tx.send(());

        let tasks: Vec<(&'static str, JoinHandle<Result<(), ServiceError>>)> = self
            .services
            .lock()
            .iter_mut()
            .filter_map(|s| s.task.take().map(|task| (s.service.name(), task)))
            .collect();

        let deadline = Instant::now() + self.config.shutdown_timeout;
        let mut timed_out = Vec::new();
        for (name, mut task) in tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(Ok(()))) => tracing::debug!(service = name, "Service stopped"),
                Ok(Ok(Err(e))) => tracing::warn!(service = name, error = %e, "Service stopped with error"),
                Ok(Err(e)) => tracing::error!(service = name, error = %e, "Service task panicked"),
                Err(_) => {
                    tracing::warn!(service = name, "Service shutdown timed out, aborting");
                    task.abort();
                    timed_out.push(name);
                },
            }
        }

        if !timed_out.is_empty() {
            return Err(ServiceError::ShutdownError(format!(
                "timed out waiting for {}",
                timed_out.join(", ")
            )));
        }
        tracing::info!("Shutdown complete");
        Ok(())
    }

    /// Name and status of every service, in registration order
    pub fn status(&self) -> Vec<(&'static str, ServiceStatus)> {
        self.services
            .lock()
            .iter()
            .map(|s| (s.service.name(), s.service.status()))
            .collect()
    }
}
