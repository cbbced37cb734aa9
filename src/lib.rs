//! Kuba Pipeline - series identity and appender fan-out for a telemetry agent
//!
//! This library provides the core every pipeline stage composes over:
//! - A process-wide label store handing out stable global series refs
//! - Optional sharding of the label store to bound lock contention
//! - Staleness tracking with periodic garbage collection of dead series
//! - Fanout and Interceptor appenders for building pipeline stages
//! - Relabel and remote-write components built on top of them

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod labels;
pub mod types;

/// Series identity table with optional sharding and staleness sweeps
pub mod labelstore;

/// Appender traits, fan-out and interception
pub mod storage;

/// Relabel cache backends (in-memory LRU, Redis)
pub mod cache;

/// Pipeline components built on the appender chain
pub mod components;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Background services with lifecycle management and graceful shutdown
pub mod services;

// Re-export main types
pub use config::AgentConfig;
pub use error::{AppendError, Error, Result};
pub use labels::{Label, Labels};
pub use labelstore::{LabelStore, LabelStoreConfig, LabelStoreService, StalenessTracker};
pub use storage::{AppendContext, Appendable, Appender, Fanout, Interceptor};
pub use types::SeriesRef;
