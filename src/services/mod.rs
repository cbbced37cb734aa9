//! Background Services Module
//!
//! Long-running maintenance tasks and the manager that starts and stops them.
//!
//! # Example
//!
//! ```rust
//! use kuba_pipeline::services::{ServiceConfig, ServiceManager};
//!
//! let manager = ServiceManager::new(ServiceConfig::default());
//!
//! // Nothing registered yet
//! assert!(manager.status().is_empty());
//! ```

pub mod framework;

pub use framework::{Service, ServiceConfig, ServiceError, ServiceManager, ServiceStatus};
