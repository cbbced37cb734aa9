//! Pipeline components built on the appender chain
//!
//! - [`relabel::RelabelComponent`]: rewrites label sets with a pluggable
//!   relabeler and memoizes the results per series
//! - [`remote_write::RemoteWriteReceiver`]: translates global series refs
//!   into the refs a terminal sink hands out
//!
//! Both expose an [`Interceptor`](crate::storage::Interceptor) as their
//! receiver and stop accepting data once they have exited.

pub mod relabel;
pub mod remote_write;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::AppendError;

pub use relabel::{LabelAndId, RelabelArguments, RelabelComponent, RelabelConfig, Relabeler};
pub use remote_write::RemoteWriteReceiver;

/// Shared "this component has stopped" flag
#[derive(Debug, Clone, Default)]
pub struct ExitSignal(Arc<AtomicBool>);

impl ExitSignal {
    /// Mark the component as exited
    pub fn exit(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once [`ExitSignal::exit`] was called
    pub fn has_exited(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Fail with [`AppendError::ComponentExited`] once exited
    pub(crate) fn check(&self, component: &str) -> Result<(), AppendError> {
        if self.has_exited() {
            return Err(AppendError::ComponentExited {
                component: component.to_string(),
            });
        }
        Ok(())
    }

    /// Wait for `shutdown`, then mark the component as exited
    pub async fn run_until(&self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            match shutdown.recv().await {
                Ok(()) | Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
        self.exit();
    }
}
