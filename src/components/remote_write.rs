//! Remote-write receiver
//!
//! Terminal sinks number series on their own, and two sinks may hand out
//! the same ref for different series. The receiver treats a sink's ref as
//! a local ref and translates it to and from the shared global ref through
//! the label store:
//!
//! ```text
//! global ref ──▶ get_local_ref_id ──▶ sink.append(local) ──▶ returned ref
//!                                                                │
//!              local == 0: add_local_link(global, returned) ◀────┤
//!   local != returned:  replace_local_link(global, local, returned) ◀┘
//! ```
//!
//! Callers always get the global ref back, on failure as part of the error.
//! A failing sink that still reports a ref of its own gets it linked.

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;

use super::ExitSignal;
use crate::labelstore::LabelStore;
use crate::storage::{AppendResult, Appendable, Interceptor};
use crate::types::SeriesRef;

/// Ref translation shared by every hook
struct Translator {
    id: String,
    ls: Arc<dyn LabelStore>,
    exited: ExitSignal,
}

impl Translator {
    fn forward<F>(&self, global_ref: SeriesRef, send: F) -> AppendResult
    where
        F: FnOnce(SeriesRef) -> AppendResult,
    {
        self.exited.check(&self.id)?;

        let local_ref = self.ls.get_local_ref_id(&self.id, global_ref);
        let (new_ref, err) = match send(local_ref) {
            Ok(r) => (r, None),
            Err(e) => (e.series().unwrap_or(0), Some(e)),
        };

        if global_ref != 0 && new_ref != 0 {
            if local_ref == 0 {
                self.ls.add_local_link(&self.id, global_ref, new_ref);
            } else if new_ref != local_ref {
                self.ls
                    .replace_local_link(&self.id, global_ref, local_ref, new_ref);
            }
        }
        match err {
            Some(e) => Err(e.with_series(global_ref)),
            None => Ok(global_ref),
        }
    }
}

/// Receiver in front of a terminal sink
pub struct RemoteWriteReceiver {
    translator: Arc<Translator>,
    receiver: Arc<Interceptor>,
}

impl RemoteWriteReceiver {
    /// Create a receiver with ID `id` in front of `sink`
    pub fn new(id: impl Into<String>, sink: Arc<dyn Appendable>, ls: Arc<dyn LabelStore>) -> Self {
        let id = id.into();
        let translator = Arc::new(Translator {
            id: id.clone(),
            ls: ls.clone(),
            exited: ExitSignal::default(),
        });

        let (a, e, m, h, z) = (
            translator.clone(),
            translator.clone(),
            translator.clone(),
            translator.clone(),
            translator.clone(),
        );
        let receiver = Interceptor::builder(Some(sink), ls)
            .component_id(id)
            .on_append(move |g, labels, t, v, next| a.forward(g, |local| next.append(local, labels, t, v)))
            .on_exemplar(move |g, labels, exemplar, next| {
                e.forward(g, |local| next.append_exemplar(local, labels, exemplar))
            })
            .on_metadata(move |g, labels, metadata, next| {
                m.forward(g, |local| next.update_metadata(local, labels, metadata))
            })
            .on_histogram(move |g, labels, t, histogram, next| {
                h.forward(g, |local| next.append_histogram(local, labels, t, histogram))
            })
            .on_ct_zero_sample(move |g, labels, t, ct, next| {
                z.forward(g, |local| next.append_ct_zero_sample(local, labels, t, ct))
            })
            .build();

        Self {
            translator,
            receiver: Arc::new(receiver),
        }
    }

    /// The appendable upstream components send to
    pub fn receiver(&self) -> Arc<dyn Appendable> {
        self.receiver.clone()
    }

    /// Run until `shutdown` fires, then refuse further data
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) {
        self.translator.exited.run_until(shutdown).await;
        tracing::debug!(component = %self.translator.id, "remote write receiver exited");
    }

    /// Stop accepting data immediately
    pub fn exit(&self) {
        self.translator.exited.exit();
    }

    /// Component ID
    pub fn id(&self) -> &str {
        &self.translator.id
    }
}

impl fmt::Debug for RemoteWriteReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteWriteReceiver")
            .field("id", &self.translator.id)
            .field("exited", &self.translator.exited.has_exited())
            .finish()
    }
}
