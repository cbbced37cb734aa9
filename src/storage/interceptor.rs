//! Hook-based appender decorator
//!
//! An [`Interceptor`] sits in front of another appendable and lets a
//! component run its own logic per call kind. A hook receives the resolved
//! series ref, the labels, the payload and the next appender, and decides
//! whether and how to forward. Call kinds without a hook pass straight
//! through.
//!
//! ```text
//! append(0, labels) ──▶ resolve global ref ──▶ on_append hook? ──yes──▶ hook(ref, labels, .., next)
//!                                                    │
//!                                                    no
//!                                                    ▼
//!                                             next.append(ref, labels, ..)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{AppendContext, AppendResult, Appendable, Appender, NoopAppender};
use crate::error::AppendError;
use crate::labels::Labels;
use crate::labelstore::{LabelStore, StalenessTracker};
use crate::types::{AppendOptions, Exemplar, HistogramValue, Metadata, SeriesRef};

/// Hook for float samples
pub type AppendHook =
    Box<dyn Fn(SeriesRef, &Labels, i64, f64, &mut dyn Appender) -> AppendResult + Send + Sync>;

/// Hook for exemplars
pub type ExemplarHook =
    Box<dyn Fn(SeriesRef, &Labels, &Exemplar, &mut dyn Appender) -> AppendResult + Send + Sync>;

/// Hook for metadata updates
pub type MetadataHook =
    Box<dyn Fn(SeriesRef, &Labels, &Metadata, &mut dyn Appender) -> AppendResult + Send + Sync>;

/// Hook for native histograms
pub type HistogramHook = Box<
    dyn Fn(SeriesRef, &Labels, i64, &HistogramValue, &mut dyn Appender) -> AppendResult
        + Send
        + Sync,
>;

/// Hook for created-timestamp zero samples
pub type CtZeroSampleHook =
    Box<dyn Fn(SeriesRef, &Labels, i64, i64, &mut dyn Appender) -> AppendResult + Send + Sync>;

/// The optional hooks of an interceptor
#[derive(Default)]
pub struct InterceptorHooks {
    /// Run on `append`
    pub on_append: Option<AppendHook>,
    /// Run on `append_exemplar`
    pub on_exemplar: Option<ExemplarHook>,
    /// Run on `update_metadata`
    pub on_metadata: Option<MetadataHook>,
    /// Run on `append_histogram`
    pub on_histogram: Option<HistogramHook>,
    /// Run on `append_ct_zero_sample`
    pub on_ct_zero_sample: Option<CtZeroSampleHook>,
}

/// Appendable that runs hooks before delegating to `next`
///
/// Immutable once built. Components that need to change behavior at
/// runtime keep their state behind the hooks' captured handles.
pub struct Interceptor {
    hooks: Arc<InterceptorHooks>,
    next: Option<Arc<dyn Appendable>>,
    ls: Arc<dyn LabelStore>,
    last_series_count: Arc<AtomicUsize>,
    component_id: String,
}

impl Interceptor {
    /// Start building an interceptor in front of `next`
    ///
    /// Without `next` every passthrough call is accepted and dropped.
    pub fn builder(
        next: Option<Arc<dyn Appendable>>,
        ls: Arc<dyn LabelStore>,
    ) -> InterceptorBuilder {
        InterceptorBuilder {
            hooks: InterceptorHooks::default(),
            next,
            ls,
            component_id: String::new(),
        }
    }

    /// ID of the owning component
    pub fn component_id(&self) -> &str {
        &self.component_id
    }
}

impl fmt::Display for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.receiver", self.component_id)
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("component_id", &self.component_id)
            .field("has_next", &self.next.is_some())
            .finish()
    }
}

/// Builder for [`Interceptor`]
pub struct InterceptorBuilder {
    hooks: InterceptorHooks,
    next: Option<Arc<dyn Appendable>>,
    ls: Arc<dyn LabelStore>,
    component_id: String,
}

impl InterceptorBuilder {
    /// Hook `append`
    pub fn on_append<F>(mut self, f: F) -> Self
    where
        F: Fn(SeriesRef, &Labels, i64, f64, &mut dyn Appender) -> AppendResult + Send + Sync + 'static,
    {
        self.hooks.on_append = Some(Box::new(f));
        self
    }

    /// Hook `append_exemplar`
    pub fn on_exemplar<F>(mut self, f: F) -> Self
    where
        F: Fn(SeriesRef, &Labels, &Exemplar, &mut dyn Appender) -> AppendResult + Send + Sync + 'static,
    {
        self.hooks.on_exemplar = Some(Box::new(f));
        self
    }

    /// Hook `update_metadata`
    pub fn on_metadata<F>(mut self, f: F) -> Self
    where
        F: Fn(SeriesRef, &Labels, &Metadata, &mut dyn Appender) -> AppendResult + Send + Sync + 'static,
    {
        self.hooks.on_metadata = Some(Box::new(f));
        self
    }

    /// Hook `append_histogram`
    pub fn on_histogram<F>(mut self, f: F) -> Self
    where
        F: Fn(SeriesRef, &Labels, i64, &HistogramValue, &mut dyn Appender) -> AppendResult
            + Send
            + Sync
            + 'static,
    {
        self.hooks.on_histogram = Some(Box::new(f));
        self
    }

    /// Hook `append_ct_zero_sample`
    pub fn on_ct_zero_sample<F>(mut self, f: F) -> Self
    where
        F: Fn(SeriesRef, &Labels, i64, i64, &mut dyn Appender) -> AppendResult + Send + Sync + 'static,
    {
        self.hooks.on_ct_zero_sample = Some(Box::new(f));
        self
    }

    /// Set the owning component's ID
    pub fn component_id(mut self, id: impl Into<String>) -> Self {
        self.component_id = id.into();
        self
    }

    /// Finish the interceptor
    pub fn build(self) -> Interceptor {
        Interceptor {
            hooks: Arc::new(self.hooks),
            next: self.next,
            ls: self.ls,
            last_series_count: Arc::new(AtomicUsize::new(0)),
            component_id: self.component_id,
        }
    }
}

impl Appendable for Interceptor {
    fn appender(&self, ctx: &AppendContext) -> Box<dyn Appender> {
        let child: Box<dyn Appender> = match &self.next {
            Some(next) => next.appender(ctx),
            None => Box::new(NoopAppender),
        };
        Box::new(InterceptAppender {
            hooks: self.hooks.clone(),
            child,
            ls: self.ls.clone(),
            trackers: Vec::with_capacity(self.last_series_count.load(Ordering::Relaxed)),
            last_series_count: self.last_series_count.clone(),
        })
    }
}

struct InterceptAppender {
    hooks: Arc<InterceptorHooks>,
    child: Box<dyn Appender>,
    ls: Arc<dyn LabelStore>,
    trackers: Vec<StalenessTracker>,
    last_series_count: Arc<AtomicUsize>,
}

impl InterceptAppender {
    fn resolve(&self, series: SeriesRef, labels: &Labels) -> SeriesRef {
        if series == 0 {
            self.ls.get_or_add_global_ref_id(labels)
        } else {
            series
        }
    }

    fn flush_staleness(&mut self) {
        self.last_series_count
            .store(self.trackers.len(), Ordering::Relaxed);
        self.ls.track_staleness(&self.trackers);
        self.trackers.clear();
    }
}

impl Appender for InterceptAppender {
    fn append(&mut self, series: SeriesRef, labels: &Labels, t: i64, v: f64) -> AppendResult {
        let series = self.resolve(series, labels);
        self.trackers.push(StalenessTracker {
            global_ref_id: series,
            value: v,
            labels: labels.clone(),
        });

        match &self.hooks.on_append {
            Some(hook) => hook(series, labels, t, v, self.child.as_mut()),
            None => self.child.append(series, labels, t, v),
        }
    }

    fn append_exemplar(
        &mut self,
        series: SeriesRef,
        labels: &Labels,
        exemplar: &Exemplar,
    ) -> AppendResult {
        let series = self.resolve(series, labels);
        match &self.hooks.on_exemplar {
            Some(hook) => hook(series, labels, exemplar, self.child.as_mut()),
            None => self.child.append_exemplar(series, labels, exemplar),
        }
    }

    fn append_histogram(
        &mut self,
        series: SeriesRef,
        labels: &Labels,
        t: i64,
        histogram: &HistogramValue,
    ) -> AppendResult {
        // Histograms are not staleness-tracked
        let series = self.resolve(series, labels);
        match &self.hooks.on_histogram {
            Some(hook) => hook(series, labels, t, histogram, self.child.as_mut()),
            None => self.child.append_histogram(series, labels, t, histogram),
        }
    }

    fn update_metadata(
        &mut self,
        series: SeriesRef,
        labels: &Labels,
        metadata: &Metadata,
    ) -> AppendResult {
        let series = self.resolve(series, labels);
        match &self.hooks.on_metadata {
            Some(hook) => hook(series, labels, metadata, self.child.as_mut()),
            None => self.child.update_metadata(series, labels, metadata),
        }
    }

    fn append_ct_zero_sample(
        &mut self,
        series: SeriesRef,
        labels: &Labels,
        t: i64,
        ct: i64,
    ) -> AppendResult {
        let series = self.resolve(series, labels);
        match &self.hooks.on_ct_zero_sample {
            Some(hook) => hook(series, labels, t, ct, self.child.as_mut()),
            None => self.child.append_ct_zero_sample(series, labels, t, ct),
        }
    }

    fn commit(&mut self) -> Result<(), AppendError> {
        self.flush_staleness();
        self.child.commit()
    }

    fn rollback(&mut self) -> Result<(), AppendError> {
        self.flush_staleness();
        self.child.rollback()
    }

    fn set_options(&mut self, opts: &AppendOptions) {
        self.child.set_options(opts);
    }
}
