//! Appender chain
//!
//! Every pipeline stage and every terminal sink speaks the same two traits:
//! an [`Appendable`] hands out per-batch [`Appender`]s, and an appender
//! receives samples, exemplars, histograms and metadata until it is
//! committed or rolled back.
//!
//! # Architecture
//!
//! ```text
//! scrape ──▶ Fanout ──▶ Interceptor (relabel) ──▶ Fanout ──▶ Interceptor (remote write) ──▶ sink
//!              │
//!              └──────▶ Interceptor (remote write) ──▶ sink
//! ```
//!
//! # Key Components
//!
//! - **Fanout**: resolves a global series ref once and broadcasts every call
//!   to a swappable set of children
//! - **Interceptor**: runs an optional hook per call kind before delegating
//!   to the next appendable
//! - **AppendContext**: scrape target and metadata store passed from the
//!   producer to every appender in the chain

pub mod fanout;
pub mod interceptor;

use std::fmt;
use std::sync::Arc;

use crate::error::AppendError;
use crate::labels::Labels;
use crate::types::{AppendOptions, Exemplar, HistogramValue, Metadata, SeriesRef};

pub use fanout::Fanout;
pub use interceptor::{Interceptor, InterceptorBuilder};

/// Result of a single append call
pub type AppendResult = Result<SeriesRef, AppendError>;

/// Source of per-batch appenders
pub trait Appendable: Send + Sync {
    /// Open an appender for one batch
    fn appender(&self, ctx: &AppendContext) -> Box<dyn Appender>;
}

/// Receiver of one batch of data
///
/// Every data call returns the series ref the caller should use for the
/// series from now on. A ref of `0` passed in means "not yet known".
pub trait Appender: Send {
    /// Append a float sample
    fn append(&mut self, series: SeriesRef, labels: &Labels, t: i64, v: f64) -> AppendResult;

    /// Attach an exemplar to a series
    fn append_exemplar(
        &mut self,
        series: SeriesRef,
        labels: &Labels,
        exemplar: &Exemplar,
    ) -> AppendResult;

    /// Append a native histogram sample
    fn append_histogram(
        &mut self,
        series: SeriesRef,
        labels: &Labels,
        t: i64,
        histogram: &HistogramValue,
    ) -> AppendResult;

    /// Update the metadata of a series
    fn update_metadata(
        &mut self,
        series: SeriesRef,
        labels: &Labels,
        metadata: &Metadata,
    ) -> AppendResult;

    /// Append a synthetic zero sample at the created timestamp `ct`
    fn append_ct_zero_sample(
        &mut self,
        series: SeriesRef,
        labels: &Labels,
        t: i64,
        ct: i64,
    ) -> AppendResult;

    /// Make the batch durable
    fn commit(&mut self) -> Result<(), AppendError>;

    /// Discard the batch
    fn rollback(&mut self) -> Result<(), AppendError>;

    /// Apply options to the rest of the batch
    fn set_options(&mut self, opts: &AppendOptions);
}

/// The target a batch was scraped from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapeTarget {
    /// Labels after target relabeling
    pub labels: Labels,
    /// Labels as discovered
    pub discovered_labels: Labels,
}

/// Metadata known for the metric families of a target
pub trait MetricMetadataStore: Send + Sync {
    /// Metadata of one metric family
    fn get_metadata(&self, metric_family: &str) -> Option<Metadata>;

    /// All known metadata
    fn list_metadata(&self) -> Vec<Metadata>;

    /// Number of metric families with metadata
    fn len_metadata(&self) -> usize;
}

/// A metadata store that knows nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetadataStore;

impl MetricMetadataStore for NoopMetadataStore {
    fn get_metadata(&self, _metric_family: &str) -> Option<Metadata> {
        None
    }

    fn list_metadata(&self) -> Vec<Metadata> {
        Vec::new()
    }

    fn len_metadata(&self) -> usize {
        0
    }
}

/// Per-batch context passed down the chain
///
/// Producers that know their scrape target and metadata set them here.
/// Stages that open appenders on children call [`AppendContext::with_defaults`]
/// first so sinks can rely on both being present.
#[derive(Clone, Default)]
pub struct AppendContext {
    /// Target the data came from
    pub target: Option<Arc<ScrapeTarget>>,
    /// Metadata of the target's metric families
    pub metadata: Option<Arc<dyn MetricMetadataStore>>,
}

impl AppendContext {
    /// Context with a known target and metadata store
    pub fn new(target: ScrapeTarget, metadata: Arc<dyn MetricMetadataStore>) -> Self {
        Self {
            target: Some(Arc::new(target)),
            metadata: Some(metadata),
        }
    }

    /// Fill absent fields with an empty target and a no-op metadata store
    ///
    /// Fields that are already set are kept.
    pub fn with_defaults(&self) -> Self {
        Self {
            target: Some(
                self.target
                    .clone()
                    .unwrap_or_else(|| Arc::new(ScrapeTarget::default())),
            ),
            metadata: Some(
                self.metadata
                    .clone()
                    .unwrap_or_else(|| Arc::new(NoopMetadataStore)),
            ),
        }
    }
}

impl fmt::Debug for AppendContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppendContext")
            .field("target", &self.target)
            .field("metadata", &self.metadata.as_ref().map(|m| m.len_metadata()))
            .finish()
    }
}

/// Appender that accepts and discards everything
///
/// Stands in for an absent downstream. Every data call returns `0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAppender;

impl Appender for NoopAppender {
    fn append(&mut self, _: SeriesRef, _: &Labels, _: i64, _: f64) -> AppendResult {
        Ok(0)
    }

    fn append_exemplar(&mut self, _: SeriesRef, _: &Labels, _: &Exemplar) -> AppendResult {
        Ok(0)
    }

    fn append_histogram(
        &mut self,
        _: SeriesRef,
        _: &Labels,
        _: i64,
        _: &HistogramValue,
    ) -> AppendResult {
        Ok(0)
    }

    fn update_metadata(&mut self, _: SeriesRef, _: &Labels, _: &Metadata) -> AppendResult {
        Ok(0)
    }

    fn append_ct_zero_sample(&mut self, _: SeriesRef, _: &Labels, _: i64, _: i64) -> AppendResult {
        Ok(0)
    }

    fn commit(&mut self) -> Result<(), AppendError> {
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), AppendError> {
        Ok(())
    }

    fn set_options(&mut self, _: &AppendOptions) {}
}
