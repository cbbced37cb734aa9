//! One-to-many appender
//!
//! A [`Fanout`] owns the global identity of every series passing through
//! it. The first call for a series with ref `0` resolves the global ref
//! through the label store; that ref is what every child receives and what
//! the caller gets back, no matter how children number series internally.
//!
//! Children are snapshotted when an appender is opened. Swapping them with
//! [`Fanout::update_children`] only affects appenders opened afterwards.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use prometheus::Registry;

use super::{AppendContext, AppendResult, Appendable, Appender};
use crate::error::{AppendError, MultiError, Result};
use crate::labels::Labels;
use crate::labelstore::{LabelStore, StalenessTracker};
use crate::metrics::FanoutMetrics;
use crate::types::{AppendOptions, Exemplar, HistogramValue, Metadata, SeriesRef};

/// Broadcasts appends to a swappable set of children
pub struct Fanout {
    children: RwLock<Vec<Arc<dyn Appendable>>>,
    component_id: String,
    metrics: FanoutMetrics,
    ls: Arc<dyn LabelStore>,
    /// Trackers flushed by the previous appender, used to size the next one
    last_series_count: Arc<AtomicUsize>,
}

impl Fanout {
    /// Create a fanout and register its metrics on `registry`
    pub fn new(
        children: Vec<Arc<dyn Appendable>>,
        component_id: impl Into<String>,
        registry: &Registry,
        ls: Arc<dyn LabelStore>,
    ) -> Result<Self> {
        let component_id = component_id.into();
        let metrics = FanoutMetrics::new(registry, &component_id)?;
        Ok(Self {
            children: RwLock::new(children),
            component_id,
            metrics,
            ls,
            last_series_count: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Replace the children
    ///
    /// Appenders that are already open keep sending to the old set.
    pub fn update_children(&self, children: Vec<Arc<dyn Appendable>>) {
        let count = children.len();
        *self.children.write() = children;
        tracing::debug!(component = %self.component_id, children = count, "fanout children updated");
    }

    /// Number of current children
    pub fn children_len(&self) -> usize {
        self.children.read().len()
    }

    /// ID of the owning component
    pub fn component_id(&self) -> &str {
        &self.component_id
    }
}

impl fmt::Debug for Fanout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fanout")
            .field("component_id", &self.component_id)
            .field("children", &self.children_len())
            .finish()
    }
}

impl Appendable for Fanout {
    fn appender(&self, ctx: &AppendContext) -> Box<dyn Appender> {
        let ctx = ctx.with_defaults();
        let children = self
            .children
            .read()
            .iter()
            .map(|child| child.appender(&ctx))
            .collect();

        Box::new(FanoutAppender {
            children,
            start: None,
            trackers: Vec::with_capacity(self.last_series_count.load(Ordering::Relaxed)),
            metrics: self.metrics.clone(),
            ls: self.ls.clone(),
            last_series_count: self.last_series_count.clone(),
        })
    }
}

struct FanoutAppender {
    children: Vec<Box<dyn Appender>>,
    /// Time of the first data call
    start: Option<Instant>,
    trackers: Vec<StalenessTracker>,
    metrics: FanoutMetrics,
    ls: Arc<dyn LabelStore>,
    last_series_count: Arc<AtomicUsize>,
}

impl FanoutAppender {
    /// Mark the batch started and resolve an unknown ref
    fn begin(&mut self, series: SeriesRef, labels: &Labels) -> SeriesRef {
        if self.start.is_none() {
            self.start = Some(Instant::now());
        }
        if series == 0 {
            self.ls.get_or_add_global_ref_id(labels)
        } else {
            series
        }
    }

    /// Call `f` on every child in order
    ///
    /// Returns whether at least one child accepted the call. A failing child
    /// does not stop dispatch to the rest, and the error handed back still
    /// carries `series` so the caller can reuse it.
    fn broadcast<F>(&mut self, series: SeriesRef, mut f: F) -> (bool, AppendResult)
    where
        F: FnMut(&mut dyn Appender) -> AppendResult,
    {
        let mut errs = MultiError::new();
        let mut accepted = false;
        for child in &mut self.children {
            if errs.record(f(child.as_mut())).is_some() {
                accepted = true;
            }
        }
        let result = errs
            .into_result()
            .map(|()| series)
            .map_err(|e| e.with_series(series));
        (accepted, result)
    }

    fn flush_staleness(&mut self) {
        self.last_series_count
            .store(self.trackers.len(), Ordering::Relaxed);
        self.ls.track_staleness(&self.trackers);
        self.trackers.clear();
    }

    fn record_latency(&self) {
        if let Some(start) = self.start {
            self.metrics
                .write_latency
                .observe(start.elapsed().as_secs_f64());
        }
    }

    fn finish<F>(&mut self, mut f: F) -> std::result::Result<(), AppendError>
    where
        F: FnMut(&mut dyn Appender) -> std::result::Result<(), AppendError>,
    {
        self.flush_staleness();
        let mut errs = MultiError::new();
        for child in &mut self.children {
            errs.record(f(child.as_mut()));
        }
        self.record_latency();
        errs.into_result()
    }
}

impl Appender for FanoutAppender {
    fn append(&mut self, series: SeriesRef, labels: &Labels, t: i64, v: f64) -> AppendResult {
        let series = self.begin(series, labels);
        self.trackers.push(StalenessTracker {
            global_ref_id: series,
            value: v,
            labels: labels.clone(),
        });

        let (accepted, result) = self.broadcast(series, |c| c.append(series, labels, t, v));
        if accepted {
            self.metrics.samples_forwarded.inc();
        }
        result
    }

    fn append_exemplar(
        &mut self,
        series: SeriesRef,
        labels: &Labels,
        exemplar: &Exemplar,
    ) -> AppendResult {
        let series = self.begin(series, labels);
        self.broadcast(series, |c| c.append_exemplar(series, labels, exemplar)).1
    }

    fn append_histogram(
        &mut self,
        series: SeriesRef,
        labels: &Labels,
        t: i64,
        histogram: &HistogramValue,
    ) -> AppendResult {
        let series = self.begin(series, labels);
        self.broadcast(series, |c| c.append_histogram(series, labels, t, histogram)).1
    }

    fn update_metadata(
        &mut self,
        series: SeriesRef,
        labels: &Labels,
        metadata: &Metadata,
    ) -> AppendResult {
        let series = self.begin(series, labels);
        self.broadcast(series, |c| c.update_metadata(series, labels, metadata)).1
    }

    fn append_ct_zero_sample(
        &mut self,
        series: SeriesRef,
        labels: &Labels,
        t: i64,
        ct: i64,
    ) -> AppendResult {
        let series = self.begin(series, labels);
        self.broadcast(series, |c| c.append_ct_zero_sample(series, labels, t, ct)).1
    }

    fn commit(&mut self) -> std::result::Result<(), AppendError> {
        self.finish(|c| c.commit())
    }

    fn rollback(&mut self) -> std::result::Result<(), AppendError> {
        self.finish(|c| c.rollback())
    }

    fn set_options(&mut self, opts: &AppendOptions) {
        for child in &mut self.children {
            child.set_options(opts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labelstore::{LabelStoreConfig, LabelStoreService};
    use crate::metrics::gather_metrics;
    use crate::storage::testutil::{Call, RecordingSink};
    use crate::storage::ScrapeTarget;
    use crate::types::stale_nan;

    fn label_store() -> Arc<dyn LabelStore> {
        Arc::new(LabelStoreService::new(LabelStoreConfig::default(), &Registry::new()).unwrap())
    }

    fn up() -> Labels {
        Labels::from_pairs([("__name__", "up"), ("job", "x")])
    }

    fn fanout(children: Vec<Arc<dyn Appendable>>, ls: Arc<dyn LabelStore>) -> Fanout {
        Fanout::new(children, "prometheus.scrape.test", &Registry::new(), ls).unwrap()
    }

    #[test]
    fn test_global_ref_forwarded_and_returned() {
        let ls = label_store();
        let a = RecordingSink::renumbering(1000);
        let b = RecordingSink::new();
        let f = fanout(vec![a.clone(), b.clone()], ls.clone());

        let mut app = f.appender(&AppendContext::default());
        let series = app.append(0, &up(), 10, 1.0).unwrap();
        app.commit().unwrap();

        let global = ls.get_or_add_global_ref_id(&up());
        assert_eq!(series, global);
        assert_eq!(a.appended(), vec![(global, up(), 1.0)]);
        assert_eq!(b.appended(), vec![(global, up(), 1.0)]);
    }

    #[test]
    fn test_known_ref_is_not_re_resolved() {
        let ls = label_store();
        let sink = RecordingSink::new();
        let f = fanout(vec![sink.clone()], ls.clone());

        let mut app = f.appender(&AppendContext::default());
        assert_eq!(app.append(77, &up(), 10, 1.0), Ok(77));
        assert_eq!(ls.stats().global_ids, 0);
    }

    #[test]
    fn test_every_call_kind_uses_global_ref() {
        let ls = label_store();
        let sink = RecordingSink::renumbering(500);
        let f = fanout(vec![sink.clone()], ls.clone());
        let l = up();

        let mut app = f.appender(&AppendContext::default());
        let g = app
            .append_exemplar(0, &l, &Exemplar {
                labels: Labels::from_pairs([("trace_id", "abc")]),
                value: 1.0,
                ts: 5,
                has_ts: true,
            })
            .unwrap();
        assert_eq!(app.update_metadata(0, &l, &Metadata::default()), Ok(g));
        assert_eq!(
            app.append_histogram(0, &l, 5, &HistogramValue::Int(Default::default())),
            Ok(g)
        );
        assert_eq!(app.append_ct_zero_sample(0, &l, 5, 1), Ok(g));

        for call in sink.calls() {
            match call {
                Call::Exemplar { series, .. }
                | Call::Metadata { series, .. }
                | Call::Histogram { series, .. }
                | Call::CtZero { series, .. } => assert_eq!(series, g),
                other => panic!("unexpected call {:?}", other),
            }
        }
    }

    #[test]
    fn test_commit_errors_are_aggregated() {
        let ls = label_store();
        let first = RecordingSink::failing_commit("first sink down");
        let second = RecordingSink::failing_commit("second sink down");
        let third = RecordingSink::new();
        let f = fanout(vec![first.clone(), second.clone(), third.clone()], ls);

        let mut app = f.appender(&AppendContext::default());
        app.append(0, &up(), 10, 1.0).unwrap();
        let err = app.commit().unwrap_err();

        assert!(matches!(&err, AppendError::Multiple(m) if m.len() == 2));
        let msg = err.to_string();
        assert!(msg.contains("first sink down"));
        assert!(msg.contains("second sink down"));
        assert_eq!(third.calls().last(), Some(&Call::Commit));
    }

    #[test]
    fn test_single_failure_is_not_wrapped() {
        let f = fanout(
            vec![RecordingSink::failing_commit("down"), RecordingSink::new()],
            label_store(),
        );
        let mut app = f.appender(&AppendContext::default());
        assert_eq!(app.commit(), Err(AppendError::Rejected("down".into())));
    }

    #[test]
    fn test_failing_child_does_not_block_others() {
        let ls = label_store();
        let broken = RecordingSink::failing_data("down");
        let healthy = RecordingSink::new();
        let f = fanout(vec![broken.clone(), healthy.clone()], ls.clone());
        let l = up();
        let global = ls.get_or_add_global_ref_id(&l);
        let exemplar = Exemplar {
            labels: Labels::from_pairs([("trace_id", "abc")]),
            value: 1.0,
            ts: 5,
            has_ts: true,
        };

        let mut app = f.appender(&AppendContext::default());
        let results = vec![
            app.append(0, &l, 10, 1.0),
            app.append_exemplar(0, &l, &exemplar),
            app.append_histogram(0, &l, 10, &HistogramValue::Int(Default::default())),
            app.update_metadata(0, &l, &Metadata::default()),
            app.append_ct_zero_sample(0, &l, 10, 1),
        ];

        for result in results {
            let err = result.unwrap_err();
            assert_eq!(err.series(), Some(global));
            assert_eq!(err.cause(), &AppendError::Rejected("down".into()));
        }

        // Both children saw every call, in the same order, under the global ref
        assert_eq!(broken.calls(), healthy.calls());
        assert_eq!(healthy.calls().len(), 5);
        for call in healthy.calls() {
            match call {
                Call::Append { series, .. }
                | Call::Exemplar { series, .. }
                | Call::Histogram { series, .. }
                | Call::Metadata { series, .. }
                | Call::CtZero { series, .. } => assert_eq!(series, global),
                other => panic!("unexpected call {:?}", other),
            }
        }
        assert_eq!(f.metrics.samples_forwarded.get(), 1);
    }

    #[test]
    fn test_data_errors_are_aggregated_with_ref() {
        let ls = label_store();
        let f = fanout(
            vec![
                RecordingSink::failing_data("first sink down"),
                RecordingSink::failing_data("second sink down"),
            ],
            ls.clone(),
        );

        let mut app = f.appender(&AppendContext::default());
        let err = app.append(0, &up(), 10, 1.0).unwrap_err();

        assert_eq!(err.series(), Some(ls.get_or_add_global_ref_id(&up())));
        match err.cause() {
            AppendError::Multiple(m) => assert_eq!(
                m.errors(),
                &[
                    AppendError::Rejected("first sink down".into()),
                    AppendError::Rejected("second sink down".into()),
                ]
            ),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(f.metrics.samples_forwarded.get(), 0);

        // The tracker is kept even though nothing accepted the sample
        app.commit().unwrap();
        assert_eq!(f.last_series_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_in_flight_appender_keeps_snapshot() {
        let ls = label_store();
        let old = RecordingSink::new();
        let new = RecordingSink::new();
        let f = fanout(vec![old.clone()], ls);

        let mut app = f.appender(&AppendContext::default());
        f.update_children(vec![new.clone()]);
        app.append(0, &up(), 10, 1.0).unwrap();
        app.commit().unwrap();

        assert_eq!(old.appended().len(), 1);
        assert!(new.calls().is_empty());

        let mut app = f.appender(&AppendContext::default());
        app.append(0, &up(), 20, 2.0).unwrap();
        assert_eq!(new.appended().len(), 1);
        assert_eq!(old.appended().len(), 1);
    }

    #[test]
    fn test_staleness_flushed_on_commit_and_rollback() {
        let ls = label_store();
        let f = fanout(vec![RecordingSink::new()], ls.clone());

        let mut app = f.appender(&AppendContext::default());
        app.append(0, &up(), 10, stale_nan()).unwrap();
        assert_eq!(ls.stats().stale_markers, 0);
        app.commit().unwrap();
        assert_eq!(ls.stats().stale_markers, 1);

        let mut app = f.appender(&AppendContext::default());
        app.append(0, &up(), 20, 3.0).unwrap();
        app.rollback().unwrap();
        assert_eq!(ls.stats().stale_markers, 0);
        assert_eq!(f.last_series_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_only_float_samples_are_tracked() {
        let ls = label_store();
        let f = fanout(vec![], ls.clone());

        let mut app = f.appender(&AppendContext::default());
        app.append_histogram(0, &up(), 10, &HistogramValue::Int(Default::default()))
            .unwrap();
        app.commit().unwrap();
        assert_eq!(f.last_series_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_context_defaults_injected() {
        let sink = RecordingSink::new();
        let f = fanout(vec![sink.clone()], label_store());
        f.appender(&AppendContext::default());

        let ctx = sink.contexts.lock()[0].clone();
        assert_eq!(ctx.target.as_deref(), Some(&ScrapeTarget::default()));
        assert!(ctx.metadata.is_some());
    }

    #[test]
    fn test_set_options_reaches_children() {
        let sink = RecordingSink::new();
        let f = fanout(vec![sink.clone()], label_store());
        let mut app = f.appender(&AppendContext::default());
        let opts = AppendOptions { discard_out_of_order: true };
        app.set_options(&opts);
        assert_eq!(sink.calls(), vec![Call::Options(opts)]);
    }

    #[test]
    fn test_metrics_recorded() {
        let registry = Registry::new();
        let f = Fanout::new(
            vec![RecordingSink::new()],
            "prometheus.scrape.test",
            &registry,
            label_store(),
        )
        .unwrap();

        // Nothing appended, no latency observed
        f.appender(&AppendContext::default()).commit().unwrap();

        let mut app = f.appender(&AppendContext::default());
        app.append(0, &up(), 10, 1.0).unwrap();
        app.append(0, &up(), 20, 2.0).unwrap();
        app.commit().unwrap();

        let text = gather_metrics(&registry).unwrap();
        assert!(text.contains(
            "fanout_forwarded_samples_total{component_id=\"prometheus.scrape.test\"} 2"
        ));
        assert!(text.contains(
            "fanout_write_latency_seconds_count{component_id=\"prometheus.scrape.test\"} 1"
        ));
    }

    #[test]
    fn test_no_children_counts_nothing() {
        let registry = Registry::new();
        let f = Fanout::new(vec![], "empty", &registry, label_store()).unwrap();
        let mut app = f.appender(&AppendContext::default());
        assert_ne!(app.append(0, &up(), 10, 1.0).unwrap(), 0);
        assert_eq!(f.metrics.samples_forwarded.get(), 0);
    }
}
