//! Metrics and telemetry for the pipeline core
//!
//! Every collector is registered on a `Registry` handed in by the caller,
//! never on the process-global default registry, so independent pipelines
//! (and tests) do not collide. Per-component metric sets carry a constant
//! `component_id` label.

use prometheus::core::Collector;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

/// Buckets for fanout write latency, in seconds
pub const WRITE_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Register `collector`, logging instead of failing
///
/// The collector keeps working when registration fails; it is just not
/// exported through `registry`.
pub fn register_or_warn(registry: &Registry, collector: Box<dyn Collector>) {
    if let Err(e) = registry.register(collector) {
        tracing::warn!(error = %e, "failed to register metric");
    }
}

/// Get metrics in Prometheus text format
///
/// # Returns
///
/// Result containing the formatted metrics string, or an error if encoding fails
pub fn gather_metrics(registry: &Registry) -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

fn opts(name: &str, help: &str, component_id: &str) -> Opts {
    Opts::new(name, help).const_label("component_id", component_id)
}

/// Metrics of one fanout
#[derive(Clone)]
pub struct FanoutMetrics {
    /// Time from the first append of a batch to its commit or rollback
    pub write_latency: Histogram,

    /// Samples handed to at least one child
    pub samples_forwarded: IntCounter,
}

impl FanoutMetrics {
    /// Create and register the metrics for `component_id`
    pub fn new(registry: &Registry, component_id: &str) -> prometheus::Result<Self> {
        let write_latency = Histogram::with_opts(
            HistogramOpts::new(
                "fanout_write_latency_seconds",
                "Write latency for sending to direct and indirect components",
            )
            .const_label("component_id", component_id)
            .buckets(WRITE_LATENCY_BUCKETS.to_vec()),
        )?;
        let samples_forwarded = IntCounter::with_opts(opts(
            "fanout_forwarded_samples_total",
            "Total number of samples sent to downstream components.",
            component_id,
        ))?;

        register_or_warn(registry, Box::new(write_latency.clone()));
        register_or_warn(registry, Box::new(samples_forwarded.clone()));

        Ok(Self {
            write_latency,
            samples_forwarded,
        })
    }
}

/// Metrics of one relabel component
#[derive(Clone)]
pub struct RelabelMetrics {
    /// Samples received
    pub processed: IntCounter,
    /// Samples forwarded after relabeling
    pub written: IntCounter,
    /// Relabel results served from the cache
    pub cache_hits: IntCounter,
    /// Relabel results computed
    pub cache_misses: IntCounter,
    /// Cache entries removed for stale series
    pub cache_deletes: IntCounter,
    /// Entries currently cached
    pub cache_size: IntGauge,
}

impl RelabelMetrics {
    /// Create and register the metrics for `component_id`
    pub fn new(registry: &Registry, component_id: &str) -> prometheus::Result<Self> {
        let metrics = Self {
            processed: IntCounter::with_opts(opts(
                "relabel_metrics_processed",
                "Total number of metrics processed",
                component_id,
            ))?,
            written: IntCounter::with_opts(opts(
                "relabel_metrics_written",
                "Total number of metrics written",
                component_id,
            ))?,
            cache_hits: IntCounter::with_opts(opts(
                "relabel_cache_hits",
                "Total number of cache hits",
                component_id,
            ))?,
            cache_misses: IntCounter::with_opts(opts(
                "relabel_cache_misses",
                "Total number of cache misses",
                component_id,
            ))?,
            cache_deletes: IntCounter::with_opts(opts(
                "relabel_cache_deletes",
                "Total number of cache deletes",
                component_id,
            ))?,
            cache_size: IntGauge::with_opts(opts(
                "relabel_cache_size",
                "Total size of relabel cache",
                component_id,
            ))?,
        };

        register_or_warn(registry, Box::new(metrics.processed.clone()));
        register_or_warn(registry, Box::new(metrics.written.clone()));
        register_or_warn(registry, Box::new(metrics.cache_hits.clone()));
        register_or_warn(registry, Box::new(metrics.cache_misses.clone()));
        register_or_warn(registry, Box::new(metrics.cache_deletes.clone()));
        register_or_warn(registry, Box::new(metrics.cache_size.clone()));

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fanout_metrics_are_labelled() {
        let registry = Registry::new();
        let m = FanoutMetrics::new(&registry, "prometheus.scrape.default").unwrap();
        m.samples_forwarded.inc_by(3);
        m.write_latency.observe(0.2);

        let text = gather_metrics(&registry).expect("Failed to gather metrics");
        assert!(text.contains(
            "fanout_forwarded_samples_total{component_id=\"prometheus.scrape.default\"} 3"
        ));
        assert!(text.contains("fanout_write_latency_seconds_bucket"));
        assert!(text.contains("le=\"0.25\""));
    }

    #[test]
    fn test_registries_are_isolated() {
        let a = Registry::new();
        let b = Registry::new();
        let ma = RelabelMetrics::new(&a, "relabel.a").unwrap();
        RelabelMetrics::new(&b, "relabel.a").unwrap();

        ma.processed.inc();
        assert!(gather_metrics(&a).unwrap().contains("relabel_metrics_processed{component_id=\"relabel.a\"} 1"));
        assert!(gather_metrics(&b).unwrap().contains("relabel_metrics_processed{component_id=\"relabel.a\"} 0"));
    }

    #[test]
    fn test_duplicate_registration_keeps_working() {
        let registry = Registry::new();
        RelabelMetrics::new(&registry, "relabel.a").unwrap();
        let second = RelabelMetrics::new(&registry, "relabel.a").unwrap();
        second.cache_size.set(4);
        assert_eq!(second.cache_size.get(), 4);
    }
}
