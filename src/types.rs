//! Core data types carried through the appender chain
//!
//! # Key Types
//!
//! - **`SeriesRef`**: reference handed back by an appender for a series
//! - **`Exemplar`**: a traced sample attached to a series
//! - **`HistogramValue`**: an integer or float native histogram
//! - **`Metadata`**: type, unit and help text of a metric family
//! - **`AppendOptions`**: per-appender options forwarded down the chain
//!
//! Stale markers are encoded as a specific NaN bit pattern. Use
//! [`is_stale_nan`] to test for them, never a float comparison.

use serde::{Deserialize, Serialize};

use crate::labels::Labels;

/// Reference to a series as understood by the appender that returned it
///
/// `0` means "not yet resolved". Pipeline stages that see `0` resolve a
/// global reference through the label store.
pub type SeriesRef = u64;

/// Bit pattern of the staleness marker NaN
pub const STALE_NAN_BITS: u64 = 0x7ff0_0000_0000_0002;

/// The staleness marker value
#[inline]
pub fn stale_nan() -> f64 {
    f64::from_bits(STALE_NAN_BITS)
}

/// True if `v` is exactly the staleness marker
#[inline]
pub fn is_stale_nan(v: f64) -> bool {
    v.to_bits() == STALE_NAN_BITS
}

/// A sample with trace context attached to a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exemplar {
    /// Exemplar labels (e.g. trace_id)
    pub labels: Labels,
    /// Observed value
    pub value: f64,
    /// Timestamp in milliseconds
    pub ts: i64,
    /// Whether `ts` was set by the producer
    pub has_ts: bool,
}

/// Integer-count native histogram
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Bucket resolution
    pub schema: i32,
    /// Width of the zero bucket
    pub zero_threshold: f64,
    /// Observations in the zero bucket
    pub zero_count: u64,
    /// Total observations
    pub count: u64,
    /// Sum of observations
    pub sum: f64,
    /// Delta-encoded positive bucket counts
    pub positive_buckets: Vec<i64>,
    /// Delta-encoded negative bucket counts
    pub negative_buckets: Vec<i64>,
}

/// Float-count native histogram
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FloatHistogram {
    /// Bucket resolution
    pub schema: i32,
    /// Width of the zero bucket
    pub zero_threshold: f64,
    /// Observations in the zero bucket
    pub zero_count: f64,
    /// Total observations
    pub count: f64,
    /// Sum of observations
    pub sum: f64,
    /// Absolute positive bucket counts
    pub positive_buckets: Vec<f64>,
    /// Absolute negative bucket counts
    pub negative_buckets: Vec<f64>,
}

/// Either flavour of native histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HistogramValue {
    /// Integer counts
    Int(Histogram),
    /// Float counts
    Float(FloatHistogram),
}

/// Kind of metric family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Type not reported
    #[default]
    Unknown,
    /// Monotonic counter
    Counter,
    /// Arbitrary gauge
    Gauge,
    /// Classic or native histogram
    Histogram,
    /// Gauge histogram
    GaugeHistogram,
    /// Summary with quantiles
    Summary,
    /// Info metric
    Info,
    /// State set
    StateSet,
}

/// Metric family metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Metric type
    pub metric_type: MetricType,
    /// Unit of measurement
    pub unit: String,
    /// Help text
    pub help: String,
}

/// Options applied to an appender for the remainder of its batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOptions {
    /// Reject out-of-order samples instead of ingesting them
    pub discard_out_of_order: bool,
}
