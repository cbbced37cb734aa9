//! Label sets identifying a series
//!
//! A [`Labels`] value is an immutable, name-sorted list of unique
//! `(name, value)` pairs. Two label sets with the same content are equal and
//! hash to the same canonical value, which is what the label store keys
//! series identity on.
//!
//! # Example
//!
//! ```rust
//! use kuba_pipeline::labels::Labels;
//!
//! let a = Labels::from_pairs([("job", "x"), ("__name__", "up")]);
//! let b = Labels::from_pairs([("__name__", "up"), ("job", "x")]);
//!
//! assert_eq!(a, b);
//! assert_eq!(a.hash(), b.hash());
//! assert_eq!(a.to_string(), r#"{__name__="up", job="x"}"#);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;

/// Name of the label carrying the metric name
pub const METRIC_NAME: &str = "__name__";

/// Separator byte mixed between names and values when hashing
const SEPARATOR: u8 = 0xff;

/// A single name/value pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    /// Label name
    pub name: String,
    /// Label value
    pub value: String,
}

impl Label {
    /// Create a new label
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An ordered set of labels identifying one series
///
/// Backed by a shared slice, so cloning is a reference-count bump. Staleness
/// trackers and relabel cache entries hold clones on the hot path.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Label>", into = "Vec<Label>")]
pub struct Labels {
    labels: Arc<[Label]>,
}

impl Labels {
    /// The empty label set
    pub fn empty() -> Self {
        Self {
            labels: Arc::from(Vec::new()),
        }
    }

    /// Build a label set from name/value pairs
    ///
    /// Pairs are sorted by name. When a name is repeated the last value wins.
    pub fn from_pairs<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        pairs
            .into_iter()
            .map(|(n, v)| Label::new(n, v))
            .collect::<Vec<_>>()
            .into()
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True if the set holds no labels
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Iterate over labels in name order
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    /// Look up the value of a label by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|idx| self.labels[idx].value.as_str())
    }

    /// The metric name, if present
    pub fn metric_name(&self) -> Option<&str> {
        self.get(METRIC_NAME)
    }

    /// Return a copy with `name` set to `value`
    pub fn with(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut labels = self.labels.to_vec();
        labels.push(Label::new(name, value));
        labels.into()
    }

    /// Return a copy without the label called `name`
    pub fn without(&self, name: &str) -> Self {
        let labels: Vec<Label> = self
            .labels
            .iter()
            .filter(|l| l.name != name)
            .cloned()
            .collect();
        Self {
            labels: Arc::from(labels),
        }
    }

    /// Canonical content hash
    ///
    /// Stable for the lifetime of the process. Distinct label sets may
    /// collide; the label store does not detect collisions.
    pub fn hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for label in self.labels.iter() {
            hasher.write(label.name.as_bytes());
            hasher.write_u8(SEPARATOR);
            hasher.write(label.value.as_bytes());
            hasher.write_u8(SEPARATOR);
        }
        hasher.finish()
    }
}

impl Default for Labels {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<Label>> for Labels {
    fn from(mut labels: Vec<Label>) -> Self {
        // Stable sort keeps insertion order among equal names, so the last
        // occurrence is the one retained below.
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        let mut deduped: Vec<Label> = Vec::with_capacity(labels.len());
        for label in labels {
            match deduped.last_mut() {
                Some(last) if last.name == label.name => *last = label,
                _ => deduped.push(label),
            }
        }
        Self {
            labels: Arc::from(deduped),
        }
    }
}

impl From<Labels> for Vec<Label> {
    fn from(labels: Labels) -> Self {
        labels.labels.to_vec()
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
