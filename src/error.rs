//! Error types for the pipeline core

use std::fmt;

use thiserror::Error;

pub use crate::services::framework::ServiceError;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Relabel cache error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Append path error
    #[error("Append error: {0}")]
    Append(#[from] AppendError),

    /// Background service error
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Metrics registration or encoding error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors returned by appenders
///
/// Returned by sinks and pipeline stages. A fanout collects one of these per
/// failing child and keeps dispatching to the others.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppendError {
    /// The owning component has stopped and no longer accepts data
    #[error("{component} has exited")]
    ComponentExited {
        /// Component ID
        component: String,
    },

    /// The sample was rejected because it is older than the series head
    #[error("out of order sample for series {series}")]
    OutOfOrder {
        /// Series reference the sample was appended to
        series: u64,
    },

    /// A sink rejected the call
    #[error("{0}")]
    Rejected(String),

    /// Several children failed for the same call
    #[error("{0}")]
    Multiple(MultiError),

    /// The series was resolved and reached part of the pipeline, but a
    /// downstream call failed
    #[error("series {series}: {source}")]
    Partial {
        /// Ref the caller should keep using for this series
        series: u64,
        /// What went wrong downstream
        source: Box<AppendError>,
    },
}

impl AppendError {
    /// Attach the ref the caller should keep to a downstream failure
    ///
    /// A zero ref leaves the error unchanged. An error that already carries
    /// a ref has it replaced, so only the outermost ref survives.
    pub fn with_series(self, series: u64) -> Self {
        if series == 0 {
            return self;
        }
        let source = match self {
            AppendError::Partial { source, .. } => source,
            other => Box::new(other),
        };
        AppendError::Partial { series, source }
    }

    /// Ref resolved before the failure, if one was
    pub fn series(&self) -> Option<u64> {
        match self {
            AppendError::Partial { series, .. } => Some(*series),
            _ => None,
        }
    }

    /// The underlying failure without any attached ref
    pub fn cause(&self) -> &AppendError {
        match self {
            AppendError::Partial { source, .. } => source.cause(),
            other => other,
        }
    }
}

/// An ordered list of append failures
///
/// Failures are kept in dispatch order so that the combined message names
/// children in the order they were tried.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiError {
    errors: Vec<AppendError>,
}

impl MultiError {
    /// Create an empty error list
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure
    pub fn push(&mut self, err: AppendError) {
        self.errors.push(err);
    }

    /// Record the error of `result`, if any
    pub fn record<T>(&mut self, result: std::result::Result<T, AppendError>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.push(e);
                None
            },
        }
    }

    /// Number of recorded failures
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True if nothing failed
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// The recorded failures
    pub fn errors(&self) -> &[AppendError] {
        &self.errors
    }

    /// Collapse into a result
    ///
    /// No failures is `Ok`, one failure is returned as-is, more are wrapped
    /// in [`AppendError::Multiple`].
    pub fn into_result(mut self) -> std::result::Result<(), AppendError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(AppendError::Multiple(self)),
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n\t* {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

/// Relabel cache errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Backend name is recognized but not available in this build
    #[error("Unsupported cache backend: {0}")]
    UnsupportedBackend(String),

    /// Capacity must be at least one entry
    #[error("Invalid cache size: {0} (must be greater than 0)")]
    InvalidSize(usize),

    /// Redis command or connection failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Validation errors
///
/// Error type for configuration and input validation
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Value is out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Field name being validated
        field: String,
        /// The invalid value
        value: String,
        /// Minimum allowed value
        min: String,
        /// Maximum allowed value
        max: String,
    },

    /// Invalid format
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat {
        /// Field name being validated
        field: String,
        /// Description of the format error
        message: String,
    },
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Configuration(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_error_collapse() {
        assert!(MultiError::new().into_result().is_ok());

        let mut one = MultiError::new();
        one.push(AppendError::Rejected("a".into()));
        assert_eq!(
            one.into_result(),
            Err(AppendError::Rejected("a".into()))
        );

        let mut two = MultiError::new();
        two.push(AppendError::Rejected("first sink".into()));
        two.push(AppendError::Rejected("second sink".into()));
        let err = two.into_result().unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("2 errors occurred"));
        assert!(msg.contains("first sink"));
        assert!(msg.contains("second sink"));
    }

    #[test]
    fn test_record_passes_values_through() {
        let mut errs = MultiError::new();
        assert_eq!(errs.record::<u64>(Ok(7)), Some(7));
        assert_eq!(errs.record::<u64>(Err(AppendError::OutOfOrder { series: 1 })), None);
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn test_record_then_collapse() {
        let mut errs = MultiError::new();
        let refs: Vec<u64> = [Ok(3), Err(AppendError::Rejected("disk full".into())), Ok(4)]
            .into_iter()
            .filter_map(|r| errs.record(r))
            .collect();
        assert_eq!(refs, vec![3, 4]);
        assert_eq!(errs.into_result(), Err(AppendError::Rejected("disk full".into())));

        let mut errs = MultiError::new();
        errs.record::<()>(Err(AppendError::OutOfOrder { series: 1 }));
        errs.record::<()>(Err(AppendError::OutOfOrder { series: 2 }));
        match errs.into_result() {
            Err(AppendError::Multiple(m)) => assert_eq!(m.errors().len(), 2),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_with_series_attaches_ref() {
        let err = AppendError::Rejected("down".into()).with_series(9);
        assert_eq!(err.series(), Some(9));
        assert_eq!(err.cause(), &AppendError::Rejected("down".into()));
        assert_eq!(err.to_string(), "series 9: down");

        // Re-wrapping keeps only the outer ref
        let outer = err.with_series(42);
        assert_eq!(outer.series(), Some(42));
        assert_eq!(outer.cause(), &AppendError::Rejected("down".into()));

        let plain = AppendError::Rejected("down".into()).with_series(0);
        assert_eq!(plain.series(), None);
        assert_eq!(plain, AppendError::Rejected("down".into()));
    }

    #[test]
    fn test_validation_error_converts() {
        let err: Error = ValidationError::OutOfRange {
            field: "shards".into(),
            value: "0".into(),
            min: "1".into(),
            max: "256".into(),
        }
        .into();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("shards value 0"));
    }
}
