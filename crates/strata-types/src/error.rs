//! Error types for the strata collector.
//!
//! Provides [`StrataError`] as the top-level error type and [`ConfigError`]
//! for configuration loading and validation. Both are non-exhaustive to
//! allow future extension without breaking downstream.

use thiserror::Error;

use crate::record::RecordKind;

/// Top-level error type for the strata collector.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StrataError {
    /// Configuration is malformed or semantically invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A stage tried to swap a record's payload for one of another kind.
    #[error("payload kind mismatch: record is {expected}, payload is {actual}")]
    KindMismatch {
        /// Kind of the record being mutated.
        expected: RecordKind,
        /// Kind of the rejected payload.
        actual: RecordKind,
    },

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration error.
///
/// Raised while loading or validating a collector configuration, before
/// any pipeline is built.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Path that was being read.
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML.
    #[error("failed to parse yaml config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The configuration file is not valid JSON.
    #[error("failed to parse json config: {0}")]
    Json(#[from] serde_json::Error),

    /// A value is present but semantically invalid.
    #[error("invalid config: {reason}")]
    Invalid {
        /// What is wrong with the configuration.
        reason: String,
    },
}

impl ConfigError {
    /// Shorthand for [`ConfigError::Invalid`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// A convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_mismatch_display() {
        let err = StrataError::KindMismatch {
            expected: RecordKind::Traces,
            actual: RecordKind::Logs,
        };
        assert_eq!(
            err.to_string(),
            "payload kind mismatch: record is traces, payload is logs"
        );
    }

    #[test]
    fn config_error_is_transparent() {
        let err: StrataError = ConfigError::invalid("empty pipeline").into();
        assert_eq!(err.to_string(), "invalid config: empty pipeline");
    }

    #[test]
    fn strata_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: StrataError = io_err.into();
        assert!(matches!(err, StrataError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn config_error_read_keeps_path() {
        let err = ConfigError::Read {
            path: "/etc/strata.yaml".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/etc/strata.yaml"));
        assert!(err.to_string().contains("denied"));
    }
}
