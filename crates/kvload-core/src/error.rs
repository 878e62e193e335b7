use thiserror::Error;

/// Canonical error type for kvload.
///
/// Only conditions that abort a run live here. Failures of individual
/// requests or iterations are recorded as data (checks and samples) and never
/// surface as a `CoreError`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration could not be loaded or deserialized.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A configuration value is out of its allowed range.
    #[error("validation error: {0}")]
    Validation(String),

    /// A threshold selector or predicate could not be understood.
    #[error("invalid threshold `{selector}: {predicate}`: {reason}")]
    InvalidThreshold {
        /// Metric selector as written (e.g. `checks{scenario:ping}`).
        selector: String,
        /// Predicate as written (e.g. `rate>0.99`).
        predicate: String,
        /// Human-readable explanation.
        reason: String,
    },

    /// I/O error, e.g. while writing a report file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unexpected internal fault (e.g. a worker pool could not be built).
    #[error("internal error: {message}")]
    Internal {
        /// Details for debugging purposes.
        message: String,
    },
}

impl CoreError {
    /// Creates a `Validation` variant.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates an `InvalidThreshold` variant.
    #[must_use]
    pub fn invalid_threshold(
        selector: impl Into<String>,
        predicate: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidThreshold {
            selector: selector.into(),
            predicate: predicate.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error stems from user-supplied configuration.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Validation(_) | Self::InvalidThreshold { .. }
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenient result alias for kvload operations.
pub type CoreResult<T> = Result<T, CoreError>;
