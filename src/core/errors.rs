use thiserror::Error;

/// Unified error type for the queue engine
#[derive(Debug, Error)]
pub enum QueueError {
    /// Invalid arguments passed to a public operation
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// `lock` called on a scope that already has a holder
    #[error("scope \"{0}\" is already locked")]
    AlreadyLocked(String),

    /// A sequence with this name is still running
    #[error("Sequence already active: {0}")]
    DuplicateSequence(String),

    /// A deferred queue item could not be turned into an action
    #[error("Failed to materialize action")]
    Materialization {
        #[source]
        source: anyhow::Error,
    },

    /// An action's error handler failed; fatal to its sequence
    #[error("Error handler of action '{action}' failed")]
    Handler {
        action: String,
        #[source]
        source: anyhow::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl QueueError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error with field
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn materialization(source: anyhow::Error) -> Self {
        Self::Materialization { source }
    }

    pub fn handler<S: Into<String>>(action: S, source: anyhow::Error) -> Self {
        Self::Handler {
            action: action.into(),
            source,
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether the error ends the sequence that produced it
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Materialization { .. } | Self::Handler { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::AlreadyLocked(_) => "lock",
            Self::DuplicateSequence(_) => "registry",
            Self::Materialization { .. } => "materialization",
            Self::Handler { .. } => "handler",
            Self::Configuration(_) => "configuration",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, QueueError>;

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = QueueError::validation_field("must not be empty", "scope");
        assert!(matches!(err, QueueError::Validation { field: Some(ref f), .. } if f == "scope"));
        assert_eq!(err.category(), "validation");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_errors() {
        let err = QueueError::handler("Flaky", anyhow::anyhow!("boom"));
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "Error handler of action 'Flaky' failed");

        let err = QueueError::materialization(anyhow::anyhow!("no browser"));
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "Failed to materialize action");
    }

    #[test]
    fn test_lock_message() {
        let err = QueueError::AlreadyLocked("browser".into());
        assert_eq!(err.to_string(), "scope \"browser\" is already locked");
        assert_eq!(err.category(), "lock");
    }
}
