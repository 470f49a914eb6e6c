//! Logging sink used by executors and by the default error handler
//!
//! The engine only produces labels and message strings; formatting and
//! routing belong to the implementation.

use parking_lot::RwLock;

/// Logging collaborator
pub trait QueueLogger: Send + Sync {
    fn info(&self, message: &str);

    /// Set the correlation label for subsequent messages
    fn set_context(&self, label: &str);

    fn error(&self, error: &anyhow::Error);
}

/// Forwards everything to `tracing`, tagging events with the sequence name
/// and the current label
#[derive(Default)]
pub struct TracingLogger {
    sequence: Option<String>,
    context: RwLock<Option<String>>,
}

impl TracingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logger owned by a single sequence, so its label is never overwritten
    /// by another one
    pub fn for_sequence(name: impl Into<String>) -> Self {
        Self {
            sequence: Some(name.into()),
            context: RwLock::new(None),
        }
    }

    pub fn sequence(&self) -> Option<&str> {
        self.sequence.as_deref()
    }

    /// Label set by the last `set_context` call
    pub fn context(&self) -> Option<String> {
        self.context.read().clone()
    }
}

impl QueueLogger for TracingLogger {
    fn info(&self, message: &str) {
        let context = self.context.read();
        tracing::info!(
            sequence = self.sequence.as_deref(),
            context = context.as_deref(),
            "{}",
            message
        );
    }

    fn set_context(&self, label: &str) {
        *self.context.write() = Some(label.to_string());
    }

    fn error(&self, error: &anyhow::Error) {
        let context = self.context.read();
        tracing::error!(
            sequence = self.sequence.as_deref(),
            context = context.as_deref(),
            "{:#}",
            error
        );
    }
}

/// Discards everything
pub struct NoopLogger;

impl QueueLogger for NoopLogger {
    fn info(&self, _message: &str) {}

    fn set_context(&self, _label: &str) {}

    fn error(&self, _error: &anyhow::Error) {}
}
