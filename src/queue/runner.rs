//! QueueRunner - starts sequences and tracks the ones still running
//!
//! Every sequence added to a runner shares the runner's [`LockManager`], so
//! scoped actions are serialized across all of them.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::core::config::QueueConfig;
use crate::core::errors::{QueueError, Result};
use crate::queue::action::QueueItem;
use crate::queue::executor::{panic_message, ExecutorState, QueueExecutor};
use crate::queue::lock::LockManager;
use crate::queue::logger::{QueueLogger, TracingLogger};

/// Called with the finished sequence's name and the number still active
pub type EndListener = Arc<dyn Fn(&str, usize) + Send + Sync>;

/// Builds the logger handed to a new sequence, given its name
pub type LoggerFactory = Arc<dyn Fn(&str) -> Arc<dyn QueueLogger> + Send + Sync>;

/// A sequence to add to a runner
pub struct SequenceSpec {
    pub items: Vec<QueueItem>,
    /// Merged into the context before the first action runs
    pub fields: Option<Value>,
    /// Generated when `None`
    pub name: Option<String>,
}

impl SequenceSpec {
    pub fn new(items: Vec<QueueItem>) -> Self {
        Self {
            items,
            fields: None,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_fields(mut self, fields: Value) -> Self {
        self.fields = Some(fields);
        self
    }
}

/// Registry entry for a running sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceInfo {
    pub name: String,
    pub started_at: DateTime<Utc>,
}

struct RunnerInner {
    config: QueueConfig,
    locks: LockManager,
    loggers: LoggerFactory,
    sequences: DashMap<String, SequenceInfo>,
    listeners: RwLock<Vec<EndListener>>,
    idle: Notify,
}

impl RunnerInner {
    fn complete(&self, name: &str, state: ExecutorState) {
        let finished = self.sequences.remove(name);
        let remaining = self.sequences.len();

        match (&finished, state) {
            (Some((_, seq)), ExecutorState::Ended) => {
                let elapsed = Utc::now() - seq.started_at;
                info!(
                    sequence = %name,
                    remaining,
                    elapsed_ms = elapsed.num_milliseconds(),
                    "sequence ended"
                );
            }
            (Some(_), _) => warn!(sequence = %name, remaining, ?state, "sequence failed"),
            (None, _) => warn!(sequence = %name, "completed sequence was not registered"),
        }

        // Clone so listeners may register further listeners
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener(name, remaining);
        }

        if remaining == 0 {
            self.idle.notify_waiters();
        }
    }
}

/// Runs any number of sequences concurrently on the current tokio runtime
#[derive(Clone)]
pub struct QueueRunner {
    inner: Arc<RunnerInner>,
}

impl Default for QueueRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueRunner {
    /// Runner whose sequences each log through their own [`TracingLogger`]
    pub fn new() -> Self {
        Self::build(QueueConfig::default(), tracing_loggers())
    }

    pub fn with_config(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, tracing_loggers()))
    }

    /// Every sequence logs through `logger`.
    ///
    /// Labels set by concurrent sequences interleave on a shared logger; use
    /// [`with_logger_factory`](Self::with_logger_factory) to keep them apart.
    pub fn with_logger(config: QueueConfig, logger: Arc<dyn QueueLogger>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, Arc::new(move |_: &str| logger.clone())))
    }

    /// Each sequence logs through the logger `factory` builds for its name
    pub fn with_logger_factory<F>(config: QueueConfig, factory: F) -> Result<Self>
    where
        F: Fn(&str) -> Arc<dyn QueueLogger> + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(Self::build(config, Arc::new(factory)))
    }

    fn build(config: QueueConfig, loggers: LoggerFactory) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                config,
                locks: LockManager::new(),
                loggers,
                sequences: DashMap::new(),
                listeners: RwLock::new(Vec::new()),
                idle: Notify::new(),
            }),
        }
    }

    /// The lock table shared by every sequence of this runner
    pub fn lock_manager(&self) -> &LockManager {
        &self.inner.locks
    }

    /// Start a sequence with a generated name. Returns the name.
    pub fn add(&self, items: Vec<QueueItem>) -> Result<String> {
        self.add_sequence(SequenceSpec::new(items))
    }

    /// Start a sequence without waiting for it. Returns its name.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_sequence(&self, spec: SequenceSpec) -> Result<String> {
        let name = match spec.name {
            Some(name) => name,
            None => self.generate_name(),
        };

        let mut executor = QueueExecutor::with_logger(
            name.clone(),
            spec.items,
            self.inner.locks.clone(),
            (self.inner.loggers)(&name),
        )
        .with_config(self.inner.config.clone());
        if let Some(fields) = spec.fields {
            executor = executor.with_fields(fields)?;
        }

        match self.inner.sequences.entry(name.clone()) {
            Entry::Occupied(_) => return Err(QueueError::DuplicateSequence(name)),
            Entry::Vacant(slot) => {
                slot.insert(SequenceInfo {
                    name: name.clone(),
                    started_at: Utc::now(),
                });
            }
        }

        info!(sequence = %name, "sequence added");

        let inner = self.inner.clone();
        let task_name = name.clone();
        tokio::spawn(async move {
            // A panic escaping the executor still has to deregister the sequence
            let state = match AssertUnwindSafe(executor.run()).catch_unwind().await {
                Ok(state) => state,
                Err(payload) => {
                    error!(
                        sequence = %task_name,
                        panic = panic_message(&*payload),
                        "sequence panicked"
                    );
                    ExecutorState::Failed
                }
            };
            inner.complete(&task_name, state);
        });

        Ok(name)
    }

    /// Register a completion observer, called for every sequence in
    /// registration order
    pub fn add_end_listener<F>(&self, listener: F)
    where
        F: Fn(&str, usize) + Send + Sync + 'static,
    {
        self.inner.listeners.write().push(Arc::new(listener));
    }

    pub fn active_count(&self) -> usize {
        self.inner.sequences.len()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.inner.sequences.contains_key(name)
    }

    /// Snapshot of running sequences, oldest first
    pub fn sequences(&self) -> Vec<SequenceInfo> {
        let mut running: Vec<SequenceInfo> = self
            .inner
            .sequences
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        running.sort_by_key(|seq| seq.started_at);
        running
    }

    /// Resolves once no sequence is running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.sequences.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn generate_name(&self) -> String {
        loop {
            let name: String = std::iter::repeat_with(|| {
                let c = fastrand::alphanumeric();
                c.to_ascii_lowercase()
            })
            .take(self.inner.config.name_length)
            .collect();

            if !self.inner.sequences.contains_key(&name) {
                return name;
            }
        }
    }
}

fn tracing_loggers() -> LoggerFactory {
    Arc::new(|name: &str| Arc::new(TracingLogger::for_sequence(name)) as Arc<dyn QueueLogger>)
}
