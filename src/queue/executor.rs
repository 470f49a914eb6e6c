//! QueueExecutor - drains one sequence
//!
//! Pops items one at a time, materializes them, takes the action's scope when
//! it declares one and runs it against the sequence context. `push` and
//! `abort` take effect on the next iteration since the pending list is
//! re-checked every pass.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::core::config::QueueConfig;
use crate::core::errors::{QueueError, Result};
use crate::queue::action::{Action, QueueItem};
use crate::queue::context::QueueContext;
use crate::queue::lock::LockManager;
use crate::queue::logger::{QueueLogger, TracingLogger};

/// Lifecycle of an executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorState {
    /// Not started
    Idle,
    /// Draining the pending list
    Running,
    /// Pending list observed empty, or a fatal error is being handled
    Stopping,
    /// Drained; the end callback has fired
    Ended,
    /// Stopped by a fatal orchestration error
    Failed,
}

impl ExecutorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }
}

type EndCallback = Box<dyn FnOnce(&str) + Send>;

pub struct QueueExecutor {
    context: QueueContext,
    locks: LockManager,
    logger: Arc<dyn QueueLogger>,
    config: QueueConfig,
    state: ExecutorState,
    on_end: Option<EndCallback>,
}

impl QueueExecutor {
    /// Create an executor that logs through `tracing`
    pub fn new(
        name: impl Into<String>,
        items: impl IntoIterator<Item = QueueItem>,
        locks: LockManager,
    ) -> Self {
        let name = name.into();
        let logger = Arc::new(TracingLogger::for_sequence(name.clone()));
        Self::with_logger(name, items, locks, logger)
    }

    pub fn with_logger(
        name: impl Into<String>,
        items: impl IntoIterator<Item = QueueItem>,
        locks: LockManager,
        logger: Arc<dyn QueueLogger>,
    ) -> Self {
        Self {
            context: QueueContext::new(name, items, logger.clone()),
            locks,
            logger,
            config: QueueConfig::default(),
            state: ExecutorState::Idle,
            on_end: None,
        }
    }

    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Merge initial fields into the context before the first action runs
    pub fn with_fields(mut self, fields: Value) -> Result<Self> {
        self.context.extend(fields)?;
        Ok(self)
    }

    /// Callback fired exactly once, when the sequence drains
    pub fn on_end<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&str) + Send + 'static,
    {
        self.on_end = Some(Box::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        self.context.name()
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn context(&self) -> &QueueContext {
        &self.context
    }

    /// Run the sequence to completion and return its terminal state.
    ///
    /// Action failures are contained by the action's `on_error`. Only
    /// orchestration errors end the run as [`ExecutorState::Failed`], and they
    /// are logged rather than returned.
    #[instrument(skip_all, fields(sequence = %self.context.name()))]
    pub async fn run(&mut self) -> ExecutorState {
        if self.state != ExecutorState::Idle {
            debug!(state = ?self.state, "executor already started");
            return self.state;
        }
        self.state = ExecutorState::Running;

        match self.drain().await {
            Ok(()) => {
                self.state = ExecutorState::Stopping;
                self.logger
                    .info(&format!("Queue({}): stopped", self.context.name()));
                self.state = ExecutorState::Ended;
                if let Some(on_end) = self.on_end.take() {
                    on_end(self.context.name());
                }
            }
            Err(err) => {
                self.state = ExecutorState::Stopping;
                self.context.abort();
                debug!(category = err.category(), "sequence failed");
                self.logger
                    .info(&format!("Queue({}) failed", self.context.name()));
                self.logger.error(&anyhow::Error::new(err));
                self.state = ExecutorState::Failed;
            }
        }

        self.state
    }

    async fn drain(&mut self) -> Result<()> {
        while let Some(item) = self.context.next_item() {
            let action = materialize(item, self.config.catch_panics)
                .map_err(QueueError::materialization)?;

            self.logger.set_context(action.name());
            if self.config.log_actions {
                self.logger
                    .info(&format!("Queue({}): running action", self.context.name()));
            }

            match action.scope().cloned() {
                Some(scope) => {
                    if self.locks.is_locked(&scope) {
                        self.logger.info(&format!(
                            "Queue({}): waiting for scope to unlock",
                            self.context.name()
                        ));
                    }
                    let step =
                        run_step(action.as_ref(), &mut self.context, self.config.catch_panics);
                    self.locks.run_with_lock(&scope, step).await?;
                }
                None => {
                    run_step(action.as_ref(), &mut self.context, self.config.catch_panics).await?;
                }
            }
        }
        Ok(())
    }
}

/// Execute one action: `execute`, then its delay on success or its
/// `on_error` on failure. Errs only when `on_error` itself fails.
async fn run_step(action: &dyn Action, ctx: &mut QueueContext, catch_panics: bool) -> Result<()> {
    match contain(action.execute(ctx), catch_panics).await {
        Ok(()) => {
            let delay = action.delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(())
        }
        Err(error) => contain(action.on_error(error, ctx), catch_panics)
            .await
            .map_err(|source| QueueError::handler(action.name(), source)),
    }
}

/// Build the action behind `item`; a panicking factory becomes an error
fn materialize(item: QueueItem, catch_panics: bool) -> anyhow::Result<Box<dyn Action>> {
    if !catch_panics {
        return item.materialize();
    }
    match std::panic::catch_unwind(AssertUnwindSafe(|| item.materialize())) {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!(
            "action factory panicked: {}",
            panic_message(&*payload)
        )),
    }
}

async fn contain<F>(fut: F, catch_panics: bool) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    if !catch_panics {
        return fut.await;
    }
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!("action panicked: {}", panic_message(&*payload))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
