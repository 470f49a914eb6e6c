//! Action - the unit of work a sequence runs
//!
//! Actions receive the sequence's [`QueueContext`] and may mutate it: push
//! follow-up items, merge fields, or abort the rest of the run.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::queue::context::QueueContext;
use crate::queue::lock::Scope;

/// A unit of work executed by a sequence
#[async_trait]
pub trait Action: Send + Sync {
    /// Label used as the logger context while the action runs
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Pause applied after a successful `execute`, before the next item
    fn delay(&self) -> Duration {
        Duration::ZERO
    }

    /// Scope this action must hold while it runs, if any
    fn scope(&self) -> Option<&Scope> {
        None
    }

    async fn execute(&self, ctx: &mut QueueContext) -> anyhow::Result<()>;

    /// Called when `execute` fails.
    ///
    /// The default logs the error and aborts the sequence. Returning an error
    /// from here is fatal to the sequence.
    async fn on_error(&self, error: anyhow::Error, ctx: &mut QueueContext) -> anyhow::Result<()> {
        ctx.logger().error(&error);
        ctx.abort();
        Ok(())
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

pub type ActionFactory = Arc<dyn Fn() -> anyhow::Result<Box<dyn Action>> + Send + Sync>;

/// An entry of a sequence's pending list
pub enum QueueItem {
    /// A constructed action
    Ready(Box<dyn Action>),
    /// Built by the executor right before it runs
    Deferred(ActionFactory),
}

impl QueueItem {
    pub fn ready<A: Action + 'static>(action: A) -> Self {
        Self::Ready(Box::new(action))
    }

    /// Queue an action type; a fresh `A::default()` is built when dequeued
    pub fn deferred<A: Action + Default + 'static>() -> Self {
        Self::Deferred(Arc::new(|| Ok(Box::new(A::default()) as Box<dyn Action>)))
    }

    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Action>> + Send + Sync + 'static,
    {
        Self::Deferred(Arc::new(factory))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    pub(crate) fn materialize(self) -> anyhow::Result<Box<dyn Action>> {
        match self {
            Self::Ready(action) => Ok(action),
            Self::Deferred(factory) => factory(),
        }
    }
}

impl From<Box<dyn Action>> for QueueItem {
    fn from(action: Box<dyn Action>) -> Self {
        Self::Ready(action)
    }
}

impl fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(action) => f.debug_tuple("Ready").field(&action.name()).finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// An action that holds `scope` for the whole of its execution
pub struct Locked<A> {
    scope: Scope,
    inner: A,
}

impl<A: Action> Locked<A> {
    pub fn new(scope: Scope, inner: A) -> Self {
        Self { scope, inner }
    }

    pub fn into_inner(self) -> A {
        self.inner
    }
}

#[async_trait]
impl<A: Action> Action for Locked<A> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn delay(&self) -> Duration {
        self.inner.delay()
    }

    fn scope(&self) -> Option<&Scope> {
        Some(&self.scope)
    }

    async fn execute(&self, ctx: &mut QueueContext) -> anyhow::Result<()> {
        self.inner.execute(ctx).await
    }

    async fn on_error(&self, error: anyhow::Error, ctx: &mut QueueContext) -> anyhow::Result<()> {
        self.inner.on_error(error, ctx).await
    }
}

/// An action with its post-success delay replaced
pub struct Paced<A> {
    delay: Duration,
    inner: A,
}

#[async_trait]
impl<A: Action> Action for Paced<A> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn delay(&self) -> Duration {
        self.delay
    }

    fn scope(&self) -> Option<&Scope> {
        self.inner.scope()
    }

    async fn execute(&self, ctx: &mut QueueContext) -> anyhow::Result<()> {
        self.inner.execute(ctx).await
    }

    async fn on_error(&self, error: anyhow::Error, ctx: &mut QueueContext) -> anyhow::Result<()> {
        self.inner.on_error(error, ctx).await
    }
}

/// Combinators available on every action
pub trait ActionExt: Action + Sized + 'static {
    fn locked(self, scope: &Scope) -> Locked<Self> {
        Locked::new(scope.clone(), self)
    }

    fn paced(self, delay: Duration) -> Paced<Self> {
        Paced { delay, inner: self }
    }

    fn into_item(self) -> QueueItem {
        QueueItem::ready(self)
    }
}

impl<A: Action + Sized + 'static> ActionExt for A {}
