//! Closure-backed actions

use async_trait::async_trait;

use crate::queue::action::{Action, QueueItem};
use crate::queue::context::QueueContext;

/// Wraps a synchronous closure as an action
pub struct FnAction<F> {
    name: String,
    func: F,
}

impl<F> FnAction<F>
where
    F: Fn(&mut QueueContext) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: Fn(&mut QueueContext) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut QueueContext) -> anyhow::Result<()> {
        (self.func)(ctx)
    }
}

pub fn from_fn<F>(name: impl Into<String>, func: F) -> QueueItem
where
    F: Fn(&mut QueueContext) -> anyhow::Result<()> + Send + Sync + 'static,
{
    QueueItem::ready(FnAction::new(name, func))
}
