//! Conditional actions: they evaluate a predicate against the context and
//! push the chosen items ahead of the rest of the sequence.

use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;

use crate::queue::action::{Action, QueueItem};
use crate::queue::context::QueueContext;

/// Predicate over the sequence context. It may await before deciding.
pub type Predicate =
    Box<dyn for<'a> Fn(&'a QueueContext) -> BoxFuture<'a, bool> + Send + Sync>;

// Pins the closure to the higher-ranked signature `Predicate` expects
fn asynchronous<F>(predicate: F) -> F
where
    F: for<'a> Fn(&'a QueueContext) -> BoxFuture<'a, bool>,
{
    predicate
}

fn sync_predicate<F>(predicate: F) -> Predicate
where
    F: Fn(&QueueContext) -> bool + Send + Sync + 'static,
{
    Box::new(asynchronous(move |ctx| future::ready(predicate(ctx)).boxed()))
}

/// Items for each outcome of a [`Branch`]
pub struct Branches {
    pub then: Vec<QueueItem>,
    pub otherwise: Option<Vec<QueueItem>>,
}

impl Branches {
    pub fn then(items: Vec<QueueItem>) -> Self {
        Self {
            then: items,
            otherwise: None,
        }
    }

    pub fn otherwise(mut self, items: Vec<QueueItem>) -> Self {
        self.otherwise = Some(items);
        self
    }
}

/// Pushes `then` when the condition holds, `otherwise` (if any) when not
pub struct Branch {
    condition: Predicate,
    branches: Mutex<Option<Branches>>,
}

#[async_trait]
impl Action for Branch {
    async fn execute(&self, ctx: &mut QueueContext) -> anyhow::Result<()> {
        let branches = self
            .branches
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("branch already taken"))?;

        if (self.condition)(ctx).await {
            ctx.push(branches.then);
        } else if let Some(otherwise) = branches.otherwise {
            ctx.push(otherwise);
        }
        Ok(())
    }
}

/// Pushes its items only when the validator passes
pub struct Valid {
    validator: Predicate,
    items: Mutex<Option<Vec<QueueItem>>>,
}

#[async_trait]
impl Action for Valid {
    async fn execute(&self, ctx: &mut QueueContext) -> anyhow::Result<()> {
        let items = self
            .items
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("validated items already taken"))?;

        if (self.validator)(ctx).await {
            ctx.push(items);
        }
        Ok(())
    }
}

pub fn branch<F>(condition: F, branches: Branches) -> QueueItem
where
    F: Fn(&QueueContext) -> bool + Send + Sync + 'static,
{
    QueueItem::ready(Branch {
        condition: sync_predicate(condition),
        branches: Mutex::new(Some(branches)),
    })
}

/// Like [`branch`], with a condition that can await before deciding
pub fn branch_async<F>(condition: F, branches: Branches) -> QueueItem
where
    F: for<'a> Fn(&'a QueueContext) -> BoxFuture<'a, bool> + Send + Sync + 'static,
{
    QueueItem::ready(Branch {
        condition: Box::new(condition),
        branches: Mutex::new(Some(branches)),
    })
}

pub fn valid<F>(validator: F, items: Vec<QueueItem>) -> QueueItem
where
    F: Fn(&QueueContext) -> bool + Send + Sync + 'static,
{
    QueueItem::ready(Valid {
        validator: sync_predicate(validator),
        items: Mutex::new(Some(items)),
    })
}

/// Like [`valid`], with a validator that can await
pub fn valid_async<F>(validator: F, items: Vec<QueueItem>) -> QueueItem
where
    F: for<'a> Fn(&'a QueueContext) -> BoxFuture<'a, bool> + Send + Sync + 'static,
{
    QueueItem::ready(Valid {
        validator: Box::new(validator),
        items: Mutex::new(Some(items)),
    })
}
