//! Scoped locking shared by every sequence of a runner
//!
//! One slot per scope name. Waiters park on a oneshot channel in the order
//! they registered. An `unlock` hands the scope to exactly one acquirer; plain
//! `wait` observers queued ahead of that acquirer resolve with it, since none
//! of them takes the scope.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use crate::core::errors::{QueueError, Result};
use crate::queue::action::{Action, Locked};

/// Name of a mutual-exclusion domain. Never empty or blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Scope(Arc<str>);

impl Scope {
    pub fn new(scope: impl Into<String>) -> Result<Self> {
        let scope = scope.into();
        if scope.trim().is_empty() {
            return Err(QueueError::validation_field(
                "Lock scope must be a non-empty string",
                "scope",
            ));
        }
        Ok(Self(scope.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Make `action` a locking action on this scope
    pub fn wrap<A: Action>(&self, action: A) -> Locked<A> {
        Locked::new(self.clone(), action)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Scope {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Scope {
    type Error = QueueError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Scope {
    type Error = QueueError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.0.to_string()
    }
}

/// A parked caller. Observers only want to know the scope is free;
/// acquirers will try to take it once woken.
enum Waiter {
    Observe(oneshot::Sender<()>),
    Acquire(oneshot::Sender<()>),
}

#[derive(Default)]
struct ScopeSlot {
    held: bool,
    waiters: VecDeque<Waiter>,
}

impl ScopeSlot {
    /// Wake leading observers and the first live acquirer behind them
    fn wake_next(&mut self) {
        // Failed sends belong to waiters that went away
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter {
                Waiter::Observe(tx) => {
                    let _ = tx.send(());
                }
                Waiter::Acquire(tx) => {
                    if tx.send(()).is_ok() {
                        break;
                    }
                }
            }
        }
    }
}

/// Lock table handle. Clones share the same table.
#[derive(Clone, Default)]
pub struct LockManager {
    scopes: Arc<Mutex<HashMap<String, ScopeSlot>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, scope: &Scope) -> bool {
        self.scopes
            .lock()
            .get(scope.as_str())
            .map_or(false, |slot| slot.held)
    }

    /// Take the scope. Fails if it already has a holder; never queues.
    pub fn lock(&self, scope: &Scope) -> Result<()> {
        let mut scopes = self.scopes.lock();
        let slot = scopes.entry(scope.as_str().to_string()).or_default();
        if slot.held {
            return Err(QueueError::AlreadyLocked(scope.to_string()));
        }
        slot.held = true;
        Ok(())
    }

    /// Release the scope and wake the next acquirer in line, along with any
    /// observers ahead of it. No-op when free.
    pub fn unlock(&self, scope: &Scope) {
        let mut scopes = self.scopes.lock();
        let Some(slot) = scopes.get_mut(scope.as_str()) else {
            return;
        };
        if !slot.held {
            return;
        }
        slot.held = false;
        slot.wake_next();

        if slot.waiters.is_empty() {
            scopes.remove(scope.as_str());
        }
    }

    /// Hand a wake-up that was delivered to an abandoned acquirer to the next
    /// waiter, unless someone took the scope in the meantime
    fn pass_on(&self, scope: &Scope) {
        let mut scopes = self.scopes.lock();
        let Some(slot) = scopes.get_mut(scope.as_str()) else {
            return;
        };
        if slot.held {
            return;
        }
        slot.wake_next();

        if slot.waiters.is_empty() {
            scopes.remove(scope.as_str());
        }
    }

    /// Resolves once the scope is free. Does not take the scope.
    ///
    /// The waiter is registered when this is called, not when the future is
    /// first polled, so waiters resolve in call order. Resolving does not
    /// take the scope and does not hold back acquirers queued behind.
    pub fn wait(&self, scope: &Scope) -> impl Future<Output = ()> + Send + 'static {
        let receiver = {
            let mut scopes = self.scopes.lock();
            match scopes.get_mut(scope.as_str()) {
                Some(slot) if slot.held => {
                    let (tx, rx) = oneshot::channel();
                    slot.waiters.push_back(Waiter::Observe(tx));
                    Some(rx)
                }
                _ => None,
            }
        };

        async move {
            if let Some(rx) = receiver {
                // A closed channel means the table entry was dropped; the
                // scope is free either way
                let _ = rx.await;
            }
        }
    }

    /// Acquire `scope`, drive `fut` to completion, release.
    ///
    /// The release runs from a drop guard, so it also happens when `fut`
    /// panics or the returned future is dropped mid-flight.
    pub async fn run_with_lock<F>(&self, scope: &Scope, fut: F) -> F::Output
    where
        F: Future,
    {
        self.acquire(scope).await;
        let _guard = ScopeGuard {
            locks: self,
            scope,
        };
        fut.await
    }

    async fn acquire(&self, scope: &Scope) {
        let mut woken = false;
        loop {
            let receiver = {
                let mut scopes = self.scopes.lock();
                let slot = scopes.entry(scope.as_str().to_string()).or_default();
                if !slot.held {
                    slot.held = true;
                    return;
                }
                let (tx, rx) = oneshot::channel();
                // A woken waiter that lost the race keeps its place in line
                if woken {
                    slot.waiters.push_front(Waiter::Acquire(tx));
                } else {
                    slot.waiters.push_back(Waiter::Acquire(tx));
                }
                rx
            };

            debug!(scope = %scope, "waiting for scope");
            let mut parked = Parked {
                locks: self,
                scope,
                receiver,
                done: false,
            };
            let _ = (&mut parked.receiver).await;
            parked.done = true;
            woken = true;
        }
    }

    pub fn waiter_count(&self, scope: &Scope) -> usize {
        self.scopes
            .lock()
            .get(scope.as_str())
            .map_or(0, |slot| slot.waiters.len())
    }

    /// Names of all scopes that currently have a holder
    pub fn locked_scopes(&self) -> Vec<String> {
        let mut held: Vec<String> = self
            .scopes
            .lock()
            .iter()
            .filter(|(_, slot)| slot.held)
            .map(|(name, _)| name.clone())
            .collect();
        held.sort();
        held
    }
}

/// An acquirer parked in the waiter queue. If it is dropped after being
/// woken but before retrying, the wake-up moves on to the next waiter.
struct Parked<'a> {
    locks: &'a LockManager,
    scope: &'a Scope,
    receiver: oneshot::Receiver<()>,
    done: bool,
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        if !self.done && self.receiver.try_recv().is_ok() {
            self.locks.pass_on(self.scope);
        }
    }
}

struct ScopeGuard<'a> {
    locks: &'a LockManager,
    scope: &'a Scope,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.locks.unlock(self.scope);
    }
}
