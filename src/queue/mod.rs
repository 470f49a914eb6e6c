//! Sequential action queues with scoped locking
//!
//! A [`QueueRunner`] starts sequences; each one is drained by a
//! [`QueueExecutor`] that hands a [`QueueContext`] to every [`Action`].
//! Actions declaring a [`Scope`] are serialized through the runner's shared
//! [`LockManager`].

pub mod action;
pub mod context;
pub mod executor;
pub mod lock;
pub mod logger;
pub mod runner;

pub use action::*;
pub use context::*;
pub use executor::*;
pub use lock::*;
pub use logger::*;
pub use runner::*;
