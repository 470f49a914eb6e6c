// Core infrastructure modules
pub mod core;

pub mod queue; // Sequence execution engine
pub mod util; // Leaf actions: delay, branch, valid, closures

// Re-exports for convenience
pub use crate::core::config::QueueConfig;
pub use crate::core::errors::{QueueError, Result};
pub use crate::queue::*;
