// Core infrastructure shared by the queue engine and the util actions

pub mod config;
pub mod errors;

// Re-export commonly used types
pub use config::QueueConfig;
pub use errors::{QueueError, Result};
