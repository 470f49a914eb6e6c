use serde::{Deserialize, Serialize};

use crate::core::errors::{QueueError, Result};

/// Longest generated sequence name we accept
const MAX_NAME_LENGTH: usize = 64;

/// Configuration for a [`QueueRunner`](crate::queue::QueueRunner) and the
/// executors it starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Length of the random name given to sequences added without one
    #[serde(default = "default_name_length")]
    pub name_length: usize,
    /// Log a "running action" line before every action
    #[serde(default = "default_true")]
    pub log_actions: bool,
    /// Turn panics inside `execute`/`on_error` into action errors
    #[serde(default = "default_true")]
    pub catch_panics: bool,
}

fn default_name_length() -> usize {
    8
}

fn default_true() -> bool {
    true
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name_length: default_name_length(),
            log_actions: true,
            catch_panics: true,
        }
    }
}

impl QueueConfig {
    /// Validates configuration values
    pub fn validate(&self) -> Result<()> {
        if self.name_length == 0 {
            return Err(QueueError::configuration(
                "name_length must be greater than 0",
            ));
        }
        if self.name_length > MAX_NAME_LENGTH {
            return Err(QueueError::configuration(format!(
                "name_length cannot exceed {}",
                MAX_NAME_LENGTH
            )));
        }
        Ok(())
    }

    pub fn with_name_length(mut self, name_length: usize) -> Self {
        self.name_length = name_length;
        self
    }

    pub fn with_log_actions(mut self, log_actions: bool) -> Self {
        self.log_actions = log_actions;
        self
    }

    pub fn with_catch_panics(mut self, catch_panics: bool) -> Self {
        self.catch_panics = catch_panics;
        self
    }
}
