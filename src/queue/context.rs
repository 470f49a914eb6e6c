//! Per-sequence context handed to every action

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::core::errors::{QueueError, Result};
use crate::queue::action::QueueItem;
use crate::queue::logger::QueueLogger;

/// Mutable state of one sequence: its pending items, name and fields.
///
/// Application fields are a flat JSON object. Every action of the sequence
/// reads and writes the same keys, so names must be agreed on by the caller.
pub struct QueueContext {
    name: String,
    pending: VecDeque<QueueItem>,
    fields: Map<String, Value>,
    logger: Arc<dyn QueueLogger>,
}

impl QueueContext {
    pub fn new(
        name: impl Into<String>,
        items: impl IntoIterator<Item = QueueItem>,
        logger: Arc<dyn QueueLogger>,
    ) -> Self {
        Self {
            name: name.into(),
            pending: items.into_iter().collect(),
            fields: Map::new(),
            logger,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert `items` ahead of everything still pending, keeping their order
    pub fn push(&mut self, items: impl IntoIterator<Item = QueueItem>) {
        let items: Vec<QueueItem> = items.into_iter().collect();
        for item in items.into_iter().rev() {
            self.pending.push_front(item);
        }
    }

    /// Shallow-merge a JSON object into the fields
    pub fn extend(&mut self, fields: Value) -> Result<()> {
        match fields {
            Value::Object(map) => {
                self.fields.extend(map);
                Ok(())
            }
            other => Err(QueueError::validation(format!(
                "context fields must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Drop every pending item. The running action is not interrupted.
    pub fn abort(&mut self) {
        self.pending.clear();
    }

    /// Number of items still queued
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a field deserialized into `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<T> {
        let value = self
            .fields
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("Field '{}' not found", key))?;
        serde_json::from_value(value.clone())
            .map_err(|e| anyhow::anyhow!("Failed to deserialize field '{}': {}", key, e))
    }

    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<()> {
        self.fields.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn logger(&self) -> &dyn QueueLogger {
        self.logger.as_ref()
    }

    pub(crate) fn next_item(&mut self) -> Option<QueueItem> {
        self.pending.pop_front()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::logger::NoopLogger;
    use crate::util::delay;
    use serde_json::json;

    fn context(items: Vec<QueueItem>) -> QueueContext {
        QueueContext::new("ctx-test", items, Arc::new(NoopLogger))
    }

    #[test]
    fn test_push_prepends_in_order() {
        let mut ctx = context(vec![delay(3)]);
        ctx.push(vec![delay(1), delay(2)]);
        assert_eq!(ctx.remaining(), 3);

        let delays: Vec<u128> = std::iter::from_fn(|| ctx.next_item())
            .map(|item| item.materialize().unwrap().delay().as_millis())
            .collect();
        assert_eq!(delays, vec![1, 2, 3]);
    }

    #[test]
    fn test_extend_merges_shallow() {
        let mut ctx = context(vec![]);
        ctx.extend(json!({"user": {"id": 1}, "flag": true})).unwrap();
        ctx.extend(json!({"user": {"name": "x"}})).unwrap();

        assert_eq!(ctx.get("user"), Some(&json!({"name": "x"})));
        assert_eq!(ctx.get_as::<bool>("flag").unwrap(), true);
        assert!(ctx.get_as::<bool>("missing").is_err());
    }

    #[test]
    fn test_extend_rejects_non_objects() {
        let mut ctx = context(vec![]);
        for bad in [json!(null), json!(1), json!("x"), json!([1, 2])] {
            assert!(matches!(ctx.extend(bad), Err(QueueError::Validation { .. })));
        }
        assert!(ctx.fields().is_empty());
    }

    #[test]
    fn test_abort_clears_pending() {
        let mut ctx = context(vec![delay(1), delay(2)]);
        ctx.abort();
        assert_eq!(ctx.remaining(), 0);
        assert!(ctx.next_item().is_none());
        assert_eq!(ctx.name(), "ctx-test");
    }

    #[test]
    fn test_set_and_get_typed() {
        let mut ctx = context(vec![]);
        ctx.set("count", 3u32).unwrap();
        assert_eq!(ctx.get_as::<u32>("count").unwrap(), 3);
    }
}
