use async_trait::async_trait;
use std::time::Duration;

use crate::queue::action::{Action, QueueItem};
use crate::queue::context::QueueContext;

/// Does nothing, then holds the sequence for `duration`
#[derive(Debug, Clone, Default)]
pub struct Delay {
    duration: Duration,
}

impl Delay {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl Action for Delay {
    fn delay(&self) -> Duration {
        self.duration
    }

    async fn execute(&self, _ctx: &mut QueueContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Queue item pausing the sequence for `millis` milliseconds
pub fn delay(millis: u64) -> QueueItem {
    QueueItem::ready(Delay::new(Duration::from_millis(millis)))
}
