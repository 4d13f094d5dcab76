use super::{Sink, SinkError};
use crate::model::{Batch, Status};
use async_trait::async_trait;
use tracing::{error, info};

/// Pushes every batch to all children and aggregates their statuses.
///
/// A failing child never prevents the remaining children from seeing the
/// batch, and `close` always reaches every child.
pub struct FanOutSink {
    sinks: Vec<Box<dyn Sink>>,
}

impl FanOutSink {
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl Sink for FanOutSink {
    fn name(&self) -> &str {
        "fan-out"
    }

    async fn push(&self, batch: &Batch) -> Status {
        let mut statuses = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            statuses.push(sink.push(batch).await);
        }
        Status::aggregate(statuses)
    }

    async fn close(&self, reason: &str) -> Result<(), SinkError> {
        for sink in &self.sinks {
            if let Err(e) = sink.close(reason).await {
                error!(sink = sink.name(), error = %e, "Failed to close sink");
            }
        }
        info!(reason = %reason, "Closed fan-out sink");
        Ok(())
    }
}
