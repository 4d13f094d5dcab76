use super::{Sink, SinkError};
use crate::model::{Batch, Status};
use async_trait::async_trait;
use tracing::info;

/// Logs a one-line summary of every batch. Always succeeds.
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn push(&self, batch: &Batch) -> Status {
        info!(
            batch_id = %batch.id(),
            records = batch.len(),
            offsets = %batch.partition_offsets(),
            "Received batch"
        );
        Status::Success
    }

    async fn close(&self, reason: &str) -> Result<(), SinkError> {
        info!(reason = %reason, "Closed log sink");
        Ok(())
    }
}
