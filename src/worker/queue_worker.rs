use super::{panic_message, Job};
use crate::committer::Acknowledger;
use crate::config::types::QueueConfig;
use crate::model::{Batch, FailureCause, Status};
use crate::pipeline::queue::BoundedQueue;
use crate::sink::Sink;
use crate::stats::{names, Stats};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Pulls batches off the shared work queue and writes them through its own sink.
///
/// Successful writes are acknowledged to the committer. Failed writes go back
/// on the queue for another attempt by any worker.
pub struct SinkWorker {
    name: String,
    sink: Box<dyn Sink>,
    queue: Arc<BoundedQueue<Batch>>,
    acknowledger: Arc<dyn Acknowledger>,
    poll_timeout: Duration,
    offer_timeout: Duration,
    close_timeout: Duration,
    stats: Arc<dyn Stats>,
}

impl SinkWorker {
    pub fn new(
        name: impl Into<String>,
        sink: Box<dyn Sink>,
        queue: Arc<BoundedQueue<Batch>>,
        acknowledger: Arc<dyn Acknowledger>,
        config: &QueueConfig,
        close_timeout: Duration,
        stats: Arc<dyn Stats>,
    ) -> Self {
        Self {
            name: name.into(),
            sink,
            queue,
            acknowledger,
            poll_timeout: config.poll_timeout,
            offer_timeout: config.offer_timeout,
            close_timeout,
            stats,
        }
    }

    async fn push(&self, batch: &Batch) -> Status {
        match AssertUnwindSafe(self.sink.push(batch)).catch_unwind().await {
            Ok(status) => status,
            Err(panic) => {
                self.stats.increment(names::WORKER_ERRORS);
                let message = panic_message(panic.as_ref());
                error!(worker = %self.name, batch_id = %batch.id(), panic = %message, "Sink panicked");
                Status::failure(FailureCause::Fault(message))
            }
        }
    }

    async fn requeue(&self, batch: Batch) {
        let batch_id = batch.id();
        if self.queue.offer(batch, self.offer_timeout).await.is_err() {
            self.stats.increment(names::WORKER_REQUEUE_DROPPED);
            error!(
                worker = %self.name,
                batch_id = %batch_id,
                "Work queue full, batch dropped from retry"
            );
        }
    }
}

#[async_trait]
impl Job for SinkWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_once(&mut self) -> Status {
        let start = Instant::now();

        let Some(batch) = self.queue.poll(self.poll_timeout).await else {
            return Status::Success;
        };
        if batch.is_empty() {
            return Status::Success;
        }

        let status = self.push(&batch).await;

        if !status.is_success() {
            self.stats.increment(names::WORKER_PUSH_FAILURE);
            error!(
                worker = %self.name,
                batch_id = %batch.id(),
                status = %status,
                "Failed to push batch to sink"
            );
            self.requeue(batch).await;
            return status;
        }

        self.stats.increment(names::WORKER_PUSH_SUCCESS);
        let offsets = batch.partition_offsets();

        if !self.acknowledger.acknowledge(offsets) {
            self.stats.increment(names::ACK_FAILURE);
            warn!(
                worker = %self.name,
                batch_id = %batch.id(),
                offsets = %offsets,
                "Batch written but acknowledgement was rejected"
            );
            return Status::failure(FailureCause::Acknowledgement(offsets.to_string()));
        }

        self.stats.increment(names::ACK_SUCCESS);
        self.stats.time_it(names::BATCH_LATENCY, batch.polled_at_instant());
        self.stats.time_it(names::WORKER_PROCESSING_TIME, start);
        debug!(worker = %self.name, batch_id = %batch.id(), records = batch.len(), "Batch written");
        Status::Success
    }

    async fn stop(&mut self, reason: &str) {
        info!(worker = %self.name, reason = %reason, "Stopping sink worker");
        match tokio::time::timeout(self.close_timeout, self.sink.close(reason)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(worker = %self.name, error = %e, "Failed to close sink"),
            Err(_) => warn!(
                worker = %self.name,
                timeout = ?self.close_timeout,
                "Timed out closing sink"
            ),
        }
    }
}
