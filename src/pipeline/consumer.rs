use super::queue::BoundedQueue;
use crate::broker::Consumer;
use crate::config::types::{BrokerConfig, QueueConfig};
use crate::model::{Batch, FailureCause, Status};
use crate::stats::{names, Stats};
use crate::worker::Job;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Polls the broker and hands every batch to both queues.
///
/// A batch goes into the commit queue before the work queue so the committer
/// always knows about a batch before any worker can acknowledge it. Full
/// queues block polling, which is how backpressure reaches the broker.
pub struct ConsumerWorker {
    consumer: Arc<dyn Consumer>,
    commit_queue: Arc<BoundedQueue<Batch>>,
    work_queue: Arc<BoundedQueue<Batch>>,
    poll_timeout: Duration,
    offer_timeout: Duration,
    cancel: CancellationToken,
    woken: bool,
    stats: Arc<dyn Stats>,
}

impl ConsumerWorker {
    pub fn new(
        consumer: Arc<dyn Consumer>,
        commit_queue: Arc<BoundedQueue<Batch>>,
        work_queue: Arc<BoundedQueue<Batch>>,
        broker: &BrokerConfig,
        queue: &QueueConfig,
        cancel: CancellationToken,
        stats: Arc<dyn Stats>,
    ) -> Self {
        Self {
            consumer,
            commit_queue,
            work_queue,
            poll_timeout: broker.poll_timeout,
            offer_timeout: queue.offer_timeout,
            cancel,
            woken: false,
            stats,
        }
    }

    /// Offer until accepted. False if cancelled first.
    async fn enqueue(&self, queue: &BoundedQueue<Batch>, mut batch: Batch, which: &str) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            match queue.offer(batch, self.offer_timeout).await {
                Ok(()) => return true,
                Err(back) => {
                    warn!(queue = which, batch_id = %back.id(), "Queue full, waiting");
                    batch = back;
                }
            }
        }
    }
}

#[async_trait]
impl Job for ConsumerWorker {
    fn name(&self) -> &str {
        "consumer"
    }

    async fn run_once(&mut self) -> Status {
        if self.cancel.is_cancelled() {
            return Status::Success;
        }

        let batch = match self.consumer.poll(self.poll_timeout).await {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                self.stats.increment(names::CONSUMER_POLL_TIMEOUT);
                return Status::Success;
            }
            Err(e) if e.is_wakeup() => {
                info!(reason = %e, "Consumer woken up, no longer polling");
                self.woken = true;
                return Status::Success;
            }
            Err(e) => {
                self.stats.increment(names::CONSUMER_POLL_ERRORS);
                error!(error = %e, "Failed to poll broker");
                return Status::failure(FailureCause::Fault(e.to_string()));
            }
        };

        if batch.is_empty() {
            return Status::Success;
        }
        self.stats
            .count(names::CONSUMER_BATCH_RECORDS, batch.len() as u64);
        debug!(
            batch_id = %batch.id(),
            records = batch.len(),
            offsets = %batch.partition_offsets(),
            "Enqueueing batch"
        );

        if !self.enqueue(&self.commit_queue, batch.clone(), "commit").await
            || !self.enqueue(&self.work_queue, batch, "work").await
        {
            info!("Consumer cancelled while enqueueing");
        }
        Status::Success
    }

    async fn stop(&mut self, reason: &str) {
        self.cancel.cancel();
        info!(reason = %reason, "Stopped consumer");
    }

    fn is_finished(&self) -> bool {
        self.woken || self.cancel.is_cancelled()
    }
}
