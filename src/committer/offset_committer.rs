use super::acknowledgements::{Acknowledgements, CommitterState};
use super::state::OffsetState;
use crate::broker::Consumer;
use crate::config::types::CommitterConfig;
use crate::model::{Batch, FailureCause, Status};
use crate::pipeline::queue::BoundedQueue;
use crate::stats::{names, Stats};
use crate::worker::Job;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Commits broker offsets strictly in commit-queue order.
///
/// The head batch is committed only once its exact offsets have been
/// acknowledged; the committer never skips past an unacknowledged head. When
/// the head waits longer than the acknowledgement timeout the committer wakes
/// the consumer and stops for good, leaving every uncommitted batch queued.
pub struct OffsetCommitter {
    consumer: Arc<dyn Consumer>,
    commit_queue: Arc<BoundedQueue<Batch>>,
    acknowledgements: Arc<Acknowledgements>,
    state: OffsetState,
    idle_sleep: Duration,
    stats: Arc<dyn Stats>,
}

impl OffsetCommitter {
    pub fn new(
        consumer: Arc<dyn Consumer>,
        commit_queue: Arc<BoundedQueue<Batch>>,
        acknowledgements: Arc<Acknowledgements>,
        ack_timeout: Duration,
        idle_sleep: Duration,
        stats: Arc<dyn Stats>,
    ) -> Self {
        Self {
            consumer,
            commit_queue,
            acknowledgements,
            state: OffsetState::new(ack_timeout),
            idle_sleep,
            stats,
        }
    }

    pub fn from_config(
        consumer: Arc<dyn Consumer>,
        commit_queue: Arc<BoundedQueue<Batch>>,
        acknowledgements: Arc<Acknowledgements>,
        config: &CommitterConfig,
        stats: Arc<dyn Stats>,
    ) -> Self {
        Self::new(
            consumer,
            commit_queue,
            acknowledgements,
            config.ack_timeout,
            config.idle_sleep,
            stats,
        )
    }

    pub fn commit_queue(&self) -> &Arc<BoundedQueue<Batch>> {
        &self.commit_queue
    }

    pub fn acknowledgements(&self) -> &Arc<Acknowledgements> {
        &self.acknowledgements
    }

    pub fn state(&self) -> CommitterState {
        self.acknowledgements.state()
    }

    /// Stop committing and interrupt the consumer. False if already stopped.
    fn halt(&self, reason: &str) -> bool {
        if !self.acknowledgements.mark_stopped() {
            return false;
        }
        self.consumer.wakeup(reason);
        true
    }

    async fn commit_head(&mut self, head: &Batch) -> Status {
        let offsets = head.partition_offsets();

        if let Err(e) = self.consumer.commit_sync(offsets).await {
            self.stats.increment(names::COMMITTER_COMMIT_ERRORS);
            error!(batch_id = %head.id(), offsets = %offsets, error = %e, "Failed to commit offsets");
            self.halt(&format!("commit of {} failed: {}", offsets, e));
            error!(uncommitted = self.commit_queue.len(), "Offset committer stopped after commit failure");
            return Status::failure(FailureCause::Commit(e.to_string()));
        }

        self.acknowledgements.take(offsets);
        match self.commit_queue.pop_front() {
            Some(popped) if popped == *head => {}
            _ => error!(batch_id = %head.id(), "Commit queue head changed while committing"),
        }

        self.stats.time_it(names::COMMITTER_ACK_WAIT, self.state.waiting_since());
        self.stats.increment(names::COMMITTER_COMMITS);
        self.state.acknowledged();
        debug!(batch_id = %head.id(), offsets = %offsets, "Committed offsets");
        Status::Success
    }
}

#[async_trait]
impl Job for OffsetCommitter {
    fn name(&self) -> &str {
        "offset-committer"
    }

    async fn run_once(&mut self) -> Status {
        if !self.acknowledgements.is_running() {
            return Status::Success;
        }

        self.stats
            .gauge(names::COMMITTER_QUEUE_SIZE, self.commit_queue.len() as f64);

        let Some(head) = self.commit_queue.peek() else {
            tokio::time::sleep(self.idle_sleep).await;
            return Status::Success;
        };
        self.state.observe_head(head.id());

        if self.acknowledgements.contains(head.partition_offsets()) {
            return self.commit_head(&head).await;
        }

        if self.state.has_timed_out() {
            self.stats.increment(names::COMMITTER_TIMEOUTS);
            let reason = format!(
                "no acknowledgement for {} within {:?}",
                head.partition_offsets(),
                self.state.ack_timeout()
            );
            self.halt(&reason);
            error!(
                reason = %reason,
                uncommitted = self.commit_queue.len(),
                pending_acks = self.acknowledgements.len(),
                "Offset committer stopped"
            );
            return Status::Success;
        }

        tokio::time::sleep(self.idle_sleep).await;
        Status::Success
    }

    async fn stop(&mut self, reason: &str) {
        if self.halt(reason) {
            info!(
                reason = %reason,
                uncommitted = self.commit_queue.len(),
                "Stopped offset committer"
            );
        }
    }

    fn is_finished(&self) -> bool {
        self.acknowledgements.state() == CommitterState::Stopped
    }
}
