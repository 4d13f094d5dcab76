use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Tracks how long the committer has been waiting on the current head batch.
///
/// The clock restarts when a different batch reaches the head of the commit
/// queue and whenever an acknowledgement is consumed.
#[derive(Debug)]
pub struct OffsetState {
    ack_timeout: Duration,
    last_acknowledged_at: Instant,
    head: Option<Uuid>,
}

impl OffsetState {
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            ack_timeout,
            last_acknowledged_at: Instant::now(),
            head: None,
        }
    }

    /// Note the batch currently at the head of the queue.
    pub fn observe_head(&mut self, batch_id: Uuid) {
        if self.head != Some(batch_id) {
            self.head = Some(batch_id);
            self.last_acknowledged_at = Instant::now();
        }
    }

    /// Reset after the head batch was acknowledged and committed.
    pub fn acknowledged(&mut self) {
        self.head = None;
        self.last_acknowledged_at = Instant::now();
    }

    pub fn has_timed_out(&self) -> bool {
        self.last_acknowledged_at.elapsed() > self.ack_timeout
    }

    pub fn waiting_since(&self) -> Instant {
        self.last_acknowledged_at
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }
}
