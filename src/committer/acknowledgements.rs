use crate::model::PartitionOffsets;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Lifecycle of the offset committer. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitterState {
    Running,
    Stopped,
}

/// Receives notice that a batch's offsets were durably written.
pub trait Acknowledger: Send + Sync {
    /// Returns false when the offsets can no longer be committed.
    fn acknowledge(&self, offsets: &PartitionOffsets) -> bool;
}

/// Offsets reported as written but not yet committed.
///
/// Workers insert, the committer finds and removes by exact match. Insertion
/// and the transition to `Stopped` happen under the same lock, so no
/// acknowledgement is accepted after the committer stops.
#[derive(Debug)]
pub struct Acknowledgements {
    pending: Mutex<HashSet<PartitionOffsets>>,
    state: watch::Sender<CommitterState>,
}

impl Default for Acknowledgements {
    fn default() -> Self {
        Self::new()
    }
}

impl Acknowledgements {
    pub fn new() -> Self {
        let (state, _) = watch::channel(CommitterState::Running);
        Self {
            pending: Mutex::new(HashSet::new()),
            state,
        }
    }

    /// Record an acknowledgement. False if the committer has stopped.
    pub fn insert(&self, offsets: PartitionOffsets) -> bool {
        let mut pending = self.lock();
        if *self.state.borrow() == CommitterState::Stopped {
            return false;
        }
        pending.insert(offsets);
        true
    }

    pub fn contains(&self, offsets: &PartitionOffsets) -> bool {
        self.lock().contains(offsets)
    }

    /// Remove an exactly matching entry. False if none was present.
    pub fn take(&self, offsets: &PartitionOffsets) -> bool {
        self.lock().remove(offsets)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn state(&self) -> CommitterState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == CommitterState::Running
    }

    /// Move to `Stopped`. Returns false if already stopped.
    pub(crate) fn mark_stopped(&self) -> bool {
        let _pending = self.lock();
        let previous = self.state.send_replace(CommitterState::Stopped);
        previous == CommitterState::Running
    }

    /// Resolves once the committer has stopped.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|state| *state == CommitterState::Stopped).await;
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PartitionOffsets>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Acknowledger for Acknowledgements {
    fn acknowledge(&self, offsets: &PartitionOffsets) -> bool {
        self.insert(offsets.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TopicPartition;
    use std::sync::Arc;
    use std::time::Duration;

    fn offsets(offset: i64) -> PartitionOffsets {
        PartitionOffsets::new().with(TopicPartition::new("events", 0), offset)
    }

    #[test]
    fn test_take_removes_exact_match_only() {
        let acks = Acknowledgements::new();
        assert!(acks.acknowledge(&offsets(10)));
        assert!(!acks.take(&offsets(11)));
        assert!(acks.take(&offsets(10)));
        assert!(!acks.take(&offsets(10)));
        assert!(acks.is_empty());
    }

    #[test]
    fn test_acknowledge_after_stop_is_rejected() {
        let acks = Acknowledgements::new();
        assert!(acks.mark_stopped());
        assert!(!acks.mark_stopped());
        assert!(!acks.acknowledge(&offsets(1)));
        assert_eq!(acks.len(), 0);
        assert_eq!(acks.state(), CommitterState::Stopped);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_are_not_lost() {
        let acks = Arc::new(Acknowledgements::new());
        let mut handles = Vec::new();
        for worker in 0..8 {
            let acks = acks.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..100 {
                    acks.acknowledge(&offsets(worker * 1000 + i));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(acks.len(), 800);
    }

    #[tokio::test]
    async fn test_stopped_resolves_after_stop() {
        let acks = Arc::new(Acknowledgements::new());
        let waiter = {
            let acks = acks.clone();
            tokio::spawn(async move { acks.stopped().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        acks.mark_stopped();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
