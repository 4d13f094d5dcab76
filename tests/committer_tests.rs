//! Ordering guarantees of the offset committer, driven through a real worker
//! loop against a consumer that records every commit.

use async_trait::async_trait;
use sluice::broker::{BrokerError, Consumer};
use sluice::committer::{Acknowledgements, CommitterState, OffsetCommitter};
use sluice::model::{Batch, PartitionOffsets, Record, TopicPartition};
use sluice::pipeline::BoundedQueue;
use sluice::stats::NoopStats;
use sluice::worker::Worker;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingConsumer {
    commits: Mutex<Vec<i64>>,
    wakeups: Mutex<Vec<String>>,
    fail_commits: bool,
}

impl RecordingConsumer {
    fn commits(&self) -> Vec<i64> {
        self.commits.lock().unwrap().clone()
    }

    fn woken(&self) -> bool {
        !self.wakeups.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl Consumer for RecordingConsumer {
    async fn poll(&self, _timeout: Duration) -> Result<Option<Batch>, BrokerError> {
        Ok(None)
    }

    async fn commit_sync(&self, offsets: &PartitionOffsets) -> Result<(), BrokerError> {
        if self.fail_commits {
            return Err(BrokerError::Io(std::io::Error::other("broker unavailable")));
        }
        let offset = offsets.get(&partition()).map(|o| o.offset).unwrap_or(-1);
        self.commits.lock().unwrap().push(offset);
        Ok(())
    }

    fn wakeup(&self, reason: &str) {
        self.wakeups.lock().unwrap().push(reason.to_string());
    }
}

fn partition() -> TopicPartition {
    TopicPartition::new("events", 0)
}

fn batch(offset: i64) -> Batch {
    Batch::new(
        vec![Record::new().with("offset", offset)],
        PartitionOffsets::new().with(partition(), offset),
    )
}

struct Harness {
    consumer: Arc<RecordingConsumer>,
    queue: Arc<BoundedQueue<Batch>>,
    acks: Arc<Acknowledgements>,
    worker: Worker<OffsetCommitter>,
}

fn start(
    consumer: RecordingConsumer,
    offsets: &[i64],
    ack_timeout: Duration,
) -> (Harness, Vec<Batch>) {
    let consumer = Arc::new(consumer);
    let queue = Arc::new(BoundedQueue::new(64));
    let acks = Arc::new(Acknowledgements::new());

    let batches: Vec<Batch> = offsets.iter().map(|o| batch(*o)).collect();
    for b in &batches {
        queue.try_offer(b.clone()).unwrap();
    }

    let committer = OffsetCommitter::new(
        consumer.clone(),
        queue.clone(),
        acks.clone(),
        ack_timeout,
        Duration::from_millis(2),
        Arc::new(NoopStats),
    );
    let worker = Worker::start(committer, Arc::new(NoopStats));

    (
        Harness {
            consumer,
            queue,
            acks,
            worker,
        },
        batches,
    )
}

async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

#[tokio::test]
async fn test_out_of_order_acks_commit_in_poll_order() {
    let (h, batches) = start(RecordingConsumer::default(), &[10, 11, 12], Duration::from_secs(10));

    assert!(h.acks.insert(batches[2].partition_offsets().clone()));
    assert!(h.acks.insert(batches[1].partition_offsets().clone()));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.consumer.commits().is_empty(), "nothing may commit before 10");

    assert!(h.acks.insert(batches[0].partition_offsets().clone()));
    assert!(wait_for(|| h.consumer.commits().len() == 3).await);

    assert_eq!(h.consumer.commits(), vec![10, 11, 12]);
    assert!(h.queue.is_empty());
    assert!(h.acks.is_empty());

    h.worker.stop("test complete");
    h.worker.join().await.unwrap();
}

#[tokio::test]
async fn test_shuffled_acks_commit_strictly_ascending() {
    let offsets: Vec<i64> = (1..=20).collect();
    let (h, batches) = start(RecordingConsumer::default(), &offsets, Duration::from_secs(10));

    // Fixed permutation: odds descending, then evens ascending.
    let order = (0..20)
        .rev()
        .filter(|i| i % 2 == 0)
        .chain((0..20).filter(|i| i % 2 == 1));
    for i in order {
        h.acks.insert(batches[i].partition_offsets().clone());
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert!(wait_for(|| h.consumer.commits().len() == 20).await);
    assert_eq!(h.consumer.commits(), offsets);

    h.worker.stop("test complete");
    h.worker.join().await.unwrap();
}

#[tokio::test]
async fn test_missing_ack_stalls_then_times_out() {
    let (h, batches) = start(
        RecordingConsumer::default(),
        &[1, 2, 3, 4, 5],
        Duration::from_millis(150),
    );

    for (i, b) in batches.iter().enumerate() {
        if i != 2 {
            h.acks.insert(b.partition_offsets().clone());
        }
    }

    assert!(wait_for(|| h.consumer.commits().len() == 2).await);
    tokio::time::timeout(Duration::from_secs(5), h.acks.stopped())
        .await
        .unwrap();

    assert_eq!(h.consumer.commits(), vec![1, 2]);
    assert_eq!(h.acks.state(), CommitterState::Stopped);
    assert!(h.consumer.woken());

    let left: Vec<Batch> = h.queue.snapshot();
    assert_eq!(left, batches[2..].to_vec());

    // Late acknowledgements are refused once stopped.
    assert!(!h.acks.insert(batches[2].partition_offsets().clone()));

    assert!(wait_for(|| h.worker.is_finished()).await);
    h.worker.join().await.unwrap();
}

#[tokio::test]
async fn test_unacknowledged_middle_batch_leaves_later_ack_pending() {
    let (h, batches) = start(
        RecordingConsumer::default(),
        &[10, 11, 12],
        Duration::from_millis(100),
    );

    h.acks.insert(batches[0].partition_offsets().clone());
    h.acks.insert(batches[2].partition_offsets().clone());

    tokio::time::timeout(Duration::from_secs(5), h.acks.stopped())
        .await
        .unwrap();

    assert_eq!(h.consumer.commits(), vec![10]);
    assert!(h.consumer.woken());
    assert_eq!(h.queue.snapshot(), batches[1..].to_vec());
    assert_eq!(h.acks.len(), 1);
    assert!(h.acks.contains(batches[2].partition_offsets()));

    assert!(wait_for(|| h.worker.is_finished()).await);
    h.worker.join().await.unwrap();
}

#[tokio::test]
async fn test_no_acks_commits_nothing() {
    let (h, batches) = start(RecordingConsumer::default(), &[7, 8], Duration::from_millis(80));

    tokio::time::timeout(Duration::from_secs(5), h.acks.stopped())
        .await
        .unwrap();

    assert!(h.consumer.commits().is_empty());
    assert_eq!(h.queue.snapshot(), batches);

    h.worker.join().await.unwrap();
}

#[tokio::test]
async fn test_commit_failure_stops_and_keeps_head() {
    let consumer = RecordingConsumer {
        fail_commits: true,
        ..RecordingConsumer::default()
    };
    let (h, batches) = start(consumer, &[3, 4], Duration::from_secs(10));

    h.acks.insert(batches[0].partition_offsets().clone());
    tokio::time::timeout(Duration::from_secs(5), h.acks.stopped())
        .await
        .unwrap();

    assert!(h.consumer.woken());
    assert_eq!(h.queue.snapshot(), batches);
    assert!(h.acks.contains(batches[0].partition_offsets()));

    h.worker.join().await.unwrap();
}
