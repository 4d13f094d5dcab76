use super::{SinkWorker, Worker};
use crate::committer::Acknowledger;
use crate::config::types::{QueueConfig, WorkerConfig};
use crate::model::Batch;
use crate::pipeline::queue::BoundedQueue;
use crate::sink::Sink;
use crate::stats::Stats;
use std::sync::Arc;
use tracing::{error, info};

/// Builds the sink owned by worker `index`. Called once per worker.
pub type SinkFactory = Arc<dyn Fn(usize) -> Box<dyn Sink> + Send + Sync>;

/// Fixed set of sink workers sharing one work queue.
pub struct WorkerPool {
    workers: Vec<Worker<SinkWorker>>,
}

impl WorkerPool {
    pub fn start(
        factory: SinkFactory,
        queue: Arc<BoundedQueue<Batch>>,
        acknowledger: Arc<dyn Acknowledger>,
        queue_config: &QueueConfig,
        worker_config: &WorkerConfig,
        stats: Arc<dyn Stats>,
    ) -> Self {
        let workers = (0..worker_config.pool_size)
            .map(|index| {
                let job = SinkWorker::new(
                    format!("sink-worker-{}", index),
                    factory(index),
                    queue.clone(),
                    acknowledger.clone(),
                    queue_config,
                    worker_config.close_timeout,
                    stats.clone(),
                );
                Worker::start(job, stats.clone())
            })
            .collect::<Vec<_>>();

        info!(workers = workers.len(), "Worker pool started");
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn stop(&self, reason: &str) {
        for worker in &self.workers {
            worker.stop(reason);
        }
    }

    /// Wait for every worker loop to end.
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.join().await {
                error!(error = %e, "Worker ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committer::Acknowledgements;
    use crate::model::{PartitionOffsets, Record, TopicPartition};
    use crate::sink::LogSink;
    use crate::stats::NoopStats;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_pool_drains_queue_and_acknowledges_everything() {
        let queue = Arc::new(BoundedQueue::new(16));
        let acks = Arc::new(Acknowledgements::new());
        let built = Arc::new(AtomicUsize::new(0));

        let factory: SinkFactory = {
            let built = built.clone();
            Arc::new(move |_| {
                built.fetch_add(1, Ordering::SeqCst);
                Box::new(LogSink::new()) as Box<dyn Sink>
            })
        };

        let pool = WorkerPool::start(
            factory,
            queue.clone(),
            acks.clone(),
            &QueueConfig {
                capacity: 16,
                poll_timeout: Duration::from_millis(5),
                offer_timeout: Duration::from_millis(50),
            },
            &WorkerConfig {
                pool_size: 3,
                ..WorkerConfig::default()
            },
            Arc::new(NoopStats),
        );
        assert_eq!(pool.len(), 3);
        assert_eq!(built.load(Ordering::SeqCst), 3);

        for offset in 1..=10 {
            queue
                .try_offer(Batch::new(
                    vec![Record::new().with("n", offset)],
                    PartitionOffsets::new().with(TopicPartition::new("events", 0), offset),
                ))
                .unwrap();
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while acks.len() < 10 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        pool.stop("test complete");
        pool.join().await;

        assert_eq!(acks.len(), 10);
        assert!(queue.is_empty());
    }
}
