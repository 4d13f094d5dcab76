use super::consumer::ConsumerWorker;
use super::queue::BoundedQueue;
use crate::broker::{BrokerError, Consumer, FileConsumer};
use crate::committer::{Acknowledgements, OffsetCommitter};
use crate::config::types::{CommitterConfig, Config};
use crate::model::{Batch, PartitionOffsets};
use crate::sink::{DeadLetterFile, FanOutSink, LogSink, Sink, WarehouseSink};
use crate::stats::{self, Stats, StatsError};
use crate::warehouse::duckdb::DuckDbWarehouse;
use crate::warehouse::{ReconcileError, TableReconciler, Warehouse, WarehouseError};
use crate::worker::{SinkFactory, Worker, WorkerPool};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Errors that abort the pipeline before or while it starts.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error("table reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("stats error: {0}")]
    Stats(#[from] StatsError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// What was left behind when the pipeline stopped.
#[derive(Debug)]
pub struct ShutdownReport {
    /// Batches polled but never committed, oldest first.
    pub uncommitted: Vec<Batch>,
    /// Acknowledgements that were never turned into commits.
    pub pending_acknowledgements: usize,
}

impl ShutdownReport {
    pub fn uncommitted_offsets(&self) -> Vec<&PartitionOffsets> {
        self.uncommitted
            .iter()
            .map(|b| b.partition_offsets())
            .collect()
    }
}

/// Running consumer, worker pool and committer.
pub struct Pipeline {
    consumer: Worker<ConsumerWorker>,
    pool: WorkerPool,
    committer: Worker<OffsetCommitter>,
    acknowledgements: Arc<Acknowledgements>,
    commit_queue: Arc<BoundedQueue<Batch>>,
    work_queue: Arc<BoundedQueue<Batch>>,
    cancel: CancellationToken,
    config: Config,
}

impl Pipeline {
    pub fn start(
        consumer: Arc<dyn Consumer>,
        sinks: SinkFactory,
        config: &Config,
        stats: Arc<dyn Stats>,
    ) -> Self {
        let commit_queue = Arc::new(BoundedQueue::new(config.committer.queue_capacity));
        let work_queue = Arc::new(BoundedQueue::new(config.queue.capacity));
        let acknowledgements = Arc::new(Acknowledgements::new());
        let cancel = CancellationToken::new();

        let committer = Worker::start(
            OffsetCommitter::from_config(
                consumer.clone(),
                commit_queue.clone(),
                acknowledgements.clone(),
                &config.committer,
                stats.clone(),
            ),
            stats.clone(),
        );

        let pool = WorkerPool::start(
            sinks,
            work_queue.clone(),
            acknowledgements.clone(),
            &config.queue,
            &config.workers,
            stats.clone(),
        );

        let consumer = Worker::start(
            ConsumerWorker::new(
                consumer,
                commit_queue.clone(),
                work_queue.clone(),
                &config.broker,
                &config.queue,
                cancel.clone(),
                stats.clone(),
            ),
            stats,
        );

        Self {
            consumer,
            pool,
            committer,
            acknowledgements,
            commit_queue,
            work_queue,
            cancel,
            config: config.clone(),
        }
    }

    pub fn acknowledgements(&self) -> &Arc<Acknowledgements> {
        &self.acknowledgements
    }

    pub fn commit_queue(&self) -> &Arc<BoundedQueue<Batch>> {
        &self.commit_queue
    }

    pub fn work_queue(&self) -> &Arc<BoundedQueue<Batch>> {
        &self.work_queue
    }

    /// Resolves when the committer stops on its own, e.g. after an
    /// acknowledgement timeout.
    pub async fn committer_stopped(&self) {
        self.acknowledgements.stopped().await;
    }

    /// Stop polling, let in-flight writes finish, commit whatever became
    /// committable, then stop the committer.
    pub async fn shutdown(self, reason: &str) -> ShutdownReport {
        info!(reason = %reason, "Shutting down pipeline");

        self.cancel.cancel();
        self.consumer.stop(reason);
        if let Err(e) = self.consumer.join().await {
            error!(error = %e, "Consumer ended abnormally");
        }

        self.pool.stop(reason);
        self.pool.join().await;

        drain_commits(
            &self.acknowledgements,
            &self.commit_queue,
            &self.config.committer,
        )
        .await;

        self.committer.stop(reason);
        if let Err(e) = self.committer.join().await {
            error!(error = %e, "Committer ended abnormally");
        }

        let report = ShutdownReport {
            uncommitted: self.commit_queue.snapshot(),
            pending_acknowledgements: self.acknowledgements.len(),
        };
        if !report.uncommitted.is_empty() {
            warn!(
                uncommitted = report.uncommitted.len(),
                pending_acks = report.pending_acknowledgements,
                "Pipeline stopped with uncommitted batches"
            );
        }
        report
    }
}

/// Give the committer a chance to commit heads that are already acknowledged.
async fn drain_commits(
    acknowledgements: &Acknowledgements,
    commit_queue: &BoundedQueue<Batch>,
    config: &CommitterConfig,
) {
    let deadline = Instant::now() + config.ack_timeout;

    while acknowledgements.is_running() && Instant::now() < deadline {
        let committable = commit_queue
            .peek()
            .is_some_and(|head| acknowledgements.contains(head.partition_offsets()));
        if !committable {
            break;
        }
        tokio::time::sleep(config.idle_sleep).await;
    }
}

/// Build one sink per worker: the warehouse sink, plus a log sink when
/// batch logging is enabled.
pub fn sink_factory(
    warehouse: Arc<dyn Warehouse>,
    config: &Config,
    stats: Arc<dyn Stats>,
) -> SinkFactory {
    let warehouse_config = config.warehouse.clone();
    let log_batches = config.workers.log_batches;
    let dead_letter = config
        .warehouse
        .dead_letter_path
        .as_ref()
        .map(|path| Arc::new(DeadLetterFile::new(path)));

    Arc::new(move |_| {
        let mut warehouse_sink =
            WarehouseSink::from_config(warehouse.clone(), &warehouse_config, stats.clone());
        if let Some(dead_letter) = &dead_letter {
            warehouse_sink = warehouse_sink.with_dead_letter(dead_letter.clone());
        }
        let sink: Box<dyn Sink> = Box::new(warehouse_sink);
        if log_batches {
            Box::new(FanOutSink::new(vec![sink, Box::new(LogSink::new())]))
        } else {
            sink
        }
    })
}

/// Run the configured pipeline until Ctrl+C or until the committer stops.
pub async fn run_pipeline(config: Config) -> Result<ShutdownReport, RunError> {
    let stats = stats::from_config(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stats_handle = if config.stats.enabled {
        let handle = stats::install_recorder()?;
        let listen = config.stats.listen.clone();
        info!(listen = %listen, "Starting metrics server");
        Some(tokio::spawn(async move {
            if let Err(e) = stats::run_server(listen, handle, shutdown_rx).await {
                error!(error = %e, "Metrics server failed");
            }
        }))
    } else {
        None
    };

    if let Some(parent) = config.warehouse.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    info!(path = %config.warehouse.path.display(), "Opening warehouse");
    let warehouse = Arc::new(DuckDbWarehouse::new(&config.warehouse.path)?);
    warehouse.init_schema().await?;

    let reconciler =
        TableReconciler::from_config(warehouse.clone(), &config.warehouse, stats.clone());
    let report = reconciler.reconcile(&config.warehouse).await?;
    info!(
        table = %reconciler.table_id(),
        dataset = ?report.dataset,
        table_outcome = ?report.table,
        "Destination table reconciled"
    );

    let consumer = Arc::new(FileConsumer::open(&config.broker).await?);
    let sinks = sink_factory(warehouse, &config, stats.clone());
    let pipeline = Pipeline::start(consumer, sinks, &config, stats);

    info!("Pipeline started, press Ctrl+C to shutdown");

    let reason = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            "shutdown signal received"
        }
        _ = pipeline.committer_stopped() => {
            error!("Offset committer stopped, shutting down");
            "offset committer stopped"
        }
    };

    let shutdown = pipeline.shutdown(reason).await;

    stop_metrics_server(shutdown_tx, stats_handle).await;

    info!(
        uncommitted = shutdown.uncommitted.len(),
        "Pipeline shutdown complete"
    );
    Ok(shutdown)
}

/// Signal the metrics server to stop and wait for its task. A panicked or
/// cancelled task is logged, never propagated.
async fn stop_metrics_server(shutdown_tx: watch::Sender<bool>, handle: Option<JoinHandle<()>>) {
    if shutdown_tx.send(true).is_err() {
        debug!("Metrics server already stopped");
    }
    if let Some(handle) = handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Metrics server task ended abnormally");
        }
    }
}
