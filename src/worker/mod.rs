//! Long-running jobs and the loop that drives them.
//!
//! A `Job` does one bounded unit of work per `run_once`. `Worker` spawns a
//! task that calls it until asked to stop or the job reports it is finished.
//! Panics inside an iteration are caught and counted; they never end the loop.

pub mod pool;
pub mod queue_worker;

use crate::model::Status;
use crate::stats::{names, Stats};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub use pool::{SinkFactory, WorkerPool};
pub use queue_worker::SinkWorker;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {name} task failed: {reason}")]
    Join { name: String, reason: String },
}

#[async_trait]
pub trait Job: Send {
    fn name(&self) -> &str;

    /// One iteration. Every wait inside must be bounded so stop requests are
    /// noticed promptly.
    async fn run_once(&mut self) -> Status;

    /// Release resources. Called once, after the last iteration.
    async fn stop(&mut self, reason: &str);

    /// A job may end its own loop, e.g. after a terminal failure.
    fn is_finished(&self) -> bool {
        false
    }
}

/// Handle to a spawned job loop.
pub struct Worker<J> {
    name: String,
    stop_tx: watch::Sender<Option<String>>,
    handle: JoinHandle<J>,
}

impl<J: Job + 'static> Worker<J> {
    pub fn start(mut job: J, stats: Arc<dyn Stats>) -> Self {
        let name = job.name().to_string();
        let (stop_tx, mut stop_rx) = watch::channel::<Option<String>>(None);

        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            info!(worker = %task_name, "Worker started");

            loop {
                let requested = stop_rx.borrow_and_update().clone();
                if let Some(reason) = requested {
                    job.stop(&reason).await;
                    info!(worker = %task_name, reason = %reason, "Worker stopped");
                    break;
                }

                if job.is_finished() {
                    info!(worker = %task_name, "Worker finished");
                    break;
                }

                match AssertUnwindSafe(job.run_once()).catch_unwind().await {
                    Ok(Status::Success) => {}
                    Ok(status) => {
                        debug!(worker = %task_name, status = %status, "Iteration failed");
                    }
                    Err(panic) => {
                        stats.increment(names::WORKER_ERRORS);
                        error!(
                            worker = %task_name,
                            panic = %panic_message(panic.as_ref()),
                            "Iteration panicked"
                        );
                    }
                }
            }

            job
        });

        Self {
            name,
            stop_tx,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the loop to stop after the current iteration. The first reason wins.
    pub fn stop(&self, reason: &str) {
        self.stop_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.to_string());
            true
        });
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to end and take the job back.
    pub async fn join(self) -> Result<J, WorkerError> {
        self.handle.await.map_err(|e| WorkerError::Join {
            name: self.name,
            reason: e.to_string(),
        })
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
