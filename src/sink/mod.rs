//! Batch destinations.
//!
//! A `Sink` writes one batch and reports a `Status`. Workers each own their
//! own sink instance, so implementations never need to coordinate between
//! workers.

pub mod dead_letter;
pub mod log;
pub mod multi;
pub mod warehouse;

use crate::model::{Batch, Status};
use async_trait::async_trait;
use thiserror::Error;

pub use self::log::LogSink;
pub use dead_letter::DeadLetterFile;
pub use multi::FanOutSink;
pub use warehouse::WarehouseSink;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to close {sink} sink: {reason}")]
    Close { sink: String, reason: String },

    #[error("failed to write dead-letter file {path}: {reason}")]
    DeadLetter { path: String, reason: String },
}

#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Write a batch. Failures are reported in the status, never raised.
    async fn push(&self, batch: &Batch) -> Status;

    /// Release resources. `reason` is logged.
    async fn close(&self, reason: &str) -> Result<(), SinkError>;
}
