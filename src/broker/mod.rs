//! Broker client boundary.

pub mod file;

use crate::model::{Batch, PartitionOffsets};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use file::FileConsumer;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("consumer woken up: {0}")]
    Wakeup(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("offsets file error: {0}")]
    Offsets(#[from] serde_json::Error),

    #[error("cannot commit {partition} (broker has {expected})")]
    UnknownPartition { partition: String, expected: String },
}

impl BrokerError {
    pub fn is_wakeup(&self) -> bool {
        matches!(self, BrokerError::Wakeup(_))
    }
}

#[async_trait]
pub trait Consumer: Send + Sync {
    /// Next batch, or None if nothing arrived within `timeout`.
    /// Fails with `Wakeup` when interrupted by `wakeup`.
    async fn poll(&self, timeout: Duration) -> Result<Option<Batch>, BrokerError>;

    /// Durably record offsets as consumed.
    async fn commit_sync(&self, offsets: &PartitionOffsets) -> Result<(), BrokerError>;

    /// Interrupt an in-progress or the next `poll`. Never blocks.
    fn wakeup(&self, reason: &str);
}
