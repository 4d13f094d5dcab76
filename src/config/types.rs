use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub use crate::warehouse::{FieldMode, FieldType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub broker: BrokerConfig,
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub committer: CommitterConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// JSON-lines file consumed as a single partition.
    pub path: PathBuf,
    pub topic: String,
    /// Where committed offsets are persisted between runs.
    pub offsets_path: PathBuf,
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,
    #[serde(default = "default_broker_poll_timeout", with = "humantime_serde")]
    pub poll_timeout: Duration,
}

fn default_max_poll_records() -> usize {
    500
}

fn default_broker_poll_timeout() -> Duration {
    Duration::from_secs(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// DuckDB database file.
    pub path: PathBuf,
    #[serde(default = "default_project")]
    pub project: String,
    pub dataset: String,
    pub table: String,
    pub location: String,
    #[serde(default)]
    pub dataset_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub table_labels: BTreeMap<String, String>,
    /// Destination columns, in table order.
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub partitioning: PartitioningConfig,
    /// JSON-lines file for records the table rejects. Unset means a rejected
    /// record fails its batch and the batch is retried.
    #[serde(default)]
    pub dead_letter_path: Option<PathBuf>,
}

fn default_project() -> String {
    "local".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    /// Record key feeding this column. Defaults to the column name.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub mode: FieldMode,
}

impl ColumnConfig {
    pub fn source_key(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitioningConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub key: Option<String>,
    /// Partition expiry in milliseconds. Zero or negative means never expire.
    #[serde(default)]
    pub expiry_millis: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Upper bound on closing a worker's sink during stop.
    #[serde(default = "default_close_timeout", with = "humantime_serde")]
    pub close_timeout: Duration,
    /// Also log a summary of every batch alongside the warehouse write.
    #[serde(default)]
    pub log_batches: bool,
}

fn default_pool_size() -> usize {
    4
}

fn default_close_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            close_timeout: default_close_timeout(),
            log_batches: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    #[serde(default = "default_queue_poll_timeout", with = "humantime_serde")]
    pub poll_timeout: Duration,
    #[serde(default = "default_queue_offer_timeout", with = "humantime_serde")]
    pub offer_timeout: Duration,
}

fn default_queue_capacity() -> usize {
    32
}

fn default_queue_poll_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_queue_offer_timeout() -> Duration {
    Duration::from_secs(1)
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            poll_timeout: default_queue_poll_timeout(),
            offer_timeout: default_queue_offer_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitterConfig {
    #[serde(default = "default_commit_queue_capacity")]
    pub queue_capacity: usize,
    /// How long the head batch may stay unacknowledged before the committer stops.
    #[serde(default = "default_ack_timeout", with = "humantime_serde")]
    pub ack_timeout: Duration,
    /// Sleep between checks while the queue is empty or the head is unacknowledged.
    #[serde(default = "default_idle_sleep", with = "humantime_serde")]
    pub idle_sleep: Duration,
}

fn default_commit_queue_capacity() -> usize {
    64
}

fn default_ack_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_idle_sleep() -> Duration {
    Duration::from_millis(10)
}

impl Default for CommitterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_commit_queue_capacity(),
            ack_timeout: default_ack_timeout(),
            idle_sleep: default_idle_sleep(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_stats_listen")]
    pub listen: String,
}

fn default_stats_listen() -> String {
    "0.0.0.0:9090".to_string()
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_stats_listen(),
        }
    }
}
