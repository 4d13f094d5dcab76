//! Metrics hooks for the pipeline.
//!
//! Components receive an `Arc<dyn Stats>` at construction time instead of
//! reaching for a process-wide client. `StatsClient` forwards to the `metrics`
//! facade with a fixed set of default labels; `NoopStats` discards everything.

pub mod server;

use crate::config::types::Config;
use metrics::Label;
use std::sync::Arc;
use tokio::time::Instant;

pub use server::{install_recorder, run_server, StatsError};

/// Counter names.
pub mod names {
    pub const CONSUMER_POLL_TIMEOUT: &str = "sluice_consumer_poll_timeouts_total";
    pub const CONSUMER_POLL_ERRORS: &str = "sluice_consumer_poll_errors_total";
    pub const CONSUMER_BATCH_RECORDS: &str = "sluice_consumer_batch_records";
    pub const WORKER_ERRORS: &str = "sluice_worker_errors_total";
    pub const WORKER_PUSH_SUCCESS: &str = "sluice_worker_push_success_total";
    pub const WORKER_PUSH_FAILURE: &str = "sluice_worker_push_failure_total";
    pub const WORKER_REQUEUE_DROPPED: &str = "sluice_worker_requeue_dropped_total";
    pub const WORKER_PROCESSING_TIME: &str = "sluice_worker_processing_seconds";
    pub const BATCH_LATENCY: &str = "sluice_batch_processing_latency_seconds";
    pub const ACK_SUCCESS: &str = "sluice_ack_success_total";
    pub const ACK_FAILURE: &str = "sluice_ack_failure_total";
    pub const COMMITTER_COMMITS: &str = "sluice_committer_commits_total";
    pub const COMMITTER_COMMIT_ERRORS: &str = "sluice_committer_commit_errors_total";
    pub const COMMITTER_ACK_WAIT: &str = "sluice_committer_ack_wait_seconds";
    pub const COMMITTER_QUEUE_SIZE: &str = "sluice_committer_queue_size";
    pub const COMMITTER_TIMEOUTS: &str = "sluice_committer_ack_timeouts_total";
    pub const DATASET_UPDATES: &str = "sluice_dataset_update_total";
    pub const TABLE_UPDATES: &str = "sluice_table_update_total";
    pub const TABLE_UPDATE_TIME: &str = "sluice_table_update_seconds";
    pub const ROWS_WRITTEN: &str = "sluice_warehouse_rows_written_total";
    pub const DEAD_LETTER_ROWS: &str = "sluice_dead_letter_rows_total";
}

/// Metrics hooks: counters, gauges and timings.
pub trait Stats: Send + Sync {
    fn count(&self, metric: &'static str, delta: u64);

    fn gauge(&self, metric: &'static str, value: f64);

    /// Record the time elapsed since `start`.
    fn time_it(&self, metric: &'static str, start: Instant);

    fn increment(&self, metric: &'static str) {
        self.count(metric, 1);
    }
}

/// Discards every measurement.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl Stats for NoopStats {
    fn count(&self, _metric: &'static str, _delta: u64) {}
    fn gauge(&self, _metric: &'static str, _value: f64) {}
    fn time_it(&self, _metric: &'static str, _start: Instant) {}
}

/// Forwards measurements to the installed `metrics` recorder.
#[derive(Debug, Clone)]
pub struct StatsClient {
    labels: Vec<Label>,
}

impl StatsClient {
    pub fn new(labels: Vec<Label>) -> Self {
        Self { labels }
    }

    /// Default labels: node, pod and consumer group from the environment, plus
    /// the destination table and project.
    pub fn from_config(config: &Config) -> Self {
        let mut labels = Vec::new();

        let node = std::env::var("NODE_NAME").ok().or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.to_str().map(|s| s.to_string()))
        });
        if let Some(node) = node {
            labels.push(Label::new("node", node));
        }
        if let Ok(pod) = std::env::var("POD_NAME") {
            labels.push(Label::new("pod", pod));
        }
        if let Ok(group) = std::env::var("CONSUMER_GROUP_ID") {
            labels.push(Label::new("consumer", group));
        }

        labels.push(Label::new("table", config.warehouse.table.clone()));
        labels.push(Label::new("project", config.warehouse.project.clone()));

        Self { labels }
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }
}

impl Stats for StatsClient {
    fn count(&self, metric: &'static str, delta: u64) {
        metrics::counter!(metric, self.labels.clone()).increment(delta);
    }

    fn gauge(&self, metric: &'static str, value: f64) {
        metrics::gauge!(metric, self.labels.clone()).set(value);
    }

    fn time_it(&self, metric: &'static str, start: Instant) {
        metrics::histogram!(metric, self.labels.clone()).record(start.elapsed().as_secs_f64());
    }
}

/// Build the stats handle for a config: a forwarding client when stats are
/// enabled, otherwise a no-op.
pub fn from_config(config: &Config) -> Arc<dyn Stats> {
    if config.stats.enabled {
        Arc::new(StatsClient::from_config(config))
    } else {
        Arc::new(NoopStats)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records counter totals so tests can assert on hook invocations.
    #[derive(Debug, Default)]
    pub struct RecordingStats {
        counts: Mutex<HashMap<&'static str, u64>>,
        timings: Mutex<HashMap<&'static str, u64>>,
    }

    impl RecordingStats {
        pub fn count_of(&self, metric: &str) -> u64 {
            self.counts.lock().unwrap().get(metric).copied().unwrap_or(0)
        }

        pub fn timings_of(&self, metric: &str) -> u64 {
            self.timings.lock().unwrap().get(metric).copied().unwrap_or(0)
        }
    }

    impl Stats for RecordingStats {
        fn count(&self, metric: &'static str, delta: u64) {
            *self.counts.lock().unwrap().entry(metric).or_default() += delta;
        }

        fn gauge(&self, _metric: &'static str, _value: f64) {}

        fn time_it(&self, metric: &'static str, _start: Instant) {
            *self.timings.lock().unwrap().entry(metric).or_default() += 1;
        }
    }
}
