//! Full pipeline runs: JSON-lines file in, DuckDB table out, offsets file
//! committed behind the writes.

use async_trait::async_trait;
use sluice::broker::FileConsumer;
use sluice::config::{parse_config, Config};
use sluice::model::{Batch, FailureCause, Status};
use sluice::pipeline::{sink_factory, Pipeline};
use sluice::sink::{Sink, SinkError};
use sluice::stats::NoopStats;
use sluice::warehouse::duckdb::DuckDbWarehouse;
use sluice::warehouse::{TableId, TableReconciler};
use sluice::worker::SinkFactory;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn config(dir: &Path, ack_timeout: &str) -> Config {
    let yaml = format!(
        r#"
broker:
  path: {dir}/events.jsonl
  topic: events
  offsets_path: {dir}/state/offsets.json
  max_poll_records: 2
  poll_timeout: 20ms
warehouse:
  path: {dir}/warehouse.duckdb
  dataset: analytics
  table: events
  location: US
  columns:
    - name: event_id
      source: id
      type: integer
      mode: required
    - name: user_name
      source: user
      type: string
workers:
  pool_size: 3
queue:
  capacity: 4
  poll_timeout: 10ms
  offer_timeout: 20ms
committer:
  queue_capacity: 8
  ack_timeout: {ack_timeout}
  idle_sleep: 5ms
"#,
        dir = dir.display(),
        ack_timeout = ack_timeout,
    );
    parse_config(&yaml).unwrap()
}

fn write_events(path: &Path, ids: std::ops::RangeInclusive<i64>) {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    for id in ids {
        writeln!(file, r#"{{"id": {id}, "user": "user-{id}"}}"#).unwrap();
    }
}

async fn warehouse(config: &Config) -> Arc<DuckDbWarehouse> {
    let warehouse = Arc::new(DuckDbWarehouse::in_memory().unwrap());
    warehouse.init_schema().await.unwrap();
    TableReconciler::from_config(warehouse.clone(), &config.warehouse, Arc::new(NoopStats))
        .reconcile(&config.warehouse)
        .await
        .unwrap();
    warehouse
}

async fn wait_for_commit(consumer: &FileConsumer, offset: i64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if consumer.committed().await.unwrap() >= offset {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_records_land_in_table_and_offsets_commit() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), "5s");
    write_events(&config.broker.path, 1..=9);

    let warehouse = warehouse(&config).await;
    let consumer = Arc::new(FileConsumer::open(&config.broker).await.unwrap());
    let sinks = sink_factory(warehouse.clone(), &config, Arc::new(NoopStats));
    let pipeline = Pipeline::start(consumer.clone(), sinks, &config, Arc::new(NoopStats));

    assert!(wait_for_commit(&consumer, 9).await);

    let report = pipeline.shutdown("test complete").await;
    assert!(report.uncommitted.is_empty());
    assert_eq!(report.pending_acknowledgements, 0);

    let table = TableId::new("analytics", "events");
    assert_eq!(warehouse.row_count(&table).await.unwrap(), 9);
    assert_eq!(
        warehouse.column_names(&table).await.unwrap(),
        vec!["event_id".to_string(), "user_name".to_string()]
    );
}

#[tokio::test]
async fn test_restart_resumes_after_committed_offset() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), "5s");
    write_events(&config.broker.path, 1..=4);

    let warehouse = warehouse(&config).await;
    let consumer = Arc::new(FileConsumer::open(&config.broker).await.unwrap());
    let pipeline = Pipeline::start(
        consumer.clone(),
        sink_factory(warehouse.clone(), &config, Arc::new(NoopStats)),
        &config,
        Arc::new(NoopStats),
    );
    assert!(wait_for_commit(&consumer, 4).await);
    pipeline.shutdown("first run done").await;

    write_events(&config.broker.path, 5..=6);

    let consumer = Arc::new(FileConsumer::open(&config.broker).await.unwrap());
    assert_eq!(consumer.position().await, 4);

    let pipeline = Pipeline::start(
        consumer.clone(),
        sink_factory(warehouse.clone(), &config, Arc::new(NoopStats)),
        &config,
        Arc::new(NoopStats),
    );
    assert!(wait_for_commit(&consumer, 6).await);
    pipeline.shutdown("second run done").await;

    let table = TableId::new("analytics", "events");
    assert_eq!(warehouse.row_count(&table).await.unwrap(), 6);
}

#[tokio::test]
async fn test_rejected_record_is_dead_lettered_and_offsets_still_commit() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), "5s");
    let dead_letter_path = dir.path().join("dead/rejected.jsonl");
    config.warehouse.dead_letter_path = Some(dead_letter_path.clone());

    write_events(&config.broker.path, 1..=2);
    std::fs::OpenOptions::new()
        .append(true)
        .open(&config.broker.path)
        .and_then(|mut file| {
            use std::io::Write;
            writeln!(file, r#"{{"id": "oops", "user": "poison"}}"#)
        })
        .unwrap();
    write_events(&config.broker.path, 4..=5);

    let warehouse = warehouse(&config).await;
    let consumer = Arc::new(FileConsumer::open(&config.broker).await.unwrap());
    let sinks = sink_factory(warehouse.clone(), &config, Arc::new(NoopStats));
    let pipeline = Pipeline::start(consumer.clone(), sinks, &config, Arc::new(NoopStats));

    assert!(wait_for_commit(&consumer, 5).await);
    let report = pipeline.shutdown("test complete").await;
    assert!(report.uncommitted.is_empty());

    let table = TableId::new("analytics", "events");
    assert_eq!(warehouse.row_count(&table).await.unwrap(), 4);

    let dead: Vec<serde_json::Value> = std::fs::read_to_string(&dead_letter_path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(dead.len(), 1);
    assert_eq!(
        dead[0]["record"],
        serde_json::json!({"id": "oops", "user": "poison"})
    );
    assert_eq!(dead[0]["table"], "analytics.events");
}

struct FailingSink;

#[async_trait]
impl Sink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn push(&self, _batch: &Batch) -> Status {
        Status::failure(FailureCause::Write("warehouse unavailable".to_string()))
    }

    async fn close(&self, _reason: &str) -> Result<(), SinkError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_failing_sink_stops_committer_without_committing() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), "200ms");
    write_events(&config.broker.path, 1..=3);

    let consumer = Arc::new(FileConsumer::open(&config.broker).await.unwrap());
    let sinks: SinkFactory = Arc::new(|_| Box::new(FailingSink) as Box<dyn Sink>);
    let pipeline = Pipeline::start(consumer.clone(), sinks, &config, Arc::new(NoopStats));

    tokio::time::timeout(Duration::from_secs(10), pipeline.committer_stopped())
        .await
        .unwrap();
    let report = pipeline.shutdown("committer stopped").await;

    assert!(!report.uncommitted.is_empty());
    assert_eq!(consumer.committed().await.unwrap(), 0);
    assert!(!dir.path().join("state/offsets.json").exists());
}
