pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# SLUICE CONFIGURATION
# =============================================================================
# Streams JSON-lines records from a broker into a DuckDB warehouse table and
# commits broker offsets only after the rows are durably written.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/sluice/config.yml
#   3. /etc/sluice/config.yml
#
# Any value may reference an environment variable as $env{NAME}.

# =============================================================================
# BROKER
# =============================================================================
# A JSON-lines file consumed as a single partition. Offsets are line numbers
# and are persisted to offsets_path after every commit.

broker:
  path: /var/lib/sluice/events.jsonl
  topic: events
  offsets_path: /var/lib/sluice/offsets.json
  max_poll_records: 500
  poll_timeout: 1s

# =============================================================================
# WAREHOUSE
# =============================================================================
# The dataset is created on first start with the configured location. The
# location of an existing dataset can never change; a mismatch aborts startup.
# Schema changes are additive only: new columns are added, nothing is dropped.

warehouse:
  path: /var/lib/sluice/warehouse.duckdb
  project: local
  dataset: analytics
  table: events
  location: US
  dataset_labels:
    owner: data-platform
  table_labels:
    source: events
  columns:
    - name: event_id
      source: id
      type: integer
      mode: required
    - name: event_time
      source: ts
      type: timestamp
    - name: user_name
      type: string
  partitioning:
    # Only time-based partition keys (timestamp or date columns) are supported
    enabled: true
    key: event_time
    # Zero or negative means partitions never expire
    expiry_millis: 0
  # Records the table rejects are appended here and their batch still commits.
  # Without it a rejected record fails its batch, which is retried.
  # dead_letter_path: /var/lib/sluice/dead-letter.jsonl

# =============================================================================
# PIPELINE
# =============================================================================

workers:
  pool_size: 4
  close_timeout: 5s
  log_batches: false

queue:
  capacity: 32
  poll_timeout: 100ms
  offer_timeout: 1s

committer:
  queue_capacity: 64
  # The committer stops (and the pipeline with it) when the oldest pending
  # batch stays unacknowledged this long
  ack_timeout: 60s
  idle_sleep: 10ms

stats:
  enabled: true
  listen: 0.0.0.0:9090
"#
    .to_string()
}
