use super::{BrokerError, Consumer};
use crate::config::types::BrokerConfig;
use crate::model::{Batch, PartitionOffsets, Record, TopicPartition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How often a waiting poll re-checks the file for new lines.
const FILE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Single-partition broker over a JSON-lines file.
///
/// Each line holds one JSON object and its zero-based line number is its
/// offset. Committed offsets are written to a small JSON file and reading
/// resumes from there on the next start.
pub struct FileConsumer {
    path: PathBuf,
    offsets_path: PathBuf,
    partition: TopicPartition,
    max_poll_records: usize,
    position: Mutex<Position>,
    pending_wakeup: StdMutex<Option<String>>,
    wakeup_notify: Notify,
}

#[derive(Debug, Clone, Copy, Default)]
struct Position {
    /// Offset of the next line to read.
    next_offset: i64,
    byte_pos: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CommittedOffset {
    topic: String,
    partition: i32,
    offset: i64,
    committed_at: DateTime<Utc>,
}

impl FileConsumer {
    pub async fn open(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let partition = TopicPartition::new(&config.topic, 0);
        let committed = read_committed(&config.offsets_path, &partition).await?;
        let position = seek_to_offset(&config.path, committed).await?;

        info!(
            path = %config.path.display(),
            partition = %partition,
            offset = position.next_offset,
            "Opened file consumer"
        );

        Ok(Self {
            path: config.path.clone(),
            offsets_path: config.offsets_path.clone(),
            partition,
            max_poll_records: config.max_poll_records.max(1),
            position: Mutex::new(position),
            pending_wakeup: StdMutex::new(None),
            wakeup_notify: Notify::new(),
        })
    }

    pub fn partition(&self) -> &TopicPartition {
        &self.partition
    }

    /// Offset of the next line a poll will read.
    pub async fn position(&self) -> i64 {
        self.position.lock().await.next_offset
    }

    /// Last committed offset, read back from the offsets file.
    pub async fn committed(&self) -> Result<i64, BrokerError> {
        read_committed(&self.offsets_path, &self.partition).await
    }

    fn take_wakeup(&self) -> Option<String> {
        self.pending_wakeup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Read up to `max_poll_records` complete lines past the current position.
    async fn read_available(&self) -> Result<Option<Batch>, BrokerError> {
        let mut position = self.position.lock().await;

        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(position.byte_pos)).await?;

        let mut records = Vec::new();
        let mut next = *position;
        let mut line = Vec::new();

        while records.len() < self.max_poll_records {
            line.clear();
            let n = reader.read_until(b'\n', &mut line).await?;
            if n == 0 || line.last() != Some(&b'\n') {
                // End of file or a line still being written.
                break;
            }

            let offset = next.next_offset;
            next.next_offset += 1;
            next.byte_pos += n as u64;

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<serde_json::Value>(&line).map(Record::from_json) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => warn!(offset, "Skipping line that is not a JSON object"),
                Err(e) => warn!(offset, error = %e, "Skipping undecodable line"),
            }
        }

        *position = next;
        if records.is_empty() {
            return Ok(None);
        }

        let offsets = PartitionOffsets::new().with(self.partition.clone(), next.next_offset);
        debug!(records = records.len(), offsets = %offsets, "Polled batch");
        Ok(Some(Batch::new(records, offsets)))
    }
}

#[async_trait]
impl Consumer for FileConsumer {
    async fn poll(&self, timeout: Duration) -> Result<Option<Batch>, BrokerError> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.wakeup_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(reason) = self.take_wakeup() {
                return Err(BrokerError::Wakeup(reason));
            }

            if let Some(batch) = self.read_available().await? {
                return Ok(Some(batch));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep((deadline - now).min(FILE_POLL_INTERVAL)) => {}
            }
        }
    }

    async fn commit_sync(&self, offsets: &PartitionOffsets) -> Result<(), BrokerError> {
        let mut offset = None;
        for (partition, committed) in offsets.iter() {
            if *partition != self.partition {
                return Err(BrokerError::UnknownPartition {
                    partition: partition.to_string(),
                    expected: self.partition.to_string(),
                });
            }
            offset = Some(committed.offset);
        }
        let Some(offset) = offset else {
            return Ok(());
        };

        let committed = CommittedOffset {
            topic: self.partition.topic.clone(),
            partition: self.partition.partition,
            offset,
            committed_at: Utc::now(),
        };
        write_atomically(&self.offsets_path, &serde_json::to_vec_pretty(&committed)?).await?;
        debug!(partition = %self.partition, offset, "Committed offset");
        Ok(())
    }

    fn wakeup(&self, reason: &str) {
        *self
            .pending_wakeup
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
        self.wakeup_notify.notify_waiters();
    }
}

async fn read_committed(path: &Path, partition: &TopicPartition) -> Result<i64, BrokerError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let committed: CommittedOffset = serde_json::from_slice(&bytes)?;
    if committed.topic != partition.topic || committed.partition != partition.partition {
        warn!(
            path = %path.display(),
            topic = %committed.topic,
            "Offsets file belongs to another topic, starting from the beginning"
        );
        return Ok(0);
    }
    Ok(committed.offset)
}

/// Byte position of line `offset`. Stops early if the file is shorter.
async fn seek_to_offset(path: &Path, offset: i64) -> Result<Position, BrokerError> {
    let mut position = Position::default();
    if offset <= 0 {
        return Ok(position);
    }

    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(position),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();

    while position.next_offset < offset {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 || line.last() != Some(&b'\n') {
            warn!(
                committed = offset,
                available = position.next_offset,
                "Input file is shorter than the committed offset"
            );
            break;
        }
        position.next_offset += 1;
        position.byte_pos += n as u64;
    }

    Ok(position)
}

async fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), BrokerError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    fn config(dir: &TempDir, max_poll_records: usize) -> BrokerConfig {
        BrokerConfig {
            path: dir.path().join("events.jsonl"),
            topic: "events".to_string(),
            offsets_path: dir.path().join("state/offsets.json"),
            max_poll_records,
            poll_timeout: Duration::from_millis(50),
        }
    }

    async fn append(path: &Path, text: &str) {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .unwrap();
        file.write_all(text.as_bytes()).await.unwrap();
        file.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_polls_lines_in_batches() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, 2);
        append(&config.path, "{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n").await;

        let consumer = FileConsumer::open(&config).await.unwrap();

        let first = consumer.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.records()[0].get("id"), Some(&Value::Int(1)));
        assert_eq!(
            first.partition_offsets().get(consumer.partition()).unwrap().offset,
            2
        );

        let second = consumer.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(
            second.partition_offsets().get(consumer.partition()).unwrap().offset,
            3
        );

        assert!(consumer.poll(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_line_waits_for_newline() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, 10);
        append(&config.path, "{\"id\":1}\n{\"id\":").await;

        let consumer = FileConsumer::open(&config).await.unwrap();
        assert_eq!(consumer.poll(Duration::from_millis(10)).await.unwrap().unwrap().len(), 1);
        assert!(consumer.poll(Duration::from_millis(10)).await.unwrap().is_none());

        append(&config.path, "2}\n").await;
        let batch = consumer.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(batch.records()[0].get("id"), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn test_invalid_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, 10);
        append(&config.path, "not json\n[1,2]\n\n{\"id\":4}\n").await;

        let consumer = FileConsumer::open(&config).await.unwrap();
        let batch = consumer.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(
            batch.partition_offsets().get(consumer.partition()).unwrap().offset,
            4
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, 10);
        let mut bytes = b"{\"id\":1}\n{\"id\":\"".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(b"\"}\n{\"id\":3}\n");
        tokio::fs::write(&config.path, &bytes).await.unwrap();

        let consumer = FileConsumer::open(&config).await.unwrap();
        let batch = consumer.poll(Duration::from_millis(10)).await.unwrap().unwrap();

        let ids: Vec<_> = batch.records().iter().map(|r| r.get("id").cloned()).collect();
        assert_eq!(ids, vec![Some(Value::Int(1)), Some(Value::Int(3))]);
        assert_eq!(consumer.position().await, 3);
        assert!(consumer.poll(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resumes_from_committed_offset() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, 10);
        append(&config.path, "{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n").await;

        let consumer = FileConsumer::open(&config).await.unwrap();
        consumer
            .commit_sync(&PartitionOffsets::new().with(TopicPartition::new("events", 0), 2))
            .await
            .unwrap();
        assert_eq!(consumer.committed().await.unwrap(), 2);
        drop(consumer);

        let reopened = FileConsumer::open(&config).await.unwrap();
        assert_eq!(reopened.position().await, 2);
        let batch = reopened.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.records()[0].get("id"), Some(&Value::Int(3)));
    }

    #[tokio::test]
    async fn test_commit_rejects_foreign_partition() {
        let dir = TempDir::new().unwrap();
        let consumer = FileConsumer::open(&config(&dir, 10)).await.unwrap();
        let err = consumer
            .commit_sync(&PartitionOffsets::new().with(TopicPartition::new("events", 3), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::UnknownPartition { .. }));
    }

    #[tokio::test]
    async fn test_wakeup_interrupts_waiting_poll_once() {
        let dir = TempDir::new().unwrap();
        let consumer = Arc::new(FileConsumer::open(&config(&dir, 10)).await.unwrap());

        let waker = {
            let consumer = consumer.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                consumer.wakeup("ack timeout");
            })
        };

        let start = Instant::now();
        let err = consumer.poll(Duration::from_secs(10)).await.unwrap_err();
        waker.await.unwrap();

        assert!(err.is_wakeup());
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(consumer.poll(Duration::from_millis(10)).await.unwrap().is_none());
    }
}
