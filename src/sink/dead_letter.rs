use super::SinkError;
use crate::model::Batch;
use crate::warehouse::{InsertError, TableId};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

/// Append-only JSON-lines file for records the warehouse will never accept.
///
/// One instance is shared by every worker. Each rejected record becomes one
/// line carrying the batch offsets, its index in the batch, the rejection
/// message and the record itself.
pub struct DeadLetterFile {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl DeadLetterFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line per rejection. `row_index` refers to the batch's records.
    pub async fn write(
        &self,
        table: &TableId,
        batch: &Batch,
        rejected: &[InsertError],
    ) -> Result<(), SinkError> {
        if rejected.is_empty() {
            return Ok(());
        }

        let rejected_at = Utc::now().to_rfc3339();
        let mut buf = Vec::new();
        for rejection in rejected {
            let record = batch
                .records()
                .get(rejection.row_index)
                .map(|record| record.to_json())
                .unwrap_or(serde_json::Value::Null);
            let line = serde_json::json!({
                "table": table.to_string(),
                "batch_id": batch.id().to_string(),
                "offsets": batch.partition_offsets().to_string(),
                "row_index": rejection.row_index,
                "error": rejection.message,
                "rejected_at": rejected_at,
                "record": record,
            });
            serde_json::to_writer(&mut buf, &line).map_err(|e| self.error(e))?;
            buf.push(b'\n');
        }

        let mut guard = self.file.lock().await;
        let mut file = match guard.take() {
            Some(file) => file,
            None => self.open().await?,
        };
        file.write_all(&buf).await.map_err(|e| self.error(e))?;
        file.flush().await.map_err(|e| self.error(e))?;
        // A failed write drops the handle so the next call reopens the file.
        *guard = Some(file);
        Ok(())
    }

    async fn open(&self) -> Result<File, SinkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.error(e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.error(e))?;
        info!(path = %self.path.display(), "Opened dead-letter file");
        Ok(file)
    }

    fn error(&self, e: impl std::fmt::Display) -> SinkError {
        SinkError::DeadLetter {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PartitionOffsets, Record, TopicPartition};
    use tempfile::TempDir;

    fn batch() -> Batch {
        Batch::new(
            vec![
                Record::new().with("id", 1i64),
                Record::new().with("id", "oops"),
                Record::new().with("id", 3i64),
            ],
            PartitionOffsets::new().with(TopicPartition::new("events", 0), 3),
        )
    }

    async fn lines(path: &Path) -> Vec<serde_json::Value> {
        tokio::fs::read_to_string(path)
            .await
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_write_appends_rejected_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("dead.jsonl");
        let dead_letter = DeadLetterFile::new(&path);
        let table = TableId::new("analytics", "events");
        let batch = batch();

        dead_letter
            .write(
                &table,
                &batch,
                &[InsertError {
                    row_index: 1,
                    message: "column event_id: bad".to_string(),
                }],
            )
            .await
            .unwrap();
        dead_letter
            .write(
                &table,
                &batch,
                &[InsertError {
                    row_index: 2,
                    message: "duplicate".to_string(),
                }],
            )
            .await
            .unwrap();

        let lines = lines(&path).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["row_index"], 1);
        assert_eq!(lines[0]["record"], serde_json::json!({"id": "oops"}));
        assert_eq!(lines[0]["error"], "column event_id: bad");
        assert_eq!(lines[0]["offsets"], batch.partition_offsets().to_string());
        assert_eq!(lines[1]["record"], serde_json::json!({"id": 3}));
    }

    #[tokio::test]
    async fn test_empty_rejection_list_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dead.jsonl");
        let dead_letter = DeadLetterFile::new(&path);

        dead_letter
            .write(&TableId::new("analytics", "events"), &batch(), &[])
            .await
            .unwrap();

        assert!(!path.exists());
    }
}
