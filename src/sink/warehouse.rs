use super::{DeadLetterFile, Sink, SinkError};
use crate::config::types::{ColumnConfig, WarehouseConfig};
use crate::model::{Batch, FailureCause, Record, Status, Value};
use crate::stats::{names, Stats};
use crate::warehouse::{FieldMode, FieldType, InsertError, Row, TableId, Warehouse};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Writes batches as rows of the destination table.
///
/// The table is expected to exist already; startup reconciliation creates or
/// updates it before any worker runs.
///
/// Without a dead-letter file any rejected record fails the whole batch. With
/// one, rejected records are appended there and the rest of the batch is
/// inserted, so a record the warehouse will never accept cannot hold back
/// the offsets behind it.
pub struct WarehouseSink {
    warehouse: Arc<dyn Warehouse>,
    table_id: TableId,
    columns: Vec<ColumnConfig>,
    dead_letter: Option<Arc<DeadLetterFile>>,
    stats: Arc<dyn Stats>,
}

impl WarehouseSink {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        table_id: TableId,
        columns: Vec<ColumnConfig>,
        stats: Arc<dyn Stats>,
    ) -> Self {
        Self {
            warehouse,
            table_id,
            columns,
            dead_letter: None,
            stats,
        }
    }

    pub fn from_config(
        warehouse: Arc<dyn Warehouse>,
        config: &WarehouseConfig,
        stats: Arc<dyn Stats>,
    ) -> Self {
        Self::new(
            warehouse,
            TableId::new(&config.dataset, &config.table),
            config.columns.clone(),
            stats,
        )
    }

    pub fn with_dead_letter(mut self, dead_letter: Arc<DeadLetterFile>) -> Self {
        self.dead_letter = Some(dead_letter);
        self
    }

    /// Map every record to a row, keeping each row's index in the batch.
    /// Records that cannot be mapped are reported the same way the warehouse
    /// reports rejected rows.
    fn build_rows(&self, records: &[Record]) -> (Vec<(usize, Row)>, Vec<InsertError>) {
        let mut rows = Vec::with_capacity(records.len());
        let mut errors = Vec::new();

        for (row_index, record) in records.iter().enumerate() {
            match build_row(record, &self.columns) {
                Ok(row) => rows.push((row_index, row)),
                Err(message) => errors.push(InsertError { row_index, message }),
            }
        }

        (rows, errors)
    }

    /// Divert rejected records. Without a dead-letter file the rejections
    /// become the batch's failure.
    async fn dead_letter(&self, batch: &Batch, rejected: Vec<InsertError>) -> Result<(), Status> {
        let Some(dead_letter) = &self.dead_letter else {
            return Err(Status::failure(FailureCause::Insert(rejected)));
        };

        match dead_letter.write(&self.table_id, batch, &rejected).await {
            Ok(()) => {
                self.stats.count(names::DEAD_LETTER_ROWS, rejected.len() as u64);
                warn!(
                    batch_id = %batch.id(),
                    table = %self.table_id,
                    rows = rejected.len(),
                    first = %rejected[0],
                    path = %dead_letter.path().display(),
                    "Diverted rejected records to dead-letter file"
                );
                Ok(())
            }
            Err(e) => {
                error!(batch_id = %batch.id(), error = %e, "Failed to write dead-letter records");
                Err(Status::failure(FailureCause::Write(e.to_string())))
            }
        }
    }
}

#[async_trait]
impl Sink for WarehouseSink {
    fn name(&self) -> &str {
        "warehouse"
    }

    async fn push(&self, batch: &Batch) -> Status {
        if batch.is_empty() {
            return Status::Success;
        }

        let (mut rows, unmapped) = self.build_rows(batch.records());
        if !unmapped.is_empty() {
            error!(
                batch_id = %batch.id(),
                table = %self.table_id,
                rejected = unmapped.len(),
                "Records could not be mapped to table columns"
            );
            if let Err(status) = self.dead_letter(batch, unmapped).await {
                return status;
            }
        }

        // Inserts are all-or-nothing, so rows the warehouse rejects are
        // diverted and the remainder retried.
        while !rows.is_empty() {
            let payload: Vec<Row> = rows.iter().map(|(_, row)| row.clone()).collect();
            let errors = match self.warehouse.insert_rows(&self.table_id, payload).await {
                Ok(errors) if errors.is_empty() => {
                    self.stats.count(names::ROWS_WRITTEN, rows.len() as u64);
                    debug!(
                        batch_id = %batch.id(),
                        rows = rows.len(),
                        table = %self.table_id,
                        "Inserted batch"
                    );
                    break;
                }
                Ok(errors) => errors,
                Err(e) => {
                    error!(
                        batch_id = %batch.id(),
                        table = %self.table_id,
                        error = %e,
                        "Failed to write batch"
                    );
                    return Status::failure(FailureCause::Write(e.to_string()));
                }
            };

            error!(
                batch_id = %batch.id(),
                table = %self.table_id,
                rejected = errors.len(),
                first = %errors[0],
                "Warehouse rejected rows"
            );

            let mut rejected = Vec::new();
            let mut kept = Vec::with_capacity(rows.len());
            for (position, (row_index, row)) in rows.into_iter().enumerate() {
                match errors.iter().find(|e| e.row_index == position) {
                    Some(e) => rejected.push(InsertError {
                        row_index,
                        message: e.message.clone(),
                    }),
                    None => kept.push((row_index, row)),
                }
            }
            if rejected.is_empty() {
                return Status::failure(FailureCause::Insert(errors));
            }
            if let Err(status) = self.dead_letter(batch, rejected).await {
                return status;
            }
            rows = kept;
        }

        Status::Success
    }

    async fn close(&self, reason: &str) -> Result<(), SinkError> {
        info!(table = %self.table_id, reason = %reason, "Closed warehouse sink");
        Ok(())
    }
}

/// `i64::MAX as f64` rounds up to 2^63, so the upper bound is exclusive.
fn fits_i64(f: f64) -> bool {
    f >= i64::MIN as f64 && f < i64::MAX as f64
}

/// One row in column order. Missing keys become nulls.
pub fn build_row(record: &Record, columns: &[ColumnConfig]) -> Result<Row, String> {
    columns
        .iter()
        .map(|column| {
            let raw = record.get(column.source_key()).unwrap_or(&Value::Null);
            let value = coerce(raw, column.field_type)
                .map_err(|reason| format!("column {}: {}", column.name, reason))?;
            if value.is_null() && column.mode == FieldMode::Required {
                return Err(format!("column {}: required value is missing", column.name));
            }
            Ok((column.name.clone(), value))
        })
        .collect()
}

/// Convert a decoded value to the representation a column type expects.
///
/// Integers feeding timestamp columns are epoch milliseconds.
pub fn coerce(value: &Value, field_type: FieldType) -> Result<Value, String> {
    let mismatch = || format!("cannot convert {:?} to {}", value, field_type);

    let coerced = match (field_type, value) {
        (_, Value::Null) => Value::Null,

        (FieldType::String, Value::String(s)) => Value::String(s.clone()),
        (FieldType::String, Value::Int(i)) => Value::String(i.to_string()),
        (FieldType::String, Value::Float(f)) => Value::String(f.to_string()),
        (FieldType::String, Value::Bool(b)) => Value::String(b.to_string()),
        (FieldType::String, Value::Timestamp(ts)) => Value::String(ts.to_rfc3339()),
        (FieldType::String, Value::Date(d)) => Value::String(d.to_string()),

        (FieldType::Integer, Value::Int(i)) => Value::Int(*i),
        (FieldType::Integer, Value::Float(f)) if f.fract() == 0.0 && fits_i64(*f) => {
            Value::Int(*f as i64)
        }
        (FieldType::Integer, Value::String(s)) => {
            Value::Int(s.trim().parse().map_err(|_| mismatch())?)
        }

        (FieldType::Float, Value::Float(f)) => Value::Float(*f),
        (FieldType::Float, Value::Int(i)) => Value::Float(*i as f64),
        (FieldType::Float, Value::String(s)) => {
            Value::Float(s.trim().parse().map_err(|_| mismatch())?)
        }

        (FieldType::Boolean, Value::Bool(b)) => Value::Bool(*b),
        (FieldType::Boolean, Value::String(s)) => match s.trim() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(mismatch()),
        },

        (FieldType::Timestamp, Value::Timestamp(ts)) => Value::Timestamp(*ts),
        (FieldType::Timestamp, Value::String(s)) => Value::Timestamp(
            DateTime::parse_from_rfc3339(s.trim())
                .map_err(|_| mismatch())?
                .with_timezone(&Utc),
        ),
        (FieldType::Timestamp, Value::Int(ms)) => {
            Value::Timestamp(DateTime::from_timestamp_millis(*ms).ok_or_else(mismatch)?)
        }

        (FieldType::Date, Value::Date(d)) => Value::Date(*d),
        (FieldType::Date, Value::Timestamp(ts)) => Value::Date(ts.date_naive()),
        (FieldType::Date, Value::String(s)) => Value::Date(
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| mismatch())?,
        ),

        (FieldType::Bytes, Value::Bytes(b)) => Value::Bytes(b.clone()),
        (FieldType::Bytes, Value::String(s)) => Value::Bytes(s.as_bytes().to_vec()),

        _ => return Err(mismatch()),
    };

    Ok(coerced)
}
