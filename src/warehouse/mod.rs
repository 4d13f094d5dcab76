//! Warehouse client boundary and table reconciliation.
//!
//! `Warehouse` is the interface the pipeline consumes; `duckdb` is the bundled
//! implementation. Table definitions are computed in `definition` and
//! converged against the remote state in `reconcile`.

pub mod definition;
pub mod duckdb;
pub mod reconcile;

use crate::model::Value;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub use definition::{compute_definition, observed_schema, DefinitionError};
pub use reconcile::{Outcome, ReconcileError, TableReconciler, UpsertReport};

pub type Labels = BTreeMap<String, String>;

/// One row to insert, as column name and value pairs.
pub type Row = Vec<(String, Value)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Date,
    Bytes,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Timestamp => "timestamp",
            FieldType::Date => "date",
            FieldType::Bytes => "bytes",
        }
    }

    /// Whether a column of this type can back time-based partitioning.
    pub fn is_time_based(&self) -> bool {
        matches!(self, FieldType::Timestamp | FieldType::Date)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldMode {
    #[default]
    Nullable,
    Required,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub mode: FieldMode,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            mode: FieldMode::Nullable,
        }
    }

    pub fn required(mut self) -> Self {
        self.mode = FieldMode::Required;
        self
    }
}

/// Ordered list of fields. Equality is order-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn of(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePartitioning {
    pub field: String,
    /// None means partitions never expire.
    #[serde(default, with = "humantime_serde")]
    pub expiration: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub schema: Schema,
    #[serde(default)]
    pub time_partitioning: Option<TimePartitioning>,
}

impl TableDefinition {
    pub fn of(schema: Schema) -> Self {
        Self {
            schema,
            time_partitioning: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableId {
    pub dataset: String,
    pub table: String,
}

impl TableId {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetInfo {
    pub dataset: String,
    pub location: String,
    pub labels: Labels,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub id: TableId,
    pub definition: TableDefinition,
    pub labels: Labels,
}

/// A row the warehouse refused to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertError {
    pub row_index: usize,
    pub message: String,
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row_index, self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("incompatible schema change for {table}: {reason}")]
    IncompatibleSchema { table: String, reason: String },

    #[error("metadata error: {0}")]
    Metadata(String),
}

impl From<::duckdb::Error> for WarehouseError {
    fn from(e: ::duckdb::Error) -> Self {
        WarehouseError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for WarehouseError {
    fn from(e: serde_json::Error) -> Self {
        WarehouseError::Metadata(e.to_string())
    }
}

/// Operations the pipeline needs from a warehouse.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn get_dataset(&self, dataset: &str) -> Result<Option<DatasetInfo>, WarehouseError>;

    async fn create_dataset(&self, dataset: &DatasetInfo) -> Result<(), WarehouseError>;

    /// Replace the labels of an existing dataset. Location is never touched.
    async fn update_dataset(&self, dataset: &str, labels: &Labels) -> Result<(), WarehouseError>;

    async fn get_table(&self, id: &TableId) -> Result<Option<TableInfo>, WarehouseError>;

    async fn create_table(&self, table: &TableInfo) -> Result<(), WarehouseError>;

    async fn update_table(&self, table: &TableInfo) -> Result<(), WarehouseError>;

    /// Insert rows. Rejected rows are returned; an empty list means every row landed.
    async fn insert_rows(&self, id: &TableId, rows: Vec<Row>)
        -> Result<Vec<InsertError>, WarehouseError>;
}
