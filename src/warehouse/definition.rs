use super::{Field, FieldType, Schema, TableDefinition, TimePartitioning};
use crate::config::types::{ColumnConfig, PartitioningConfig};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("partitioning is enabled but the partition key {0:?} is not a column of the table schema")]
    PartitionKeyNotSpecified(Option<String>),

    #[error("partition key '{key}' has type {field_type}; only time-based partitioning (timestamp or date) is supported")]
    UnsupportedPartitionType { key: String, field_type: FieldType },
}

/// Table schema implied by the configured columns, in column order.
pub fn observed_schema(columns: &[ColumnConfig]) -> Schema {
    Schema::of(
        columns
            .iter()
            .map(|c| Field {
                name: c.name.clone(),
                field_type: c.field_type,
                mode: c.mode,
            })
            .collect(),
    )
}

/// Desired table definition for a schema under the partitioning config.
pub fn compute_definition(
    schema: Schema,
    partitioning: &PartitioningConfig,
) -> Result<TableDefinition, DefinitionError> {
    if !partitioning.enabled {
        return Ok(TableDefinition::of(schema));
    }

    let key = partitioning
        .key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or(DefinitionError::PartitionKeyNotSpecified(None))?;

    let field = schema
        .field(key)
        .ok_or_else(|| DefinitionError::PartitionKeyNotSpecified(Some(key.to_string())))?;

    if !field.field_type.is_time_based() {
        return Err(DefinitionError::UnsupportedPartitionType {
            key: key.to_string(),
            field_type: field.field_type,
        });
    }

    let time_partitioning = TimePartitioning {
        field: key.to_string(),
        expiration: partition_expiry(partitioning.expiry_millis),
    };

    Ok(TableDefinition {
        schema,
        time_partitioning: Some(time_partitioning),
    })
}

/// Positive values expire partitions; zero or negative means never.
fn partition_expiry(expiry_millis: i64) -> Option<Duration> {
    u64::try_from(expiry_millis)
        .ok()
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis)
}
