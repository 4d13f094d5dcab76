use super::definition::{compute_definition, observed_schema, DefinitionError};
use super::{DatasetInfo, Labels, TableDefinition, TableId, TableInfo, Warehouse, WarehouseError};
use crate::config::types::WarehouseConfig;
use crate::stats::{names, Stats};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Datasets never move between locations.
    #[error("dataset '{dataset}' location cannot be changed from {current} to {configured}")]
    DatasetLocationChanged {
        dataset: String,
        current: String,
        configured: String,
    },

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

/// What reconciliation did to a remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertReport {
    pub dataset: Outcome,
    pub table: Outcome,
}

/// Converges the destination dataset and table to the configured state.
///
/// Every step reads the current object, diffs it against the desired one and
/// only writes when something changed.
pub struct TableReconciler {
    warehouse: Arc<dyn Warehouse>,
    table_id: TableId,
    location: String,
    dataset_labels: Labels,
    stats: Arc<dyn Stats>,
}

impl TableReconciler {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        table_id: TableId,
        location: impl Into<String>,
        dataset_labels: Labels,
        stats: Arc<dyn Stats>,
    ) -> Self {
        Self {
            warehouse,
            table_id,
            location: location.into(),
            dataset_labels,
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
            &config.location,
            config.dataset_labels.clone(),
            stats,
        )
    }

    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }

    /// Compute the desired definition from the configured columns and upsert it.
    pub async fn reconcile(
        &self,
        config: &WarehouseConfig,
    ) -> Result<UpsertReport, ReconcileError> {
        let definition =
            compute_definition(observed_schema(&config.columns), &config.partitioning)?;
        self.upsert(definition, config.table_labels.clone()).await
    }

    pub async fn upsert(
        &self,
        definition: TableDefinition,
        labels: Labels,
    ) -> Result<UpsertReport, ReconcileError> {
        let dataset = self.upsert_dataset().await?;

        let desired = TableInfo {
            id: self.table_id.clone(),
            definition,
            labels,
        };
        let table = self.upsert_table(&desired).await?;

        Ok(UpsertReport { dataset, table })
    }

    async fn upsert_dataset(&self) -> Result<Outcome, ReconcileError> {
        let name = &self.table_id.dataset;

        match self.warehouse.get_dataset(name).await? {
            None => {
                self.warehouse
                    .create_dataset(&DatasetInfo {
                        dataset: name.clone(),
                        location: self.location.clone(),
                        labels: self.dataset_labels.clone(),
                    })
                    .await?;
                info!(dataset = %name, location = %self.location, "Created dataset");
                Ok(Outcome::Created)
            }
            Some(existing) => {
                if existing.location != self.location {
                    return Err(ReconcileError::DatasetLocationChanged {
                        dataset: name.clone(),
                        current: existing.location,
                        configured: self.location.clone(),
                    });
                }

                if existing.labels == self.dataset_labels {
                    return Ok(Outcome::Unchanged);
                }

                self.warehouse
                    .update_dataset(name, &self.dataset_labels)
                    .await?;
                self.stats.increment(names::DATASET_UPDATES);
                info!(dataset = %name, "Updated dataset labels");
                Ok(Outcome::Updated)
            }
        }
    }

    async fn upsert_table(&self, desired: &TableInfo) -> Result<Outcome, ReconcileError> {
        match self.warehouse.get_table(&desired.id).await? {
            None => {
                self.warehouse.create_table(desired).await?;
                info!(table = %desired.id, "Created table");
                Ok(Outcome::Created)
            }
            Some(existing) => {
                if !should_update_table(&existing, desired) {
                    info!(table = %desired.id, "Skipping table update, definition unchanged");
                    return Ok(Outcome::Unchanged);
                }

                let start = Instant::now();
                self.warehouse.update_table(desired).await?;
                self.stats.time_it(names::TABLE_UPDATE_TIME, start);
                self.stats.increment(names::TABLE_UPDATES);
                info!(table = %desired.id, "Updated table");
                Ok(Outcome::Updated)
            }
        }
    }
}

fn should_update_table(existing: &TableInfo, desired: &TableInfo) -> bool {
    existing.labels != desired.labels
        || existing.definition.schema != desired.definition.schema
        || partition_expiry_changed(&existing.definition, &desired.definition)
}

/// Only tables that are already partitioned can have their expiry changed.
/// A missing expiry and a zero expiry both mean never.
fn partition_expiry_changed(existing: &TableDefinition, desired: &TableDefinition) -> bool {
    let Some(current) = &existing.time_partitioning else {
        return false;
    };

    let current = current.expiration.unwrap_or(Duration::ZERO);
    let wanted = desired
        .time_partitioning
        .as_ref()
        .and_then(|p| p.expiration)
        .unwrap_or(Duration::ZERO);

    current != wanted
}
