use super::{
    DatasetInfo, Field, FieldMode, FieldType, InsertError, Labels, Row, TableDefinition, TableId,
    TableInfo, Warehouse, WarehouseError,
};
use crate::model::Value;
use async_trait::async_trait;
use duckdb::types::Value as DbValue;
use duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Warehouse backed by a DuckDB database file.
///
/// Datasets map to schemas and tables to tables inside them. Locations,
/// labels and table definitions have no DuckDB equivalent and live in two
/// metadata tables next to the data.
pub struct DuckDbWarehouse {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbWarehouse {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, WarehouseError> {
        let conn = Connection::open(path.as_ref())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory warehouse (for testing)
    pub fn in_memory() -> Result<Self, WarehouseError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn init_schema(&self) -> Result<(), WarehouseError> {
        self.with_conn(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS sluice_datasets (
                    name VARCHAR PRIMARY KEY,
                    location VARCHAR NOT NULL,
                    labels VARCHAR NOT NULL
                )",
                [],
            )?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS sluice_tables (
                    dataset VARCHAR NOT NULL,
                    name VARCHAR NOT NULL,
                    definition VARCHAR NOT NULL,
                    labels VARCHAR NOT NULL,
                    PRIMARY KEY (dataset, name)
                )",
                [],
            )?;

            Ok(())
        })
        .await
    }

    /// Number of rows currently stored in a table.
    pub async fn row_count(&self, id: &TableId) -> Result<i64, WarehouseError> {
        let sql = format!("SELECT count(*) FROM {}", qualified(id));
        self.with_conn(move |conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))
            .await
    }

    /// Physical column names of a table, in table order.
    pub async fn column_names(&self, id: &TableId) -> Result<Vec<String>, WarehouseError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT column_name FROM information_schema.columns
                 WHERE table_schema = ? AND table_name = ?
                 ORDER BY ordinal_position",
            )?;
            let names = stmt
                .query_map(duckdb::params![id.dataset, id.table], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(names)
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, WarehouseError>
    where
        F: FnOnce(&mut Connection) -> Result<T, WarehouseError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| WarehouseError::Database("connection lock poisoned".to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| WarehouseError::Database(format!("Task join error: {}", e)))?
    }
}

#[async_trait]
impl Warehouse for DuckDbWarehouse {
    async fn get_dataset(&self, dataset: &str) -> Result<Option<DatasetInfo>, WarehouseError> {
        let dataset = dataset.to_string();
        self.with_conn(move |conn| load_dataset(conn, &dataset)).await
    }

    async fn create_dataset(&self, dataset: &DatasetInfo) -> Result<(), WarehouseError> {
        let dataset = dataset.clone();
        let labels = serde_json::to_string(&dataset.labels)?;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(&format!(
                "CREATE SCHEMA IF NOT EXISTS {}",
                quote_ident(&dataset.dataset)
            ))?;
            tx.execute(
                "INSERT INTO sluice_datasets (name, location, labels) VALUES (?, ?, ?)",
                duckdb::params![dataset.dataset, dataset.location, labels],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn update_dataset(&self, dataset: &str, labels: &Labels) -> Result<(), WarehouseError> {
        let dataset = dataset.to_string();
        let labels = serde_json::to_string(labels)?;

        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE sluice_datasets SET labels = ? WHERE name = ?",
                duckdb::params![labels, dataset],
            )?;
            if updated == 0 {
                return Err(WarehouseError::NotFound(format!("dataset {}", dataset)));
            }
            Ok(())
        })
        .await
    }

    async fn get_table(&self, id: &TableId) -> Result<Option<TableInfo>, WarehouseError> {
        let id = id.clone();
        self.with_conn(move |conn| load_table(conn, &id)).await
    }

    async fn create_table(&self, table: &TableInfo) -> Result<(), WarehouseError> {
        let table = table.clone();
        let definition = serde_json::to_string(&table.definition)?;
        let labels = serde_json::to_string(&table.labels)?;

        self.with_conn(move |conn| {
            if load_dataset(conn, &table.id.dataset)?.is_none() {
                return Err(WarehouseError::NotFound(format!(
                    "dataset {}",
                    table.id.dataset
                )));
            }

            let columns = table
                .definition
                .schema
                .fields
                .iter()
                .map(column_ddl)
                .collect::<Vec<_>>()
                .join(", ");

            let tx = conn.transaction()?;
            tx.execute_batch(&format!(
                "CREATE TABLE {} ({})",
                qualified(&table.id),
                columns
            ))?;
            tx.execute(
                "INSERT INTO sluice_tables (dataset, name, definition, labels) VALUES (?, ?, ?, ?)",
                duckdb::params![table.id.dataset, table.id.table, definition, labels],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn update_table(&self, table: &TableInfo) -> Result<(), WarehouseError> {
        let table = table.clone();
        let definition = serde_json::to_string(&table.definition)?;
        let labels = serde_json::to_string(&table.labels)?;

        self.with_conn(move |conn| {
            let existing = load_table(conn, &table.id)?
                .ok_or_else(|| WarehouseError::NotFound(format!("table {}", table.id)))?;

            let statements = plan_alterations(&existing.definition, &table.definition, &table.id)?;

            let tx = conn.transaction()?;
            for statement in &statements {
                tx.execute_batch(statement)?;
            }
            tx.execute(
                "UPDATE sluice_tables SET definition = ?, labels = ? WHERE dataset = ? AND name = ?",
                duckdb::params![definition, labels, table.id.dataset, table.id.table],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn insert_rows(
        &self,
        id: &TableId,
        rows: Vec<Row>,
    ) -> Result<Vec<InsertError>, WarehouseError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let id = id.clone();
        self.with_conn(move |conn| {
            if load_table(conn, &id)?.is_none() {
                return Err(WarehouseError::NotFound(format!("table {}", id)));
            }

            // All or nothing: the first rejected row rolls back the whole request.
            let tx = conn.transaction()?;
            for (row_index, row) in rows.into_iter().enumerate() {
                if let Err(e) = insert_row(&tx, &id, row) {
                    tx.rollback()?;
                    return Ok(vec![InsertError {
                        row_index,
                        message: e.to_string(),
                    }]);
                }
            }
            tx.commit()?;
            Ok(Vec::new())
        })
        .await
    }
}

fn load_dataset(conn: &Connection, name: &str) -> Result<Option<DatasetInfo>, WarehouseError> {
    let mut stmt = conn.prepare("SELECT location, labels FROM sluice_datasets WHERE name = ?")?;
    let mut rows = stmt.query(duckdb::params![name])?;

    if let Some(row) = rows.next()? {
        let location: String = row.get(0)?;
        let labels: String = row.get(1)?;
        Ok(Some(DatasetInfo {
            dataset: name.to_string(),
            location,
            labels: serde_json::from_str(&labels)?,
        }))
    } else {
        Ok(None)
    }
}

fn load_table(conn: &Connection, id: &TableId) -> Result<Option<TableInfo>, WarehouseError> {
    let mut stmt =
        conn.prepare("SELECT definition, labels FROM sluice_tables WHERE dataset = ? AND name = ?")?;
    let mut rows = stmt.query(duckdb::params![id.dataset, id.table])?;

    if let Some(row) = rows.next()? {
        let definition: String = row.get(0)?;
        let labels: String = row.get(1)?;
        Ok(Some(TableInfo {
            id: id.clone(),
            definition: serde_json::from_str(&definition)?,
            labels: serde_json::from_str(&labels)?,
        }))
    } else {
        Ok(None)
    }
}

/// DDL needed to move a table from `current` to `desired`.
///
/// Only additive changes are allowed: nullable columns may be added and
/// required columns relaxed. Partition expiry is metadata only.
fn plan_alterations(
    current: &TableDefinition,
    desired: &TableDefinition,
    id: &TableId,
) -> Result<Vec<String>, WarehouseError> {
    let incompatible = |reason: String| WarehouseError::IncompatibleSchema {
        table: id.to_string(),
        reason,
    };

    match (&current.time_partitioning, &desired.time_partitioning) {
        (None, None) => {}
        (Some(a), Some(b)) if a.field == b.field => {}
        (None, Some(_)) => {
            return Err(incompatible(
                "time partitioning cannot be added to an existing table".to_string(),
            ))
        }
        (Some(_), None) => {
            return Err(incompatible(
                "time partitioning cannot be removed".to_string(),
            ))
        }
        (Some(a), Some(b)) => {
            return Err(incompatible(format!(
                "partition field cannot change from {} to {}",
                a.field, b.field
            )))
        }
    }

    let table = qualified(id);
    let mut statements = Vec::new();

    for field in &current.schema.fields {
        let Some(wanted) = desired.schema.field(&field.name) else {
            return Err(incompatible(format!("column {} cannot be removed", field.name)));
        };
        if wanted.field_type != field.field_type {
            return Err(incompatible(format!(
                "column {} cannot change type from {} to {}",
                field.name, field.field_type, wanted.field_type
            )));
        }
        match (field.mode, wanted.mode) {
            (FieldMode::Nullable, FieldMode::Required) => {
                return Err(incompatible(format!(
                    "column {} cannot become required",
                    field.name
                )))
            }
            (FieldMode::Required, FieldMode::Nullable) => statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL",
                table,
                quote_ident(&field.name)
            )),
            _ => {}
        }
    }

    for field in &desired.schema.fields {
        if current.schema.field(&field.name).is_some() {
            continue;
        }
        if field.mode == FieldMode::Required {
            return Err(incompatible(format!(
                "new column {} must be nullable",
                field.name
            )));
        }
        statements.push(format!("ALTER TABLE {} ADD COLUMN {}", table, column_ddl(field)));
    }

    Ok(statements)
}

fn insert_row(conn: &Connection, id: &TableId, row: Row) -> Result<(), duckdb::Error> {
    let columns = row
        .iter()
        .map(|(name, _)| quote_ident(name))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = row
        .iter()
        .map(|(_, value)| placeholder(value))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified(id),
        columns,
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.execute(duckdb::params_from_iter(
        row.into_iter().map(|(_, value)| to_db_value(value)),
    ))?;
    Ok(())
}

/// Temporal values are bound as text and cast on the database side.
fn placeholder(value: &Value) -> &'static str {
    match value {
        Value::Timestamp(_) => "CAST(? AS TIMESTAMP)",
        Value::Date(_) => "CAST(? AS DATE)",
        _ => "?",
    }
}

fn to_db_value(value: Value) -> DbValue {
    match value {
        Value::Null => DbValue::Null,
        Value::Bool(b) => DbValue::Boolean(b),
        Value::Int(i) => DbValue::BigInt(i),
        Value::Float(f) => DbValue::Double(f),
        Value::Timestamp(ts) => DbValue::Text(ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
        Value::Date(d) => DbValue::Text(d.format("%Y-%m-%d").to_string()),
        Value::String(s) => DbValue::Text(s),
        Value::Bytes(b) => DbValue::Blob(b),
    }
}

fn column_ddl(field: &Field) -> String {
    let not_null = match field.mode {
        FieldMode::Required => " NOT NULL",
        FieldMode::Nullable => "",
    };
    format!(
        "{} {}{}",
        quote_ident(&field.name),
        sql_type(field.field_type),
        not_null
    )
}

fn sql_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::String => "VARCHAR",
        FieldType::Integer => "BIGINT",
        FieldType::Float => "DOUBLE",
        FieldType::Boolean => "BOOLEAN",
        FieldType::Timestamp => "TIMESTAMP",
        FieldType::Date => "DATE",
        FieldType::Bytes => "BLOB",
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn qualified(id: &TableId) -> String {
    format!("{}.{}", quote_ident(&id.dataset), quote_ident(&id.table))
}
