//! PostgreSQL source reader.
//!
//! Scans use a `NO SCROLL` cursor inside a read-only REPEATABLE READ
//! transaction, so every `FETCH` sees the same snapshot and the client never
//! holds more than one chunk in memory.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::identifier::{column_list_pg, qualify_pg};
use crate::core::schema::{ColumnOrder, TableIdentity};
use crate::core::traits::SourceReader;
use crate::core::value::{Row, SqlValue};
use crate::error::{MigrateError, Result};

use super::connection::PgSession;
use super::describe;

const SCAN_CURSOR: &str = "pg_table_migrate_scan";

const COLUMNS_QUERY: &str = r#"
    SELECT column_name::text
    FROM information_schema.columns
    WHERE table_schema = $1 AND table_name = $2
    ORDER BY ordinal_position
"#;

/// Read-only session on the source database.
pub struct PgSource {
    session: PgSession,
    /// Table being scanned, if a cursor is open.
    scanning: Option<String>,
}

impl PgSource {
    pub(crate) fn new(session: PgSession) -> Self {
        Self {
            session,
            scanning: None,
        }
    }

    fn scan_table(&self) -> String {
        self.scanning
            .clone()
            .unwrap_or_else(|| self.session.endpoint.clone())
    }
}

/// Build the cursor declaration for a full-table scan.
fn declare_cursor_sql(table: &TableIdentity, columns: &ColumnOrder) -> Result<String> {
    Ok(format!(
        "DECLARE {} NO SCROLL CURSOR FOR SELECT {} FROM {}",
        SCAN_CURSOR,
        column_list_pg(columns.names())?,
        qualify_pg(&table.schema, &table.table)?
    ))
}

#[async_trait]
impl SourceReader for PgSource {
    async fn column_order(&mut self, table: &TableIdentity) -> Result<ColumnOrder> {
        let rows = self
            .session
            .client
            .query(COLUMNS_QUERY, &[&table.schema, &table.table])
            .await
            .map_err(|e| MigrateError::schema(table.to_string(), describe(&e)))?;

        let names = rows
            .iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| MigrateError::schema(table.to_string(), describe(&e)))?;

        let columns = ColumnOrder::from_catalog(table, names)?;
        debug!("Loaded {} columns for {}: {}", columns.len(), table, columns);
        Ok(columns)
    }

    async fn open_scan(&mut self, table: &TableIdentity, columns: &ColumnOrder) -> Result<()> {
        if self.scanning.is_some() {
            return Err(MigrateError::read(
                table.to_string(),
                "a scan is already open on this connection",
            ));
        }

        let declare = declare_cursor_sql(table, columns)?;
        debug!("Cursor query: {}", declare);

        let sql = format!(
            "BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY; {};",
            declare
        );
        if let Err(e) = self.session.client.batch_execute(&sql).await {
            // The BEGIN may have succeeded; leave the connection clean for close().
            if let Err(rollback) = self.session.client.batch_execute("ROLLBACK").await {
                warn!(
                    "Rollback after failed scan of {} also failed: {}",
                    table,
                    describe(&rollback)
                );
            }
            return Err(MigrateError::read(table.to_string(), describe(&e)));
        }

        self.scanning = Some(table.to_string());
        Ok(())
    }

    async fn fetch_rows(&mut self, max_rows: usize) -> Result<Vec<Row>> {
        let table = self.scan_table();
        if self.scanning.is_none() {
            return Err(MigrateError::read(table, "fetch without an open scan"));
        }

        let sql = format!("FETCH FORWARD {} FROM {}", max_rows, SCAN_CURSOR);
        let rows = self
            .session
            .client
            .query(sql.as_str(), &[])
            .await
            .map_err(|e| MigrateError::read(&table, describe(&e)))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(row.len());
            for idx in 0..row.len() {
                let value = row
                    .try_get::<_, SqlValue>(idx)
                    .map_err(|e| MigrateError::read(&table, describe(&e)))?;
                values.push(value);
            }
            out.push(values);
        }

        Ok(out)
    }

    async fn close_scan(&mut self) -> Result<()> {
        let Some(table) = self.scanning.take() else {
            return Ok(());
        };

        let sql = format!("CLOSE {}; COMMIT;", SCAN_CURSOR);
        self.session
            .client
            .batch_execute(&sql)
            .await
            .map_err(|e| MigrateError::read(table, describe(&e)))
    }

    async fn row_count(&mut self, table: &TableIdentity) -> Result<i64> {
        let sql = format!(
            "SELECT count(*)::int8 FROM {}",
            qualify_pg(&table.schema, &table.table)?
        );
        let row = self
            .session
            .client
            .query_one(sql.as_str(), &[])
            .await
            .map_err(|e| MigrateError::schema(table.to_string(), describe(&e)))?;
        row.try_get::<_, i64>(0)
            .map_err(|e| MigrateError::schema(table.to_string(), describe(&e)))
    }

    /// A scan still open here was interrupted, and its FETCH may still be
    /// queued on the connection. The connection is dropped without
    /// `CLOSE`/`COMMIT`; the server ends the transaction when it goes away.
    async fn close(self) -> Result<()> {
        if let Some(table) = &self.scanning {
            warn!(
                "Dropping source connection with the scan of {} still open",
                table
            );
        }
        self.session.close();
        Ok(())
    }
}
