//! PostgreSQL target writer.
//!
//! Each batch is inserted inside its own transaction with one prepared
//! statement. The statement's executions are pipelined on the connection and
//! the transaction either commits as a whole or is rolled back.

use async_trait::async_trait;
use futures::future::try_join_all;
use tokio_postgres::types::ToSql;
use tracing::{debug, warn};

use crate::core::identifier::{column_list_pg, placeholders_pg, qualify_pg};
use crate::core::schema::{ColumnOrder, TableIdentity};
use crate::core::traits::TargetWriter;
use crate::core::value::RowBatch;
use crate::error::{MigrateError, Result};

use super::connection::PgSession;
use super::describe;

/// Write session on the target database.
pub struct PgTarget {
    session: PgSession,
}

impl PgTarget {
    pub(crate) fn new(session: PgSession) -> Self {
        Self { session }
    }
}

/// Build the parameterised INSERT for one row.
fn insert_sql(table: &TableIdentity, columns: &ColumnOrder) -> Result<String> {
    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualify_pg(&table.schema, &table.table)?,
        column_list_pg(columns.names())?,
        placeholders_pg(columns.len())
    ))
}

#[async_trait]
impl TargetWriter for PgTarget {
    async fn write_batch(
        &mut self,
        table: &TableIdentity,
        columns: &ColumnOrder,
        batch: &RowBatch,
    ) -> Result<u64> {
        let rows = batch.len();
        let fail = |cause: String| MigrateError::write(batch.index, rows, cause);

        if let Some(bad) = batch.rows.iter().find(|r| r.len() != columns.len()) {
            return Err(fail(format!(
                "row has {} values but {} columns are being inserted",
                bad.len(),
                columns.len()
            )));
        }

        let sql = insert_sql(table, columns)?;

        let tx = self
            .session
            .client
            .transaction()
            .await
            .map_err(|e| fail(describe(&e)))?;

        let inserted: std::result::Result<u64, tokio_postgres::Error> = async {
            let stmt = tx.prepare(&sql).await?;
            let params: Vec<Vec<&(dyn ToSql + Sync)>> = batch
                .rows
                .iter()
                .map(|row| row.iter().map(|v| v as &(dyn ToSql + Sync)).collect())
                .collect();
            let counts =
                try_join_all(params.iter().map(|p| tx.execute(&stmt, p.as_slice()))).await?;
            Ok(counts.iter().sum())
        }
        .await;

        match inserted {
            Ok(count) => {
                tx.commit().await.map_err(|e| fail(describe(&e)))?;
                debug!("Committed {} rows into {}", count, table);
                Ok(count)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(
                        "Rollback of chunk {} failed (connection will discard it): {}",
                        batch.index,
                        describe(&rb)
                    );
                }
                Err(fail(describe(&e)))
            }
        }
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

    async fn close(self) -> Result<()> {
        self.session.close();
        Ok(())
    }
}
