//! Core traits for the chunked table copy.
//!
//! - [`ConnectionProvider`]: opens one source handle and one target handle
//! - [`SourceReader`]: catalog introspection and cursor-based row scanning
//! - [`TargetWriter`]: all-or-nothing batch insertion
//!
//! Handles are owned by exactly one side of one run. `close` consumes the
//! handle, so a handle is released at most once; the orchestrator makes sure
//! it is released at least once.

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::error::Result;

use super::schema::{ColumnOrder, TableIdentity};
use super::value::{Row, RowBatch};

/// Opens database sessions from connection blueprints.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Handle type used for reading.
    type Source: SourceReader;

    /// Handle type used for writing.
    type Target: TargetWriter;

    /// Open a session to read the source table.
    ///
    /// Fails with `MigrateError::Connection` when the server is unreachable,
    /// credentials are rejected or the database does not exist.
    async fn connect_source(&self, config: &ConnectionConfig) -> Result<Self::Source>;

    /// Open a session to write the target table.
    async fn connect_target(&self, config: &ConnectionConfig) -> Result<Self::Target>;
}

/// Read side of a migration.
#[async_trait]
pub trait SourceReader: Send {
    /// Column names of `table` in declared ordinal order.
    ///
    /// Fails with `MigrateError::Schema` when the table does not exist or
    /// the catalog cannot be read. Does not read any row data.
    async fn column_order(&mut self, table: &TableIdentity) -> Result<ColumnOrder>;

    /// Start a single forward-only scan of `table` projecting `columns`.
    async fn open_scan(&mut self, table: &TableIdentity, columns: &ColumnOrder) -> Result<()>;

    /// Fetch up to `max_rows` rows from the open scan.
    ///
    /// An empty vector means the scan is exhausted. Errors are
    /// `MigrateError::Read` and are fatal to the run.
    async fn fetch_rows(&mut self, max_rows: usize) -> Result<Vec<Row>>;

    /// End the scan and release its server-side resources.
    async fn close_scan(&mut self) -> Result<()>;

    /// `count(*)` of a table.
    async fn row_count(&mut self, table: &TableIdentity) -> Result<i64>;

    /// Release the session.
    ///
    /// A scan still open here was interrupted and is discarded with the
    /// session rather than closed.
    async fn close(self) -> Result<()>;
}

/// Write side of a migration.
#[async_trait]
pub trait TargetWriter: Send {
    /// Insert every row of `batch` into `table` in one transaction and commit.
    ///
    /// Either all rows become visible or none do. Returns the number of
    /// rows inserted. Implementations must not retry.
    async fn write_batch(
        &mut self,
        table: &TableIdentity,
        columns: &ColumnOrder,
        batch: &RowBatch,
    ) -> Result<u64>;

    /// `count(*)` of a table.
    async fn row_count(&mut self, table: &TableIdentity) -> Result<i64>;

    /// Release the session.
    async fn close(self) -> Result<()>;
}
