//! # pg-table-migrate
//!
//! Chunked, transactional copy of one PostgreSQL table into another.
//!
//! Rows are streamed from a server-side cursor in batches of `chunk_size`
//! and each batch is inserted into the target in its own transaction:
//!
//! - **Bounded memory**: at most one chunk is held in memory
//! - **All-or-nothing chunks**: a failed chunk is rolled back in full
//! - **Failure policy**: `continue` (log the lost chunk and go on) or `abort`
//! - **Auditable**: every run ends with a summary of attempted, committed and
//!   failed chunks, even when it aborts
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_table_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.yaml")?;
//!     let result = Orchestrator::new(config).run(None).await?;
//!     println!("Migrated {} rows", result.run.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenient access
pub use crate::config::{
    ChunkErrorPolicy, Config, ConnectionConfig, MigrationConfig, TablesConfig, DEFAULT_CHUNK_SIZE,
};
pub use crate::core::{ColumnOrder, Row, RowBatch, SqlValue, TableIdentity};
pub use crate::core::{ConnectionProvider, SourceReader, TargetWriter};
pub use drivers::{PgConnectionProvider, PgSource, PgTarget};
pub use error::{MigrateError, Result};
pub use orchestrator::{
    migrate_table, FailedChunk, HealthCheckResult, MigrationAborted, MigrationResult,
    MigrationRun, Orchestrator, RunPhase, RunStatus, ValidationResult,
};
pub use transfer::{ChunkReader, ChunkWriter};
