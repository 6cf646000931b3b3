//! Core abstractions for the chunked table copy.
//!
//! - [`schema`]: table identity and column order
//! - [`value`]: column values, rows and row batches
//! - [`traits`]: connection provider, source reader and target writer seams
//! - [`identifier`]: identifier validation and quoting
//!
//! Driver modules (`drivers/postgres`) implement the traits; the transfer and
//! orchestrator modules only depend on the traits, so the whole read/write
//! loop can be exercised against an in-memory provider.

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{ColumnOrder, TableIdentity};
pub use traits::{ConnectionProvider, SourceReader, TargetWriter};
pub use value::{Row, RowBatch, SqlValue};
