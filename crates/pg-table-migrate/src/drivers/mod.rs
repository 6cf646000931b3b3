//! Database driver implementations.
//!
//! - [`postgres`]: PostgreSQL source reader, target writer and connection provider
//! - [`common`]: shared utilities (TLS)
//!
//! # Adding a driver
//!
//! 1. Create a module under `drivers/`
//! 2. Implement `SourceReader` and/or `TargetWriter` for its handles
//! 3. Implement `ConnectionProvider` to open them

pub mod common;
pub mod postgres;

pub use common::SslMode;
pub use postgres::{PgConnectionProvider, PgSource, PgTarget};
