//! PostgreSQL driver.
//!
//! - [`PgConnectionProvider`]: opens source and target sessions
//! - [`PgSource`]: catalog introspection and server-side cursor scans
//! - [`PgTarget`]: transactional batch inserts

mod connection;
mod reader;
mod writer;

pub use connection::PgConnectionProvider;
pub use reader::PgSource;
pub use writer::PgTarget;

/// Render a tokio-postgres error with the server's message when there is one.
pub(crate) fn describe(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => format!(
            "{}: {} (SQLSTATE {})",
            db.severity(),
            db.message(),
            db.code().code()
        ),
        None => err.to_string(),
    }
}
