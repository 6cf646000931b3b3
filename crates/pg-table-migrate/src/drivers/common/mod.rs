//! Utilities shared by driver implementations.
//!
//! - [`tls`]: TLS configuration for PostgreSQL connections

pub mod tls;

pub use tls::SslMode;
