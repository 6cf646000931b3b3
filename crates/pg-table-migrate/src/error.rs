//! Error types for the migration library.

use thiserror::Error;

/// Process exit codes, one per error kind.
pub const EXIT_CONFIG_ERROR: u8 = 1;
pub const EXIT_CONNECTION_ERROR: u8 = 2;
pub const EXIT_SCHEMA_ERROR: u8 = 3;
pub const EXIT_READ_ERROR: u8 = 4;
pub const EXIT_WRITE_ERROR: u8 = 5;
pub const EXIT_CANCELLED: u8 = 6;
pub const EXIT_IO_ERROR: u8 = 7;
pub const EXIT_VALIDATION_ERROR: u8 = 8;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Invalid chunk size, malformed identifier, bad config file contents.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network, authentication or missing-database failure (including timeouts).
    #[error("Connection error ({endpoint}): {message}")]
    Connection { endpoint: String, message: String },

    /// Table missing or catalog metadata not readable.
    #[error("Schema error for {table}: {message}")]
    Schema { table: String, message: String },

    /// Source scan interrupted. Always fatal.
    #[error("Read error on {table}: {message}")]
    Read { table: String, message: String },

    /// One chunk failed to insert and was rolled back.
    #[error("Write error on chunk {chunk_index} ({rows} rows): {cause}")]
    Write {
        chunk_index: u64,
        rows: usize,
        cause: String,
    },

    /// Row count validation failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Connection error for the given endpoint.
    pub fn connection(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Connection {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a Schema error for the given table.
    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Schema {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Read error for the given table.
    pub fn read(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Read {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Write error for a chunk.
    pub fn write(chunk_index: u64, rows: usize, cause: impl Into<String>) -> Self {
        MigrateError::Write {
            chunk_index,
            rows,
            cause: cause.into(),
        }
    }

    /// Whether the run may continue past this error under the `continue` policy.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MigrateError::Write { .. })
    }

    /// Exit code reported by the CLI for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::Json(_) => {
                EXIT_CONFIG_ERROR
            }
            MigrateError::Connection { .. } => EXIT_CONNECTION_ERROR,
            MigrateError::Schema { .. } => EXIT_SCHEMA_ERROR,
            MigrateError::Read { .. } => EXIT_READ_ERROR,
            MigrateError::Write { .. } => EXIT_WRITE_ERROR,
            MigrateError::Validation(_) => EXIT_VALIDATION_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
