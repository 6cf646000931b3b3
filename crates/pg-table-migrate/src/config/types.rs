//! Configuration type definitions.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::schema::TableIdentity;

/// Default rows per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Root configuration structure, as loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database connection.
    pub source: ConnectionConfig,

    /// Target database connection.
    pub target: ConnectionConfig,

    /// Which table to read and which table to append to.
    pub tables: TablesConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Connection parameters for one side of a migration.
///
/// A blueprint only: it owns no resources until handed to a
/// [`ConnectionProvider`](crate::core::traits::ConnectionProvider).
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode: disable, require, verify-ca, verify-full (default: disable).
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
}

impl ConnectionConfig {
    /// Create a config with the default port and TLS disabled.
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_pg_port(),
            database: database.into(),
            user: user.into(),
            password: password.into(),
            ssl_mode: default_ssl_mode(),
        }
    }

    /// `host:port/database`, used to label connection errors and log lines.
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Source and target table identities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TablesConfig {
    pub source: TableIdentity,
    pub target: TableIdentity,
}

/// What to do when a chunk fails to insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkErrorPolicy {
    /// Log the failed chunk, count it, and move on. The chunk's rows are lost.
    #[default]
    Continue,

    /// Stop the run after the first failed chunk.
    Abort,
}

impl ChunkErrorPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkErrorPolicy::Continue => "continue",
            ChunkErrorPolicy::Abort => "abort",
        }
    }
}

impl fmt::Display for ChunkErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "continue" => Ok(ChunkErrorPolicy::Continue),
            "abort" => Ok(ChunkErrorPolicy::Abort),
            other => Err(format!(
                "invalid chunk error policy '{}' (expected 'continue' or 'abort')",
                other
            )),
        }
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Rows per chunk (default: 500). Zero is rejected before connecting.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Failure policy for chunk writes (default: continue).
    #[serde(default)]
    pub on_chunk_error: ChunkErrorPolicy,

    /// Seconds allowed for opening each connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Seconds allowed for each chunk fetch. Unset means no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_timeout_secs: Option<u64>,

    /// Seconds allowed for each chunk insert + commit. Unset means no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timeout_secs: Option<u64>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            on_chunk_error: ChunkErrorPolicy::default(),
            connect_timeout_secs: default_connect_timeout(),
            fetch_timeout_secs: None,
            commit_timeout_secs: None,
        }
    }
}

impl MigrationConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_policy(mut self, policy: ChunkErrorPolicy) -> Self {
        self.on_chunk_error = policy;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }

    pub fn commit_timeout(&self) -> Option<Duration> {
        self.commit_timeout_secs.map(Duration::from_secs)
    }
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_connect_timeout() -> u64 {
    30
}
