//! PostgreSQL connection provider.
//!
//! Each handle wraps a single-connection deadpool pool. The pool gives us
//! create/wait timeouts and TLS wiring; closing the handle closes the pool.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::core::traits::ConnectionProvider;
use crate::drivers::common::SslMode;
use crate::error::{MigrateError, Result};

use super::reader::PgSource;
use super::writer::PgTarget;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens PostgreSQL sessions for both sides of a migration.
#[derive(Debug, Clone)]
pub struct PgConnectionProvider {
    connect_timeout: Duration,
}

impl Default for PgConnectionProvider {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl PgConnectionProvider {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl ConnectionProvider for PgConnectionProvider {
    type Source = PgSource;
    type Target = PgTarget;

    async fn connect_source(&self, config: &ConnectionConfig) -> Result<PgSource> {
        let session = PgSession::open(config, "source", self.connect_timeout).await?;
        Ok(PgSource::new(session))
    }

    async fn connect_target(&self, config: &ConnectionConfig) -> Result<PgTarget> {
        let session = PgSession::open(config, "target", self.connect_timeout).await?;
        Ok(PgTarget::new(session))
    }
}

/// One open PostgreSQL session plus the pool that owns it.
pub(crate) struct PgSession {
    pool: Pool,
    pub(crate) client: Object,
    pub(crate) endpoint: String,
}

impl PgSession {
    async fn open(config: &ConnectionConfig, role: &str, timeout: Duration) -> Result<Self> {
        let endpoint = config.endpoint();

        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("pg-table-migrate");

        // Connection options for reliability
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(timeout);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = match config.ssl_mode.parse::<SslMode>()?.connector()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!(
                    "PostgreSQL TLS is disabled for {} ({}). Credentials will be transmitted in plaintext.",
                    role, endpoint
                );
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
        };

        let pool = Pool::builder(mgr)
            .max_size(1)
            .runtime(Runtime::Tokio1)
            .create_timeout(Some(timeout))
            .wait_timeout(Some(timeout))
            .build()
            .map_err(|e| {
                MigrateError::connection(&endpoint, format!("creating {} pool: {}", role, e))
            })?;

        let client = pool.get().await.map_err(|e| {
            MigrateError::connection(&endpoint, format!("opening {} connection: {}", role, e))
        })?;

        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| MigrateError::connection(&endpoint, super::describe(&e)))?;

        info!("Connected to PostgreSQL {}: {}", role, endpoint);

        Ok(Self {
            pool,
            client,
            endpoint,
        })
    }

    /// Return the connection to the pool and shut the pool down.
    pub(crate) fn close(self) {
        let PgSession {
            pool,
            client,
            endpoint,
        } = self;
        drop(client);
        pool.close();
        debug!("Closed PostgreSQL connection: {}", endpoint);
    }
}
