//! Configuration validation.

use super::{Config, ConnectionConfig, MigrationConfig};
use crate::core::identifier::validate_identifier;
use crate::core::schema::TableIdentity;
use crate::drivers::common::SslMode;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_run(
        &config.source,
        &config.target,
        &config.tables.source,
        &config.tables.target,
        &config.migration,
    )
}

/// Pre-flight checks for one run. Nothing here touches the network.
pub(crate) fn validate_run(
    source: &ConnectionConfig,
    target: &ConnectionConfig,
    source_table: &TableIdentity,
    target_table: &TableIdentity,
    migration: &MigrationConfig,
) -> Result<()> {
    if migration.chunk_size == 0 {
        return Err(MigrateError::Config(
            "migration.chunk_size must be at least 1".into(),
        ));
    }

    validate_connection("source", source)?;
    validate_connection("target", target)?;

    validate_table("source", source_table)?;
    validate_table("target", target_table)?;

    // Appending a table onto itself would duplicate every row it scans.
    if source.host == target.host
        && source.port == target.port
        && source.database == target.database
        && source_table == target_table
    {
        return Err(MigrateError::Config(format!(
            "source and target cannot be the same table ({} on {})",
            source_table,
            source.endpoint()
        )));
    }

    Ok(())
}

fn validate_connection(side: &str, config: &ConnectionConfig) -> Result<()> {
    if config.host.is_empty() {
        return Err(MigrateError::Config(format!("{}.host is required", side)));
    }
    if config.database.is_empty() {
        return Err(MigrateError::Config(format!(
            "{}.database is required",
            side
        )));
    }
    if config.user.is_empty() {
        return Err(MigrateError::Config(format!("{}.user is required", side)));
    }
    if config.port == 0 {
        return Err(MigrateError::Config(format!("{}.port must be non-zero", side)));
    }
    config.ssl_mode.parse::<SslMode>()?;
    Ok(())
}

fn validate_table(side: &str, table: &TableIdentity) -> Result<()> {
    validate_identifier(&table.schema)
        .map_err(|e| MigrateError::Config(format!("tables.{}.schema: {}", side, e)))?;
    validate_identifier(&table.table)
        .map_err(|e| MigrateError::Config(format!("tables.{}.table: {}", side, e)))?;
    Ok(())
}
