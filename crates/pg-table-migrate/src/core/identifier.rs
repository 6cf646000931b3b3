//! Identifier validation and quoting for dynamically built SQL.
//!
//! Schema, table and column names cannot be bound as statement parameters, so
//! every statement that names a table is assembled as text. Identifiers are
//! validated first (no NUL bytes, nothing PostgreSQL would silently truncate)
//! and then double-quoted with embedded quotes doubled.

use crate::error::{MigrateError, Result};

/// PostgreSQL truncates identifiers longer than NAMEDATALEN - 1 bytes.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier.
///
/// Rejects empty identifiers, identifiers containing NUL bytes and
/// identifiers longer than PostgreSQL keeps.
///
/// # Errors
///
/// Returns `MigrateError::Config` for invalid identifiers.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// ```ignore
/// assert_eq!(quote_pg("users")?, "\"users\"");
/// assert_eq!(quote_pg("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a PostgreSQL table name with schema.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

/// Quote and comma-join a column list.
pub fn column_list_pg<S: AsRef<str>>(columns: &[S]) -> Result<String> {
    let quoted = columns
        .iter()
        .map(|c| quote_pg(c.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// `$1, $2, ..., $n`
pub fn placeholders_pg(count: usize) -> String {
    (1..=count)
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ")
}
