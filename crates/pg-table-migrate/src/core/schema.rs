//! Table identity and column order.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableIdentity {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
}

impl TableIdentity {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Ordered, unique column names of the source table.
///
/// Derived once per run from the source catalog in declared ordinal order.
/// Every row read and every insert issued during the run is positional
/// against this list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnOrder(Vec<String>);

impl ColumnOrder {
    /// Build a column order from catalog rows already sorted by ordinal position.
    ///
    /// # Errors
    ///
    /// `MigrateError::Schema` when the list is empty (table missing or not
    /// visible) or contains a duplicate name.
    pub fn from_catalog(table: &TableIdentity, names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(MigrateError::schema(
                table.to_string(),
                "table does not exist or has no columns visible to this user",
            ));
        }

        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(MigrateError::schema(
                    table.to_string(),
                    format!("duplicate column name {:?} in catalog", name),
                ));
            }
        }

        Ok(Self(names))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl fmt::Display for ColumnOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}
