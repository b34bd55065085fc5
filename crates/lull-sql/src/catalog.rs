//! Schema catalog used to whitelist identifiers before they reach SQL text.
//!
//! The catalog mirrors `database -> table -> columns` for one backing
//! connection. It is only ever changed by an explicit [`SchemaCatalog::refresh`];
//! compilation reads it under the same lock so validation never observes a
//! half-applied refresh.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::errors::{CatalogError, SourceError};

const CATALOG_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::catalog");

/// Lists the schema of a backing connection.
pub trait SchemaSource {
    /// Names of the databases reachable through the connection.
    ///
    /// # Errors
    ///
    /// Returns the backend failure when the listing query fails.
    fn databases(&self) -> Result<Vec<String>, SourceError>;

    /// Tables in `database`.
    ///
    /// # Errors
    ///
    /// Returns the backend failure when the listing query fails.
    fn tables(&self, database: &str) -> Result<Vec<String>, SourceError>;

    /// Columns of `database.table`.
    ///
    /// # Errors
    ///
    /// Returns the backend failure when the listing query fails.
    fn columns(&self, database: &str, table: &str) -> Result<Vec<String>, SourceError>;
}

/// Point-in-time view of known databases, tables and columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    databases: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
}

impl Schema {
    /// Builds a schema from `(database, table, columns)` triples.
    #[must_use]
    pub fn from_tables<'a>(
        tables: impl IntoIterator<Item = (&'a str, &'a str, &'a [&'a str])>,
    ) -> Self {
        let mut schema = Self::default();
        for (database, table, columns) in tables {
            schema
                .databases
                .entry(database.to_owned())
                .or_default()
                .insert(
                    table.to_owned(),
                    columns.iter().map(|column| (*column).to_owned()).collect(),
                );
        }
        schema
    }

    /// Checks that the given scope is known.
    ///
    /// `table` and `column` may be empty to validate a coarser scope; a column
    /// without a table is treated as a table-level check.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownIdentifier`] naming the missing scope.
    pub fn validate(&self, database: &str, table: &str, column: &str) -> Result<(), CatalogError> {
        let tables = self
            .databases
            .get(database)
            .ok_or_else(|| CatalogError::unknown(database, "", ""))?;
        if table.is_empty() {
            return Ok(());
        }
        let columns = tables
            .get(table)
            .ok_or_else(|| CatalogError::unknown(database, table, ""))?;
        if column.is_empty() || columns.contains(column) {
            Ok(())
        } else {
            Err(CatalogError::unknown(database, table, column))
        }
    }

    /// Returns `true` when `database` is known.
    #[must_use]
    pub fn has_database(&self, database: &str) -> bool {
        self.databases.contains_key(database)
    }

    /// Tables known for `database`, sorted.
    pub fn tables(&self, database: &str) -> impl Iterator<Item = &str> {
        self.databases
            .get(database)
            .into_iter()
            .flat_map(BTreeMap::keys)
            .map(String::as_str)
    }

    fn refresh_all(&mut self, source: &dyn SchemaSource) -> Result<(), CatalogError> {
        let databases = source
            .databases()
            .map_err(|source| CatalogError::Source {
                scope: String::from("*"),
                source,
            })?;
        self.databases.clear();
        for database in databases {
            self.databases.insert(database.clone(), BTreeMap::new());
            self.refresh_database(source, &database)?;
        }
        Ok(())
    }

    fn refresh_database(
        &mut self,
        source: &dyn SchemaSource,
        database: &str,
    ) -> Result<(), CatalogError> {
        let names = source.tables(database).map_err(|source| CatalogError::Source {
            scope: database.to_owned(),
            source,
        })?;
        let mut tables = BTreeMap::new();
        for table in names {
            let columns = list_columns(source, database, &table)?;
            tables.insert(table, columns);
        }
        self.databases.insert(database.to_owned(), tables);
        Ok(())
    }

    fn refresh_table(
        &mut self,
        source: &dyn SchemaSource,
        database: &str,
        table: &str,
    ) -> Result<(), CatalogError> {
        let columns = list_columns(source, database, table)?;
        let tables = self
            .databases
            .get_mut(database)
            .ok_or_else(|| CatalogError::unknown(database, "", ""))?;
        tables.insert(table.to_owned(), columns);
        Ok(())
    }
}

fn list_columns(
    source: &dyn SchemaSource,
    database: &str,
    table: &str,
) -> Result<BTreeSet<String>, CatalogError> {
    source
        .columns(database, table)
        .map(|columns| columns.into_iter().collect())
        .map_err(|source| CatalogError::Source {
            scope: format!("{database}.{table}"),
            source,
        })
}

/// Lock-guarded [`Schema`] for one connection.
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    schema: Mutex<Schema>,
}

impl SchemaCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog seeded with `schema`.
    #[must_use]
    pub fn with_contents(schema: Schema) -> Self {
        Self {
            schema: Mutex::new(schema),
        }
    }

    /// Re-reads part of the schema from `source`.
    ///
    /// With both arguments empty every database is dropped and listed again.
    /// A database alone refreshes its tables and columns; a database and a
    /// table refresh that table's columns. Narrow scopes must already be
    /// known. The catalog is left untouched when listing fails.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownIdentifier`] for an unknown narrow scope
    /// and [`CatalogError::Source`] when listing fails.
    pub fn refresh(
        &self,
        source: &dyn SchemaSource,
        database: &str,
        table: &str,
    ) -> Result<(), CatalogError> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        if database.is_empty() {
            next.refresh_all(source)?;
        } else {
            next.validate(database, table, "")?;
            if table.is_empty() {
                next.refresh_database(source, database)?;
            } else {
                next.refresh_table(source, database, table)?;
            }
        }
        *guard = next;
        debug!(
            target: CATALOG_TARGET,
            database,
            table,
            "schema catalog refreshed"
        );
        Ok(())
    }

    /// Checks that the given scope is known; see [`Schema::validate`].
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownIdentifier`] for an unknown scope.
    pub fn validate(&self, database: &str, table: &str, column: &str) -> Result<(), CatalogError> {
        self.lock()?.validate(database, table, column)
    }

    /// Runs `action` against the schema while holding the catalog lock.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Poisoned`] when the lock is poisoned.
    pub fn with_schema<T>(&self, action: impl FnOnce(&Schema) -> T) -> Result<T, CatalogError> {
        let guard = self.lock()?;
        Ok(action(&guard))
    }

    /// Copy of the current schema.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Poisoned`] when the lock is poisoned.
    pub fn snapshot(&self) -> Result<Schema, CatalogError> {
        self.with_schema(Clone::clone)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Schema>, CatalogError> {
        self.schema.lock().map_err(|_| CatalogError::Poisoned)
    }
}
