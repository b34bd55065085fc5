//! Identifier resolution against a schema snapshot.

use crate::catalog::Schema;
use crate::errors::CompileError;

use super::ast::{ColumnName, Ident, TableName};

/// Table a request is addressed to, after resolving any `db.table` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Database holding the table.
    pub database: String,
    /// Table name.
    pub table: String,
}

impl TableRef {
    /// Builds a reference from its parts.
    #[must_use]
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}.{}", self.database, self.table)
    }
}

/// Splits `text` on `.` into at most two non-empty parts.
pub(crate) fn split_qualified(text: &str) -> Result<(Option<&str>, &str), CompileError> {
    let mut parts = text.split('.');
    let (first, second, rest) = (parts.next(), parts.next(), parts.next());
    match (first, second, rest) {
        (Some(name), None, None) if !name.is_empty() => Ok((None, name)),
        (Some(qualifier), Some(name), None) if !qualifier.is_empty() && !name.is_empty() => {
            Ok((Some(qualifier), name))
        }
        _ => Err(CompileError::identifier(text)),
    }
}

/// Resolves identifiers for one request.
pub(crate) struct Scope<'a> {
    schema: &'a Schema,
    default_database: &'a str,
    target: TableRef,
}

impl<'a> Scope<'a> {
    /// Resolves `table` (optionally `db.table`) and validates it.
    pub(crate) fn resolve(
        schema: &'a Schema,
        default_database: &'a str,
        table: &str,
    ) -> Result<Self, CompileError> {
        let target = resolve_table(schema, default_database, table)?;
        Ok(Self {
            schema,
            default_database,
            target,
        })
    }

    pub(crate) fn target(&self) -> &TableRef {
        &self.target
    }

    pub(crate) fn into_target(self) -> TableRef {
        self.target
    }

    /// Renderable name of the request's table.
    pub(crate) fn table_name(&self) -> TableName {
        self.render_table(&self.target)
    }

    /// Resolves and validates another table in the same request.
    pub(crate) fn table(&self, text: &str) -> Result<TableName, CompileError> {
        let resolved = resolve_table(self.schema, self.default_database, text)?;
        Ok(self.render_table(&resolved))
    }

    fn render_table(&self, table: &TableRef) -> TableName {
        TableName {
            database: (table.database != self.default_database)
                .then(|| Ident::new(table.database.as_str())),
            table: Ident::new(table.table.as_str()),
        }
    }

    /// Resolves `column` or `table.column`; bare names belong to the target
    /// table, qualified ones to a table of the target database.
    pub(crate) fn column(&self, text: &str) -> Result<ColumnName, CompileError> {
        let (qualifier, name) = split_qualified(text)?;
        let database = self.target.database.as_str();
        match qualifier {
            Some(table) => {
                self.schema.validate(database, table, name)?;
                Ok(ColumnName {
                    table: Some(Ident::new(table)),
                    column: Ident::new(name),
                })
            }
            None => {
                self.schema.validate(database, &self.target.table, name)?;
                Ok(ColumnName {
                    table: None,
                    column: Ident::new(name),
                })
            }
        }
    }

    /// Validates `table` for a `table.*` projection.
    pub(crate) fn known_table(&self, table: &str) -> Result<Ident, CompileError> {
        self.schema.validate(&self.target.database, table, "")?;
        Ok(Ident::new(table))
    }
}

pub(crate) fn resolve_table(
    schema: &Schema,
    default_database: &str,
    table: &str,
) -> Result<TableRef, CompileError> {
    let (database, name) = split_qualified(table)?;
    let database = database.unwrap_or(default_database);
    schema.validate(database, name, "")?;
    Ok(TableRef::new(database, name))
}

/// Accepts only plain identifiers, used for aliases.
pub(crate) fn simple_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
