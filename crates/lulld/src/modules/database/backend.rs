//! SQL engines behind the database module.
//!
//! [`SqlBackend`] opens one [`SqlConnection`] per database name. The bundled
//! engine is SQLite, one file per name below a directory; every connection
//! exposes exactly its own database to the schema catalog.

use std::fmt;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags, params_from_iter};
use serde_json::{Number, Value};
use tracing::debug;

use lull_sql::{Row, SchemaSource, SourceError};

use super::DATABASE_TARGET;
use super::errors::DatabaseError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const DATABASE_SUFFIX: &str = "db";

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execution {
    /// Rows inserted, updated or deleted.
    pub rows_affected: u64,
    /// Row id of the most recent insert on the connection.
    pub last_insert_id: i64,
}

/// Live connection to one database.
pub trait SqlConnection: SchemaSource + Send {
    /// Runs a row-returning statement.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Execution`] when the engine rejects it.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DatabaseError>;

    /// Runs a statement for its side effects.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Execution`] when the engine rejects it.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Execution, DatabaseError>;
}

/// Opens connections by database name.
pub trait SqlBackend: Send + Sync {
    /// Connects to `database`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Connection`] when the database cannot be
    /// opened.
    fn open(&self, database: &str) -> Result<Box<dyn SqlConnection>, DatabaseError>;
}

/// SQLite files named `<directory>/<database>.db`.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    directory: Utf8PathBuf,
}

impl SqliteBackend {
    /// Creates a backend storing files below `directory`.
    pub fn new(directory: impl Into<Utf8PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Directory holding the database files.
    #[must_use]
    pub fn directory(&self) -> &Utf8Path {
        &self.directory
    }
}

impl SqlBackend for SqliteBackend {
    fn open(&self, database: &str) -> Result<Box<dyn SqlConnection>, DatabaseError> {
        if !valid_name(database) {
            return Err(DatabaseError::InvalidName {
                name: database.to_owned(),
            });
        }
        std::fs::create_dir_all(&self.directory).map_err(|source| DatabaseError::Directory {
            path: self.directory.clone(),
            source,
        })?;
        let path = self
            .directory
            .join(database)
            .with_extension(DATABASE_SUFFIX);
        debug!(target: DATABASE_TARGET, %path, "opening sqlite database");
        let connection = open_sqlite(&path).map_err(|source| DatabaseError::Connection {
            database: database.to_owned(),
            source: Box::new(source),
        })?;
        Ok(Box::new(SqliteConnection {
            name: database.to_owned(),
            connection,
        }))
    }
}

fn open_sqlite(path: &Utf8Path) -> Result<Connection, rusqlite::Error> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let connection = Connection::open_with_flags(path.as_std_path(), flags)?;
    connection.busy_timeout(BUSY_TIMEOUT)?;
    Ok(connection)
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-')
}

/// Connection to one SQLite file.
pub struct SqliteConnection {
    name: String,
    connection: Connection,
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SqliteConnection")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    /// Private in-memory database answering to `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Connection`] when SQLite cannot allocate it.
    pub fn in_memory(name: &str) -> Result<Self, DatabaseError> {
        let connection =
            Connection::open_in_memory().map_err(|source| DatabaseError::Connection {
                database: name.to_owned(),
                source: Box::new(source),
            })?;
        Ok(Self {
            name: name.to_owned(),
            connection,
        })
    }

    fn owns(&self, database: &str) -> Result<(), SourceError> {
        if database == self.name {
            Ok(())
        } else {
            Err(format!("connection for '{}' cannot list '{database}'", self.name).into())
        }
    }
}

impl SchemaSource for SqliteConnection {
    fn databases(&self) -> Result<Vec<String>, SourceError> {
        Ok(vec![self.name.clone()])
    }

    fn tables(&self, database: &str) -> Result<Vec<String>, SourceError> {
        self.owns(database)?;
        let mut statement = self.connection.prepare(
            "SELECT name FROM sqlite_master
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
             ORDER BY name",
        )?;
        let names = statement
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn columns(&self, database: &str, table: &str) -> Result<Vec<String>, SourceError> {
        self.owns(database)?;
        let mut statement = self
            .connection
            .prepare("SELECT name FROM pragma_table_info(?1)")?;
        let names = statement
            .query_map([table], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }
}

impl SqlConnection for SqliteConnection {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DatabaseError> {
        let mut statement = self.connection.prepare(sql).map_err(execution)?;
        let columns = statement
            .column_names()
            .into_iter()
            .map(str::to_owned)
            .collect::<Vec<_>>();
        let mut rows = statement
            .query(params_from_iter(params.iter().map(to_sql)))
            .map_err(execution)?;
        let mut results = Vec::new();
        while let Some(row) = rows.next().map_err(execution)? {
            let mut record = Row::new();
            for (index, column) in columns.iter().enumerate() {
                let value = row.get_ref(index).map_err(execution)?;
                record.insert(column.clone(), from_sql(value));
            }
            results.push(record);
        }
        Ok(results)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Execution, DatabaseError> {
        let affected = self
            .connection
            .execute(sql, params_from_iter(params.iter().map(to_sql)))
            .map_err(execution)?;
        Ok(Execution {
            rows_affected: u64::try_from(affected).unwrap_or(u64::MAX),
            last_insert_id: self.connection.last_insert_rowid(),
        })
    }
}

fn execution(source: rusqlite::Error) -> DatabaseError {
    DatabaseError::Execution {
        source: Box::new(source),
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => number
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| number.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(text) => SqlValue::Text(text.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Blobs come back as lossy UTF-8 text.
fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(integer) => Value::from(integer),
        ValueRef::Real(real) => Number::from_f64(real).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
