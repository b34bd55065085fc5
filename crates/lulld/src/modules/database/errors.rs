//! Failures of the database module.

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

use lull_config::SettingsError;
use lull_sql::SourceError;

use crate::dispatch::DispatchError;
use crate::users::{CallerId, UserStoreError};

/// Errors raised while resolving connections or running statements.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The caller has no `[database] name` option.
    #[error("no database configured for {caller}")]
    NoDatabase {
        /// Caller without a database.
        caller: CallerId,
    },
    /// The database name cannot be used by the backend.
    #[error("invalid database name '{name}'")]
    InvalidName {
        /// Rejected name.
        name: String,
    },
    /// Opening the database failed.
    #[error("failed to open database '{database}': {source}")]
    Connection {
        /// Database being opened.
        database: String,
        /// Engine failure.
        #[source]
        source: SourceError,
    },
    /// The engine rejected a statement.
    #[error("error executing query: {source}")]
    Execution {
        /// Engine failure.
        #[source]
        source: SourceError,
    },
    /// The database directory could not be created.
    #[error("failed to create database directory '{path}': {source}")]
    Directory {
        /// Directory being created.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// Module options are invalid.
    #[error("invalid database settings: {0}")]
    Settings(#[from] SettingsError),
    /// Caller options could not be read.
    #[error("failed to read caller options: {0}")]
    Users(#[from] UserStoreError),
    /// A method ran before setup.
    #[error("database module is not set up")]
    NotReady,
    /// A thread panicked while holding a connection.
    #[error("connection to '{database}' is poisoned")]
    Poisoned {
        /// Database of the connection.
        database: String,
    },
}

impl From<DatabaseError> for DispatchError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::Execution { .. } => Self::execution(error.to_string()),
            DatabaseError::NoDatabase { .. }
            | DatabaseError::InvalidName { .. }
            | DatabaseError::Connection { .. }
            | DatabaseError::Directory { .. } => Self::connection(error.to_string()),
            DatabaseError::Users(UserStoreError::UnknownAuthkey) => {
                Self::auth("unknown authkey in request")
            }
            DatabaseError::Settings(_)
            | DatabaseError::Users(_)
            | DatabaseError::NotReady
            | DatabaseError::Poisoned { .. } => Self::internal(error.to_string()),
        }
    }
}
