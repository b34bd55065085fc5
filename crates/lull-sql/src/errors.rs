//! Error types for schema validation, query compilation and result caching.

use thiserror::Error;

/// Boxed error reported by a [`crate::SchemaSource`] implementation.
pub type SourceError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the schema catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The requested database, table or column is not known.
    #[error("unknown identifier '{scope}'")]
    UnknownIdentifier {
        /// Dotted scope that failed validation.
        scope: String,
    },
    /// Listing the schema from the backing connection failed.
    #[error("failed to read schema for '{scope}': {source}")]
    Source {
        /// Scope being refreshed.
        scope: String,
        /// Backend failure.
        #[source]
        source: SourceError,
    },
    /// A thread panicked while holding the catalog lock.
    #[error("schema catalog lock poisoned")]
    Poisoned,
}

impl CatalogError {
    pub(crate) fn unknown(database: &str, table: &str, column: &str) -> Self {
        let scope = [database, table, column]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(".");
        Self::UnknownIdentifier { scope }
    }
}

/// Errors raised while compiling a structured request into SQL.
#[derive(Debug, Error)]
pub enum CompileError {
    /// An identifier is malformed or absent from the schema catalog.
    #[error("invalid identifier '{identifier}'")]
    IdentifierInvalid {
        /// Offending identifier as supplied.
        identifier: String,
    },
    /// The filter, join, having, order or data portion has the wrong shape.
    #[error("malformed {portion} portion: {reason}")]
    FilterMalformed {
        /// Request portion being compiled.
        portion: &'static str,
        /// Description of the problem.
        reason: String,
    },
    /// A delete was requested without any filter predicate.
    #[error("refusing to delete without a filter")]
    UnboundedDelete,
    /// The catalog could not be consulted.
    #[error(transparent)]
    Catalog(CatalogError),
}

impl CompileError {
    pub(crate) fn identifier(identifier: impl Into<String>) -> Self {
        Self::IdentifierInvalid {
            identifier: identifier.into(),
        }
    }

    pub(crate) fn malformed(portion: &'static str, reason: impl Into<String>) -> Self {
        Self::FilterMalformed {
            portion,
            reason: reason.into(),
        }
    }
}

impl From<CatalogError> for CompileError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::UnknownIdentifier { scope } => Self::IdentifierInvalid { identifier: scope },
            other => Self::Catalog(other),
        }
    }
}

/// Errors raised by result cache stores.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The memcached client failed to connect or to run a command.
    #[error("memcached request failed: {source}")]
    Memcache {
        /// Client failure.
        #[from]
        source: memcache::MemcacheError,
    },
    /// A cached payload could not be encoded or decoded.
    #[error("cache payload is not valid JSON: {source}")]
    Payload {
        /// Serializer failure.
        #[from]
        source: serde_json::Error,
    },
    /// A thread panicked while holding the store lock.
    #[error("cache store lock poisoned")]
    Poisoned,
}
