//! Failures reported to RPC callers.
//!
//! Every variant maps to a stable category string through
//! [`DispatchError::code`]; the display text is the human-readable message.

use thiserror::Error;

use lull_sql::{CatalogError, CompileError};

use crate::marshal::ValueKind;

/// Errors surfaced by request parsing, dispatch and module methods.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The authkey is unknown or could not be checked.
    #[error("authentication failed: {reason}")]
    AuthFailure {
        /// Why authentication failed.
        reason: String,
    },
    /// No such module or method.
    #[error("method '{module}.{method}' does not exist")]
    NotFound {
        /// Requested module.
        module: String,
        /// Requested method.
        method: String,
    },
    /// Positional parameter count differs from the method's.
    #[error("method '{module}.{method}' expects {expected} parameter(s), given {found}")]
    ArityMismatch {
        /// Requested module.
        module: String,
        /// Requested method.
        method: String,
        /// Declared parameter count.
        expected: usize,
        /// Supplied parameter count.
        found: usize,
    },
    /// A parameter has the wrong kind.
    #[error("{} for method '{module}.{method}' should be {expected}, is {found}", describe_position(*.position))]
    TypeMismatch {
        /// Requested module.
        module: String,
        /// Requested method.
        method: String,
        /// Zero-based positional index, if positional.
        position: Option<usize>,
        /// Declared kind.
        expected: String,
        /// Supplied kind.
        found: ValueKind,
    },
    /// An identifier is not in the schema catalog.
    #[error("invalid identifier '{identifier}'")]
    IdentifierInvalid {
        /// Offending identifier.
        identifier: String,
    },
    /// A query portion has the wrong shape.
    #[error("{message}")]
    FilterMalformed {
        /// Description from the compiler.
        message: String,
    },
    /// Delete without a filter.
    #[error("refusing to delete without a filter")]
    UnboundedDelete,
    /// The backing store could not be reached.
    #[error("connection failure: {message}")]
    ConnectionFailure {
        /// Driver message.
        message: String,
    },
    /// The backing store rejected a statement.
    #[error("execution failure: {message}")]
    ExecutionFailure {
        /// Driver message.
        message: String,
    },
    /// The request line is not a valid request.
    #[error("malformed request: {message}")]
    MalformedRequest {
        /// Parser message.
        message: String,
    },
    /// The request line exceeds the size limit.
    #[error("request too large: more than {max_size} bytes")]
    RequestTooLarge {
        /// Limit in bytes.
        max_size: usize,
    },
    /// Daemon-side failure unrelated to the request.
    #[error("internal error: {message}")]
    Internal {
        /// Description.
        message: String,
    },
}

fn describe_position(position: Option<usize>) -> String {
    position.map_or_else(
        || String::from("parameters"),
        |index| format!("parameter #{index}"),
    )
}

impl DispatchError {
    /// Stable category reported in the wire error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthFailure { .. } => "auth_failure",
            Self::NotFound { .. } => "not_found",
            Self::ArityMismatch { .. } => "arity_mismatch",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::IdentifierInvalid { .. } => "identifier_invalid",
            Self::FilterMalformed { .. } => "filter_malformed",
            Self::UnboundedDelete => "unbounded_delete",
            Self::ConnectionFailure { .. } => "connection_failure",
            Self::ExecutionFailure { .. } => "execution_failure",
            Self::MalformedRequest { .. } | Self::RequestTooLarge { .. } => "malformed_request",
            Self::Internal { .. } => "internal",
        }
    }

    /// Creates an authentication failure.
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::AuthFailure {
            reason: reason.into(),
        }
    }

    /// Creates a missing method error.
    pub fn not_found(module: impl Into<String>, method: impl Into<String>) -> Self {
        Self::NotFound {
            module: module.into(),
            method: method.into(),
        }
    }

    /// Creates an arity error.
    pub fn arity(module: &str, method: &str, expected: usize, found: usize) -> Self {
        Self::ArityMismatch {
            module: module.to_owned(),
            method: method.to_owned(),
            expected,
            found,
        }
    }

    /// Creates a parameter kind error.
    pub fn type_mismatch(
        module: &str,
        method: &str,
        position: Option<usize>,
        expected: impl Into<String>,
        found: ValueKind,
    ) -> Self {
        Self::TypeMismatch {
            module: module.to_owned(),
            method: method.to_owned(),
            position,
            expected: expected.into(),
            found,
        }
    }

    /// Creates a malformed request error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRequest {
            message: message.into(),
        }
    }

    /// Creates a connection failure.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionFailure {
            message: message.into(),
        }
    }

    /// Creates an execution failure.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::ExecutionFailure {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<CompileError> for DispatchError {
    fn from(error: CompileError) -> Self {
        match error {
            CompileError::IdentifierInvalid { identifier } => Self::IdentifierInvalid { identifier },
            CompileError::FilterMalformed { .. } => Self::FilterMalformed {
                message: error.to_string(),
            },
            CompileError::UnboundedDelete => Self::UnboundedDelete,
            CompileError::Catalog(catalog) => catalog.into(),
        }
    }
}

impl From<CatalogError> for DispatchError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::UnknownIdentifier { scope } => Self::IdentifierInvalid { identifier: scope },
            CatalogError::Source { .. } => Self::execution(error.to_string()),
            CatalogError::Poisoned => Self::internal(error.to_string()),
        }
    }
}
