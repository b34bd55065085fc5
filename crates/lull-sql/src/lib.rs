//! Query compilation and caching for the lull database module.
//!
//! The crate is storage-agnostic. [`SchemaCatalog`] whitelists identifiers for
//! one connection, [`Compiler`] turns structured requests into parameterised
//! SQL against it, [`RawStatement`] inspects caller-supplied SQL, and
//! [`ResultCache`] keeps serialized result sets per signature with
//! table-level invalidation.

mod cache;
mod catalog;
mod compiler;
mod errors;
mod raw;

pub use cache::{CacheStore, MemcacheConfig, MemcacheStore, MemoryStore, ResultCache, Row};
pub use catalog::{Schema, SchemaCatalog, SchemaSource};
pub use compiler::{
    ColumnName, CompareOp, CompiledQuery, Compiler, Condition, Connective, Delete, DeleteQuery,
    Direction, Ident, Insert, Join, JoinCondition, JoinKind, JoinSpec, Operand, OrderSpec,
    Ordering, Predicate, Projection, RawFollowUp, RawPlan, ReadQuery, Select, Statement,
    TableName, TableRef, Update, WriteQuery,
};
pub use errors::{CacheError, CatalogError, CompileError, SourceError};
pub use raw::{RawStatement, RawTarget, Verb};
