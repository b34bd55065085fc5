//! Translation of structured database requests into parameterised SQL.
//!
//! Every identifier is checked against the connection's [`SchemaCatalog`]
//! before it is written into SQL text, and the whole compilation runs under
//! the catalog lock. Values only ever travel as bound parameters.

mod ast;
mod filter;
mod scope;
#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::catalog::{Schema, SchemaCatalog};
use crate::errors::CompileError;
use crate::raw::{RawStatement, RawTarget, Verb};

pub use self::ast::{
    ColumnName, CompareOp, Condition, Connective, Delete, Direction, Ident, Insert, Join,
    JoinCondition, JoinKind, Operand, Ordering, Predicate, Projection, Select, Statement,
    TableName, Update,
};
pub use self::scope::TableRef;
use self::filter::{parse_filter, parse_having};
use self::scope::{Scope, resolve_table, simple_identifier, split_qualified};

/// Join requested by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinSpec {
    /// Joined table, optionally `db.table`.
    pub table: String,
    /// Conditions of the form `lhs op rhs`.
    pub conditions: Vec<String>,
    /// Join type such as `LEFT` or `INNER`.
    pub kind: String,
}

/// Ordering requested by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderSpec {
    /// Ordered column.
    pub column: String,
    /// `ASC`, `DESC` or `RANDOM`.
    pub order: String,
}

/// Read request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadQuery {
    /// Target table, optionally `db.table`.
    pub table: String,
    /// Projection entries: column strings or single-entry `{column: alias}` maps.
    pub select: Vec<Value>,
    /// `SELECT DISTINCT`.
    pub distinct: bool,
    /// Joins.
    pub joins: Vec<JoinSpec>,
    /// Filter list.
    pub filter: Vec<Value>,
    /// `GROUP BY` columns.
    pub group: Vec<String>,
    /// Having list.
    pub having: Vec<Value>,
    /// Orderings.
    pub order: Vec<OrderSpec>,
    /// Row limit; zero means none.
    pub limit: i64,
    /// Rows to skip; zero means none.
    pub offset: i64,
}

/// Insert or update request; a filter turns the insert into an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteQuery {
    /// Target table, optionally `db.table`.
    pub table: String,
    /// Column values.
    pub data: BTreeMap<String, Value>,
    /// Filter list.
    pub filter: Vec<Value>,
}

/// Delete request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteQuery {
    /// Target table, optionally `db.table`.
    pub table: String,
    /// Filter list; must yield at least one predicate.
    pub filter: Vec<Value>,
}

/// SQL text ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// Table the statement addresses.
    pub target: TableRef,
    /// Statement tree.
    pub statement: Statement,
    /// Rendered SQL.
    pub sql: String,
    /// Bound values in placeholder order.
    pub params: Vec<Value>,
}

impl CompiledQuery {
    fn new(target: TableRef, statement: Statement) -> Self {
        let (sql, params) = statement.render();
        Self {
            target,
            statement,
            sql,
            params,
        }
    }
}

/// What to do after a raw statement executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFollowUp {
    /// Nothing to refresh or invalidate.
    Nothing,
    /// Cached results for the table are stale.
    Invalidate(TableRef),
    /// Tables of the database changed.
    RefreshDatabase(String),
    /// Databases changed.
    RefreshAll,
}

/// Checked raw statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPlan {
    /// Whether the statement yields rows.
    pub returns_rows: bool,
    /// Whether the statement is an insert.
    pub is_insert: bool,
    /// Work to do after a successful execution.
    pub follow_up: RawFollowUp,
}

/// Compiles requests for one connection.
#[derive(Debug, Clone, Copy)]
pub struct Compiler<'a> {
    catalog: &'a SchemaCatalog,
    default_database: &'a str,
}

impl<'a> Compiler<'a> {
    /// Creates a compiler validating against `catalog`; unqualified tables
    /// belong to `default_database`.
    #[must_use]
    pub fn new(catalog: &'a SchemaCatalog, default_database: &'a str) -> Self {
        Self {
            catalog,
            default_database,
        }
    }

    /// Resolves `table` (optionally `db.table`) and checks it exists.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::IdentifierInvalid`] for unknown or malformed
    /// names.
    pub fn resolve(&self, table: &str) -> Result<TableRef, CompileError> {
        self.catalog
            .with_schema(|schema| resolve_table(schema, self.default_database, table))?
    }

    /// Compiles a read.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::IdentifierInvalid`] for unknown identifiers and
    /// [`CompileError::FilterMalformed`] for malformed request portions.
    pub fn select(&self, query: &ReadQuery) -> Result<CompiledQuery, CompileError> {
        self.catalog
            .with_schema(|schema| self.build_select(schema, query))?
    }

    /// Compiles an insert, or an update when the filter yields predicates.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::FilterMalformed`] when `data` is empty and the
    /// usual identifier and filter errors.
    pub fn write(&self, query: &WriteQuery) -> Result<CompiledQuery, CompileError> {
        self.catalog
            .with_schema(|schema| self.build_write(schema, query))?
    }

    /// Compiles a delete.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::UnboundedDelete`] when the filter yields no
    /// predicate, and the usual identifier and filter errors.
    pub fn delete(&self, query: &DeleteQuery) -> Result<CompiledQuery, CompileError> {
        self.catalog
            .with_schema(|schema| self.build_delete(schema, query))?
    }

    /// Checks the object a raw statement names and decides how to run it and
    /// what to refresh afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::IdentifierInvalid`] when the statement names an
    /// unknown table or database it expects to exist.
    pub fn plan_raw(&self, statement: &RawStatement) -> Result<RawPlan, CompileError> {
        self.catalog
            .with_schema(|schema| self.build_raw_plan(schema, statement))?
    }

    fn build_select(&self, schema: &Schema, query: &ReadQuery) -> Result<CompiledQuery, CompileError> {
        let scope = Scope::resolve(schema, self.default_database, &query.table)?;
        let columns = query
            .select
            .iter()
            .map(|item| projection(&scope, item))
            .collect::<Result<Vec<_>, _>>()?;
        let joins = query
            .joins
            .iter()
            .map(|spec| join(&scope, spec))
            .collect::<Result<Vec<_>, _>>()?;
        let filter = parse_filter(&scope, &query.filter)?;
        let group = query
            .group
            .iter()
            .map(|column| scope.column(column))
            .collect::<Result<Vec<_>, _>>()?;
        let having = parse_having(&scope, &query.having)?;
        let order = query
            .order
            .iter()
            .map(|spec| ordering(&scope, spec))
            .collect::<Result<Vec<_>, _>>()?;
        let limit = bound("limit", query.limit)?;
        let offset = bound("offset", query.offset)?;

        let select = Select {
            distinct: query.distinct,
            columns,
            from: scope.table_name(),
            joins,
            filter,
            group,
            having,
            order,
            limit,
            offset: limit.and(offset),
        };
        Ok(CompiledQuery::new(
            scope.into_target(),
            Statement::Select(select),
        ))
    }

    fn build_write(&self, schema: &Schema, query: &WriteQuery) -> Result<CompiledQuery, CompileError> {
        let scope = Scope::resolve(schema, self.default_database, &query.table)?;
        if query.data.is_empty() {
            return Err(CompileError::malformed("data", "no columns to write"));
        }
        let values = query
            .data
            .iter()
            .map(|(column, value)| {
                schema.validate(&scope.target().database, &scope.target().table, column)?;
                Ok((Ident::new(column.as_str()), value.clone()))
            })
            .collect::<Result<Vec<_>, CompileError>>()?;

        let statement = match parse_filter(&scope, &query.filter)? {
            Some(filter) => Statement::Update(Update {
                table: scope.table_name(),
                assignments: values,
                filter,
            }),
            None => Statement::Insert(Insert {
                table: scope.table_name(),
                values,
            }),
        };
        Ok(CompiledQuery::new(scope.into_target(), statement))
    }

    fn build_delete(
        &self,
        schema: &Schema,
        query: &DeleteQuery,
    ) -> Result<CompiledQuery, CompileError> {
        let scope = Scope::resolve(schema, self.default_database, &query.table)?;
        let filter = parse_filter(&scope, &query.filter)?.ok_or(CompileError::UnboundedDelete)?;
        let statement = Statement::Delete(Delete {
            table: scope.table_name(),
            filter,
        });
        Ok(CompiledQuery::new(scope.into_target(), statement))
    }

    fn build_raw_plan(
        &self,
        schema: &Schema,
        statement: &RawStatement,
    ) -> Result<RawPlan, CompileError> {
        let follow_up = match (statement.verb(), statement.target()) {
            (Verb::Insert | Verb::Update | Verb::Delete, RawTarget::Table { name }) => {
                RawFollowUp::Invalidate(resolve_table(schema, self.default_database, name)?)
            }
            (Verb::Create, RawTarget::Table { name }) => {
                let (database, _) = split_qualified(name)?;
                let database = database.unwrap_or(self.default_database);
                schema.validate(database, "", "")?;
                RawFollowUp::RefreshDatabase(database.to_owned())
            }
            (Verb::Alter | Verb::Drop, RawTarget::Table { name }) => {
                let table = resolve_table(schema, self.default_database, name)?;
                RawFollowUp::RefreshDatabase(table.database)
            }
            (Verb::Create, RawTarget::Database { .. }) => RawFollowUp::RefreshAll,
            (Verb::Alter | Verb::Drop, RawTarget::Database { name }) => {
                schema.validate(name, "", "")?;
                RawFollowUp::RefreshAll
            }
            _ => RawFollowUp::Nothing,
        };
        Ok(RawPlan {
            returns_rows: statement.returns_rows(),
            is_insert: statement.verb() == Verb::Insert,
            follow_up,
        })
    }
}

fn projection(scope: &Scope<'_>, item: &Value) -> Result<Projection, CompileError> {
    const SELECT: &str = "select";
    let (column, alias) = match item {
        Value::String(column) => (column.as_str(), None),
        Value::Object(entry) if entry.len() == 1 => {
            let Some((column, alias)) = entry.iter().next() else {
                return Err(CompileError::malformed(SELECT, "empty alias map"));
            };
            let Value::String(alias) = alias else {
                return Err(CompileError::malformed(SELECT, "alias must be a string"));
            };
            if !simple_identifier(alias) {
                return Err(CompileError::malformed(
                    SELECT,
                    format!("alias '{alias}' is not a plain identifier"),
                ));
            }
            (column.as_str(), Some(Ident::new(alias.as_str())))
        }
        _ => {
            return Err(CompileError::malformed(
                SELECT,
                "entries must be column names or single {column: alias} maps",
            ));
        }
    };

    match split_qualified(column)? {
        (None, "*") => Ok(Projection::All),
        (Some(table), "*") => Ok(Projection::TableAll(scope.known_table(table)?)),
        _ => Ok(Projection::Column {
            column: scope.column(column)?,
            alias,
        }),
    }
}

fn join(scope: &Scope<'_>, spec: &JoinSpec) -> Result<Join, CompileError> {
    const JOIN: &str = "join";
    let table = scope.table(&spec.table)?;
    let kind = JoinKind::parse(&spec.kind)
        .ok_or_else(|| CompileError::malformed(JOIN, format!("invalid join type '{}'", spec.kind)))?;
    if spec.conditions.is_empty() {
        return Err(CompileError::malformed(JOIN, "at least one condition is required"));
    }
    let on = spec
        .conditions
        .iter()
        .map(|condition| {
            let tokens = condition.split_whitespace().collect::<Vec<_>>();
            let [lhs, op, rhs] = tokens.as_slice() else {
                return Err(CompileError::malformed(
                    JOIN,
                    format!("condition '{condition}' must be 'lhs operator rhs'"),
                ));
            };
            let op = CompareOp::parse(op)
                .ok_or_else(|| CompileError::malformed(JOIN, format!("invalid operator '{op}'")))?;
            let rhs = match scope.column(rhs) {
                Ok(column) => Operand::Column(column),
                Err(_) => Operand::Value(Value::String(rhs.trim_matches(['\\', '"']).to_owned())),
            };
            Ok(JoinCondition {
                lhs: scope.column(lhs)?,
                op,
                rhs,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Join { kind, table, on })
}

fn ordering(scope: &Scope<'_>, spec: &OrderSpec) -> Result<Ordering, CompileError> {
    let column = scope.column(&spec.column)?;
    let direction = match spec.order.trim().to_ascii_uppercase().as_str() {
        "ASC" => Direction::Asc,
        "DESC" => Direction::Desc,
        "RANDOM" => Direction::Random,
        other => {
            return Err(CompileError::malformed(
                "order",
                format!("invalid order '{other}'"),
            ));
        }
    };
    Ok(Ordering { column, direction })
}

fn bound(portion: &'static str, value: i64) -> Result<Option<u64>, CompileError> {
    match u64::try_from(value) {
        Ok(0) => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(_) => Err(CompileError::malformed(portion, "must not be negative")),
    }
}
