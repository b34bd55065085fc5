//! Structured request accepted by every database method.

use std::collections::BTreeMap;

use serde_json::Value;

use lull_sql::{DeleteQuery, JoinSpec, OrderSpec, ReadQuery, WriteQuery};

/// Join portion of a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinRequest {
    /// Joined table, optionally `db.table`.
    pub table: String,
    /// `lhs op rhs` conditions.
    pub conditions: Vec<String>,
    /// Join type.
    pub kind: String,
}

crate::decode_record!(JoinRequest {
    table => "table",
    conditions => "conditions",
    kind => "type",
});

/// Order portion of a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderRequest {
    /// Ordered column.
    pub column: String,
    /// `ASC`, `DESC` or `RANDOM`.
    pub order: String,
}

crate::decode_record!(OrderRequest {
    column => "column",
    order => "order",
});

/// Request record shared by `Get`, `Put`, `Delete` and `Query`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    /// Result cache signature; empty disables caching.
    pub sig: String,
    /// Authkey whose database to use; empty means the caller's own.
    pub auth: String,
    /// Database qualifying an unqualified `table`.
    pub db: String,
    /// Target table, optionally `db.table`.
    pub table: String,
    /// Projection.
    pub select: Vec<Value>,
    /// `SELECT DISTINCT`.
    pub distinct: bool,
    /// Joins.
    pub join: Vec<JoinRequest>,
    /// Filter list.
    pub filter: Vec<Value>,
    /// Grouped columns.
    pub group: Vec<String>,
    /// Having list.
    pub having: Vec<Value>,
    /// Orderings.
    pub order: Vec<OrderRequest>,
    /// Row limit.
    pub limit: i64,
    /// Rows skipped.
    pub offset: i64,
    /// Column values for `Put`.
    pub data: BTreeMap<String, Value>,
    /// Raw statement for `Query`.
    pub query: String,
    /// Bound values for `Query`.
    pub parameters: Vec<Value>,
}

crate::decode_record!(QueryRequest {
    sig => "sig",
    auth => "auth",
    db => "db",
    table => "table",
    select => "select",
    distinct => "distinct",
    join => "join",
    filter => "filter",
    group => "group",
    having => "having",
    order => "order",
    limit => "limit",
    offset => "offset",
    data => "data",
    query => "query",
    parameters => "parameters",
});

impl QueryRequest {
    /// Target table, qualified by `db` when the table itself is not.
    #[must_use]
    pub fn qualified_table(&self) -> String {
        if self.db.is_empty() || self.table.contains('.') {
            self.table.clone()
        } else {
            format!("{}.{}", self.db, self.table)
        }
    }

    /// Read portion.
    #[must_use]
    pub fn read(&self) -> ReadQuery {
        ReadQuery {
            table: self.qualified_table(),
            select: self.select.clone(),
            distinct: self.distinct,
            joins: self
                .join
                .iter()
                .map(|join| JoinSpec {
                    table: join.table.clone(),
                    conditions: join.conditions.clone(),
                    kind: join.kind.clone(),
                })
                .collect(),
            filter: self.filter.clone(),
            group: self.group.clone(),
            having: self.having.clone(),
            order: self
                .order
                .iter()
                .map(|order| OrderSpec {
                    column: order.column.clone(),
                    order: order.order.clone(),
                })
                .collect(),
            limit: self.limit,
            offset: self.offset,
        }
    }

    /// Write portion.
    #[must_use]
    pub fn write(&self) -> WriteQuery {
        WriteQuery {
            table: self.qualified_table(),
            data: self.data.clone(),
            filter: self.filter.clone(),
        }
    }

    /// Delete portion.
    #[must_use]
    pub fn delete(&self) -> DeleteQuery {
        DeleteQuery {
            table: self.qualified_table(),
            filter: self.filter.clone(),
        }
    }
}
