//! Clause tree for compiled statements and its rendering to SQL text.
//!
//! Bound values live on the nodes that use them and are emitted by the same
//! call that writes their `?` placeholder, so text and parameters cannot
//! drift apart.

use serde_json::Value;

/// SQL identifier that has passed catalog validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident(String);

impl Ident {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Identifier text as validated.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Possibly database-qualified table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    /// Database qualifier, present only outside the default database.
    pub database: Option<Ident>,
    /// Table name.
    pub table: Ident,
}

/// Possibly table-qualified column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnName {
    /// Table qualifier as written by the caller.
    pub table: Option<Ident>,
    /// Column name.
    pub column: Ident,
}

/// Comparison operators accepted by filters and join conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<=>`, null-safe equality.
    NullSafeEq,
    /// `!=`
    NotEq,
    /// `<>`
    LtGt,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    GtEq,
    /// `<=`
    LtEq,
}

impl CompareOp {
    /// Parses an operator token.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "=" => Self::Eq,
            "<=>" => Self::NullSafeEq,
            "!=" => Self::NotEq,
            "<>" => Self::LtGt,
            ">" => Self::Gt,
            "<" => Self::Lt,
            ">=" => Self::GtEq,
            "<=" => Self::LtEq,
            _ => return None,
        })
    }

    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NullSafeEq => "IS",
            Self::NotEq => "!=",
            Self::LtGt => "<>",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::GtEq => ">=",
            Self::LtEq => "<=",
        }
    }
}

/// How a predicate attaches to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    /// `AND`
    And,
    /// `OR`
    Or,
}

/// Single filter predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `(column op ?)`
    Compare {
        /// Filtered column.
        column: ColumnName,
        /// Comparison operator.
        op: CompareOp,
        /// Bound operand.
        value: Value,
    },
    /// `column [NOT] IN (?, ...)`
    In {
        /// Filtered column.
        column: ColumnName,
        /// Whether the membership test is negated.
        negated: bool,
        /// Bound members in caller order.
        values: Vec<Value>,
    },
    /// `column [NOT] LIKE ?`
    Like {
        /// Filtered column.
        column: ColumnName,
        /// Whether the match is negated.
        negated: bool,
        /// Bound pattern.
        pattern: Value,
    },
}

/// Flat sequence of predicates joined left to right.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    first: Predicate,
    rest: Vec<(Connective, Predicate)>,
}

impl Condition {
    /// Starts a condition with one predicate.
    #[must_use]
    pub fn new(first: Predicate) -> Self {
        Self {
            first,
            rest: Vec::new(),
        }
    }

    /// Appends a predicate.
    pub fn push(&mut self, connective: Connective, predicate: Predicate) {
        self.rest.push((connective, predicate));
    }

    /// Number of predicates.
    #[must_use]
    pub fn len(&self) -> usize {
        1 + self.rest.len()
    }

    /// Always `false`; a condition holds at least one predicate.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Entry of the projection list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// `*`
    All,
    /// `table.*`
    TableAll(Ident),
    /// `column [AS alias]`
    Column {
        /// Projected column.
        column: ColumnName,
        /// Output alias.
        alias: Option<Ident>,
    },
}

/// Join flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `LEFT JOIN`
    Left,
    /// `RIGHT JOIN`
    Right,
    /// `OUTER JOIN`
    Outer,
    /// `INNER JOIN`
    Inner,
    /// `LEFT OUTER JOIN`
    LeftOuter,
    /// `RIGHT OUTER JOIN`
    RightOuter,
}

impl JoinKind {
    /// Parses a join type, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let normalized = text
            .split_whitespace()
            .map(str::to_ascii_uppercase)
            .collect::<Vec<_>>()
            .join(" ");
        Some(match normalized.as_str() {
            "LEFT" => Self::Left,
            "RIGHT" => Self::Right,
            "OUTER" => Self::Outer,
            "INNER" => Self::Inner,
            "LEFT OUTER" => Self::LeftOuter,
            "RIGHT OUTER" => Self::RightOuter,
            _ => return None,
        })
    }

    fn as_sql(self) -> &'static str {
        match self {
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::Outer => "OUTER",
            Self::Inner => "INNER",
            Self::LeftOuter => "LEFT OUTER",
            Self::RightOuter => "RIGHT OUTER",
        }
    }
}

/// Right-hand side of a join condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Validated column.
    Column(ColumnName),
    /// Literal bound as a parameter.
    Value(Value),
}

/// `lhs op rhs` inside an `ON` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinCondition {
    /// Left column.
    pub lhs: ColumnName,
    /// Comparison operator.
    pub op: CompareOp,
    /// Right column or literal.
    pub rhs: Operand,
}

/// `KIND JOIN table ON ...`
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Join flavour.
    pub kind: JoinKind,
    /// Joined table.
    pub table: TableName,
    /// Conditions combined with `AND`.
    pub on: Vec<JoinCondition>,
}

/// Ordering direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `ASC`
    Asc,
    /// `DESC`
    Desc,
    /// Random order; renders as `RANDOM()` in place of the column.
    Random,
}

/// `ORDER BY` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ordering {
    /// Ordered column.
    pub column: ColumnName,
    /// Direction.
    pub direction: Direction,
}

/// Read statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// `SELECT DISTINCT`
    pub distinct: bool,
    /// Projection; empty renders `*`.
    pub columns: Vec<Projection>,
    /// Source table.
    pub from: TableName,
    /// Joined tables.
    pub joins: Vec<Join>,
    /// `WHERE` condition.
    pub filter: Option<Condition>,
    /// `GROUP BY` columns.
    pub group: Vec<ColumnName>,
    /// `HAVING` condition.
    pub having: Option<Condition>,
    /// `ORDER BY` entries.
    pub order: Vec<Ordering>,
    /// Row limit.
    pub limit: Option<u64>,
    /// Rows to skip; rendered only together with a limit.
    pub offset: Option<u64>,
}

/// `INSERT INTO table (cols) VALUES (?, ...)`
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    /// Target table.
    pub table: TableName,
    /// Column/value pairs.
    pub values: Vec<(Ident, Value)>,
}

/// `UPDATE table SET col = ?, ... WHERE ...`
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Target table.
    pub table: TableName,
    /// Column/value pairs.
    pub assignments: Vec<(Ident, Value)>,
    /// Row filter.
    pub filter: Condition,
}

/// `DELETE FROM table WHERE ...`
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    /// Target table.
    pub table: TableName,
    /// Row filter; deletes always carry one.
    pub filter: Condition,
}

/// Compiled statement tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Read.
    Select(Select),
    /// Insert.
    Insert(Insert),
    /// Update.
    Update(Update),
    /// Delete.
    Delete(Delete),
}

impl Statement {
    /// Renders SQL text and the bound parameters in placeholder order.
    #[must_use]
    pub fn render(&self) -> (String, Vec<Value>) {
        let mut writer = SqlWriter::default();
        match self {
            Self::Select(select) => writer.select(select),
            Self::Insert(insert) => writer.insert(insert),
            Self::Update(update) => writer.update(update),
            Self::Delete(delete) => writer.delete(delete),
        }
        (writer.sql, writer.params)
    }
}

const RESERVED: &[&str] = &[
    "all", "and", "as", "asc", "between", "by", "case", "check", "column", "create", "default",
    "delete", "desc", "distinct", "drop", "else", "end", "exists", "from", "group", "having", "in",
    "index", "insert", "into", "is", "join", "key", "like", "limit", "not", "null", "offset", "on",
    "or", "order", "primary", "references", "select", "set", "table", "then", "to", "union",
    "unique", "update", "using", "values", "when", "where",
];

fn is_bare(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED.contains(&name.to_ascii_lowercase().as_str())
}

#[derive(Default)]
struct SqlWriter {
    sql: String,
    params: Vec<Value>,
}

impl SqlWriter {
    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn bind(&mut self, value: &Value) {
        self.sql.push('?');
        self.params.push(value.clone());
    }

    fn ident(&mut self, ident: &Ident) {
        if is_bare(ident.as_str()) {
            self.sql.push_str(ident.as_str());
        } else {
            self.sql.push('"');
            self.sql.push_str(&ident.as_str().replace('"', "\"\""));
            self.sql.push('"');
        }
    }

    fn table(&mut self, table: &TableName) {
        if let Some(database) = &table.database {
            self.ident(database);
            self.push(".");
        }
        self.ident(&table.table);
    }

    fn column(&mut self, column: &ColumnName) {
        if let Some(table) = &column.table {
            self.ident(table);
            self.push(".");
        }
        self.ident(&column.column);
    }

    fn list<T>(&mut self, items: &[T], mut each: impl FnMut(&mut Self, &T)) {
        for (index, item) in items.iter().enumerate() {
            if index > 0 {
                self.push(", ");
            }
            each(self, item);
        }
    }

    fn predicate(&mut self, predicate: &Predicate) {
        match predicate {
            Predicate::Compare { column, op, value } => {
                self.push("(");
                self.column(column);
                self.push(" ");
                self.push(op.as_sql());
                self.push(" ");
                self.bind(value);
                self.push(")");
            }
            Predicate::In {
                column,
                negated,
                values,
            } => {
                self.column(column);
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                self.list(values, Self::bind);
                self.push(")");
            }
            Predicate::Like {
                column,
                negated,
                pattern,
            } => {
                self.column(column);
                self.push(if *negated { " NOT LIKE " } else { " LIKE " });
                self.bind(pattern);
            }
        }
    }

    fn condition(&mut self, condition: &Condition) {
        self.predicate(&condition.first);
        for (connective, predicate) in &condition.rest {
            self.push(match connective {
                Connective::And => " AND ",
                Connective::Or => " OR ",
            });
            self.predicate(predicate);
        }
    }

    fn projection(&mut self, projection: &Projection) {
        match projection {
            Projection::All => self.push("*"),
            Projection::TableAll(table) => {
                self.ident(table);
                self.push(".*");
            }
            Projection::Column { column, alias } => {
                self.column(column);
                if let Some(alias) = alias {
                    self.push(" AS ");
                    self.ident(alias);
                }
            }
        }
    }

    fn join(&mut self, join: &Join) {
        self.push(" ");
        self.push(join.kind.as_sql());
        self.push(" JOIN ");
        self.table(&join.table);
        self.push(" ON ");
        for (index, condition) in join.on.iter().enumerate() {
            if index > 0 {
                self.push(" AND ");
            }
            self.column(&condition.lhs);
            self.push(" ");
            self.push(condition.op.as_sql());
            self.push(" ");
            match &condition.rhs {
                Operand::Column(column) => self.column(column),
                Operand::Value(value) => self.bind(value),
            }
        }
    }

    fn ordering(&mut self, ordering: &Ordering) {
        match ordering.direction {
            Direction::Random => self.push("RANDOM()"),
            Direction::Asc => {
                self.column(&ordering.column);
                self.push(" ASC");
            }
            Direction::Desc => {
                self.column(&ordering.column);
                self.push(" DESC");
            }
        }
    }

    fn select(&mut self, select: &Select) {
        self.push("SELECT ");
        if select.distinct {
            self.push("DISTINCT ");
        }
        if select.columns.is_empty() {
            self.push("*");
        } else {
            self.list(&select.columns, Self::projection);
        }
        self.push(" FROM ");
        self.table(&select.from);
        for join in &select.joins {
            self.join(join);
        }
        if let Some(filter) = &select.filter {
            self.push(" WHERE ");
            self.condition(filter);
        }
        if !select.group.is_empty() {
            self.push(" GROUP BY ");
            self.list(&select.group, Self::column);
        }
        if let Some(having) = &select.having {
            self.push(" HAVING ");
            self.condition(having);
        }
        if !select.order.is_empty() {
            self.push(" ORDER BY ");
            self.list(&select.order, Self::ordering);
        }
        if let Some(limit) = select.limit {
            self.push(&format!(" LIMIT {limit}"));
            if let Some(offset) = select.offset {
                self.push(&format!(" OFFSET {offset}"));
            }
        }
    }

    fn insert(&mut self, insert: &Insert) {
        self.push("INSERT INTO ");
        self.table(&insert.table);
        self.push(" (");
        self.list(&insert.values, |writer, (column, _)| writer.ident(column));
        self.push(") VALUES (");
        self.list(&insert.values, |writer, (_, value)| writer.bind(value));
        self.push(")");
    }

    fn update(&mut self, update: &Update) {
        self.push("UPDATE ");
        self.table(&update.table);
        self.push(" SET ");
        self.list(&update.assignments, |writer, (column, value)| {
            writer.ident(column);
            writer.push(" = ");
            writer.bind(value);
        });
        self.push(" WHERE ");
        self.condition(&update.filter);
    }

    fn delete(&mut self, delete: &Delete) {
        self.push("DELETE FROM ");
        self.table(&delete.table);
        self.push(" WHERE ");
        self.condition(&delete.filter);
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn column(name: &str) -> ColumnName {
        ColumnName {
            table: None,
            column: Ident::new(name),
        }
    }

    #[rstest]
    #[case("age", "age")]
    #[case("first name", "\"first name\"")]
    #[case("order", "\"order\"")]
    #[case("say\"hi", "\"say\"\"hi\"")]
    fn identifiers_are_quoted_only_when_needed(#[case] name: &str, #[case] expected: &str) {
        let mut writer = SqlWriter::default();
        writer.ident(&Ident::new(name));
        assert_eq!(writer.sql, expected);
    }

    #[rstest]
    fn condition_binds_in_text_order() {
        let mut condition = Condition::new(Predicate::Compare {
            column: column("age"),
            op: CompareOp::GtEq,
            value: json!(21),
        });
        condition.push(
            Connective::Or,
            Predicate::In {
                column: column("id"),
                negated: true,
                values: vec![json!(1), json!(2)],
            },
        );
        condition.push(
            Connective::And,
            Predicate::Like {
                column: column("name"),
                negated: false,
                pattern: json!("a%"),
            },
        );

        let mut writer = SqlWriter::default();
        writer.condition(&condition);

        assert_eq!(
            writer.sql,
            "(age >= ?) OR id NOT IN (?, ?) AND name LIKE ?"
        );
        assert_eq!(writer.params, vec![json!(21), json!(1), json!(2), json!("a%")]);
    }

    #[rstest]
    fn null_safe_equality_renders_as_is() {
        let mut writer = SqlWriter::default();
        writer.predicate(&Predicate::Compare {
            column: column("deleted_at"),
            op: CompareOp::NullSafeEq,
            value: Value::Null,
        });
        assert_eq!(writer.sql, "(deleted_at IS ?)");
    }

    #[rstest]
    #[case("left outer", Some(JoinKind::LeftOuter))]
    #[case(" Inner ", Some(JoinKind::Inner))]
    #[case("cross", None)]
    fn join_kinds_are_whitelisted(#[case] text: &str, #[case] expected: Option<JoinKind>) {
        assert_eq!(JoinKind::parse(text), expected);
    }
}
