//! Inspection of caller-supplied SQL statements.
//!
//! Raw statements are not validated against the catalog. The inspector only
//! reads the leading verb and the object the statement names so the caller
//! knows whether to fetch rows and what to refresh or invalidate afterwards.

use crate::errors::CompileError;

/// Leading keyword of a raw statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// `SELECT`
    Select,
    /// `WITH`
    With,
    /// `SHOW`
    Show,
    /// `DESCRIBE`
    Describe,
    /// `EXPLAIN`
    Explain,
    /// `PRAGMA`
    Pragma,
    /// `INSERT`
    Insert,
    /// `UPDATE`
    Update,
    /// `DELETE`
    Delete,
    /// `CREATE`
    Create,
    /// `ALTER`
    Alter,
    /// `DROP`
    Drop,
    /// Anything else.
    Other,
}

impl Verb {
    fn parse(token: &str) -> Self {
        match token.to_ascii_uppercase().as_str() {
            "SELECT" => Self::Select,
            "WITH" => Self::With,
            "SHOW" => Self::Show,
            "DESCRIBE" | "DESC" => Self::Describe,
            "EXPLAIN" => Self::Explain,
            "PRAGMA" => Self::Pragma,
            "INSERT" | "REPLACE" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "CREATE" => Self::Create,
            "ALTER" => Self::Alter,
            "DROP" => Self::Drop,
            _ => Self::Other,
        }
    }

    /// Whether statements starting with this verb produce rows.
    #[must_use]
    pub fn returns_rows(self) -> bool {
        matches!(
            self,
            Self::Select | Self::With | Self::Show | Self::Describe | Self::Explain | Self::Pragma
        )
    }
}

/// Object named by a raw statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawTarget {
    /// No object could be determined.
    None,
    /// A table, possibly written as `db.table`.
    Table {
        /// Table name as written.
        name: String,
    },
    /// A database.
    Database {
        /// Database name.
        name: String,
    },
}

/// Parsed view of a raw statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStatement {
    verb: Verb,
    target: RawTarget,
}

impl RawStatement {
    /// Inspects `sql`.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::FilterMalformed`] for an empty statement.
    pub fn inspect(sql: &str) -> Result<Self, CompileError> {
        let tokens = sql.split_whitespace().collect::<Vec<_>>();
        let Some(first) = tokens.first() else {
            return Err(CompileError::malformed("query", "statement is empty"));
        };
        let verb = Verb::parse(first);
        let target = match verb {
            Verb::Delete => table_after(&tokens, "FROM"),
            Verb::Insert => table_after(&tokens, "INTO"),
            Verb::Update => table_before_set(&tokens),
            Verb::Create | Verb::Alter | Verb::Drop => schema_object(&tokens),
            _ => RawTarget::None,
        };
        Ok(Self { verb, target })
    }

    /// Leading verb.
    #[must_use]
    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// Object the statement names.
    #[must_use]
    pub fn target(&self) -> &RawTarget {
        &self.target
    }

    /// Whether the statement produces rows.
    #[must_use]
    pub fn returns_rows(&self) -> bool {
        self.verb.returns_rows()
    }
}

fn position(tokens: &[&str], keyword: &str) -> Option<usize> {
    tokens
        .iter()
        .position(|token| token.eq_ignore_ascii_case(keyword))
}

fn clean_name(token: &str) -> Option<String> {
    let name = token
        .split('(')
        .next()
        .unwrap_or_default()
        .trim_end_matches([';', ','])
        .chars()
        .filter(|c| !matches!(c, '"' | '`' | '[' | ']'))
        .collect::<String>();
    (!name.is_empty()).then_some(name)
}

fn table_after(tokens: &[&str], keyword: &str) -> RawTarget {
    position(tokens, keyword)
        .and_then(|index| tokens.get(index + 1))
        .and_then(|token| clean_name(token))
        .map_or(RawTarget::None, |name| RawTarget::Table { name })
}

fn table_before_set(tokens: &[&str]) -> RawTarget {
    position(tokens, "SET")
        .and_then(|index| index.checked_sub(1))
        .filter(|index| *index > 0)
        .and_then(|index| tokens.get(index))
        .and_then(|token| clean_name(token))
        .map_or(RawTarget::None, |name| RawTarget::Table { name })
}

fn schema_object(tokens: &[&str]) -> RawTarget {
    let Some(index) = tokens.iter().position(|token| {
        token.eq_ignore_ascii_case("TABLE") || token.eq_ignore_ascii_case("DATABASE")
    }) else {
        return RawTarget::None;
    };
    let is_table = tokens
        .get(index)
        .is_some_and(|token| token.eq_ignore_ascii_case("TABLE"));
    let name = tokens
        .iter()
        .skip(index + 1)
        .find(|token| {
            !["IF", "NOT", "EXISTS"]
                .iter()
                .any(|keyword| token.eq_ignore_ascii_case(keyword))
        })
        .and_then(|token| clean_name(token));
    match (name, is_table) {
        (Some(name), true) => RawTarget::Table { name },
        (Some(name), false) => RawTarget::Database { name },
        (None, _) => RawTarget::None,
    }
}
