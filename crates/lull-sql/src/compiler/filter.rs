//! Filter and having grammar.
//!
//! A filter is a flat list of verb tokens (`where`, `where-in`, `like`),
//! modifier tokens (`or`, `not`) and clause maps. A clause compiles under the
//! most recent verb; modifiers apply to the next clause only. Keys of a
//! clause map are visited in sorted order.

use serde_json::{Map, Value};

use crate::errors::CompileError;

use super::ast::{CompareOp, Condition, Connective, Predicate};
use super::scope::Scope;

const FILTER: &str = "filter";
const HAVING: &str = "having";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Where,
    WhereIn,
    Like,
}

impl Verb {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "where" => Some(Self::Where),
            "where-in" => Some(Self::WhereIn),
            "like" => Some(Self::Like),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Builder {
    condition: Option<Condition>,
}

impl Builder {
    fn extend(&mut self, connective: Connective, predicates: Vec<Predicate>) {
        for predicate in predicates {
            match self.condition.as_mut() {
                Some(condition) => condition.push(connective, predicate),
                None => self.condition = Some(Condition::new(predicate)),
            }
        }
    }
}

/// Compiles a filter list; `None` when it yields no predicate.
pub(crate) fn parse_filter(
    scope: &Scope<'_>,
    items: &[Value],
) -> Result<Option<Condition>, CompileError> {
    let mut builder = Builder::default();
    let mut verb = None;
    let mut or = false;
    let mut not = false;

    for item in items {
        match item {
            Value::String(token) => {
                if let Some(next) = Verb::parse(token) {
                    verb = Some(next);
                } else {
                    match token.as_str() {
                        "or" => or = true,
                        "not" => not = true,
                        other => {
                            return Err(CompileError::malformed(
                                FILTER,
                                format!("unexpected token '{other}'"),
                            ));
                        }
                    }
                }
            }
            Value::Object(clause) => {
                let Some(current) = verb else {
                    return Err(CompileError::malformed(
                        FILTER,
                        "clause appears before any of 'where', 'where-in' or 'like'",
                    ));
                };
                if clause.is_empty() {
                    return Err(CompileError::malformed(FILTER, "empty clause"));
                }
                let predicates = match current {
                    Verb::Where if not => {
                        return Err(CompileError::malformed(
                            FILTER,
                            "'not' only applies to 'where-in' and 'like'",
                        ));
                    }
                    Verb::Where => comparisons(scope, clause, FILTER)?,
                    Verb::WhereIn => vec![membership(scope, clause, not)?],
                    Verb::Like => likes(scope, clause, not)?,
                };
                builder.extend(connective(or), predicates);
                or = false;
                not = false;
            }
            _ => {
                return Err(CompileError::malformed(
                    FILTER,
                    "entries must be tokens or clause maps",
                ));
            }
        }
    }

    Ok(builder.condition)
}

/// Compiles a having list; only the `or` modifier is accepted.
pub(crate) fn parse_having(
    scope: &Scope<'_>,
    items: &[Value],
) -> Result<Option<Condition>, CompileError> {
    let mut builder = Builder::default();
    let mut or = false;

    for item in items {
        match item {
            Value::String(token) if token == "or" => or = true,
            Value::String(token) => {
                return Err(CompileError::malformed(
                    HAVING,
                    format!("unexpected token '{token}'"),
                ));
            }
            Value::Object(clause) if clause.is_empty() => {
                return Err(CompileError::malformed(HAVING, "empty clause"));
            }
            Value::Object(clause) => {
                builder.extend(connective(or), comparisons(scope, clause, HAVING)?);
                or = false;
            }
            _ => {
                return Err(CompileError::malformed(
                    HAVING,
                    "entries must be 'or' or clause maps",
                ));
            }
        }
    }

    Ok(builder.condition)
}

fn connective(or: bool) -> Connective {
    if or { Connective::Or } else { Connective::And }
}

fn comparisons(
    scope: &Scope<'_>,
    clause: &Map<String, Value>,
    portion: &'static str,
) -> Result<Vec<Predicate>, CompileError> {
    clause
        .iter()
        .map(|(key, value)| {
            let mut fields = key.split_whitespace();
            let (column, op) = match (fields.next(), fields.next(), fields.next()) {
                (Some(column), None, None) => (column, CompareOp::Eq),
                (Some(column), Some(op), None) => {
                    let op = CompareOp::parse(op).ok_or_else(|| {
                        CompileError::malformed(portion, format!("invalid operator '{op}'"))
                    })?;
                    (column, op)
                }
                _ => {
                    return Err(CompileError::malformed(
                        portion,
                        format!("malformed column definition '{key}'"),
                    ));
                }
            };
            Ok(Predicate::Compare {
                column: scope.column(column)?,
                op,
                value: value.clone(),
            })
        })
        .collect()
}

fn membership(
    scope: &Scope<'_>,
    clause: &Map<String, Value>,
    negated: bool,
) -> Result<Predicate, CompileError> {
    if let Some(extra) = clause.keys().find(|key| !matches!(key.as_str(), "column" | "in")) {
        return Err(CompileError::malformed(
            FILTER,
            format!("unexpected key '{extra}' in 'where-in' clause"),
        ));
    }
    let Some(Value::String(column)) = clause.get("column") else {
        return Err(CompileError::malformed(
            FILTER,
            "'where-in' column must be a string",
        ));
    };
    let Some(Value::Array(values)) = clause.get("in") else {
        return Err(CompileError::malformed(
            FILTER,
            "'where-in' values must be a list",
        ));
    };
    if values.is_empty() {
        return Err(CompileError::malformed(
            FILTER,
            "'where-in' values must not be empty",
        ));
    }
    Ok(Predicate::In {
        column: scope.column(column)?,
        negated,
        values: values.clone(),
    })
}

fn likes(
    scope: &Scope<'_>,
    clause: &Map<String, Value>,
    negated: bool,
) -> Result<Vec<Predicate>, CompileError> {
    clause
        .iter()
        .map(|(column, pattern)| {
            Ok(Predicate::Like {
                column: scope.column(column)?,
                negated,
                pattern: pattern.clone(),
            })
        })
        .collect()
}
