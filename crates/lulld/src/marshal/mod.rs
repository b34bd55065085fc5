//! Binding of loosely typed request values onto typed method parameters.
//!
//! Wire parameters arrive as a [`serde_json::Value`] tree. Each parameter type
//! implements [`Decode`], which is lenient at the leaves: a scalar or map that
//! neither fits nor converts to the destination type yields the type's default
//! and a warning in the [`DecodeReport`]. Shape is strict: the outermost value
//! has to be an object, and a list only binds onto a sequence.
//!
//! Records declare their fields with [`decode_record!`]; field names match
//! case-insensitively.


use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

pub(crate) const MARSHAL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::marshal");

/// Runtime kind of a wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// JSON `null`.
    Null,
    /// `true` or `false`.
    Bool,
    /// Number written without a fraction or exponent.
    Integer,
    /// Any other number.
    Float,
    /// String.
    String,
    /// Array.
    List,
    /// Object.
    Map,
}

impl ValueKind {
    /// Kind of `value`.
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(number) if number.is_i64() || number.is_u64() => Self::Integer,
            Value::Number(_) => Self::Float,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::List,
            Value::Object(_) => Self::Map,
        }
    }

    /// Whether a value of kind `found` may be passed where `self` is declared.
    /// Integers widen to floats.
    #[must_use]
    pub fn accepts(self, found: Self) -> bool {
        self == found || (self == Self::Float && found == Self::Integer)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::List => "list",
            Self::Map => "map",
        };
        formatter.write_str(name)
    }
}

/// Errors raised when the outermost value cannot be bound at all.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarshalError {
    /// A record was expected but some other kind arrived.
    #[error("cannot unpack {found} onto a record")]
    NotARecord {
        /// Kind that arrived.
        found: ValueKind,
    },
    /// A list arrived for a destination that is not a sequence.
    #[error("cannot unpack a list onto {expected} at '{path}'")]
    NotASequence {
        /// Dotted path of the field.
        path: String,
        /// Destination type.
        expected: &'static str,
    },
}

impl MarshalError {
    /// Kind of the value that could not be bound.
    #[must_use]
    pub fn found(&self) -> ValueKind {
        match self {
            Self::NotARecord { found } => *found,
            Self::NotASequence { .. } => ValueKind::List,
        }
    }

    /// Destination the value was bound to; `record` names the outermost type.
    #[must_use]
    pub fn expected(&self, record: &str) -> String {
        match self {
            Self::NotARecord { .. } => record.to_owned(),
            Self::NotASequence { path, expected } => format!("{expected} at '{path}'"),
        }
    }
}

/// One leniency applied while decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeWarning {
    /// The value did not fit and the destination's default was used.
    Fallback {
        /// Dotted path of the field.
        path: String,
        /// Destination type.
        expected: &'static str,
        /// Kind that arrived.
        found: ValueKind,
    },
    /// The record has no such field; the value was ignored.
    UnknownField {
        /// Dotted path of the field.
        path: String,
    },
}

impl fmt::Display for DecodeWarning {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fallback {
                path,
                expected,
                found,
            } => write!(formatter, "{path}: expected {expected}, found {found}; using default"),
            Self::UnknownField { path } => write!(formatter, "{path}: unknown field ignored"),
        }
    }
}

/// Leniencies collected while decoding one parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeReport {
    warnings: Vec<DecodeWarning>,
}

impl DecodeReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing was coerced or dropped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Collected warnings in decode order.
    #[must_use]
    pub fn warnings(&self) -> &[DecodeWarning] {
        &self.warnings
    }

    /// Records that `value` at `path` fell back to the default of `expected`.
    pub fn fallback(&mut self, path: &str, expected: &'static str, value: &Value) {
        self.warnings.push(DecodeWarning::Fallback {
            path: display_path(path),
            expected,
            found: ValueKind::of(value),
        });
    }

    /// Records an ignored field.
    pub fn unknown_field(&mut self, path: &str) {
        self.warnings.push(DecodeWarning::UnknownField {
            path: display_path(path),
        });
    }

    /// Emits every warning under the marshal target.
    pub fn log(&self, module: &str, method: &str) {
        for warning in &self.warnings {
            warn!(
                target: MARSHAL_TARGET,
                module,
                method,
                %warning,
                "lenient parameter decode"
            );
        }
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        String::from("<root>")
    } else {
        path.to_owned()
    }
}

/// Path of `field` below `parent`.
#[must_use]
pub fn child_path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_owned()
    } else {
        format!("{parent}.{field}")
    }
}

fn index_path(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}

/// Lenient conversion from a wire value.
///
/// `null` leaves the destination at its default without a warning.
pub trait Decode: Default {
    /// Name used in warnings.
    const EXPECTED: &'static str;

    /// Converts `value`, falling back to the default and recording a warning
    /// when a scalar or map does not fit.
    ///
    /// # Errors
    ///
    /// Returns [`MarshalError::NotASequence`] when a list arrives for a
    /// destination that is not a sequence.
    fn decode(value: &Value, path: &str, report: &mut DecodeReport) -> Result<Self, MarshalError>;
}

/// Record whose fields are bound by name.
pub trait Record: Decode {
    /// Declared field names, lower-case.
    const FIELDS: &'static [&'static str];

    /// Builds the record from an object's entries.
    ///
    /// # Errors
    ///
    /// Propagates the first field that cannot be bound.
    fn from_fields(
        fields: &Map<String, Value>,
        path: &str,
        report: &mut DecodeReport,
    ) -> Result<Self, MarshalError>;
}

/// Binds `value` onto record `R`.
///
/// # Errors
///
/// Returns [`MarshalError::NotARecord`] when `value` is not an object and
/// [`MarshalError::NotASequence`] when a nested list meets a field that is
/// not a sequence.
pub fn unpack<R: Record>(value: &Value) -> Result<(R, DecodeReport), MarshalError> {
    let Value::Object(fields) = value else {
        return Err(MarshalError::NotARecord {
            found: ValueKind::of(value),
        });
    };
    let mut report = DecodeReport::new();
    let record = R::from_fields(fields, "", &mut report)?;
    Ok((record, report))
}

/// Refuses lists for destinations that are not sequences.
///
/// # Errors
///
/// Returns [`MarshalError::NotASequence`] when `value` is a list.
pub fn reject_list(value: &Value, path: &str, expected: &'static str) -> Result<(), MarshalError> {
    if value.is_array() {
        return Err(MarshalError::NotASequence {
            path: display_path(path),
            expected,
        });
    }
    Ok(())
}

/// Case-insensitive lookup of `name` in `fields`; an exact match wins.
#[must_use]
pub fn field<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    fields.get(name).or_else(|| {
        fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

/// Records every entry of `fields` that `known` does not declare.
pub fn report_unknown(
    fields: &Map<String, Value>,
    known: &[&str],
    path: &str,
    report: &mut DecodeReport,
) {
    for key in fields.keys() {
        if !known.iter().any(|name| key.eq_ignore_ascii_case(name)) {
            report.unknown_field(&child_path(path, key));
        }
    }
}

/// Implements [`Decode`] and [`Record`] for a struct with a `Default` impl.
///
/// ```ignore
/// decode_record!(Login { user => "user", remember => "remember" });
/// ```
#[macro_export]
macro_rules! decode_record {
    ($record:ty { $($field:ident => $name:literal),* $(,)? }) => {
        impl $crate::marshal::Decode for $record {
            const EXPECTED: &'static str = stringify!($record);

            fn decode(
                value: &::serde_json::Value,
                path: &str,
                report: &mut $crate::marshal::DecodeReport,
            ) -> Result<Self, $crate::marshal::MarshalError> {
                $crate::marshal::reject_list(value, path, Self::EXPECTED)?;
                match value {
                    ::serde_json::Value::Object(fields) => {
                        <Self as $crate::marshal::Record>::from_fields(fields, path, report)
                    }
                    ::serde_json::Value::Null => Ok(Self::default()),
                    other => {
                        report.fallback(path, Self::EXPECTED, other);
                        Ok(Self::default())
                    }
                }
            }
        }

        impl $crate::marshal::Record for $record {
            const FIELDS: &'static [&'static str] = &[$($name),*];

            fn from_fields(
                fields: &::serde_json::Map<String, ::serde_json::Value>,
                path: &str,
                report: &mut $crate::marshal::DecodeReport,
            ) -> Result<Self, $crate::marshal::MarshalError> {
                let mut record = Self::default();
                $(
                    if let Some(value) = $crate::marshal::field(fields, $name) {
                        record.$field = $crate::marshal::Decode::decode(
                            value,
                            &$crate::marshal::child_path(path, $name),
                            report,
                        )?;
                    }
                )*
                $crate::marshal::report_unknown(fields, Self::FIELDS, path, report);
                Ok(record)
            }
        }
    };
}

fn leaf<T: Decode>(
    value: &Value,
    path: &str,
    report: &mut DecodeReport,
    convert: impl FnOnce(&Value) -> Option<T>,
) -> Result<T, MarshalError> {
    reject_list(value, path, T::EXPECTED)?;
    if value.is_null() {
        return Ok(T::default());
    }
    Ok(convert(value).unwrap_or_else(|| {
        report.fallback(path, T::EXPECTED, value);
        T::default()
    }))
}

impl Decode for String {
    const EXPECTED: &'static str = "string";

    fn decode(value: &Value, path: &str, report: &mut DecodeReport) -> Result<Self, MarshalError> {
        leaf(value, path, report, |value| value.as_str().map(str::to_owned))
    }
}

impl Decode for bool {
    const EXPECTED: &'static str = "bool";

    fn decode(value: &Value, path: &str, report: &mut DecodeReport) -> Result<Self, MarshalError> {
        leaf(value, path, report, Value::as_bool)
    }
}

impl Decode for i64 {
    const EXPECTED: &'static str = "integer";

    fn decode(value: &Value, path: &str, report: &mut DecodeReport) -> Result<Self, MarshalError> {
        leaf(value, path, report, |value| {
            value.as_i64().or_else(|| value.as_f64().and_then(whole_number))
        })
    }
}

impl Decode for f64 {
    const EXPECTED: &'static str = "float";

    fn decode(value: &Value, path: &str, report: &mut DecodeReport) -> Result<Self, MarshalError> {
        leaf(value, path, report, Value::as_f64)
    }
}

impl Decode for Value {
    const EXPECTED: &'static str = "value";

    fn decode(value: &Value, _path: &str, _report: &mut DecodeReport) -> Result<Self, MarshalError> {
        Ok(value.clone())
    }
}

impl<T: Decode> Decode for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;

    fn decode(value: &Value, path: &str, report: &mut DecodeReport) -> Result<Self, MarshalError> {
        match value {
            Value::Null => Ok(None),
            other => T::decode(other, path, report).map(Some),
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    const EXPECTED: &'static str = "list";

    fn decode(value: &Value, path: &str, report: &mut DecodeReport) -> Result<Self, MarshalError> {
        match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| T::decode(item, &index_path(path, index), report))
                .collect(),
            Value::Null => Ok(Self::new()),
            other => {
                report.fallback(path, Self::EXPECTED, other);
                Ok(Self::new())
            }
        }
    }
}

impl<T: Decode> Decode for BTreeMap<String, T> {
    const EXPECTED: &'static str = "map";

    fn decode(value: &Value, path: &str, report: &mut DecodeReport) -> Result<Self, MarshalError> {
        decode_entries(value, path, report)
    }
}

impl<T: Decode, S: std::hash::BuildHasher + Default> Decode for HashMap<String, T, S> {
    const EXPECTED: &'static str = "map";

    fn decode(value: &Value, path: &str, report: &mut DecodeReport) -> Result<Self, MarshalError> {
        decode_entries(value, path, report)
    }
}

fn decode_entries<T: Decode, C: FromIterator<(String, T)> + Default>(
    value: &Value,
    path: &str,
    report: &mut DecodeReport,
) -> Result<C, MarshalError> {
    reject_list(value, path, "map")?;
    match value {
        Value::Object(entries) => entries
            .iter()
            .map(|(key, item)| {
                T::decode(item, &child_path(path, key), report).map(|decoded| (key.clone(), decoded))
            })
            .collect(),
        Value::Null => Ok(C::default()),
        other => {
            report.fallback(path, "map", other);
            Ok(C::default())
        }
    }
}

/// Float to integer conversion truncating toward zero; `None` when the value
/// is not finite or falls outside the `i64` range.
fn whole_number(number: f64) -> Option<i64> {
    format!("{:.0}", number.trunc()).parse().ok()
}
