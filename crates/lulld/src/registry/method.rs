//! Typed method entries and parameter binding.
//!
//! A [`MethodEntry`] pairs a declared [`ParamShape`] with an invoke function.
//! The shape is checked before invocation: positional lists must match the
//! declared arity and kinds exactly, records are unpacked leniently through
//! the marshaller and only ever arrive as a map.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::dispatch::DispatchError;
use crate::marshal::{self, Record, ValueKind};
use crate::users::CallerId;

/// Identity and routing of the call being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// Authenticated caller.
    pub caller: CallerId,
    /// Authkey the caller presented.
    pub authkey: String,
    /// Canonical module name.
    pub module: &'static str,
    /// Canonical method name.
    pub method: &'static str,
}

/// Parameters after shape checking.
#[derive(Debug, Clone, Copy)]
pub enum Params<'a> {
    /// Positional values; arity and kinds already match.
    Positional(&'a [Value]),
    /// Field-keyed map for a record parameter.
    Record(&'a Value),
}

/// Declared parameter shape of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamShape {
    /// Ordered scalar parameters.
    Positional(Vec<ValueKind>),
    /// A single record bound from a map.
    Record {
        /// Record type name used in errors.
        name: &'static str,
    },
}

impl ParamShape {
    /// Checks `params` against the shape. `null` counts as an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ArityMismatch`] or
    /// [`DispatchError::TypeMismatch`] when the shape disagrees.
    pub fn bind<'a>(
        &self,
        module: &str,
        method: &str,
        params: &'a Value,
    ) -> Result<Params<'a>, DispatchError> {
        match (self, params) {
            (Self::Positional(kinds), Value::Array(values)) => {
                check_positional(module, method, kinds, values)?;
                Ok(Params::Positional(values))
            }
            (Self::Positional(kinds), Value::Null) => {
                check_positional(module, method, kinds, &[])?;
                Ok(Params::Positional(&[]))
            }
            (Self::Positional(_), other) => Err(DispatchError::type_mismatch(
                module,
                method,
                None,
                "positional list",
                ValueKind::of(other),
            )),
            (Self::Record { .. }, map @ Value::Object(_)) => Ok(Params::Record(map)),
            (Self::Record { name }, Value::Array(values)) => match values.as_slice() {
                [other] => Err(DispatchError::type_mismatch(
                    module,
                    method,
                    Some(0),
                    *name,
                    ValueKind::of(other),
                )),
                _ => Err(DispatchError::arity(module, method, 1, values.len())),
            },
            (Self::Record { .. }, Value::Null) => Err(DispatchError::arity(module, method, 1, 0)),
            (Self::Record { name }, other) => Err(DispatchError::type_mismatch(
                module,
                method,
                None,
                *name,
                ValueKind::of(other),
            )),
        }
    }
}

fn check_positional(
    module: &str,
    method: &str,
    kinds: &[ValueKind],
    values: &[Value],
) -> Result<(), DispatchError> {
    if kinds.len() != values.len() {
        return Err(DispatchError::arity(module, method, kinds.len(), values.len()));
    }
    for (position, (declared, value)) in kinds.iter().zip(values).enumerate() {
        let found = ValueKind::of(value);
        if !declared.accepts(found) {
            return Err(DispatchError::type_mismatch(
                module,
                method,
                Some(position),
                declared.to_string(),
                found,
            ));
        }
    }
    Ok(())
}

/// Scalar usable as a positional parameter.
pub trait Scalar: Sized {
    /// Declared kind.
    const KIND: ValueKind;

    /// Extracts the scalar from a value already checked against
    /// [`Self::KIND`].
    fn from_value(value: &Value) -> Option<Self>;
}

impl Scalar for String {
    const KIND: ValueKind = ValueKind::String;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl Scalar for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl Scalar for i64 {
    const KIND: ValueKind = ValueKind::Integer;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl Scalar for f64 {
    const KIND: ValueKind = ValueKind::Float;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

type Invoke =
    Arc<dyn Fn(&CallContext, Params<'_>) -> Result<Value, DispatchError> + Send + Sync>;

/// One remotely callable method.
#[derive(Clone)]
pub struct MethodEntry {
    name: &'static str,
    shape: ParamShape,
    invoke: Invoke,
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MethodEntry")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

impl MethodEntry {
    /// Method taking one record bound from a field-keyed map.
    pub fn record<R, T, F>(name: &'static str, handler: F) -> Self
    where
        R: Record,
        T: Serialize,
        F: Fn(&CallContext, R) -> Result<T, DispatchError> + Send + Sync + 'static,
    {
        let invoke = move |context: &CallContext, params: Params<'_>| {
            let Params::Record(value) = params else {
                return Err(shape_violation(context));
            };
            let (record, report) = marshal::unpack::<R>(value).map_err(|error| {
                DispatchError::type_mismatch(
                    context.module,
                    context.method,
                    None,
                    error.expected(R::EXPECTED),
                    error.found(),
                )
            })?;
            report.log(context.module, context.method);
            encode(handler(context, record)?)
        };
        Self {
            name,
            shape: ParamShape::Record { name: R::EXPECTED },
            invoke: Arc::new(invoke),
        }
    }

    /// Method taking no parameters.
    pub fn nullary<T, F>(name: &'static str, handler: F) -> Self
    where
        T: Serialize,
        F: Fn(&CallContext) -> Result<T, DispatchError> + Send + Sync + 'static,
    {
        Self {
            name,
            shape: ParamShape::Positional(Vec::new()),
            invoke: Arc::new(move |context: &CallContext, _params: Params<'_>| {
                encode(handler(context)?)
            }),
        }
    }

    /// Method taking one positional scalar.
    pub fn unary<A, T, F>(name: &'static str, handler: F) -> Self
    where
        A: Scalar,
        T: Serialize,
        F: Fn(&CallContext, A) -> Result<T, DispatchError> + Send + Sync + 'static,
    {
        let invoke = move |context: &CallContext, params: Params<'_>| {
            let Params::Positional([first]) = params else {
                return Err(shape_violation(context));
            };
            let first = scalar::<A>(context, first)?;
            encode(handler(context, first)?)
        };
        Self {
            name,
            shape: ParamShape::Positional(vec![A::KIND]),
            invoke: Arc::new(invoke),
        }
    }

    /// Method taking two positional scalars.
    pub fn binary<A, B, T, F>(name: &'static str, handler: F) -> Self
    where
        A: Scalar,
        B: Scalar,
        T: Serialize,
        F: Fn(&CallContext, A, B) -> Result<T, DispatchError> + Send + Sync + 'static,
    {
        let invoke = move |context: &CallContext, params: Params<'_>| {
            let Params::Positional([first, second]) = params else {
                return Err(shape_violation(context));
            };
            let first = scalar::<A>(context, first)?;
            let second = scalar::<B>(context, second)?;
            encode(handler(context, first, second)?)
        };
        Self {
            name,
            shape: ParamShape::Positional(vec![A::KIND, B::KIND]),
            invoke: Arc::new(invoke),
        }
    }

    /// Canonical method name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Declared parameter shape.
    #[must_use]
    pub fn shape(&self) -> &ParamShape {
        &self.shape
    }

    /// Checks `params` against the shape and invokes the method.
    ///
    /// # Errors
    ///
    /// Returns shape errors before invocation, or whatever the method fails
    /// with.
    pub fn call(&self, context: &CallContext, params: &Value) -> Result<Value, DispatchError> {
        let bound = self.shape.bind(context.module, context.method, params)?;
        (self.invoke)(context, bound)
    }
}

fn scalar<A: Scalar>(context: &CallContext, value: &Value) -> Result<A, DispatchError> {
    A::from_value(value).ok_or_else(|| shape_violation(context))
}

fn shape_violation(context: &CallContext) -> DispatchError {
    DispatchError::internal(format!(
        "parameters for '{}.{}' bypassed shape checking",
        context.module, context.method
    ))
}

fn encode<T: Serialize>(result: T) -> Result<Value, DispatchError> {
    serde_json::to_value(result)
        .map_err(|error| DispatchError::internal(format!("failed to encode result: {error}")))
}
