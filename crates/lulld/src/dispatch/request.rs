//! Request deserialization for the connection loop.
//!
//! Each line holds one JSON request:
//! `{"id": any, "method": "call" | "call_many", "params": ...}`.

use serde::Deserialize;
use serde_json::Value;

use super::dispatcher::CallEnvelope;
use super::errors::DispatchError;

/// Service prefix accepted in front of method names.
const SERVICE_PREFIX: &str = "lull.";

/// Raw request line.
#[derive(Debug, Deserialize)]
struct RequestLine {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Parsed request.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    /// Client-chosen id echoed in the reply.
    pub id: Value,
    /// Requested operation.
    pub call: RpcCall,
}

/// Operation requested by a line.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcCall {
    /// A single envelope.
    Call(CallEnvelope),
    /// Envelopes run in order.
    CallMany(Vec<CallEnvelope>),
}

impl RpcRequest {
    /// Parses one request line. Trailing whitespace, including the newline,
    /// is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] with whatever id could be recovered when the
    /// line is not a valid request.
    pub fn parse(line: &[u8]) -> Result<Self, RequestError> {
        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            return Err(RequestError::anonymous(DispatchError::malformed(
                "empty request line",
            )));
        }
        let raw: Value = serde_json::from_slice(trimmed)
            .map_err(|error| RequestError::anonymous(DispatchError::malformed(error.to_string())))?;
        let id = raw.get("id").cloned().unwrap_or(Value::Null);
        let line: RequestLine = serde_json::from_value(raw).map_err(|error| RequestError {
            id: id.clone(),
            error: DispatchError::malformed(error.to_string()),
        })?;
        let call = parse_call(&line.method, line.params).map_err(|error| RequestError {
            id: id.clone(),
            error,
        })?;
        Ok(Self { id: line.id, call })
    }
}

/// Parse failure, carrying the request id when one was readable.
#[derive(Debug)]
pub struct RequestError {
    /// Request id, or `null`.
    pub id: Value,
    /// Failure to report.
    pub error: DispatchError,
}

impl RequestError {
    fn anonymous(error: DispatchError) -> Self {
        Self {
            id: Value::Null,
            error,
        }
    }
}

fn parse_call(method: &str, params: Value) -> Result<RpcCall, DispatchError> {
    let name = method.trim();
    let name = strip_prefix_ignore_case(name, SERVICE_PREFIX).unwrap_or(name);
    let name = name.to_ascii_lowercase().replace(['_', '-'], "");
    match name.as_str() {
        "call" => envelope(params).map(RpcCall::Call),
        "callmany" => match params {
            Value::Array(items) => items
                .into_iter()
                .map(envelope)
                .collect::<Result<Vec<_>, _>>()
                .map(RpcCall::CallMany),
            Value::Null => Ok(RpcCall::CallMany(Vec::new())),
            _ => Err(DispatchError::malformed(
                "call_many params must be a list of envelopes",
            )),
        },
        _ => Err(DispatchError::malformed(format!(
            "unknown request method '{method}'"
        ))),
    }
}

fn envelope(params: Value) -> Result<CallEnvelope, DispatchError> {
    let params = match params {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    };
    serde_json::from_value(params)
        .map_err(|error| DispatchError::malformed(format!("invalid call envelope: {error}")))
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| text.get(prefix.len()..))
        .flatten()
}
