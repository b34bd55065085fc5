//! Reply serialization for the connection loop.

use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;

use super::errors::DispatchError;

/// Error object carried by a failed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Stable category, see [`DispatchError::code`].
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
}

/// One reply line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcResponse {
    /// Id of the request being answered.
    pub id: Value,
    /// Result on success, otherwise `null`.
    pub result: Value,
    /// Error on failure, otherwise `null`.
    pub error: Option<ErrorBody>,
}

impl RpcResponse {
    /// Successful reply.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    /// Failed reply.
    #[must_use]
    pub fn failure(id: Value, error: &DispatchError) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Some(ErrorBody {
                code: error.code(),
                message: error.to_string(),
            }),
        }
    }

    /// Reply for `outcome`.
    #[must_use]
    pub fn from_outcome(id: Value, outcome: Result<Value, DispatchError>) -> Self {
        match outcome {
            Ok(result) => Self::success(id, result),
            Err(error) => Self::failure(id, &error),
        }
    }
}

/// Writes replies as JSON lines.
pub struct ResponseWriter<W> {
    writer: W,
}

impl<W: Write> ResponseWriter<W> {
    /// Wraps `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes `response` followed by a newline and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write(&mut self, response: &RpcResponse) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, response)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn render(response: &RpcResponse) -> Value {
        let mut output = Vec::new();
        ResponseWriter::new(&mut output)
            .write(response)
            .expect("write reply");
        assert!(output.ends_with(b"\n"));
        serde_json::from_slice(&output).expect("reply is json")
    }

    #[rstest]
    fn successes_carry_a_null_error() {
        let reply = render(&RpcResponse::success(json!(1), json!({"rows": 2})));
        assert_eq!(reply, json!({"id": 1, "result": {"rows": 2}, "error": null}));
    }

    #[rstest]
    fn failures_carry_code_and_message() {
        let error = DispatchError::not_found("Database", "Nope");
        let reply = render(&RpcResponse::failure(json!("x"), &error));
        assert_eq!(
            reply,
            json!({
                "id": "x",
                "result": null,
                "error": {"code": "not_found", "message": "method 'Database.Nope' does not exist"},
            })
        );
    }
}
