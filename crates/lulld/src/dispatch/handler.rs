//! Connection handler serving JSON-line requests.
//!
//! A connection carries any number of requests, one per line, each answered
//! by exactly one reply line in order. Lines longer than
//! [`MAX_REQUEST_BYTES`] are discarded up to their newline and answered with
//! an error; the connection then continues with the next line.

use std::io::{self, BufRead, BufReader, Read};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::transport::{ConnectionHandler, ConnectionStream};

use super::DISPATCH_TARGET;
use super::dispatcher::Dispatcher;
use super::errors::DispatchError;
use super::request::{RpcCall, RpcRequest};
use super::response::{ResponseWriter, RpcResponse};

/// Maximum size of a single request line in bytes.
pub(crate) const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Connection handler that dispatches every request line it reads.
#[derive(Debug, Clone)]
pub struct DispatchConnectionHandler {
    dispatcher: Arc<Dispatcher>,
}

impl DispatchConnectionHandler {
    /// Creates a handler over `dispatcher`.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    fn serve(&self, stream: ConnectionStream) -> io::Result<()> {
        let peer = stream.peer();
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = ResponseWriter::new(stream);
        let mut line = Vec::new();
        loop {
            let response = match read_line(&mut reader, &mut line)? {
                Line::Eof => {
                    debug!(target: DISPATCH_TARGET, %peer, "client disconnected");
                    return Ok(());
                }
                Line::TooLong => {
                    warn!(target: DISPATCH_TARGET, %peer, "request line too large");
                    RpcResponse::failure(
                        Value::Null,
                        &DispatchError::RequestTooLarge {
                            max_size: MAX_REQUEST_BYTES,
                        },
                    )
                }
                Line::Complete if line.trim_ascii().is_empty() => continue,
                Line::Complete => self.respond(&line),
            };
            writer.write(&response)?;
        }
    }

    /// Answers one request line.
    pub fn respond(&self, line: &[u8]) -> RpcResponse {
        let request = match RpcRequest::parse(line) {
            Ok(request) => request,
            Err(failure) => {
                warn!(target: DISPATCH_TARGET, error = %failure.error, "malformed request");
                return RpcResponse::failure(failure.id, &failure.error);
            }
        };
        let outcome = match &request.call {
            RpcCall::Call(envelope) => self.dispatcher.call(envelope),
            RpcCall::CallMany(envelopes) => self
                .dispatcher
                .call_many(envelopes)
                .map(Value::Array),
        };
        if let Err(error) = &outcome {
            debug!(
                target: DISPATCH_TARGET,
                code = error.code(),
                %error,
                "call failed"
            );
        }
        RpcResponse::from_outcome(request.id, outcome)
    }
}

impl ConnectionHandler for DispatchConnectionHandler {
    fn handle(&self, stream: ConnectionStream) {
        if let Err(error) = self.serve(stream) {
            warn!(target: DISPATCH_TARGET, %error, "connection closed with error");
        }
    }
}

enum Line {
    Complete,
    TooLong,
    Eof,
}

/// Reads one newline-terminated line into `line`, giving up on lines over
/// the size limit after draining them.
fn read_line<R: Read>(reader: &mut BufReader<R>, line: &mut Vec<u8>) -> io::Result<Line> {
    line.clear();
    let read = reader
        .by_ref()
        .take(u64::try_from(MAX_REQUEST_BYTES + 1).unwrap_or(u64::MAX))
        .read_until(b'\n', line)?;
    if read == 0 {
        return Ok(Line::Eof);
    }
    if line.ends_with(b"\n") || line.len() <= MAX_REQUEST_BYTES {
        return Ok(Line::Complete);
    }
    drain_line(reader)?;
    Ok(Line::TooLong)
}

fn drain_line<R: Read>(reader: &mut BufReader<R>) -> io::Result<()> {
    loop {
        let buffer = reader.fill_buf()?;
        if buffer.is_empty() {
            return Ok(());
        }
        if let Some(position) = buffer.iter().position(|byte| *byte == b'\n') {
            reader.consume(position + 1);
            return Ok(());
        }
        let length = buffer.len();
        reader.consume(length);
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    use rstest::{fixture, rstest};
    use serde_json::json;

    use crate::modules::AuthModule;
    use crate::registry::ModuleRegistry;
    use crate::users::MemoryUsers;

    use super::*;

    #[fixture]
    fn handler() -> DispatchConnectionHandler {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(AuthModule::with_rounds(1)));
        let users = MemoryUsers::new().with_user(1, "good");
        DispatchConnectionHandler::new(Arc::new(Dispatcher::new(
            registry.freeze(),
            Arc::new(users),
        )))
    }

    struct Harness {
        client: TcpStream,
        server: JoinHandle<()>,
    }

    impl Harness {
        fn exchange(mut self, request: &[u8]) -> Vec<Value> {
            self.client.write_all(request).expect("write request");
            self.client
                .shutdown(std::net::Shutdown::Write)
                .expect("half close");
            let replies = BufReader::new(&self.client)
                .lines()
                .map(|line| serde_json::from_str(&line.expect("read")).expect("json reply"))
                .collect();
            self.server.join().expect("server join");
            replies
        }
    }

    #[fixture]
    fn harness(handler: DispatchConnectionHandler) -> Harness {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let address = listener.local_addr().expect("addr");
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            handler.handle(ConnectionStream::Tcp(stream));
        });
        let client = TcpStream::connect(address).expect("connect");
        Harness { client, server }
    }

    #[rstest]
    fn answers_every_line_in_order(harness: Harness) {
        let replies = harness.exchange(
            concat!(
                r#"{"id":1,"method":"call","params":{"module":"auth","method":"validatepassword","authkey":"good","params":["pw","bogus"]}}"#,
                "\n",
                "\n",
                r#"{"id":2,"method":"call","params":{"module":"Auth","method":"Nope","authkey":"good"}}"#,
                "\n",
                r#"{"id":3,"method":"call","params":{"module":"Auth","method":"Nope","authkey":"bad"}}"#,
                "\n",
            )
            .as_bytes(),
        );

        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0], json!({"id": 1, "result": false, "error": null}));
        assert_eq!(replies[1]["error"]["code"], "not_found");
        assert_eq!(replies[2]["error"]["code"], "auth_failure");
    }

    #[rstest]
    fn malformed_lines_do_not_end_the_connection(harness: Harness) {
        let replies = harness.exchange(
            concat!(
                "not json\n",
                r#"{"id":"b","method":"call_many","params":[]}"#,
                "\n",
            )
            .as_bytes(),
        );
        assert_eq!(replies[0]["error"]["code"], "malformed_request");
        assert_eq!(replies[1], json!({"id": "b", "result": [], "error": null}));
    }

    #[rstest]
    fn oversized_lines_are_drained_and_rejected(harness: Harness) {
        let mut request = vec![b'x'; MAX_REQUEST_BYTES + 10];
        request.push(b'\n');
        request.extend_from_slice(br#"{"id":7,"method":"call_many"}"#);
        request.push(b'\n');

        let replies = harness.exchange(&request);

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["error"]["code"], "malformed_request");
        assert!(
            replies[0]["error"]["message"]
                .as_str()
                .is_some_and(|message| message.contains("too large"))
        );
        assert_eq!(replies[1], json!({"id": 7, "result": [], "error": null}));
    }

    #[rstest]
    fn batches_stop_at_the_first_failure(handler: DispatchConnectionHandler) {
        let line = json!({
            "id": 5,
            "method": "call_many",
            "params": [
                {"module": "Auth", "method": "ValidatePassword", "authkey": "good", "params": ["a", "b"]},
                {"module": "Auth", "method": "ValidatePassword", "authkey": "good", "params": ["a"]},
                {"module": "Auth", "method": "Missing", "authkey": "good"},
            ],
        })
        .to_string();
        let reply = handler.respond(line.as_bytes());
        assert_eq!(reply.result, Value::Null);
        assert_eq!(reply.error.map(|error| error.code), Some("arity_mismatch"));
    }
}
