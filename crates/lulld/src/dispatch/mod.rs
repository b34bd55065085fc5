//! Call dispatch over JSON lines.
//!
//! The connection handler reads one request per line, the [`Dispatcher`]
//! authenticates the caller, resolves `{module, method}` in the frozen
//! method table and invokes it, and each outcome goes back as one reply line.
//!
//! ```json
//! {"id":1,"method":"call","params":{"module":"Auth","method":"ValidatePassword","authkey":"...","params":["pw","hash"]}}
//! {"id":1,"result":true,"error":null}
//! ```

mod dispatcher;
mod errors;
mod handler;
mod request;
mod response;

pub use self::dispatcher::{CallEnvelope, Dispatcher};
pub use self::errors::DispatchError;
pub use self::handler::DispatchConnectionHandler;
pub use self::request::{RequestError, RpcCall, RpcRequest};
pub use self::response::{ErrorBody, ResponseWriter, RpcResponse};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
