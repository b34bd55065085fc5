//! Socket transport for the RPC endpoint.
//!
//! The listener binds the configured endpoint, accepts connections on a
//! background thread and hands each one to a [`ConnectionHandler`] on its own
//! thread. A [`ConnectionLimiter`] caps how many connections are served at
//! once.

mod errors;
mod handler;
mod limiter;
mod listener;

pub(crate) use self::errors::ListenerError;
pub(crate) use self::handler::{ConnectionHandler, ConnectionStream};
pub(crate) use self::limiter::ConnectionLimiter;
pub(crate) use self::listener::{ListenerHandle, SocketListener};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
