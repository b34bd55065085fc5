//! Listener failures.

use std::io;
use std::net::SocketAddr;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while binding or running the RPC listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The TCP host name did not resolve.
    #[error("cannot resolve {host}:{port}: {source}")]
    Resolve {
        /// Configured host.
        host: String,
        /// Configured port.
        port: u16,
        /// Resolver failure; `NotFound` when no address came back.
        #[source]
        source: io::Error,
    },
    /// Binding the TCP socket failed.
    #[error("cannot listen on {addr}: {source}")]
    BindTcp {
        /// Resolved address.
        addr: SocketAddr,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Unix sockets are not available on this platform.
    #[cfg(not(unix))]
    #[error("unix socket endpoints are unsupported here: {endpoint}")]
    UnsupportedUnix {
        /// Configured endpoint.
        endpoint: String,
    },
    /// Binding, probing or cleaning up the Unix socket file failed.
    #[cfg(unix)]
    #[error("unix socket {path}: {action} failed: {source}")]
    Unix {
        /// Socket path.
        path: Utf8PathBuf,
        /// Step that failed.
        action: &'static str,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Another process answers on the socket path.
    #[cfg(unix)]
    #[error("unix socket {path} is served by another process")]
    UnixInUse {
        /// Socket path.
        path: Utf8PathBuf,
    },
    /// The socket path exists but is some other kind of file.
    #[cfg(unix)]
    #[error("{path} exists and is not a socket")]
    UnixNotSocket {
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// Switching the listener to non-blocking mode failed.
    #[error("cannot make listener non-blocking: {source}")]
    NonBlocking {
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// The accept thread could not be started.
    #[error("cannot start accept thread: {source}")]
    Spawn {
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// The accept thread panicked.
    #[error("listener thread panicked")]
    ThreadPanic,
}

impl ListenerError {
    #[cfg(unix)]
    pub(crate) fn unix(path: &camino::Utf8Path, action: &'static str, source: io::Error) -> Self {
        Self::Unix {
            path: path.to_path_buf(),
            action,
            source,
        }
    }
}
