use camino::Utf8PathBuf;

use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// TCP port the daemon listens on unless configured otherwise.
pub const DEFAULT_TCP_PORT: u16 = 9779;

/// Loopback host used for the default listener.
const DEFAULT_TCP_HOST: &str = "127.0.0.1";

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default cap on concurrently served connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 64;

const DEFAULT_CONFIG_DIR: &str = "/etc/lull";
const DEFAULT_DATA_DIR: &str = "/var/lib/lull";

/// Default log filter expression used by the daemon.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the daemon.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Endpoint the daemon binds when none is configured.
#[must_use]
pub fn default_listen_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp(DEFAULT_TCP_HOST, DEFAULT_TCP_PORT)
}

/// Directory searched for `modules.d/` option files.
#[must_use]
pub fn default_config_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_CONFIG_DIR)
}

/// Directory holding the user store and database files.
#[must_use]
pub fn default_data_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_DATA_DIR)
}
