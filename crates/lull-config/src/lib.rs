//! Shared configuration for the lull daemon.
//!
//! Two kinds of configuration live here. [`Config`] describes the daemon
//! process itself and is loaded through `ortho_config`, layering defaults, an
//! optional TOML file, `LULL_*` environment variables and command-line flags.
//! [`Settings`] is the sectioned option store handed to modules: it is read
//! from per-module TOML files, derived from the daemon configuration, or
//! loaded per caller from the user store, and it can be merged so later
//! sources override earlier ones option by option.

mod defaults;
mod logging;
mod settings;
mod socket;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_MAX_CONNECTIONS, DEFAULT_TCP_PORT, default_config_dir,
    default_data_dir, default_listen_endpoint, default_log_filter, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use settings::{SettingValue, Settings, SettingsError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Directory below [`Config::config_dir`] holding per-module option files.
pub const MODULES_DIRECTORY: &str = "modules.d";

/// Process-level configuration for `lulld`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "LULL")]
pub struct Config {
    /// Endpoint the RPC listener binds to.
    #[ortho_config(default = default_listen_endpoint())]
    pub listen: SocketEndpoint,
    /// Directory containing `modules.d/` option files.
    #[ortho_config(default = default_config_dir())]
    pub config_dir: Utf8PathBuf,
    /// Directory holding the user store and database files.
    #[ortho_config(default = default_data_dir())]
    pub data_dir: Utf8PathBuf,
    /// Upper bound on concurrently served connections; zero disables the cap.
    #[ortho_config(default = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,
    /// `tracing` filter expression.
    #[ortho_config(default = default_log_filter().to_owned())]
    pub log_filter: String,
    /// Output format for structured logs.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen_endpoint(),
            config_dir: default_config_dir(),
            data_dir: default_data_dir(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            log_filter: default_log_filter().to_owned(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Endpoint the daemon listens on.
    #[must_use]
    pub fn listen(&self) -> &SocketEndpoint {
        &self.listen
    }

    /// Directory containing module option files.
    #[must_use]
    pub fn config_dir(&self) -> &Utf8Path {
        self.config_dir.as_path()
    }

    /// Directory holding persistent daemon data.
    #[must_use]
    pub fn data_dir(&self) -> &Utf8Path {
        self.data_dir.as_path()
    }

    /// Maximum number of concurrently served connections, if capped.
    #[must_use]
    pub fn max_connections(&self) -> Option<usize> {
        match self.max_connections {
            0 => None,
            limit => usize::try_from(limit).ok(),
        }
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Path of the option file for `module`, named after the lower-cased
    /// module name.
    #[must_use]
    pub fn module_config_path(&self, module: &str) -> Utf8PathBuf {
        self.config_dir
            .join(MODULES_DIRECTORY)
            .join(format!("{}.toml", module.to_ascii_lowercase()))
    }

    /// Global settings handed to every module before its own options are
    /// merged over them.
    #[must_use]
    pub fn global_settings(&self) -> Settings {
        let mut settings = Settings::new();
        settings.set("directories", "config", self.config_dir.as_str());
        settings.set("directories", "data", self.data_dir.as_str());
        settings.set("server", "listen", self.listen.to_string());
        settings.set("server", "max_connections", i64::from(self.max_connections));
        settings
    }
}
