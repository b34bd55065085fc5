//! Configuration loaders backed by a scratch directory tree.

use std::cell::Cell;
use std::ffi::OsString;
use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use lull_config::{Config, SocketEndpoint};

use crate::bootstrap::ConfigLoader;

/// Loader whose configuration, data and socket paths live in a temporary
/// directory.
pub struct TestConfigLoader {
    root: TempDir,
    listen: Option<SocketEndpoint>,
}

impl TestConfigLoader {
    /// Creates the scratch tree with an empty `modules.d`.
    #[must_use]
    pub fn new() -> Self {
        let root = TempDir::new().expect("failed to create temporary directory");
        let loader = Self { root, listen: None };
        fs::create_dir_all(loader.config_dir().join("modules.d")).expect("create modules.d");
        loader
    }

    /// Listens on an ephemeral localhost TCP port instead of the socket file.
    #[must_use]
    pub fn on_tcp(mut self) -> Self {
        self.listen = Some(SocketEndpoint::tcp("127.0.0.1", 0));
        self
    }

    fn root(&self) -> &Utf8Path {
        Utf8Path::from_path(self.root.path()).expect("temporary path was not valid UTF-8")
    }

    /// Directory holding `modules.d`.
    #[must_use]
    pub fn config_dir(&self) -> Utf8PathBuf {
        self.root().join("etc")
    }

    /// Directory holding the user store and databases.
    #[must_use]
    pub fn data_dir(&self) -> Utf8PathBuf {
        self.root().join("data")
    }

    /// Unix socket path the daemon listens on.
    #[must_use]
    pub fn socket_path(&self) -> Utf8PathBuf {
        self.root().join("run/lulld.sock")
    }

    /// Writes `<config_dir>/modules.d/<module>.toml`.
    pub fn write_module(&self, module: &str, contents: &str) {
        let path = self
            .config_dir()
            .join("modules.d")
            .join(format!("{}.toml", module.to_ascii_lowercase()));
        fs::write(path, contents).expect("write module options");
    }
}

impl Default for TestConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            listen: self
                .listen
                .clone()
                .unwrap_or_else(|| SocketEndpoint::unix(self.socket_path())),
            config_dir: self.config_dir(),
            data_dir: self.data_dir(),
            max_connections: 4,
            log_filter: String::from("warn"),
            ..Config::default()
        })
    }
}

/// Loader that fails by passing an invalid listen endpoint.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("lulld"),
            OsString::from("--listen"),
            OsString::from("carrier-pigeon://loft"),
        ];
        Config::load_from_iter(args)
    }
}

/// Which loader a scenario boots the daemon with.
#[derive(Debug, Default)]
pub struct LoaderChoice {
    failing: Cell<bool>,
}

impl LoaderChoice {
    /// Switches to [`FailingConfigLoader`].
    pub fn fail(&self) {
        self.failing.set(true);
    }

    /// `scratch`, unless a failing loader was asked for.
    pub fn pick<'a>(&self, scratch: &'a TestConfigLoader) -> &'a dyn ConfigLoader {
        if self.failing.get() {
            &FailingConfigLoader
        } else {
            scratch
        }
    }
}
