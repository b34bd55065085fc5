//! Daemon bootstrap orchestration.

use std::io;
use std::sync::Arc;

use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use lull_config::{Config, SocketPreparationError};

use crate::dispatch::Dispatcher;
use crate::health::HealthReporter;
use crate::modules;
use crate::registry::{ModuleRegistry, SetupError};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};
use crate::users::{Authenticator, UserStore, UserStoreError};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the daemon configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare daemon socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
    /// The data directory could not be created.
    #[error("failed to create data directory '{path}': {source}")]
    DataDirectory {
        /// Configured data directory.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The user store could not be opened.
    #[error("failed to open user store: {source}")]
    Users {
        /// Underlying store error.
        #[source]
        source: UserStoreError,
    },
    /// A module failed to set up.
    #[error(transparent)]
    Setup(SetupError),
}

/// Result of a successful bootstrap invocation.
pub struct Daemon {
    config: Config,
    dispatcher: Arc<Dispatcher>,
    telemetry: TelemetryHandle,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Daemon")
            .field("listen", self.config.listen())
            .field("modules", &self.dispatcher.table().modules().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Daemon {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Dispatcher serving the set-up modules.
    #[must_use]
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }
}

/// Bootstraps the daemon with the built-in modules and the user store below
/// the configured data directory.
///
/// # Errors
///
/// Returns [`BootstrapError`] for the first step that fails; the reporter sees
/// the same error.
pub fn bootstrap(
    loader: &dyn ConfigLoader,
    reporter: &dyn HealthReporter,
) -> Result<Daemon, BootstrapError> {
    bootstrap_with(loader, reporter, |config, registry| {
        let users = open_user_store(config)?;
        modules::register_builtin(registry, &users);
        Ok(users)
    })
}

fn open_user_store(config: &Config) -> Result<Arc<UserStore>, BootstrapError> {
    let data = config.data_dir();
    std::fs::create_dir_all(data).map_err(|source| BootstrapError::DataDirectory {
        path: data.to_path_buf(),
        source,
    })?;
    UserStore::open(config.data_dir())
        .map(Arc::new)
        .map_err(|source| BootstrapError::Users { source })
}

/// Bootstraps the daemon; `register` fills the registry and returns the
/// authenticator callers are checked against.
///
/// # Errors
///
/// Returns [`BootstrapError`] for the first step that fails; the reporter sees
/// the same error.
pub fn bootstrap_with<A, F>(
    loader: &dyn ConfigLoader,
    reporter: &dyn HealthReporter,
    register: F,
) -> Result<Daemon, BootstrapError>
where
    A: Authenticator + 'static,
    F: FnOnce(&Config, &mut ModuleRegistry) -> Result<Arc<A>, BootstrapError>,
{
    reporter.bootstrap_starting();
    match assemble(loader, reporter, register) {
        Ok(daemon) => {
            reporter.bootstrap_succeeded(&daemon.config);
            Ok(daemon)
        }
        Err(error) => {
            reporter.bootstrap_failed(&error);
            Err(error)
        }
    }
}

fn assemble<A, F>(
    loader: &dyn ConfigLoader,
    reporter: &dyn HealthReporter,
    register: F,
) -> Result<Daemon, BootstrapError>
where
    A: Authenticator + 'static,
    F: FnOnce(&Config, &mut ModuleRegistry) -> Result<Arc<A>, BootstrapError>,
{
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;
    config
        .listen()
        .prepare_filesystem()
        .map_err(|source| BootstrapError::Socket { source })?;

    let mut registry = ModuleRegistry::new();
    let auth = register(&config, &mut registry)?;
    let table = registry
        .setup(&config, reporter)
        .map_err(BootstrapError::Setup)?;
    let dispatcher = Arc::new(Dispatcher::new(table, auth));
    Ok(Daemon {
        config,
        dispatcher,
        telemetry,
    })
}
