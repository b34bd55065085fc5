//! Module registry: registration, one-time setup and method lookup.
//!
//! The registry has two phases. [`ModuleRegistry`] collects modules and is
//! consumed by [`ModuleRegistry::setup`], which loads each module's option
//! file, runs its initializer and freezes the result into a [`MethodTable`].
//! The table is immutable and shared read-only by every connection.

mod method;
#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use lull_config::{Config, Settings, SettingsError};

use crate::health::HealthReporter;

pub use self::method::{CallContext, MethodEntry, ParamShape, Params, Scalar};

pub(crate) const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Failure reported by a module initializer.
pub type ModuleError = Box<dyn Error + Send + Sync + 'static>;

/// A pluggable unit exposing remotely callable methods.
pub trait Module: Send + Sync + 'static {
    /// Canonical module name, as callers address it.
    fn name(&self) -> &'static str;

    /// One-time initializer run with the merged global and module settings.
    ///
    /// # Errors
    ///
    /// Any error aborts daemon startup.
    fn setup(&self, settings: &Settings) -> Result<(), ModuleError> {
        let _ = settings;
        Ok(())
    }

    /// Callable methods of the module.
    fn methods(self: Arc<Self>) -> Vec<MethodEntry>;
}

/// Errors aborting setup.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The module's option file exists but could not be read.
    #[error("failed to load settings for module '{module}': {source}")]
    Settings {
        /// Module name.
        module: String,
        /// Loader failure.
        #[source]
        source: SettingsError,
    },
    /// The module's initializer failed.
    #[error("module '{module}' failed to set up: {source}")]
    Module {
        /// Module name.
        module: String,
        /// Initializer failure.
        #[source]
        source: ModuleError,
    },
}

impl SetupError {
    /// Name of the module that failed.
    #[must_use]
    pub fn module(&self) -> &str {
        match self {
            Self::Settings { module, .. } | Self::Module { module, .. } => module,
        }
    }
}

/// Modules awaiting setup, keyed by lower-cased name.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<dyn Module>>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ModuleRegistry")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `module`, replacing any module of the same name.
    pub fn register(&mut self, module: Arc<dyn Module>) -> &mut Self {
        let key = module.name().to_ascii_lowercase();
        if self.modules.insert(key, Arc::clone(&module)).is_some() {
            debug!(
                target: REGISTRY_TARGET,
                module = module.name(),
                "module registration replaced"
            );
        }
        self
    }

    /// Names of the registered modules.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.modules.values().map(|module| module.name())
    }

    /// Runs setup for every module and freezes the surviving ones.
    ///
    /// A module without `<config_dir>/modules.d/<name>.toml` is dropped.
    /// Otherwise its options are merged over the global settings and the
    /// initializer runs with the result.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] for the first module whose option file cannot
    /// be read or whose initializer fails.
    pub fn setup(
        self,
        config: &Config,
        reporter: &dyn HealthReporter,
    ) -> Result<MethodTable, SetupError> {
        let global = config.global_settings();
        let mut table = MethodTable::default();
        for (key, module) in self.modules {
            let name = module.name();
            let path = config.module_config_path(name);
            if !path.is_file() {
                reporter.module_removed(name, &path);
                continue;
            }
            let own = Settings::load(&path).map_err(|source| SetupError::Settings {
                module: name.to_owned(),
                source,
            })?;
            let merged = Settings::merged([&global, &own]);
            if let Err(source) = module.setup(&merged) {
                let error = SetupError::Module {
                    module: name.to_owned(),
                    source,
                };
                reporter.module_failed(&error);
                return Err(error);
            }
            let methods = table.insert(key, module);
            reporter.module_ready(name, methods);
        }
        Ok(table)
    }

    /// Freezes the modules without running setup.
    #[must_use]
    pub fn freeze(self) -> MethodTable {
        let mut table = MethodTable::default();
        for (key, module) in self.modules {
            table.insert(key, module);
        }
        table
    }
}

#[derive(Debug)]
struct ModuleMethods {
    name: &'static str,
    methods: BTreeMap<String, MethodEntry>,
}

/// Frozen `{module, method}` lookup table; lookups ignore case.
#[derive(Debug, Default)]
pub struct MethodTable {
    modules: BTreeMap<String, ModuleMethods>,
}

impl MethodTable {
    fn insert(&mut self, key: String, module: Arc<dyn Module>) -> usize {
        let name = module.name();
        let methods = module
            .methods()
            .into_iter()
            .map(|entry| (entry.name().to_ascii_lowercase(), entry))
            .collect::<BTreeMap<_, _>>();
        let count = methods.len();
        self.modules.insert(key, ModuleMethods { name, methods });
        count
    }

    /// Finds `module.method`, returning the canonical module name alongside
    /// the entry.
    #[must_use]
    pub fn lookup(&self, module: &str, method: &str) -> Option<(&'static str, &MethodEntry)> {
        let entry = self.modules.get(&module.to_ascii_lowercase())?;
        let found = entry.methods.get(&method.to_ascii_lowercase())?;
        Some((entry.name, found))
    }

    /// Canonical names of the available modules.
    pub fn modules(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.modules.values().map(|entry| entry.name)
    }

    /// Whether `module` survived setup.
    #[must_use]
    pub fn contains_module(&self, module: &str) -> bool {
        self.modules.contains_key(&module.to_ascii_lowercase())
    }
}
