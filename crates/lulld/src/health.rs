//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;

use camino::Utf8Path;

use lull_config::Config;

use crate::bootstrap::BootstrapError;
use crate::registry::SetupError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once a module is set up and its methods are callable.
    fn module_ready(&self, module: &str, methods: usize);

    /// Invoked when a module is dropped for lack of an option file.
    fn module_removed(&self, module: &str, missing: &Utf8Path);

    /// Invoked when a module initializer fails.
    fn module_failed(&self, error: &SetupError);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn module_ready(&self, module: &str, methods: usize) {
        (**self).module_ready(module, methods);
    }

    fn module_removed(&self, module: &str, missing: &Utf8Path) {
        (**self).module_removed(module, missing);
    }

    fn module_failed(&self, error: &SetupError) {
        (**self).module_failed(error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            listen = %config.listen(),
            config_dir = %config.config_dir(),
            data_dir = %config.data_dir(),
            log_format = ?config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn module_ready(&self, module: &str, methods: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "module_ready",
            module,
            methods,
            "module ready"
        );
    }

    fn module_removed(&self, module: &str, missing: &Utf8Path) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "module_removed",
            module,
            missing = %missing,
            "module disabled: no option file"
        );
    }

    fn module_failed(&self, error: &SetupError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "module_failed",
            module = error.module(),
            error = %error,
            "module setup failed"
        );
    }
}
