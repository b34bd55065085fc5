//! Test double for [`HealthReporter`] that records structured events for assertions.

use std::sync::Mutex;

use camino::Utf8Path;
use lull_config::Config;

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;
use crate::registry::SetupError;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HealthEvent {
    /// Bootstrap started.
    BootstrapStarting,
    /// Bootstrap completed successfully.
    BootstrapSucceeded,
    /// Bootstrap failed with an error description.
    BootstrapFailed(String),
    /// Module set up with the given method count.
    ModuleReady { module: String, methods: usize },
    /// Module dropped for lack of an option file.
    ModuleRemoved(String),
    /// Module initializer failed.
    ModuleFailed(String),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    pub fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn module_ready(&self, module: &str, methods: usize) {
        self.record(HealthEvent::ModuleReady {
            module: module.to_owned(),
            methods,
        });
    }

    fn module_removed(&self, module: &str, _missing: &Utf8Path) {
        self.record(HealthEvent::ModuleRemoved(module.to_owned()));
    }

    fn module_failed(&self, error: &SetupError) {
        self.record(HealthEvent::ModuleFailed(error.module().to_owned()));
    }
}
