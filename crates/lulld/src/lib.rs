//! The lull daemon.
//!
//! `lulld` exposes pluggable modules to remote callers over a JSON-lines
//! socket protocol. Bootstrap loads the daemon configuration, installs
//! structured telemetry, opens the user store and runs each module's setup
//! with its option file from `modules.d`. Modules without an option file are
//! dropped; the survivors are frozen into a method table that every
//! connection shares.
//!
//! Each call names a module, a method and an authkey. The dispatcher
//! authenticates the caller, binds the loosely typed parameters onto the
//! method's declared shape through the [`marshal`] layer and runs it.
//!
//! Two modules ship with the daemon:
//!
//! - `Auth` hashes and validates passwords.
//! - `Database` compiles structured reads and writes into parameterised SQL
//!   against a per-connection schema catalog, caches signed reads and passes
//!   raw statements through.

mod admin;
mod bootstrap;
pub mod dispatch;
mod health;
pub mod marshal;
pub mod modules;
mod process;
pub mod registry;
mod telemetry;
mod transport;
pub mod users;

pub use admin::{is_user_command, run_user_command};
pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, SystemConfigLoader, bootstrap, bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, run_daemon};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
