//! Runs the daemon in the foreground until a shutdown signal arrives.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::StructuredHealthReporter;
use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap};
use crate::dispatch::DispatchConnectionHandler;
use crate::health::HealthReporter;
use crate::transport::{ConnectionLimiter, SocketListener};

use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};
use super::{PROCESS_TARGET, SHUTDOWN_TIMEOUT};

const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Runs the daemon using the production collaborators.
///
/// # Errors
///
/// Returns [`LaunchError`] when bootstrap, the listener or the signal handler
/// fails.
pub fn run_daemon() -> Result<(), LaunchError> {
    let reporter = StructuredHealthReporter::new();
    run_daemon_with(&SystemConfigLoader, &reporter, &SystemShutdownSignal)
}

/// Runs the daemon with injected collaborators.
pub(crate) fn run_daemon_with(
    loader: &dyn ConfigLoader,
    reporter: &dyn HealthReporter,
    shutdown: &dyn ShutdownSignal,
) -> Result<(), LaunchError> {
    let daemon = bootstrap(loader, reporter)?;
    let config = daemon.config();
    info!(
        target: PROCESS_TARGET,
        listen = %config.listen(),
        "starting daemon runtime"
    );

    let listener = SocketListener::bind(config.listen())?;
    let limiter = ConnectionLimiter::new(config.max_connections());
    let handler = Arc::new(DispatchConnectionHandler::new(daemon.dispatcher()));
    let listener_handle = listener.start(handler, Arc::clone(&limiter))?;

    let waited = shutdown.wait();
    listener_handle.shutdown();
    listener_handle.join()?;
    waited?;
    drain(&limiter, SHUTDOWN_TIMEOUT);
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}

/// Gives in-flight connections until `timeout` to finish.
fn drain(limiter: &ConnectionLimiter, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while limiter.active() > 0 {
        if Instant::now() >= deadline {
            warn!(
                target: PROCESS_TARGET,
                active = limiter.active(),
                "connections still open at shutdown"
            );
            return;
        }
        thread::sleep(DRAIN_POLL);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn drain_returns_once_idle() {
        let limiter = ConnectionLimiter::new(Some(1));
        let started = Instant::now();
        drain(&limiter, Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[rstest]
    fn drain_gives_up_at_the_deadline() {
        let limiter = ConnectionLimiter::new(Some(1));
        let stop = AtomicBool::new(false);
        let permit = limiter.acquire(&stop).expect("free slot");
        drain(&limiter, Duration::from_millis(60));
        assert_eq!(limiter.active(), 1);
        drop(permit);
        assert_eq!(limiter.active(), 0);
    }
}
