//! Cap on concurrently served connections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Counting gate shared by the accept loop and connection threads.
#[derive(Debug)]
pub(crate) struct ConnectionLimiter {
    max: Option<usize>,
    active: Mutex<usize>,
    released: Condvar,
}

/// Slot held for the lifetime of one connection.
#[derive(Debug)]
pub(crate) struct Permit {
    limiter: Arc<ConnectionLimiter>,
}

impl ConnectionLimiter {
    /// Creates a limiter; `None` never blocks.
    pub(crate) fn new(max: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            max: max.map(|limit| limit.max(1)),
            active: Mutex::new(0),
            released: Condvar::new(),
        })
    }

    /// Blocks until a slot is free or `shutdown` is raised.
    pub(crate) fn acquire(self: &Arc<Self>, shutdown: &AtomicBool) -> Option<Permit> {
        let mut active = self.lock();
        while self.max.is_some_and(|max| *active >= max) {
            if shutdown.load(Ordering::SeqCst) {
                return None;
            }
            active = match self.released.wait_timeout(active, WAIT_SLICE) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *active += 1;
        Some(Permit {
            limiter: Arc::clone(self),
        })
    }

    /// Connections currently holding a permit.
    pub(crate) fn active(&self) -> usize {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut active = self.limiter.lock();
        *active = active.saturating_sub(1);
        drop(active);
        self.limiter.released.notify_one();
    }
}
