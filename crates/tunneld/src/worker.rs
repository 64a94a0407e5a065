//! Worker supervisor.
//!
//! The chosen backend is a cooperative task per session on `tokio`'s shared
//! scheduler, spawned with `tokio::spawn` like every other piece of
//! per-connection work in this crate. `num_clients` lives here, guarded by a single
//! `CRIT_CLIENTS`-equivalent critical section.

use std::sync::{Arc, Mutex};

use crate::session::{ClientSession, SessionHandler};

/// `num_clients`, with admission control folded into the same atomic
/// operation as the increment. The accept sequence describes the admission
/// check and the increment as conceptually separate steps joined only by
/// "the increment must be inside a mutual-exclusion region"; collapsing
/// them into one `try_admit` call under a single lock is the only way to
/// satisfy that without a second race window between check and increment.
pub struct ClientCounter {
    count: Mutex<u64>,
    max: u64,
}

impl ClientCounter {
    pub fn new(max_clients: u64) -> Self {
        Self {
            count: Mutex::new(0),
            max: max_clients,
        }
    }

    /// Attempt to admit one more client. Returns `false` (and leaves the
    /// counter untouched) when `max > 0` and the cap has been reached.
    pub fn try_admit(&self) -> bool {
        let mut count = self.count.lock().expect("client counter poisoned");
        if self.max > 0 && *count >= self.max {
            return false;
        }
        *count += 1;
        true
    }

    pub fn release(&self) {
        let mut count = self.count.lock().expect("client counter poisoned");
        *count = count.saturating_sub(1);
    }

    pub fn current(&self) -> u64 {
        *self.count.lock().expect("client counter poisoned")
    }

    pub fn max(&self) -> u64 {
        self.max
    }
}

/// Spawning a session failed (the thread or process a non-cooperative
/// backend would use could not be created). The cooperative-task backend
/// below cannot actually produce this — `tokio::spawn` does not fail
/// synchronously — but the type is kept so the supervisor's contract does
/// not depend on which backend is chosen.
#[derive(Debug)]
pub struct SpawnFailed;

/// Tracks live sessions and hands them to the chosen concurrency backend.
pub struct WorkerSupervisor {
    counter: Arc<ClientCounter>,
    handler: Arc<dyn SessionHandler>,
}

impl WorkerSupervisor {
    pub fn new(counter: Arc<ClientCounter>, handler: Arc<dyn SessionHandler>) -> Self {
        Self { counter, handler }
    }

    pub fn counter(&self) -> &Arc<ClientCounter> {
        &self.counter
    }

    /// Begin processing `session` concurrently with the supervisor's own
    /// control loop. The counter is released exactly once when the task
    /// ends, even if the handler panics, preserving "every increment paired
    /// with exactly one decrement" under failure.
    pub fn spawn(&self, session: ClientSession) -> Result<(), SpawnFailed> {
        let handler = self.handler.clone();
        let counter = self.counter.clone();
        tokio::spawn(async move {
            let _guard = ReleaseOnDrop(counter);
            let _ = handler.handle(session).await;
        });
        Ok(())
    }
}

struct ReleaseOnDrop(Arc<ClientCounter>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.release();
    }
}
