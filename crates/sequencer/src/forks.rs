use std::{
    mem,
    sync::{Arc, Mutex},
    time::Duration,
};

use quill_interfaces::world_state::WorldStateFork;
use tokio::{sync::Notify, task::JoinHandle, time::sleep};
use tracing::{debug, trace};

/// The grace period between block completion (or error) and fork release.
/// Cancelled processor work may still hold references to the fork while it
/// unwinds; closing immediately would fail those reads.
const FORK_RELEASE_DELAY: Duration = Duration::from_secs(5);

/// Schedules fork closures to run after a grace period, keeping track of the
/// in-flight closures so that `stop()` can drain them before the process
/// exits.
#[derive(Debug, Default)]
pub(crate) struct DeferredForkCloser {
    tasks: Mutex<Vec<JoinHandle<()>>>,
    hurry: Arc<Notify>,
}

impl DeferredForkCloser {
    /// Creates a new closer with no pending closures.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Schedules the fork to be closed after [`FORK_RELEASE_DELAY`].
    ///
    /// Closure errors are logged and swallowed: by the time the delay fires
    /// the node may already be shutting down.
    pub(crate) fn schedule(&self, fork: Arc<dyn WorldStateFork>) {
        let hurry = Arc::clone(&self.hurry);

        let handle = tokio::spawn(async move {
            tokio::select! {
                () = sleep(FORK_RELEASE_DELAY) => {}
                () = hurry.notified() => trace!("Draining: closing fork early"),
            }

            let block_number = fork.block_number();
            if let Err(e) = fork.close().await {
                debug!(block_number, ?e, "Failed to close world-state fork");
            } else {
                trace!(block_number, "Closed world-state fork");
            }
        });

        let mut tasks = self.tasks.lock().expect("fork closer lock poisoned");
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Runs all pending closures to completion, skipping the remainder of
    /// their grace period.
    pub(crate) async fn drain(&self) {
        let pending = mem::take(&mut *self.tasks.lock().expect("fork closer lock poisoned"));
        if pending.is_empty() {
            return;
        }

        debug!(count = pending.len(), "Draining pending fork closures");
        self.hurry.notify_waiters();

        for task in pending {
            let _ = task.await;
        }
    }

    /// The number of closures not yet completed.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.tasks.lock().expect("fork closer lock poisoned").iter().filter(|t| !t.is_finished()).count()
    }
}

/// Holds a fork open for the duration of block assembly and hands it to the
/// [`DeferredForkCloser`] on drop, so both the success and the error path
/// release it.
#[derive(Debug)]
pub(crate) struct ForkGuard {
    fork: Arc<dyn WorldStateFork>,
    closer: Arc<DeferredForkCloser>,
}

impl ForkGuard {
    /// Creates a new guard over the given fork.
    pub(crate) const fn new(fork: Arc<dyn WorldStateFork>, closer: Arc<DeferredForkCloser>) -> Self {
        Self { fork, closer }
    }

    /// The guarded fork.
    pub(crate) fn fork(&self) -> Arc<dyn WorldStateFork> {
        Arc::clone(&self.fork)
    }
}

impl Drop for ForkGuard {
    fn drop(&mut self) {
        self.closer.schedule(Arc::clone(&self.fork));
    }
}
