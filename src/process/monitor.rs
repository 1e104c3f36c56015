//! Worker monitor loop.
//!
//! The manager spawns one OS thread per worker and waits for exit
//! notifications. A worker that fails (returns an error or panics) while
//! the driver is still running is restarted with the same id; once
//! shutdown is triggered the monitor waits for the remaining workers and
//! returns.

// ============================================================================
// Imports
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::shutdown::Shutdown;

// ============================================================================
// Constants
// ============================================================================

/// Pause before restarting a failed worker.
const RESTART_DELAY: Duration = Duration::from_millis(100);

// ============================================================================
// Types
// ============================================================================

/// Body of a worker thread, called with the worker id.
pub type WorkerFn = Arc<dyn Fn(u32) -> Result<()> + Send + Sync>;

/// How a worker thread ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Returned `Ok(())`.
    Clean,
    /// Returned an error or panicked.
    Failed(String),
}

// ============================================================================
// Monitor
// ============================================================================

/// Supervises a fixed set of worker threads.
pub struct Monitor {
    shutdown: Shutdown,
    restart_delay: Duration,
    stack_size: Option<usize>,
}

impl Monitor {
    /// Creates a monitor bound to the driver's shutdown latch.
    #[must_use]
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            shutdown,
            restart_delay: RESTART_DELAY,
            stack_size: None,
        }
    }

    /// Overrides the restart delay.
    #[must_use]
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Sets the stack size of worker threads.
    #[must_use]
    pub fn with_stack_size(mut self, stack_size: Option<usize>) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Spawns `count` workers and supervises them until shutdown.
    ///
    /// Returns the number of restarts performed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProcessSpawn`] if a worker thread cannot be created.
    pub fn run(&self, count: u32, worker: WorkerFn) -> Result<usize> {
        let (exit_tx, exit_rx) = mpsc::channel::<(u32, WorkerExit)>();

        let mut alive = 0u32;
        for id in 0..count {
            if let Err(e) = self.spawn_worker(id, Arc::clone(&worker), exit_tx.clone()) {
                self.abort(&exit_rx, alive);
                return Err(e);
            }
            alive += 1;
        }

        let mut restarts = 0usize;

        while alive > 0 {
            let Ok((id, exit)) = exit_rx.recv() else {
                break;
            };
            alive -= 1;

            if self.shutdown.is_triggered() {
                debug!(worker = id, ?exit, "Worker exited during shutdown");
                continue;
            }

            match &exit {
                WorkerExit::Failed(reason) => {
                    error!(worker = id, reason = %reason, "Worker failed, restarting");
                }
                WorkerExit::Clean => {
                    warn!(worker = id, "Worker exited while driver is running, restarting");
                }
            }

            thread::sleep(self.restart_delay);
            if self.shutdown.is_triggered() {
                continue;
            }

            if let Err(e) = self.spawn_worker(id, Arc::clone(&worker), exit_tx.clone()) {
                self.abort(&exit_rx, alive);
                return Err(e);
            }
            alive += 1;
            restarts += 1;
        }

        info!(restarts, "All workers stopped");
        Ok(restarts)
    }

    /// Triggers shutdown and waits for `alive` running workers to exit.
    fn abort(&self, exit_rx: &mpsc::Receiver<(u32, WorkerExit)>, mut alive: u32) {
        self.shutdown.trigger();
        while alive > 0 {
            let Ok((id, exit)) = exit_rx.recv() else {
                break;
            };
            debug!(worker = id, ?exit, "Worker exited after spawn failure");
            alive -= 1;
        }
    }

    /// Spawns one worker thread that reports its exit on `exit_tx`.
    fn spawn_worker(
        &self,
        id: u32,
        worker: WorkerFn,
        exit_tx: mpsc::Sender<(u32, WorkerExit)>,
    ) -> Result<()> {
        let mut builder = thread::Builder::new().name(format!("worker-{id}"));
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        builder
            .spawn(move || {
                let exit = match catch_unwind(AssertUnwindSafe(|| worker(id))) {
                    Ok(Ok(())) => WorkerExit::Clean,
                    Ok(Err(e)) => WorkerExit::Failed(e.to_string()),
                    Err(panic) => WorkerExit::Failed(panic_message(panic.as_ref())),
                };
                let _ = exit_tx.send((id, exit));
            })
            .map_err(|e| Error::process_spawn(format!("worker #{id}"), e))?;

        debug!(worker = id, "Worker thread spawned");
        Ok(())
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
