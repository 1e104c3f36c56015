//! Single-threaded reactor backend.
//!
//! A [`Reactor`] drives one current-thread runtime and a `LocalSet` on the
//! calling thread. Units created through [`FiberBackend`] are spawned onto
//! that `LocalSet`, so they interleave only at their own await points, the
//! way fibers layered on an event loop do.
//!
//! Outside a reactor thread the backend degrades to the synchronous
//! fallback: `create` runs the task inline and returns the sentinel.

// ============================================================================
// Imports
// ============================================================================

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::runtime::Builder;
use tokio::task::LocalSet;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::CoroutineId;

use super::sync::run_to_completion;
use super::units::UnitTable;
use super::{CoroutineBackend, UnitFuture};

// ============================================================================
// Reactor
// ============================================================================

thread_local! {
    /// Set while the current thread is inside `Reactor::block_on`.
    static IN_REACTOR: Cell<bool> = const { Cell::new(false) };
}

/// Single-threaded event loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reactor;

impl Reactor {
    /// Runs `future` on a fresh reactor on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the runtime cannot be built, and
    /// [`Error::UnavailableBackend`] if this thread already runs a reactor.
    pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
        if Self::is_active() {
            return Err(Error::unavailable_backend(
                "fiber",
                "reactor already running on this thread",
            ));
        }

        let runtime = Builder::new_current_thread().enable_all().build()?;
        let local = LocalSet::new();

        let _guard = ReactorGuard::enter();
        debug!("Reactor started");
        let output = local.block_on(&runtime, future);
        debug!("Reactor stopped");
        Ok(output)
    }

    /// Returns `true` on a thread currently inside [`Reactor::block_on`].
    #[inline]
    #[must_use]
    pub fn is_active() -> bool {
        IN_REACTOR.with(Cell::get)
    }
}

/// Marks the thread as a reactor thread for the guard's lifetime.
struct ReactorGuard;

impl ReactorGuard {
    fn enter() -> Self {
        IN_REACTOR.with(|flag| flag.set(true));
        Self
    }
}

impl Drop for ReactorGuard {
    fn drop(&mut self) {
        IN_REACTOR.with(|flag| flag.set(false));
    }
}

// ============================================================================
// FiberBackend
// ============================================================================

/// Backend that spawns units onto the reactor's `LocalSet`.
pub struct FiberBackend {
    units: Arc<UnitTable>,
}

impl fmt::Debug for FiberBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberBackend")
            .field("live_units", &self.units.len())
            .finish()
    }
}

impl FiberBackend {
    /// Creates the backend for the current reactor thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnavailableBackend`] outside [`Reactor::block_on`].
    pub fn new() -> Result<Self> {
        if !Reactor::is_active() {
            return Err(Error::unavailable_backend(
                "fiber",
                "requires a single-threaded reactor (Reactor::block_on)",
            ));
        }
        Ok(Self {
            units: UnitTable::new(),
        })
    }

    /// Returns the number of live units.
    #[inline]
    #[must_use]
    pub fn live_units(&self) -> usize {
        self.units.len()
    }
}

#[async_trait]
impl CoroutineBackend for FiberBackend {
    fn name(&self) -> &'static str {
        "fiber"
    }

    fn create(&self, task: UnitFuture) -> CoroutineId {
        if !Reactor::is_active() {
            warn!("Fiber unit created off the reactor thread, running inline");
            run_to_completion(task);
            return CoroutineId::NONE;
        }

        let (cid, unit) = self.units.register(task);
        tokio::task::spawn_local(unit);
        cid
    }

    async fn suspend(&self) -> Option<Value> {
        self.units.suspend().await
    }

    fn resume(&self, cid: CoroutineId, value: Value) -> bool {
        self.units.resume(cid, value)
    }

    fn cid(&self) -> CoroutineId {
        self.units.current()
    }

    fn exists(&self, cid: CoroutineId) -> bool {
        self.units.exists(cid)
    }
}

// ============================================================================
// Tests
// ============================================================================
