//! Multi-task scheduler backend.
//!
//! Units are tokio tasks spawned on the runtime that was current when the
//! backend was built. Spawning goes through the stored handle, so `create`
//! also works from threads outside the runtime.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::runtime::Handle;

use crate::error::{Error, Result};
use crate::identifiers::CoroutineId;

use super::units::UnitTable;
use super::{CoroutineBackend, UnitFuture};

// ============================================================================
// TaskBackend
// ============================================================================

/// Backend that runs units as tokio tasks.
pub struct TaskBackend {
    handle: Handle,
    units: Arc<UnitTable>,
}

impl fmt::Debug for TaskBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskBackend")
            .field("live_units", &self.units.len())
            .finish_non_exhaustive()
    }
}

impl TaskBackend {
    /// Binds the backend to the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnavailableBackend`] outside a tokio runtime.
    pub fn new() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|_| Error::unavailable_backend("task", "no tokio runtime is running"))?;
        Ok(Self::with_handle(handle))
    }

    /// Binds the backend to an explicit runtime handle.
    #[must_use]
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            units: UnitTable::new(),
        }
    }

    /// Returns the number of live units.
    #[inline]
    #[must_use]
    pub fn live_units(&self) -> usize {
        self.units.len()
    }
}

#[async_trait]
impl CoroutineBackend for TaskBackend {
    fn name(&self) -> &'static str {
        "task"
    }

    fn create(&self, task: UnitFuture) -> CoroutineId {
        let (cid, unit) = self.units.register(task);
        self.handle.spawn(unit);
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
