//! No-concurrency fallback.
//!
//! Used when no backend is active: `create` runs the task to completion
//! before returning [`CoroutineId::NONE`], `suspend` returns immediately,
//! and nothing can be resumed.

// ============================================================================
// Imports
// ============================================================================

use std::thread;

use async_trait::async_trait;
use serde_json::Value;
use tokio::runtime::{Builder, Handle};
use tracing::error;

use crate::identifiers::CoroutineId;

use super::{CoroutineBackend, UnitFuture};

// ============================================================================
// SyncBackend
// ============================================================================

/// Backend that runs every task synchronously.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncBackend;

#[async_trait]
impl CoroutineBackend for SyncBackend {
    fn name(&self) -> &'static str {
        "sync"
    }

    fn create(&self, task: UnitFuture) -> CoroutineId {
        run_to_completion(task);
        CoroutineId::NONE
    }

    async fn suspend(&self) -> Option<Value> {
        None
    }

    fn resume(&self, _cid: CoroutineId, _value: Value) -> bool {
        false
    }

    fn cid(&self) -> CoroutineId {
        CoroutineId::NONE
    }

    fn exists(&self, _cid: CoroutineId) -> bool {
        false
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Drives `task` to completion on a private current-thread runtime.
///
/// When the caller is already inside a runtime, the private runtime runs on
/// a scoped helper thread and the caller blocks until it finishes.
pub(crate) fn run_to_completion(task: UnitFuture) {
    let drive = move || match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime.block_on(task),
        Err(e) => error!(error = %e, "Failed to build inline runtime, task dropped"),
    };

    if Handle::try_current().is_err() {
        drive();
        return;
    }

    thread::scope(|scope| {
        if let Err(panic) = scope.spawn(drive).join() {
            std::panic::resume_unwind(panic);
        }
    });
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_create_inside_runtime_still_completes_inline() {
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&counter);
        let cid = SyncBackend.create(Box::pin(async move {
            tokio::task::yield_now().await;
            inner.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(cid, CoroutineId::NONE);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_primitives_report_no_unit() {
        assert_eq!(SyncBackend.cid(), CoroutineId::NONE);
        assert!(!SyncBackend.exists(CoroutineId::from_raw(1)));
        assert!(!SyncBackend.resume(CoroutineId::from_raw(1), Value::Null));
    }
}
