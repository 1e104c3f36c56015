//! Bookkeeping for live concurrent units.
//!
//! Both concurrent backends share this table: it allocates handles, tracks
//! whether each unit is running, suspended, or holding a pending resume
//! value, and clears the entry when the unit's future is dropped.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::trace;

use crate::identifiers::CoroutineId;

use super::UnitFuture;

// ============================================================================
// Task-local state
// ============================================================================

tokio::task_local! {
    /// `(table id, handle)` of the unit being polled.
    static CURRENT_UNIT: (u64, CoroutineId);
}

/// Distinguishes tables so handles stay scoped to one backend instance.
static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// UnitSlot
// ============================================================================

/// State of one live unit.
enum UnitSlot {
    /// Running, nothing pending.
    Running,
    /// Running, with a value waiting for its next `suspend()`.
    Pending(Value),
    /// Parked in `suspend()`.
    Suspended(oneshot::Sender<Value>),
}

// ============================================================================
// UnitTable
// ============================================================================

/// Live units of one backend instance.
pub(crate) struct UnitTable {
    id: u64,
    next_cid: AtomicI64,
    units: Mutex<FxHashMap<CoroutineId, UnitSlot>>,
}

impl UnitTable {
    /// Creates an empty table.
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            next_cid: AtomicI64::new(1),
            units: Mutex::new(FxHashMap::default()),
        })
    }

    /// Registers a new unit and returns the future to spawn for it.
    ///
    /// The unit is live from this call until the returned future completes
    /// or is dropped.
    pub(crate) fn register(
        self: &Arc<Self>,
        task: UnitFuture,
    ) -> (CoroutineId, impl Future<Output = ()> + Send + 'static) {
        let cid = CoroutineId::from_raw(self.next_cid.fetch_add(1, Ordering::Relaxed));
        self.units.lock().insert(cid, UnitSlot::Running);

        let guard = UnitGuard {
            table: Arc::clone(self),
            cid,
        };
        let unit = CURRENT_UNIT.scope((self.id, cid), async move {
            let _guard = guard;
            task.await;
        });

        trace!(%cid, "Unit registered");
        (cid, unit)
    }

    /// Returns the handle of the calling unit if it belongs to this table.
    pub(crate) fn current(&self) -> CoroutineId {
        CURRENT_UNIT
            .try_with(|(table, cid)| if *table == self.id { *cid } else { CoroutineId::NONE })
            .unwrap_or(CoroutineId::NONE)
    }

    /// Returns `true` while `cid` is live.
    pub(crate) fn exists(&self, cid: CoroutineId) -> bool {
        self.units.lock().contains_key(&cid)
    }

    /// Returns the number of live units.
    pub(crate) fn len(&self) -> usize {
        self.units.lock().len()
    }

    /// Parks the calling unit until resumed.
    ///
    /// Returns `None` outside a unit of this table.
    pub(crate) async fn suspend(&self) -> Option<Value> {
        let cid = self.current();
        if cid.is_none() {
            return None;
        }

        let rx = {
            let mut units = self.units.lock();
            let slot = units.get_mut(&cid)?;
            match mem::replace(slot, UnitSlot::Running) {
                UnitSlot::Pending(value) => return Some(value),
                UnitSlot::Running | UnitSlot::Suspended(_) => {
                    let (tx, rx) = oneshot::channel();
                    *slot = UnitSlot::Suspended(tx);
                    rx
                }
            }
        };

        trace!(%cid, "Unit suspended");
        rx.await.ok()
    }

    /// Delivers `value` to `cid`.
    ///
    /// A suspended unit wakes with `value`; a running unit keeps it for its
    /// next `suspend()`. Returns `false` for unknown or finished units and
    /// when a value is already pending.
    pub(crate) fn resume(&self, cid: CoroutineId, value: Value) -> bool {
        let mut units = self.units.lock();
        let Some(slot) = units.get_mut(&cid) else {
            return false;
        };

        match mem::replace(slot, UnitSlot::Running) {
            UnitSlot::Suspended(tx) => {
                trace!(%cid, "Unit resumed");
                tx.send(value).is_ok()
            }
            UnitSlot::Running => {
                *slot = UnitSlot::Pending(value);
                true
            }
            pending @ UnitSlot::Pending(_) => {
                *slot = pending;
                false
            }
        }
    }

    /// Removes a finished unit.
    fn finish(&self, cid: CoroutineId) {
        self.units.lock().remove(&cid);
        trace!(%cid, "Unit finished");
    }
}

// ============================================================================
// UnitGuard
// ============================================================================

/// Clears the unit's entry when its future completes, panics, or is dropped.
struct UnitGuard {
    table: Arc<UnitTable>,
    cid: CoroutineId,
}

impl Drop for UnitGuard {
    fn drop(&mut self) {
        self.table.finish(self.cid);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[tokio::test]
    async fn test_handles_start_at_one_and_increase() {
        let table = UnitTable::new();
        let (a, _fa) = table.register(Box::pin(async {}));
        let (b, _fb) = table.register(Box::pin(async {}));
        assert_eq!(a.as_i64(), 1);
        assert_eq!(b.as_i64(), 2);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_dropping_unit_future_finishes_it() {
        let table = UnitTable::new();
        let (cid, unit) = table.register(Box::pin(async {}));
        assert!(table.exists(cid));
        unit.await;
        assert!(!table.exists(cid));
        assert!(!table.resume(cid, json!(1)));
    }

    #[tokio::test]
    async fn test_pending_value_is_consumed_by_suspend() {
        let table = UnitTable::new();
        let inner = Arc::clone(&table);
        let (cid, unit) = table.register(Box::pin(async move {
            let value = inner.suspend().await;
            assert_eq!(value, Some(json!("early")));
        }));

        assert!(table.resume(cid, json!("early")));
        assert!(!table.resume(cid, json!("second")));
        unit.await;
    }

    #[tokio::test]
    async fn test_suspend_outside_unit_is_noop() {
        let table = UnitTable::new();
        assert_eq!(table.current(), CoroutineId::NONE);
        assert_eq!(table.suspend().await, None);
    }

    #[tokio::test]
    async fn test_handles_are_scoped_to_their_table() {
        let a = UnitTable::new();
        let b = UnitTable::new();
        let b_inner = Arc::clone(&b);
        let (_, unit) = a.register(Box::pin(async move {
            assert_eq!(b_inner.current(), CoroutineId::NONE);
        }));
        unit.await;
    }
}
