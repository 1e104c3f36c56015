//! Bounded object pool with blocking `take()`.
//!
//! Bounds how many expensive objects (database handles, HTTP clients, …)
//! exist at once while letting callers wait for one without stalling the
//! worker's loop.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  ObjectPool                  │
//! │  free:    [obj#3, obj#1]   (FIFO reuse)      │
//! │  active:  {#2}             (borrowed)        │
//! │  waiters: [unit A, unit B] (FIFO admission)  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! `put()` hands the object straight to the oldest waiter when there is
//! one, bypassing the free queue. Only callers inside a concurrent unit may
//! wait; elsewhere an exhausted pool reports [`Error::PoolExhausted`].

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::coroutine::Coroutine;
use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Constructor invoked when the pool grows.
pub type Factory<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

/// Distinguishes pools so objects cannot be returned to the wrong one.
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// PoolObject
// ============================================================================

/// An object issued by an [`ObjectPool`].
///
/// Dereferences to the pooled value. Must be handed back with
/// [`ObjectPool::put`]; dropping it releases the value without returning
/// its slot.
pub struct PoolObject<T> {
    pool_id: u64,
    slot: u64,
    value: T,
}

impl<T> PoolObject<T> {
    /// Returns the slot number assigned at construction.
    #[inline]
    #[must_use]
    pub fn slot(&self) -> u64 {
        self.slot
    }
}

impl<T> Deref for PoolObject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for PoolObject<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for PoolObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolObject")
            .field("slot", &self.slot)
            .field("value", &self.value)
            .finish()
    }
}

// ============================================================================
// PoolState
// ============================================================================

struct PoolState<T> {
    free: VecDeque<PoolObject<T>>,
    active: FxHashSet<u64>,
    waiters: VecDeque<oneshot::Sender<PoolObject<T>>>,
    /// Objects constructed so far, including ones being built.
    created: usize,
    next_slot: u64,
    closed: bool,
}

// ============================================================================
// ObjectPool
// ============================================================================

/// Generic bounded pool.
///
/// # Example
///
/// ```ignore
/// let pool = ObjectPool::new(2, coroutine, || Ok(Client::new()));
/// let client = pool.take().await?;
/// client.ping().await;
/// pool.put(client)?;
/// ```
pub struct ObjectPool<T> {
    id: u64,
    capacity: usize,
    factory: Factory<T>,
    coroutine: Coroutine,
    state: Mutex<PoolState<T>>,
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ObjectPool")
            .field("capacity", &self.capacity)
            .field("free", &state.free.len())
            .field("active", &state.active.len())
            .field("waiting", &state.waiters.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T: Send + 'static> ObjectPool<T> {
    /// Creates an empty pool that builds at most `capacity` objects.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new<F>(capacity: usize, coroutine: Coroutine, factory: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        assert!(capacity > 0, "pool capacity must be at least 1");
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            factory: Box::new(factory),
            coroutine,
            state: Mutex::new(PoolState {
                free: VecDeque::with_capacity(capacity),
                active: FxHashSet::default(),
                waiters: VecDeque::new(),
                created: 0,
                next_slot: 1,
                closed: false,
            }),
        }
    }

    /// Borrows an object.
    ///
    /// Reuses a free object, else constructs one under capacity, else waits
    /// for a `put()` from another unit.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolClosed`] if the pool is or becomes closed
    /// - [`Error::PoolExhausted`] if the pool is full and the caller is not
    ///   inside a concurrent unit
    /// - any error returned by the factory
    pub async fn take(&self) -> Result<PoolObject<T>> {
        let rx = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::PoolClosed);
            }

            if let Some(object) = state.free.pop_front() {
                state.active.insert(object.slot);
                trace!(slot = object.slot, "Pool object reused");
                return Ok(object);
            }

            if state.created < self.capacity {
                state.created += 1;
                let slot = state.next_slot;
                state.next_slot += 1;
                drop(state);
                return self.construct(slot);
            }

            if self.coroutine.cid().is_none() {
                return Err(Error::PoolExhausted {
                    capacity: self.capacity,
                });
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            debug!(
                waiting = state.waiters.len(),
                cid = %self.coroutine.cid(),
                "Pool exhausted, waiting for put"
            );
            rx
        };

        rx.await.map_err(|_| Error::PoolClosed)
    }

    /// Returns a borrowed object.
    ///
    /// # Errors
    ///
    /// - [`Error::ForeignPoolObject`] if the object did not come from this
    ///   pool or is not currently borrowed
    /// - [`Error::PoolClosed`] if the pool is closed
    pub fn put(&self, object: PoolObject<T>) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::PoolClosed);
        }
        if object.pool_id != self.id || !state.active.remove(&object.slot) {
            return Err(Error::ForeignPoolObject { slot: object.slot });
        }

        let mut object = object;
        while let Some(waiter) = state.waiters.pop_front() {
            let slot = object.slot;
            state.active.insert(slot);
            match waiter.send(object) {
                Ok(()) => {
                    trace!(slot, "Pool object handed to waiter");
                    return Ok(());
                }
                Err(returned) => {
                    // Waiter gave up; try the next one.
                    state.active.remove(&slot);
                    object = returned;
                }
            }
        }

        trace!(slot = object.slot, "Pool object queued");
        state.free.push_back(object);
        Ok(())
    }

    /// Closes the pool, discarding queued objects and failing waiters.
    ///
    /// Borrowed objects stay with their holders.
    pub fn close(&self) {
        let (free, waiters) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.free),
                std::mem::take(&mut state.waiters),
            )
        };

        debug!(
            discarded = free.len(),
            waiters = waiters.len(),
            "Pool closed"
        );
        drop(free);
        drop(waiters);
    }

    /// Returns the configured capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of queued free objects.
    #[inline]
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Returns the number of borrowed objects.
    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Returns the number of callers waiting in `take()`.
    #[inline]
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Returns `true` once [`close`](Self::close) has run.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Builds a new object for `slot`, outside the state lock.
    fn construct(&self, slot: u64) -> Result<PoolObject<T>> {
        match (self.factory)() {
            Ok(value) => {
                let mut state = self.state.lock();
                if state.closed {
                    state.created -= 1;
                    return Err(Error::PoolClosed);
                }
                state.active.insert(slot);
                debug!(slot, created = state.created, "Pool object constructed");
                Ok(PoolObject {
                    pool_id: self.id,
                    slot,
                    value,
                })
            }
            Err(e) => {
                self.state.lock().created -= 1;
                Err(e)
            }
        }
    }
}

impl<T> Drop for ObjectPool<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.closed = true;
        state.free.clear();
        state.waiters.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::sync::oneshot;

    fn counting_pool(capacity: usize, coroutine: Coroutine) -> (ObjectPool<usize>, Arc<AtomicUsize>) {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let pool = ObjectPool::new(capacity, coroutine, move || {
            Ok(counter.fetch_add(1, Ordering::SeqCst))
        });
        (pool, built)
    }

    #[tokio::test]
    async fn test_take_constructs_up_to_capacity() {
        let (pool, built) = counting_pool(2, Coroutine::sync());
        let a = pool.take().await.expect("first");
        let b = pool.take().await.expect("second");

        assert_ne!(a.slot(), b.slot());
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_eq!(pool.active_count(), 2);
        assert_eq!(pool.free_count(), 0);
    }

    #[tokio::test]
    async fn test_put_then_take_reuses_object() {
        let (pool, built) = counting_pool(2, Coroutine::sync());
        let a = pool.take().await.expect("take");
        let slot = a.slot();
        pool.put(a).expect("put");
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.active_count(), 0);

        let again = pool.take().await.expect("take again");
        assert_eq!(again.slot(), slot);
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_outside_unit() {
        let (pool, _) = counting_pool(1, Coroutine::sync());
        let _held = pool.take().await.expect("take");
        let err = pool.take().await.unwrap_err();
        assert!(matches!(err, Error::PoolExhausted { capacity: 1 }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_third_take_blocks_until_put() {
        let co = Coroutine::task().expect("runtime");
        let (pool, _) = counting_pool(2, co.clone());
        let pool = Arc::new(pool);

        let a = pool.take().await.expect("first");
        let _b = pool.take().await.expect("second");

        let (tx, rx) = oneshot::channel();
        let waiter_pool = Arc::clone(&pool);
        co.create(async move {
            let object = waiter_pool.take().await;
            let _ = tx.send(object.map(|o| o.slot()));
        });

        for _ in 0..200 {
            if pool.waiting_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(pool.waiting_count(), 1);

        let handed = a.slot();
        pool.put(a).expect("put");
        let received = rx.await.expect("waiter replied").expect("take ok");
        assert_eq!(received, handed);
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.active_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_waiters_are_served_fifo() {
        let co = Coroutine::task().expect("runtime");
        let (pool, _) = counting_pool(1, co.clone());
        let pool = Arc::new(pool);
        let held = pool.take().await.expect("take");

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut done = Vec::new();
        for label in ["first", "second"] {
            let (tx, rx) = oneshot::channel();
            let p = Arc::clone(&pool);
            let o = Arc::clone(&order);
            co.create(async move {
                let object = p.take().await.expect("take");
                o.lock().push(label);
                p.put(object).expect("put");
                let _ = tx.send(());
            });
            done.push(rx);
            let expected = done.len();
            for _ in 0..200 {
                if pool.waiting_count() == expected {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }

        pool.put(held).expect("put");
        for rx in done {
            rx.await.expect("waiter done");
        }
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_sync_pool_without_ambient_runtime() {
        let (pool, _) = counting_pool(1, Coroutine::sync());
        let object = tokio_test::assert_ok!(tokio_test::block_on(pool.take()));
        tokio_test::assert_err!(tokio_test::block_on(pool.take()));
        tokio_test::assert_ok!(pool.put(object));
        assert_eq!(pool.free_count(), 1);
    }

    #[tokio::test]
    async fn test_put_foreign_object_is_rejected() {
        let (pool, _) = counting_pool(1, Coroutine::sync());
        let (other, _) = counting_pool(1, Coroutine::sync());

        let foreign = other.take().await.expect("take");
        let err = pool.put(foreign).unwrap_err();
        assert!(matches!(err, Error::ForeignPoolObject { .. }));
    }

    #[tokio::test]
    async fn test_double_put_is_rejected() {
        let (pool, _) = counting_pool(1, Coroutine::sync());
        let object = pool.take().await.expect("take");
        let slot = object.slot();
        pool.put(object).expect("put");

        let forged = PoolObject {
            pool_id: pool.id,
            slot,
            value: 0usize,
        };
        assert!(matches!(
            pool.put(forged),
            Err(Error::ForeignPoolObject { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_discards_free_and_rejects_use() {
        let (pool, _) = counting_pool(2, Coroutine::sync());
        let a = pool.take().await.expect("take");
        let b = pool.take().await.expect("take");
        pool.put(a).expect("put");

        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.free_count(), 0);
        assert!(matches!(pool.take().await, Err(Error::PoolClosed)));
        assert!(matches!(pool.put(b), Err(Error::PoolClosed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_wakes_waiters_with_error() {
        let co = Coroutine::task().expect("runtime");
        let (pool, _) = counting_pool(1, co.clone());
        let pool = Arc::new(pool);
        let _held = pool.take().await.expect("take");

        let (tx, rx) = oneshot::channel();
        let p = Arc::clone(&pool);
        co.create(async move {
            let _ = tx.send(p.take().await.map(|o| o.slot()));
        });
        for _ in 0..200 {
            if pool.waiting_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        pool.close();
        assert!(matches!(rx.await.expect("replied"), Err(Error::PoolClosed)));
    }

    #[tokio::test]
    async fn test_factory_error_releases_capacity() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let pool = ObjectPool::new(1, Coroutine::sync(), move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::config("backend down"))
            } else {
                Ok("conn")
            }
        });

        assert!(pool.take().await.is_err());
        let object = pool.take().await.expect("second attempt");
        assert_eq!(*object, "conn");
    }
}
