//! Listener registry keyed by event name.
//!
//! Lists are kept sorted by descending priority at insertion time, so reads
//! never sort. Equal priorities keep registration order.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::Result;

use super::{Event, Propagation};

// ============================================================================
// Constants
// ============================================================================

/// Priority used by [`EventRegistry::add`].
pub const DEFAULT_PRIORITY: i32 = 20;

// ============================================================================
// Types
// ============================================================================

/// Event listener.
///
/// Receives the event mutably so it can fill response slots, and returns
/// whether dispatch continues.
pub type Listener = Arc<dyn Fn(&mut Event) -> Result<Propagation> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    priority: i32,
    listener: Listener,
}

// ============================================================================
// EventRegistry
// ============================================================================

/// Per-process listener table.
#[derive(Default)]
pub struct EventRegistry {
    listeners: RwLock<FxHashMap<String, Vec<Registration>>>,
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read();
        let mut names: Vec<_> = listeners
            .iter()
            .map(|(name, list)| (name.as_str(), list.len()))
            .collect();
        names.sort_unstable();
        f.debug_struct("EventRegistry")
            .field("listeners", &names)
            .finish()
    }
}

impl EventRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for `name` at `priority`.
    ///
    /// Higher priorities run first. A listener is placed after every
    /// existing listener with the same or higher priority.
    pub fn add_event_listener<F>(&self, name: impl Into<String>, listener: F, priority: i32)
    where
        F: Fn(&mut Event) -> Result<Propagation> + Send + Sync + 'static,
    {
        self.add_listener_arc(name, Arc::new(listener), priority);
    }

    /// Registers an already shared listener.
    pub fn add_listener_arc(&self, name: impl Into<String>, listener: Listener, priority: i32) {
        let name = name.into();
        let mut listeners = self.listeners.write();
        let list = listeners.entry(name.clone()).or_default();
        let at = list.partition_point(|existing| existing.priority >= priority);
        list.insert(at, Registration { priority, listener });
        trace!(event = %name, priority, position = at, "Listener registered");
    }

    /// Registers `listener` for `name` at [`DEFAULT_PRIORITY`].
    pub fn add<F>(&self, name: impl Into<String>, listener: F)
    where
        F: Fn(&mut Event) -> Result<Propagation> + Send + Sync + 'static,
    {
        self.add_event_listener(name, listener, DEFAULT_PRIORITY);
    }

    /// Returns the listeners for `name` in dispatch order.
    ///
    /// The returned list is a snapshot; registering during a dispatch does
    /// not affect that dispatch.
    #[must_use]
    pub fn get_event_listeners(&self, name: &str) -> Vec<Listener> {
        self.listeners
            .read()
            .get(name)
            .map(|list| list.iter().map(|r| Arc::clone(&r.listener)).collect())
            .unwrap_or_default()
    }

    /// Returns `(priority, listener)` pairs for `name` in dispatch order.
    #[must_use]
    pub fn get_prioritized(&self, name: &str) -> Vec<(i32, Listener)> {
        self.listeners
            .read()
            .get(name)
            .map(|list| {
                list.iter()
                    .map(|r| (r.priority, Arc::clone(&r.listener)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Removes every listener for `name`, returning how many were removed.
    pub fn remove_event_listeners(&self, name: &str) -> usize {
        self.listeners
            .write()
            .remove(name)
            .map_or(0, |list| list.len())
    }

    /// Returns `true` if `name` has at least one listener.
    #[must_use]
    pub fn has_listeners(&self, name: &str) -> bool {
        self.listeners
            .read()
            .get(name)
            .is_some_and(|list| !list.is_empty())
    }

    /// Returns the number of listeners for `name`.
    #[must_use]
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.read().get(name).map_or(0, Vec::len)
    }
}

// ============================================================================
// Tests
// ============================================================================
