//! Event dispatch and the listener fault boundary.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{error, trace};

use crate::error::{Error, Result};
use crate::process::monitor::panic_message;
use crate::process::{ProcessDescriptor, ProcessManager};

use super::registry::EventRegistry;
use super::{Event, Propagation};

// ============================================================================
// Types
// ============================================================================

/// Receives listener faults swallowed by [`EventDispatcher::dispatch_with_handler`].
pub type FaultHandler = Arc<dyn Fn(&Error, &ProcessDescriptor) + Send + Sync>;

fn log_fault(err: &Error, process: &ProcessDescriptor) {
    error!(
        role = %process.role,
        id = process.id,
        error = %err,
        "Event listener failed"
    );
}

// ============================================================================
// EventDispatcher
// ============================================================================

/// Runs the listeners of an event in priority order.
#[derive(Clone)]
pub struct EventDispatcher {
    registry: Arc<EventRegistry>,
    process: ProcessManager,
    fault_handler: FaultHandler,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("registry", &self.registry)
            .field("process", &self.process.descriptor())
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    /// Creates a dispatcher over `registry` that logs faults with the
    /// context of `process`.
    #[must_use]
    pub fn new(registry: Arc<EventRegistry>, process: ProcessManager) -> Self {
        Self {
            registry,
            process,
            fault_handler: Arc::new(log_fault),
        }
    }

    /// Replaces the fault handler.
    #[must_use]
    pub fn with_fault_handler(mut self, handler: FaultHandler) -> Self {
        self.fault_handler = handler;
        self
    }

    /// Returns the registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Returns the process manager used for fault context.
    #[inline]
    #[must_use]
    pub fn process(&self) -> &ProcessManager {
        &self.process
    }

    /// Invokes every listener of `event` until one returns
    /// [`Propagation::Stop`].
    ///
    /// # Errors
    ///
    /// Returns the first listener error. Listener panics unwind through.
    pub fn dispatch(&self, event: &mut Event) -> Result<()> {
        let listeners = self.registry.get_event_listeners(event.name());
        trace!(event = event.name(), listeners = listeners.len(), "Dispatching");

        for listener in listeners {
            if listener(event)? == Propagation::Stop {
                trace!(event = event.name(), "Propagation stopped");
                break;
            }
        }
        Ok(())
    }

    /// Like [`dispatch`](Self::dispatch), but errors and panics are handed
    /// to the fault handler instead of reaching the caller.
    ///
    /// Returns `false` if a fault occurred.
    pub fn dispatch_with_handler(&self, event: &mut Event) -> bool {
        let name = event.name().to_string();
        let fault = match catch_unwind(AssertUnwindSafe(|| self.dispatch(event))) {
            Ok(Ok(())) => return true,
            Ok(Err(err)) => err,
            Err(panic) => Error::listener(name, panic_message(panic.as_ref())),
        };

        let descriptor = self.process.descriptor();
        // A panicking handler must not escape the boundary either.
        if catch_unwind(AssertUnwindSafe(|| (self.fault_handler)(&fault, &descriptor))).is_err() {
            log_fault(&fault, &descriptor);
        }
        false
    }
}

// ============================================================================
// Tests
// ============================================================================
