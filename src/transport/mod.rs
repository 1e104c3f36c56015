//! Backend I/O: server sockets, client sockets, WebSocket connections.
//!
//! Native I/O callbacks are turned into events here and handed to the
//! worker's [`EventDispatcher`]. Every long-running piece (accept loops,
//! connections, reverse clients) runs as a unit of the worker's
//! [`Coroutine`] context.
//!
//! # Architecture
//!
//! ```text
//!  ws / http clients          reverse ws / webhook endpoints
//!        │                                 ▲
//!        ▼                                 │
//! ┌──────────────┐   events   ┌──────────────────┐
//! │ BoundListener│──────────► │ EventDispatcher  │
//! │  accept loop │            │   (listeners)    │
//! └──────────────┘            └──────────────────┘
//!        │                             │
//!        ▼                             ▼
//!  WsConnection ◄──── ConnectionRegistry (send / broadcast by flag)
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket handle, frame loop, registry |
//! | `server` | Binding and accept loops of server sockets |
//! | `http` | HTTP/1 request handling |
//! | `reverse` | Reverse WebSocket client |
//! | `webhook` | HTTP webhook client |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection handle and frame loop.
pub mod connection;

/// HTTP/1 server connections.
pub(crate) mod http;

/// Reverse WebSocket client.
pub mod reverse;

/// Server socket binding and accept loops.
pub mod server;

/// HTTP webhook client.
pub mod webhook;

// ============================================================================
// Imports
// ============================================================================

use crate::coroutine::Coroutine;
use crate::event::EventDispatcher;
use crate::shutdown::Shutdown;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{ConnectionOrigin, ConnectionRegistry, WsConnection};
pub use server::BoundListener;
pub use webhook::{ClientImpl, HttpWebhookClient};

// ============================================================================
// TransportContext
// ============================================================================

/// Everything a transport unit needs, cloned into each unit.
#[derive(Debug, Clone)]
pub struct TransportContext {
    pub(crate) dispatcher: EventDispatcher,
    pub(crate) coroutine: Coroutine,
    pub(crate) connections: ConnectionRegistry,
    pub(crate) shutdown: Shutdown,
}

impl TransportContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        dispatcher: EventDispatcher,
        coroutine: Coroutine,
        connections: ConnectionRegistry,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            dispatcher,
            coroutine,
            connections,
            shutdown,
        }
    }

    /// Returns the dispatcher.
    #[inline]
    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Returns the coroutine context.
    #[inline]
    #[must_use]
    pub fn coroutine(&self) -> &Coroutine {
        &self.coroutine
    }

    /// Returns the connection registry.
    #[inline]
    #[must_use]
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Returns the shutdown signal.
    #[inline]
    #[must_use]
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }
}
