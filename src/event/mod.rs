//! Named, prioritized events.
//!
//! Backend callbacks (a worker starting, an HTTP request arriving, a
//! WebSocket frame) are wrapped into an [`Event`] and dispatched to the
//! listeners registered for its name, highest priority first.
//!
//! # Built-in Events
//!
//! | Name | Payload |
//! |------|---------|
//! | `worker.start` / `worker.stop` | [`ProcessDescriptor`] |
//! | `manager.start` / `manager.stop` | [`ProcessDescriptor`] |
//! | `driver.init` / `user.process.start` | [`ProcessDescriptor`] |
//! | `http.request` | [`HttpRequestEvent`] |
//! | `websocket.open` | [`WebSocketOpenEvent`] |
//! | `websocket.message` | [`WebSocketMessageEvent`] |
//! | `websocket.close` | [`WebSocketCloseEvent`] |
//!
//! Any other name can carry a JSON payload ([`Event::custom`]).
//!
//! # Stop Propagation
//!
//! Each listener returns [`Propagation`]. `Stop` ends the dispatch; state
//! the listener already wrote into the event (a response, for instance)
//! is kept.

// ============================================================================
// Submodules
// ============================================================================

/// Dispatcher and fault boundary.
pub mod dispatcher;

/// Transport payloads.
pub mod payload;

/// Listener registry.
pub mod registry;

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;
use std::fmt;

use serde_json::Value;

use crate::process::ProcessDescriptor;

// ============================================================================
// Re-exports
// ============================================================================

pub use dispatcher::{EventDispatcher, FaultHandler};
pub use payload::{
    HttpRequestEvent, ResponseSender, WebSocketCloseEvent, WebSocketMessageEvent,
    WebSocketOpenEvent,
};
pub use registry::{DEFAULT_PRIORITY, EventRegistry, Listener};

// ============================================================================
// Event Names
// ============================================================================

/// Built-in event names.
pub mod names {
    /// A worker started (or restarted).
    pub const WORKER_START: &str = "worker.start";
    /// A worker is stopping.
    pub const WORKER_STOP: &str = "worker.stop";
    /// The manager started.
    pub const MANAGER_START: &str = "manager.start";
    /// The manager is stopping.
    pub const MANAGER_STOP: &str = "manager.stop";
    /// An HTTP request arrived on an http-server socket.
    pub const HTTP_REQUEST: &str = "http.request";
    /// A WebSocket connection opened (server-accepted or reverse).
    pub const WEBSOCKET_OPEN: &str = "websocket.open";
    /// A WebSocket frame arrived.
    pub const WEBSOCKET_MESSAGE: &str = "websocket.message";
    /// A WebSocket connection closed.
    pub const WEBSOCKET_CLOSE: &str = "websocket.close";
    /// One-time driver initialization.
    pub const DRIVER_INIT: &str = "driver.init";
    /// The dedicated user process started.
    pub const USER_PROCESS_START: &str = "user.process.start";

    /// All built-in names.
    pub const ALL: [&str; 10] = [
        WORKER_START,
        WORKER_STOP,
        MANAGER_START,
        MANAGER_STOP,
        HTTP_REQUEST,
        WEBSOCKET_OPEN,
        WEBSOCKET_MESSAGE,
        WEBSOCKET_CLOSE,
        DRIVER_INIT,
        USER_PROCESS_START,
    ];
}

// ============================================================================
// Propagation
// ============================================================================

/// Listener verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Propagation {
    /// Run the next listener.
    #[default]
    Continue,
    /// Skip the remaining listeners.
    Stop,
}

// ============================================================================
// EventPayload
// ============================================================================

/// Data carried by an event.
#[derive(Debug)]
pub enum EventPayload {
    /// Process lifecycle events.
    Process(ProcessDescriptor),
    /// `http.request`.
    HttpRequest(HttpRequestEvent),
    /// `websocket.open`.
    WebSocketOpen(WebSocketOpenEvent),
    /// `websocket.message`.
    WebSocketMessage(WebSocketMessageEvent),
    /// `websocket.close`.
    WebSocketClose(WebSocketCloseEvent),
    /// Extension events.
    Custom(Value),
}

// ============================================================================
// Event
// ============================================================================

/// One occurrence, created per dispatch and dropped after it.
pub struct Event {
    name: Cow<'static, str>,
    payload: EventPayload,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("payload", &self.payload)
            .finish()
    }
}

impl Event {
    /// Creates an event with an explicit name and payload.
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>, payload: EventPayload) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Creates an extension event.
    #[must_use]
    pub fn custom(name: impl Into<Cow<'static, str>>, data: Value) -> Self {
        Self::new(name, EventPayload::Custom(data))
    }

    /// Creates a process lifecycle event such as `worker.start`.
    #[must_use]
    pub fn process(name: &'static str, descriptor: ProcessDescriptor) -> Self {
        Self::new(name, EventPayload::Process(descriptor))
    }

    /// Creates an `http.request` event.
    #[must_use]
    pub fn http_request(payload: HttpRequestEvent) -> Self {
        Self::new(names::HTTP_REQUEST, EventPayload::HttpRequest(payload))
    }

    /// Creates a `websocket.open` event.
    #[must_use]
    pub fn websocket_open(payload: WebSocketOpenEvent) -> Self {
        Self::new(names::WEBSOCKET_OPEN, EventPayload::WebSocketOpen(payload))
    }

    /// Creates a `websocket.message` event.
    #[must_use]
    pub fn websocket_message(payload: WebSocketMessageEvent) -> Self {
        Self::new(
            names::WEBSOCKET_MESSAGE,
            EventPayload::WebSocketMessage(payload),
        )
    }

    /// Creates a `websocket.close` event.
    #[must_use]
    pub fn websocket_close(payload: WebSocketCloseEvent) -> Self {
        Self::new(names::WEBSOCKET_CLOSE, EventPayload::WebSocketClose(payload))
    }

    /// Returns the event name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the payload.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Returns the payload mutably.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut EventPayload {
        &mut self.payload
    }

    /// Consumes the event, returning its payload.
    #[inline]
    #[must_use]
    pub fn into_payload(self) -> EventPayload {
        self.payload
    }

    /// Returns the process descriptor of lifecycle events.
    #[must_use]
    pub fn process_descriptor(&self) -> Option<ProcessDescriptor> {
        match &self.payload {
            EventPayload::Process(descriptor) => Some(*descriptor),
            _ => None,
        }
    }

    /// Returns the HTTP payload of `http.request` events.
    #[must_use]
    pub fn as_http_request(&self) -> Option<&HttpRequestEvent> {
        match &self.payload {
            EventPayload::HttpRequest(payload) => Some(payload),
            _ => None,
        }
    }

    /// Returns the HTTP payload mutably.
    pub fn as_http_request_mut(&mut self) -> Option<&mut HttpRequestEvent> {
        match &mut self.payload {
            EventPayload::HttpRequest(payload) => Some(payload),
            _ => None,
        }
    }

    /// Returns the payload of `websocket.open` events.
    #[must_use]
    pub fn as_websocket_open(&self) -> Option<&WebSocketOpenEvent> {
        match &self.payload {
            EventPayload::WebSocketOpen(payload) => Some(payload),
            _ => None,
        }
    }

    /// Returns the payload of `websocket.message` events.
    #[must_use]
    pub fn as_websocket_message(&self) -> Option<&WebSocketMessageEvent> {
        match &self.payload {
            EventPayload::WebSocketMessage(payload) => Some(payload),
            _ => None,
        }
    }

    /// Returns the payload of `websocket.close` events.
    #[must_use]
    pub fn as_websocket_close(&self) -> Option<&WebSocketCloseEvent> {
        match &self.payload {
            EventPayload::WebSocketClose(payload) => Some(payload),
            _ => None,
        }
    }

    /// Returns the JSON payload of extension events.
    #[must_use]
    pub fn as_custom(&self) -> Option<&Value> {
        match &self.payload {
            EventPayload::Custom(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the JSON payload of extension events mutably.
    pub fn as_custom_mut(&mut self) -> Option<&mut Value> {
        match &mut self.payload {
            EventPayload::Custom(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the socket flag of transport events.
    #[must_use]
    pub fn flag(&self) -> Option<i32> {
        match &self.payload {
            EventPayload::HttpRequest(p) => Some(p.flag()),
            EventPayload::WebSocketOpen(p) => Some(p.flag()),
            EventPayload::WebSocketMessage(p) => Some(p.flag()),
            EventPayload::WebSocketClose(p) => Some(p.flag()),
            EventPayload::Process(_) | EventPayload::Custom(_) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::process::ProcessRole;

    #[test]
    fn test_builtin_names_are_unique() {
        let mut all = names::ALL.to_vec();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), names::ALL.len());
    }

    #[test]
    fn test_custom_event_accessors() {
        let mut event = Event::custom("bot.heartbeat", json!({"interval": 5}));
        assert_eq!(event.name(), "bot.heartbeat");
        assert_eq!(event.flag(), None);
        assert!(event.as_http_request().is_none());

        if let Some(data) = event.as_custom_mut() {
            data["interval"] = json!(10);
        }
        assert_eq!(event.as_custom(), Some(&json!({"interval": 10})));
    }

    #[test]
    fn test_process_event_descriptor() {
        let descriptor = ProcessDescriptor {
            role: ProcessRole::Worker,
            id: 1,
        };
        let event = Event::process(names::WORKER_START, descriptor);
        assert_eq!(event.name(), "worker.start");
        assert_eq!(event.process_descriptor(), Some(descriptor));
    }

    #[test]
    fn test_propagation_default_is_continue() {
        assert_eq!(Propagation::default(), Propagation::Continue);
    }
}
