//! Error types for the driver core.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```no_run
//! use onebot_driver::{Driver, Result};
//!
//! fn example() -> Result<()> {
//!     let driver = Driver::builder().worker_count(2).build()?;
//!     driver.run()
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::UnavailableBackend`] |
//! | Pool | [`Error::PoolExhausted`], [`Error::PoolClosed`], [`Error::ForeignPoolObject`] |
//! | Process | [`Error::ProcessSpawn`] |
//! | Listener | [`Error::Listener`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::Timeout`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Http`], [`Error::Client`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::ConnectionId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when driver or endpoint configuration is missing or invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Requested concurrency feature is not supported by the active runtime.
    #[error("Backend unavailable: {backend} ({reason})")]
    UnavailableBackend {
        /// Backend that was requested.
        backend: String,
        /// Why it cannot be used here.
        reason: String,
    },

    // ========================================================================
    // Pool Errors
    // ========================================================================
    /// Pool has no free object and the caller cannot wait for one.
    ///
    /// Returned by `take()` outside a concurrent unit when the pool is at capacity.
    #[error("Pool exhausted: all {capacity} objects are borrowed")]
    PoolExhausted {
        /// Capacity of the pool.
        capacity: usize,
    },

    /// Pool has been closed.
    #[error("Pool closed")]
    PoolClosed,

    /// Object handed to `put()` was not borrowed from this pool.
    ///
    /// This is a programmer error and always propagates.
    #[error("Object #{slot} was not borrowed from this pool")]
    ForeignPoolObject {
        /// Slot number carried by the rejected object.
        slot: u64,
    },

    // ========================================================================
    // Process Errors
    // ========================================================================
    /// Failed to spawn a worker, user process, or subprocess.
    #[error("Failed to spawn {what}: {message}")]
    ProcessSpawn {
        /// What was being spawned.
        what: String,
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Listener Errors
    // ========================================================================
    /// Uncaught fault raised inside a registered event listener.
    #[error("Listener for '{event}' failed: {message}")]
    Listener {
        /// Name of the event being dispatched.
        event: String,
        /// Description of the fault.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Connection could not be established or was refused.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// WebSocket connection is closed or unknown.
    #[error("Connection closed: {connection_id}")]
    ConnectionClosed {
        /// The connection that is gone.
        connection_id: ConnectionId,
    },

    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP protocol error from the server backend.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Outbound HTTP client error.
    #[error("HTTP client error: {message}")]
    Client {
        /// Description of the client failure.
        message: String,
    },
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an unavailable backend error.
    #[inline]
    pub fn unavailable_backend(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnavailableBackend {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Creates a process spawn error.
    #[inline]
    pub fn process_spawn(what: impl Into<String>, message: impl ToString) -> Self {
        Self::ProcessSpawn {
            what: what.into(),
            message: message.to_string(),
        }
    }

    /// Creates a listener fault.
    #[inline]
    pub fn listener(event: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Listener {
            event: event.into(),
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates an HTTP client error.
    #[inline]
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a configuration error.
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::UnavailableBackend { .. })
    }

    /// Returns `true` if this error comes from a resource pool.
    #[inline]
    #[must_use]
    pub fn is_pool_error(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. } | Self::PoolClosed | Self::ForeignPoolObject { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed { .. }
                | Self::Timeout { .. }
                | Self::WebSocket(_)
                | Self::Client { .. }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. }
                | Self::Timeout { .. }
                | Self::Connection { .. }
                | Self::Client { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
