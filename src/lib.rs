//! Driver and concurrency core for bot-protocol servers.
//!
//! One protocol implementation runs unmodified on either of two
//! concurrency backends while seeing a single event-driven surface for
//! HTTP, WebSocket, and process lifecycle events.
//!
//! # Architecture
//!
//! ```text
//!   hyper / tungstenite I/O
//!            │
//!            ▼
//!   transport ──► Event ──► EventDispatcher ──► listeners (priority order)
//!            ▲                                        │
//!            └──────── response slot / deferred ◄─────┘
//! ```
//!
//! Key design points:
//!
//! - The backend ([`BackendKind`]) is chosen once at start-up and carried
//!   in an explicit [`Coroutine`] context
//! - Listeners stop propagation by returning [`Propagation::Stop`]
//! - [`ObjectPool`] waits through the coroutine context, never a thread
//! - Workers are supervised threads, each with its own runtime
//!
//! # Quick Start
//!
//! ```no_run
//! use onebot_driver::{Driver, Propagation, Result};
//! use onebot_driver::event::names;
//! use onebot_driver::socket::{ServerSocketConfig, SocketConfig};
//!
//! fn main() -> Result<()> {
//!     let driver = Driver::builder()
//!         .socket(SocketConfig::Ws(ServerSocketConfig {
//!             host: "0.0.0.0".into(),
//!             port: 6700,
//!             access_token: Some("secret".into()),
//!             flag: 1,
//!         }))
//!         .build()?;
//!
//!     driver.add_event_listener(names::WEBSOCKET_MESSAGE, |event| {
//!         if let Some(frame) = event.as_websocket_message()
//!             && let Some(text) = frame.text()
//!         {
//!             frame.connection().send_text(text.to_string())?;
//!         }
//!         Ok(Propagation::Continue)
//!     }, 20);
//!
//!     driver.run()
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`coroutine`] | Cross-backend suspend/resume, sleep, exec |
//! | [`driver`] | Builder, configuration, run modes |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`event`] | Events, listener registry, dispatcher |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`pool`] | Bounded object pool with blocking take |
//! | [`process`] | Process roles, init policy, worker monitor |
//! | [`shutdown`] | Shutdown signal |
//! | [`socket`] | Socket records and access tokens |
//! | [`transport`] | Server/client I/O and WebSocket connections |

// ============================================================================
// Modules
// ============================================================================

/// Cross-backend coroutine abstraction.
pub mod coroutine;

/// Driver factory, configuration, and run modes.
///
/// Use [`Driver::builder()`] to create a configured driver instance.
pub mod driver;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Named, prioritized events.
pub mod event;

/// Type-safe identifiers.
pub mod identifiers;

/// Bounded object pool.
pub mod pool;

/// Process roles and init policy.
pub mod process;

/// Shutdown signal.
pub mod shutdown;

/// Socket records.
pub mod socket;

/// Backend I/O.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Coroutine types
pub use coroutine::{BackendKind, Coroutine, CoroutineBackend, ExecResult, Reactor};

// Driver types
pub use driver::{Driver, DriverBuilder, DriverConfig};

// Error types
pub use error::{Error, Result};

// Event types
pub use event::{Event, EventDispatcher, EventRegistry, Propagation};

// Identifier types
pub use identifiers::{ConnectionId, CoroutineId};

// Pool types
pub use pool::{ObjectPool, PoolObject};

// Process types
pub use process::{InitPolicy, ProcessDescriptor, ProcessManager, ProcessRole};

// Shutdown
pub use shutdown::Shutdown;
