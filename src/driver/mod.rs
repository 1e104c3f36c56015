//! Driver module: composition root of a bot-protocol server.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Driver`] | Owns the sockets and listeners, runs the process layout |
//! | [`DriverBuilder`] | Fluent configuration builder |
//! | [`DriverConfig`] | Serializable driver settings |
//! | [`DriverSockets`] | Constructed sockets grouped by transport type |
//!
//! # Example
//!
//! ```no_run
//! use onebot_driver::{Driver, Propagation, Result};
//! use onebot_driver::event::names;
//!
//! fn main() -> Result<()> {
//!     let driver = Driver::builder().worker_count(2).build()?;
//!
//!     driver.add_event_listener(names::WORKER_START, |event| {
//!         println!("started: {:?}", event.process_descriptor());
//!         Ok(Propagation::Continue)
//!     }, 20);
//!
//!     driver.run()
//! }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for driver configuration.
pub mod builder;

/// Serializable driver settings.
pub mod config;

/// Core driver implementation.
pub mod core;

/// Socket sets grouped by transport type.
pub mod sockets;

mod worker;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::DriverBuilder;
pub use config::{DriverConfig, RuntimeTuning};
pub use core::Driver;
pub use sockets::DriverSockets;
