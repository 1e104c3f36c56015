//! Builder pattern for driver configuration.
//!
//! Provides a fluent API for configuring and creating [`Driver`] instances.
//!
//! # Example
//!
//! ```no_run
//! use onebot_driver::{BackendKind, Driver, InitPolicy};
//! use onebot_driver::socket::{ClientSocketConfig, SocketConfig};
//!
//! # fn example() -> onebot_driver::Result<()> {
//! let driver = Driver::builder()
//!     .name("bot")
//!     .worker_count(4)
//!     .backend(BackendKind::Task)
//!     .init_policy(InitPolicy::FirstWorker)
//!     .socket(SocketConfig::WsReverse(ClientSocketConfig::new("ws://127.0.0.1:8080/")))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::coroutine::BackendKind;
use crate::error::{Error, Result};
use crate::process::InitPolicy;
use crate::socket::SocketConfig;
use crate::transport::ClientImpl;

use super::config::DriverConfig;
use super::core::Driver;
use super::sockets::DriverSockets;

// ============================================================================
// Constants
// ============================================================================

/// Name used when none is set.
const DEFAULT_NAME: &str = "driver";

/// Upper bound on `worker_count`.
const MAX_WORKERS: u32 = 1024;

// ============================================================================
// DriverBuilder
// ============================================================================

/// Builder for configuring a [`Driver`] instance.
///
/// Use [`Driver::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct DriverBuilder {
    /// Driver name for logging.
    name: Option<String>,
    /// Driver-wide settings.
    config: DriverConfig,
    /// Socket records in configuration order.
    sockets: Vec<SocketConfig>,
}

// ============================================================================
// DriverBuilder Implementation
// ============================================================================

impl DriverBuilder {
    /// Creates a new driver builder with default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the driver name.
    #[inline]
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replaces the whole configuration record.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the number of workers.
    #[inline]
    #[must_use]
    pub fn worker_count(mut self, count: u32) -> Self {
        self.config.worker_count = count;
        self
    }

    /// Selects the concurrency backend.
    #[inline]
    #[must_use]
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    /// Sets where `driver.init` runs in multi-process mode.
    #[inline]
    #[must_use]
    pub fn init_policy(mut self, policy: InitPolicy) -> Self {
        self.config.init_policy = policy;
        self
    }

    /// Sets whether the user process blocks until shutdown.
    #[inline]
    #[must_use]
    pub fn init_in_user_process_block(mut self, block: bool) -> Self {
        self.config.init_in_user_process_block = block;
        self
    }

    /// Sets one backend tuning entry.
    #[inline]
    #[must_use]
    pub fn tuning(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.backend_tuning_table.insert(key.into(), value.into());
        self
    }

    /// Sets the first client implementation tried for webhooks.
    #[inline]
    #[must_use]
    pub fn default_client_impl(mut self, implementation: ClientImpl) -> Self {
        self.config.default_client_impl = implementation;
        self
    }

    /// Sets the fallback client implementation (`None` disables it).
    #[inline]
    #[must_use]
    pub fn fallback_client_impl(mut self, implementation: Option<ClientImpl>) -> Self {
        self.config.fallback_client_impl = implementation;
        self
    }

    /// Adds one socket.
    #[inline]
    #[must_use]
    pub fn socket(mut self, socket: SocketConfig) -> Self {
        self.sockets.push(socket);
        self
    }

    /// Adds several sockets.
    #[inline]
    #[must_use]
    pub fn sockets(mut self, sockets: impl IntoIterator<Item = SocketConfig>) -> Self {
        self.sockets.extend(sockets);
        self
    }

    /// Builds the driver with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `worker_count` is 0 or too large
    /// - [`Error::Config`] if sockets were configured but none is usable
    pub fn build(self) -> Result<Driver> {
        self.validate_workers()?;
        let sockets = DriverSockets::from_configs(&self.sockets, &self.config.client_order())?;
        let name = self.name.unwrap_or_else(|| DEFAULT_NAME.to_string());

        Ok(Driver::new(name, self.config, sockets))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl DriverBuilder {
    /// Validates the worker count.
    fn validate_workers(&self) -> Result<()> {
        match self.config.worker_count {
            0 => Err(Error::config(
                "worker_count must be at least 1. Use .worker_count(1) for a single worker.",
            )),
            n if n > MAX_WORKERS => Err(Error::config(format!(
                "worker_count {n} exceeds the maximum of {MAX_WORKERS}"
            ))),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
