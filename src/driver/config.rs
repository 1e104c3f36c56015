//! Driver configuration record.
//!
//! [`DriverConfig`] is plain serde data so embedding code can load it from
//! any format. Missing fields take their defaults.
//!
//! ```json
//! {
//!   "worker_count": 4,
//!   "backend": "task",
//!   "init_policy": "first_worker",
//!   "backend_tuning_table": { "worker_threads": 2 },
//!   "default_client_impl": "reqwest",
//!   "fallback_client_impl": "hyper"
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::coroutine::BackendKind;
use crate::process::InitPolicy;
use crate::transport::ClientImpl;

// ============================================================================
// Constants
// ============================================================================

/// Tuning key: runtime threads per task-backend worker.
pub const TUNE_WORKER_THREADS: &str = "worker_threads";

/// Tuning key: blocking-pool size per worker runtime.
pub const TUNE_MAX_BLOCKING_THREADS: &str = "max_blocking_threads";

/// Tuning key: stack size in bytes of worker and runtime threads.
pub const TUNE_THREAD_STACK_SIZE: &str = "thread_stack_size";

// ============================================================================
// DriverConfig
// ============================================================================

/// Driver-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Number of worker units.
    pub worker_count: u32,
    /// Concurrency backend of the workers.
    pub backend: BackendKind,
    /// Where `driver.init` runs in multi-process mode.
    pub init_policy: InitPolicy,
    /// Keep the user process alive until shutdown after `driver.init`.
    pub init_in_user_process_block: bool,
    /// Backend-specific knobs, see the `TUNE_*` keys.
    pub backend_tuning_table: BTreeMap<String, Value>,
    /// First client implementation tried for webhooks.
    pub default_client_impl: ClientImpl,
    /// Client implementation tried when the default is unusable.
    pub fallback_client_impl: Option<ClientImpl>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            backend: BackendKind::default(),
            init_policy: InitPolicy::default(),
            init_in_user_process_block: true,
            backend_tuning_table: BTreeMap::new(),
            default_client_impl: ClientImpl::Reqwest,
            fallback_client_impl: Some(ClientImpl::Hyper),
        }
    }
}

impl DriverConfig {
    /// Returns the client implementations in the order they are tried.
    #[must_use]
    pub fn client_order(&self) -> Vec<ClientImpl> {
        let mut order = vec![self.default_client_impl];
        if let Some(fallback) = self.fallback_client_impl
            && fallback != self.default_client_impl
        {
            order.push(fallback);
        }
        order
    }

    /// Returns `true` if workers run as separate supervised units.
    #[inline]
    #[must_use]
    pub fn is_multi_process(&self) -> bool {
        self.worker_count > 1 && self.backend.supports_multi_process()
    }

    /// Parses the tuning table.
    ///
    /// Unknown keys and values that are not positive integers are logged
    /// and ignored.
    #[must_use]
    pub fn tuning(&self) -> RuntimeTuning {
        let mut tuning = RuntimeTuning::default();

        for (key, value) in &self.backend_tuning_table {
            let slot = match key.as_str() {
                TUNE_WORKER_THREADS => &mut tuning.worker_threads,
                TUNE_MAX_BLOCKING_THREADS => &mut tuning.max_blocking_threads,
                TUNE_THREAD_STACK_SIZE => &mut tuning.thread_stack_size,
                _ => {
                    warn!(key = %key, "Unknown backend tuning key ignored");
                    continue;
                }
            };

            match value.as_u64().filter(|n| *n > 0) {
                Some(n) => *slot = usize::try_from(n).ok(),
                None => warn!(key = %key, value = %value, "Tuning value must be a positive integer"),
            }
        }

        tuning
    }
}

// ============================================================================
// RuntimeTuning
// ============================================================================

/// Parsed backend tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeTuning {
    /// Runtime threads per task-backend worker.
    pub worker_threads: Option<usize>,
    /// Blocking-pool size per worker runtime.
    pub max_blocking_threads: Option<usize>,
    /// Stack size of worker and runtime threads.
    pub thread_stack_size: Option<usize>,
}

// ============================================================================
// Tests
// ============================================================================
