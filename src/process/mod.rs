//! Process roles and the per-process descriptor.
//!
//! Every OS-level unit of the driver (the master, the manager that
//! supervises workers, each worker, the optional user process) carries a
//! [`ProcessDescriptor`]: a role plus a small numeric id. The descriptor is
//! written once when the unit starts and read everywhere else for logging
//! and init-policy decisions.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `policy` | Where the one-time `driver.init` event runs |
//! | `monitor` | Worker supervision and restart loop |

// ============================================================================
// Submodules
// ============================================================================

/// Init policy rules.
pub mod policy;

/// Worker monitor loop.
pub mod monitor;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// Re-exports
// ============================================================================

pub use monitor::{Monitor, WorkerExit};
pub use policy::InitPolicy;

// ============================================================================
// ProcessRole
// ============================================================================

/// Role of a process unit.
///
/// Each role is a distinct bit so roles can be combined into masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessRole {
    /// The process that called `run()`.
    Master,
    /// The supervisor that spawns and restarts workers.
    Manager,
    /// An event-loop worker serving sockets.
    Worker,
    /// A worker reserved for offloaded tasks.
    TaskWorker,
    /// A dedicated user process.
    User,
}

impl ProcessRole {
    /// Returns the role's bit.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::Master => 1,
            Self::Manager => 1 << 1,
            Self::Worker => 1 << 2,
            Self::TaskWorker => 1 << 3,
            Self::User => 1 << 4,
        }
    }

    /// Returns `true` if the role's bit is set in `mask`.
    #[inline]
    #[must_use]
    pub const fn in_mask(self, mask: u8) -> bool {
        mask & self.bits() != 0
    }

    /// Returns the role's lowercase name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Manager => "manager",
            Self::Worker => "worker",
            Self::TaskWorker => "task_worker",
            Self::User => "user",
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mask covering every worker-like role.
pub const ANY_WORKER: u8 = ProcessRole::Worker.bits() | ProcessRole::TaskWorker.bits();

// ============================================================================
// ProcessDescriptor
// ============================================================================

/// Role and id of one process unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    /// Current role.
    pub role: ProcessRole,
    /// Numeric id (worker index, user process index, 0 otherwise).
    pub id: u32,
}

impl Default for ProcessDescriptor {
    fn default() -> Self {
        Self {
            role: ProcessRole::Master,
            id: 0,
        }
    }
}

impl fmt::Display for ProcessDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.role, self.id)
    }
}

// ============================================================================
// ProcessManager
// ============================================================================

/// Handle to the descriptor of the current process unit.
///
/// Cloning shares the descriptor; each unit creates its own manager.
#[derive(Debug, Clone, Default)]
pub struct ProcessManager {
    descriptor: Arc<RwLock<ProcessDescriptor>>,
}

impl ProcessManager {
    /// Creates a manager in the default state (master, id 0).
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manager already initialized to `role` and `id`.
    #[inline]
    #[must_use]
    pub fn with_role(role: ProcessRole, id: u32) -> Self {
        let manager = Self::new();
        manager.init_process(role, id);
        manager
    }

    /// Records this unit's role and id.
    pub fn init_process(&self, role: ProcessRole, id: u32) {
        *self.descriptor.write() = ProcessDescriptor { role, id };
        debug!(role = %role, id, "Process initialized");
    }

    /// Returns the current role.
    #[inline]
    #[must_use]
    pub fn process_type(&self) -> ProcessRole {
        self.descriptor.read().role
    }

    /// Returns the current id.
    #[inline]
    #[must_use]
    pub fn process_id(&self) -> u32 {
        self.descriptor.read().id
    }

    /// Returns a copy of the descriptor.
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> ProcessDescriptor {
        *self.descriptor.read()
    }
}

// ============================================================================
// Tests
// ============================================================================
