//! Init policy: which process units run the one-time `driver.init` event.
//!
//! The policy is chosen once per deployment. In multi-process mode the
//! driver asks [`InitPolicy::runs_at`] at each start-up stage; in inline
//! mode `driver.init` always runs once, synchronously, before serving.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use super::ProcessRole;

// ============================================================================
// InitStage
// ============================================================================

/// Start-up stage at which the driver consults the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    /// Master, before workers are spawned.
    Master,
    /// Manager start, before its first worker.
    Manager,
    /// A worker starting (or restarting) with the given id.
    Worker(u32),
    /// The dedicated user process.
    User,
}

impl InitStage {
    /// Returns the process role associated with the stage.
    #[inline]
    #[must_use]
    pub const fn role(self) -> ProcessRole {
        match self {
            Self::Master => ProcessRole::Master,
            Self::Manager => ProcessRole::Manager,
            Self::Worker(_) => ProcessRole::Worker,
            Self::User => ProcessRole::User,
        }
    }
}

// ============================================================================
// InitPolicy
// ============================================================================

/// Where `driver.init` runs in multi-process mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPolicy {
    /// Every process unit runs it when it starts.
    EveryProcess,
    /// Only the master, before forking workers.
    MasterOnly,
    /// Only the manager, when it starts.
    ManagerOnly,
    /// Only worker #0; re-run if that worker restarts.
    #[default]
    FirstWorker,
    /// Every worker on each (re)start.
    EveryWorker,
    /// A dedicated, separately spawned user process.
    UserProcess,
}

impl InitPolicy {
    /// Returns `true` if `driver.init` runs at `stage`.
    #[must_use]
    pub const fn runs_at(self, stage: InitStage) -> bool {
        match self {
            Self::EveryProcess => true,
            Self::MasterOnly => matches!(stage, InitStage::Master),
            Self::ManagerOnly => matches!(stage, InitStage::Manager),
            Self::FirstWorker => matches!(stage, InitStage::Worker(0)),
            Self::EveryWorker => matches!(stage, InitStage::Worker(_)),
            Self::UserProcess => matches!(stage, InitStage::User),
        }
    }

    /// Returns `true` if the policy needs a dedicated user process.
    #[inline]
    #[must_use]
    pub const fn needs_user_process(self) -> bool {
        matches!(self, Self::UserProcess)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const STAGES: [InitStage; 5] = [
        InitStage::Master,
        InitStage::Manager,
        InitStage::Worker(0),
        InitStage::Worker(1),
        InitStage::User,
    ];

    fn matrix(policy: InitPolicy) -> Vec<bool> {
        STAGES.iter().map(|s| policy.runs_at(*s)).collect()
    }

    #[test]
    fn test_every_process() {
        assert_eq!(matrix(InitPolicy::EveryProcess), [true; 5]);
    }

    #[test]
    fn test_master_only() {
        assert_eq!(
            matrix(InitPolicy::MasterOnly),
            [true, false, false, false, false]
        );
    }

    #[test]
    fn test_manager_only() {
        assert_eq!(
            matrix(InitPolicy::ManagerOnly),
            [false, true, false, false, false]
        );
    }

    #[test]
    fn test_first_worker() {
        assert_eq!(
            matrix(InitPolicy::FirstWorker),
            [false, false, true, false, false]
        );
    }

    #[test]
    fn test_every_worker() {
        assert_eq!(
            matrix(InitPolicy::EveryWorker),
            [false, false, true, true, false]
        );
    }

    #[test]
    fn test_user_process() {
        assert_eq!(
            matrix(InitPolicy::UserProcess),
            [false, false, false, false, true]
        );
        assert!(InitPolicy::UserProcess.needs_user_process());
        assert!(!InitPolicy::FirstWorker.needs_user_process());
    }

    #[test]
    fn test_default_and_serde() {
        assert_eq!(InitPolicy::default(), InitPolicy::FirstWorker);
        let policy: InitPolicy = serde_json::from_str("\"every_worker\"").unwrap();
        assert_eq!(policy, InitPolicy::EveryWorker);
    }

    #[test]
    fn test_stage_roles() {
        assert_eq!(InitStage::Worker(4).role(), ProcessRole::Worker);
        assert_eq!(InitStage::User.role(), ProcessRole::User);
    }
}
