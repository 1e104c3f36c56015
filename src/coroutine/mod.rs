//! Cross-backend coroutine abstraction.
//!
//! One suspend/resume contract over two concurrency primitives:
//!
//! | Backend | Runtime | Units are |
//! |---------|---------|-----------|
//! | [`TaskBackend`] | any tokio runtime (multi-thread in workers) | tokio tasks |
//! | [`FiberBackend`] | single-threaded [`Reactor`] | `spawn_local` tasks |
//! | [`SyncBackend`] | none | run to completion inline |
//!
//! The backend is picked once at start-up ([`BackendKind`]) and carried in
//! a [`Coroutine`] context value; nothing looks it up globally.
//!
//! # Contract
//!
//! - `create(task)` starts `task` immediately and returns its handle, or
//!   [`CoroutineId::NONE`] after running it synchronously when no backend
//!   is active.
//! - `suspend()` parks the calling unit until `resume(cid, value)` and
//!   returns `value`; outside a unit it returns `None` at once.
//! - `resume(cid, value)` returns `false` for unknown or finished units.
//! - `cid()` names the calling unit or returns the sentinel.
//!
//! `sleep` and `exec` are built on those four operations only.

// ============================================================================
// Submodules
// ============================================================================

/// Single-threaded reactor backend.
pub mod fiber;

/// No-concurrency fallback.
pub mod sync;

/// Multi-task scheduler backend.
pub mod task;

mod units;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::CoroutineId;

// ============================================================================
// Re-exports
// ============================================================================

pub use fiber::{FiberBackend, Reactor};
pub use sync::SyncBackend;
pub use task::TaskBackend;

// ============================================================================
// Types
// ============================================================================

/// Future run as one concurrent unit.
pub type UnitFuture = BoxFuture<'static, ()>;

// ============================================================================
// BackendKind
// ============================================================================

/// Concurrency backend selected at driver start-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Multi-task scheduler on a multi-thread runtime.
    #[default]
    Task,
    /// Single-threaded reactor with cooperative local units.
    Fiber,
}

impl BackendKind {
    /// Returns `true` if the backend can run several worker processes.
    #[inline]
    #[must_use]
    pub const fn supports_multi_process(self) -> bool {
        match self {
            Self::Task => true,
            Self::Fiber => cfg!(unix),
        }
    }

    /// Returns the backend's name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Fiber => "fiber",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CoroutineBackend
// ============================================================================

/// The four primitives every backend provides.
#[async_trait]
pub trait CoroutineBackend: Send + Sync + 'static {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Starts `task` as a concurrent unit.
    fn create(&self, task: UnitFuture) -> CoroutineId;

    /// Parks the calling unit until resumed.
    async fn suspend(&self) -> Option<Value>;

    /// Reactivates `cid` with `value`.
    fn resume(&self, cid: CoroutineId, value: Value) -> bool;

    /// Returns the calling unit's handle.
    fn cid(&self) -> CoroutineId;

    /// Returns `true` while `cid` is live.
    fn exists(&self, cid: CoroutineId) -> bool;
}

// ============================================================================
// ExecResult
// ============================================================================

/// Outcome of [`Coroutine::exec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Exit code; `-1` when the process was terminated by a signal.
    pub code: i32,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

impl ExecResult {
    /// Returns `true` if the command exited with code 0.
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

impl From<Output> for ExecResult {
    fn from(output: Output) -> Self {
        Self {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

// ============================================================================
// Coroutine
// ============================================================================

/// Coroutine context handed to components that need to block.
#[derive(Clone)]
pub struct Coroutine {
    backend: Arc<dyn CoroutineBackend>,
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Default for Coroutine {
    fn default() -> Self {
        Self::sync()
    }
}

impl Coroutine {
    /// Wraps an existing backend.
    #[must_use]
    pub fn new(backend: Arc<dyn CoroutineBackend>) -> Self {
        Self { backend }
    }

    /// Context without concurrency.
    #[must_use]
    pub fn sync() -> Self {
        Self::new(Arc::new(SyncBackend))
    }

    /// Context on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnavailableBackend`] outside a tokio runtime.
    pub fn task() -> Result<Self> {
        Ok(Self::new(Arc::new(TaskBackend::new()?)))
    }

    /// Context on the current reactor thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnavailableBackend`] outside [`Reactor::block_on`].
    pub fn fiber() -> Result<Self> {
        Ok(Self::new(Arc::new(FiberBackend::new()?)))
    }

    /// Builds the context for `kind` in the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnavailableBackend`] if the runtime does not fit.
    pub fn for_backend(kind: BackendKind) -> Result<Self> {
        match kind {
            BackendKind::Task => Self::task(),
            BackendKind::Fiber => Self::fiber(),
        }
    }

    /// Returns the backend's name.
    #[inline]
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Starts `task` as a concurrent unit.
    pub fn create<F>(&self, task: F) -> CoroutineId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.backend.create(Box::pin(task))
    }

    /// Parks the calling unit until resumed.
    pub async fn suspend(&self) -> Option<Value> {
        self.backend.suspend().await
    }

    /// Reactivates `cid` with `value`.
    pub fn resume(&self, cid: CoroutineId, value: Value) -> bool {
        self.backend.resume(cid, value)
    }

    /// Returns the calling unit's handle.
    #[inline]
    #[must_use]
    pub fn cid(&self) -> CoroutineId {
        self.backend.cid()
    }

    /// Returns `true` while `cid` is live.
    #[inline]
    #[must_use]
    pub fn exists(&self, cid: CoroutineId) -> bool {
        self.backend.exists(cid)
    }

    /// Sleeps for `duration`.
    ///
    /// Inside a unit this arms a one-shot timer and suspends; outside one
    /// it blocks the whole thread.
    pub async fn sleep(&self, duration: Duration) {
        let cid = self.cid();
        if cid.is_none() {
            std::thread::sleep(duration);
            return;
        }

        let timer = self.clone();
        self.create(async move {
            tokio::time::sleep(duration).await;
            timer.resume(cid, Value::Null);
        });
        self.suspend().await;
    }

    /// Runs `command` through the platform shell and captures its output.
    ///
    /// Inside a unit the caller suspends while the backend collects the
    /// output; outside one the command runs synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProcessSpawn`] if the command cannot be started.
    pub async fn exec(&self, command: &str) -> Result<ExecResult> {
        let cid = self.cid();
        if cid.is_none() {
            return shell_std(command)
                .output()
                .map(ExecResult::from)
                .map_err(|e| Error::process_spawn(command, e));
        }

        let runner = self.clone();
        let line = command.to_string();
        self.create(async move {
            let outcome = shell_tokio(&line)
                .output()
                .await
                .map(ExecResult::from)
                .map_err(|e| e.to_string());
            debug!(command = %line, ok = outcome.is_ok(), "Subprocess finished");
            runner.resume(cid, encode_outcome(outcome));
        });

        let value = self
            .suspend()
            .await
            .ok_or_else(|| Error::process_spawn(command, "unit was dropped while waiting"))?;
        let outcome: ExecOutcome = serde_json::from_value(value)?;
        outcome.map_err(|message| Error::process_spawn(command, message))
    }
}

// ============================================================================
// Shell helpers
// ============================================================================

type ExecOutcome = std::result::Result<ExecResult, String>;

/// Encodes a subprocess outcome for the resumed unit.
///
/// An encoding failure becomes an `Err` carrying its cause.
fn encode_outcome(outcome: ExecOutcome) -> Value {
    serde_json::to_value(outcome).unwrap_or_else(|e| {
        serde_json::json!({ "Err": format!("cannot encode subprocess output: {e}") })
    })
}

#[cfg(unix)]
fn shell_std(command: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_std(command: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

fn shell_tokio(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::from(shell_std(command));
    cmd.kill_on_drop(true);
    cmd
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    use serde_json::json;
    use tokio::sync::oneshot;

    #[test]
    fn test_sync_create_runs_inline_and_returns_sentinel() {
        let co = Coroutine::sync();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        let cid = co.create(async move {
            flag.store(true, Ordering::SeqCst);
        });

        assert_eq!(cid, CoroutineId::NONE);
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(co.cid(), CoroutineId::NONE);
        assert!(!co.resume(CoroutineId::from_raw(1), json!(1)));
    }

    #[tokio::test]
    async fn test_sync_suspend_is_noop() {
        let co = Coroutine::sync();
        assert_eq!(co.suspend().await, None);
    }

    #[tokio::test]
    async fn test_sleep_outside_unit_blocks() {
        let co = Coroutine::sync();
        let start = Instant::now();
        co.sleep(Duration::from_millis(20)).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_task_resume_delivers_value() {
        let co = Coroutine::task().expect("inside runtime");
        let (tx, rx) = oneshot::channel();
        let inner = co.clone();

        let cid = co.create(async move {
            let value = inner.suspend().await;
            let _ = tx.send(value);
        });

        assert!(cid.is_some());
        assert!(co.resume(cid, json!({"answer": 42})));
        assert_eq!(rx.await.expect("unit replied"), Some(json!({"answer": 42})));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_task_resume_unknown_handle_fails() {
        let co = Coroutine::task().expect("inside runtime");
        assert!(!co.resume(CoroutineId::from_raw(9_999), json!(null)));
        assert!(!co.resume(CoroutineId::NONE, json!(null)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_task_finished_handle_is_invalid() {
        let co = Coroutine::task().expect("inside runtime");
        let (tx, rx) = oneshot::channel();
        let cid = co.create(async move {
            let _ = tx.send(());
        });
        rx.await.expect("unit ran");

        for _ in 0..100 {
            if !co.exists(cid) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!co.exists(cid));
        assert!(!co.resume(cid, json!(1)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_task_cid_inside_unit() {
        let co = Coroutine::task().expect("inside runtime");
        let (tx, rx) = oneshot::channel();
        let inner = co.clone();
        let cid = co.create(async move {
            let _ = tx.send(inner.cid());
        });
        assert_eq!(rx.await.expect("unit replied"), cid);
        assert_eq!(co.cid(), CoroutineId::NONE);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_task_sleep_inside_unit() {
        let co = Coroutine::task().expect("inside runtime");
        let (tx, rx) = oneshot::channel();
        let inner = co.clone();
        co.create(async move {
            let start = Instant::now();
            inner.sleep(Duration::from_millis(30)).await;
            let _ = tx.send(start.elapsed());
        });
        let elapsed = rx.await.expect("unit replied");
        assert!(elapsed >= Duration::from_millis(30));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_task_exec_inside_unit() {
        let co = Coroutine::task().expect("inside runtime");
        let (tx, rx) = oneshot::channel();
        let inner = co.clone();
        co.create(async move {
            let _ = tx.send(inner.exec("echo out; echo err >&2; exit 3").await);
        });
        let result = rx.await.expect("unit replied").expect("exec ok");
        assert_eq!(result.code, 3);
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert!(!result.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_outside_unit_is_synchronous() {
        let co = Coroutine::sync();
        let result = co.exec("printf hello").await.expect("exec ok");
        assert!(result.success());
        assert_eq!(result.stdout, "hello");
    }

    #[test]
    fn test_encode_outcome_keeps_failure_cause() {
        let value = encode_outcome(Err("spawn refused".into()));
        let decoded: ExecOutcome = serde_json::from_value(value).expect("decodes");
        assert_eq!(decoded.unwrap_err(), "spawn refused");

        let fallback = serde_json::json!({ "Err": "cannot encode subprocess output: x" });
        let decoded: ExecOutcome = serde_json::from_value(fallback).expect("decodes");
        assert!(decoded.unwrap_err().contains("cannot encode"));
    }

    #[test]
    fn test_fiber_requires_reactor() {
        let err = Coroutine::fiber().unwrap_err();
        assert!(matches!(err, Error::UnavailableBackend { .. }));
    }

    #[test]
    fn test_backend_kind_serde() {
        let kind: BackendKind = serde_json::from_str("\"fiber\"").unwrap();
        assert_eq!(kind, BackendKind::Fiber);
        assert_eq!(BackendKind::default(), BackendKind::Task);
        assert!(BackendKind::Task.supports_multi_process());
    }
}
