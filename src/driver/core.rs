//! Driver: composition root and process orchestration.
//!
//! # Run Modes
//!
//! | Mode | When | Layout |
//! |------|------|--------|
//! | inline | `worker_count <= 1` or the backend cannot run several workers | `driver.init` then worker #0 on the calling thread |
//! | multi-process | otherwise | master thread, optional user process, manager supervising `worker_count` workers |
//!
//! In multi-process mode `driver.init` runs where the [`InitPolicy`] says.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, EventRegistry, Propagation, names};
use crate::process::policy::InitStage;
use crate::process::{InitPolicy, Monitor, ProcessDescriptor, ProcessManager, ProcessRole};
use crate::shutdown::Shutdown;
use crate::transport::{BoundListener, ConnectionRegistry, HttpWebhookClient};

use super::builder::DriverBuilder;
use super::config::DriverConfig;
use super::sockets::DriverSockets;
use super::worker::WorkerEnv;

// ============================================================================
// Types
// ============================================================================

/// Shared state of the driver.
struct DriverInner {
    name: String,
    config: DriverConfig,
    sockets: DriverSockets,
    registry: Arc<EventRegistry>,
    connections: ConnectionRegistry,
    shutdown: Shutdown,
}

// ============================================================================
// Driver
// ============================================================================

/// Bot-protocol driver.
///
/// Built once at start-up with [`Driver::builder`]; listeners are
/// registered on it before [`run`](Self::run) is called.
///
/// # Example
///
/// ```no_run
/// use onebot_driver::{Driver, Propagation};
/// use onebot_driver::event::names;
/// use onebot_driver::socket::{ServerSocketConfig, SocketConfig};
///
/// # fn example() -> onebot_driver::Result<()> {
/// let driver = Driver::builder()
///     .name("demo")
///     .socket(SocketConfig::Http(ServerSocketConfig {
///         host: "127.0.0.1".into(),
///         port: 5700,
///         access_token: None,
///         flag: 1,
///     }))
///     .build()?;
///
/// driver.add_event_listener(names::HTTP_REQUEST, |event| {
///     if let Some(http) = event.as_http_request_mut() {
///         http.respond(hyper::StatusCode::OK, "pong");
///     }
///     Ok(Propagation::Stop)
/// }, 20);
///
/// driver.run()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.inner.name)
            .field("worker_count", &self.inner.config.worker_count)
            .field("backend", &self.inner.config.backend)
            .field("sockets", &self.inner.sockets.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Driver - Public API
// ============================================================================

impl Driver {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> DriverBuilder {
        DriverBuilder::new()
    }

    /// Returns the driver name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    /// Returns the constructed sockets.
    #[inline]
    #[must_use]
    pub fn sockets(&self) -> &DriverSockets {
        &self.inner.sockets
    }

    /// Returns the listener registry shared by every process unit.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.inner.registry
    }

    /// Registers a listener.
    pub fn add_event_listener<F>(&self, name: impl Into<String>, listener: F, priority: i32)
    where
        F: Fn(&mut Event) -> Result<Propagation> + Send + Sync + 'static,
    {
        self.inner.registry.add_event_listener(name, listener, priority);
    }

    /// Returns the registry of open WebSocket connections.
    #[inline]
    #[must_use]
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.inner.connections
    }

    /// Returns the webhook clients.
    #[inline]
    #[must_use]
    pub fn webhooks(&self) -> &[Arc<HttpWebhookClient>] {
        self.inner.sockets.webhooks()
    }

    /// Returns a handle that stops [`run`](Self::run) when triggered.
    #[inline]
    #[must_use]
    pub fn shutdown_handle(&self) -> Shutdown {
        self.inner.shutdown.clone()
    }

    /// Runs the driver until shutdown (handle or Ctrl-C).
    ///
    /// Blocks the calling thread; call it from plain synchronous code, not
    /// from inside an async runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no server socket binds and no client socket exists
    /// - [`Error::ProcessSpawn`] if a process unit cannot be started
    /// - [`Error::UnavailableBackend`] if the backend cannot run here
    pub fn run(&self) -> Result<()> {
        let listeners = self.bind_listeners()?;
        self.watch_ctrl_c()?;

        let config = &self.inner.config;
        if config.worker_count > 1 && !config.is_multi_process() {
            warn!(
                backend = %config.backend,
                worker_count = config.worker_count,
                "Backend cannot run several workers, running one inline"
            );
        }

        info!(
            name = %self.inner.name,
            backend = %config.backend,
            workers = if config.is_multi_process() { config.worker_count } else { 1 },
            "Driver starting"
        );

        let result = if config.is_multi_process() {
            self.run_multi_process(listeners)
        } else {
            self.run_inline(listeners)
        };

        // Release any helper thread still waiting on the signal.
        self.inner.shutdown.trigger();
        info!(name = %self.inner.name, "Driver stopped");
        result
    }
}

// ============================================================================
// Driver - Internal API
// ============================================================================

impl Driver {
    pub(crate) fn new(name: String, config: DriverConfig, sockets: DriverSockets) -> Self {
        let inner = Arc::new(DriverInner {
            name,
            config,
            sockets,
            registry: Arc::new(EventRegistry::new()),
            connections: ConnectionRegistry::new(),
            shutdown: Shutdown::new(),
        });
        debug!(name = %inner.name, sockets = inner.sockets.len(), "Driver built");
        Self { inner }
    }

    /// Binds every server socket, skipping the ones that fail.
    ///
    /// Fails only when sockets were configured and, after binding, no
    /// transport at all is left.
    fn bind_listeners(&self) -> Result<Vec<BoundListener>> {
        let sockets = &self.inner.sockets;
        let mut listeners = Vec::new();
        let mut failed = 0usize;

        for socket in sockets.servers() {
            let address = socket.bind_address();
            let kind = socket.kind();
            match BoundListener::bind(socket.clone()) {
                Ok(listener) => listeners.push(listener),
                Err(e) => {
                    failed += 1;
                    warn!(
                        kind = %kind,
                        address = %address,
                        error = %e,
                        "Server socket bind failed, skipping"
                    );
                }
            }
        }

        let clients = sockets.webhooks().len() + sockets.ws_reverse().len();
        if failed > 0 && listeners.is_empty() && clients == 0 {
            return Err(Error::config(format!(
                "no usable transport: all {failed} server socket(s) failed to bind"
            )));
        }
        Ok(listeners)
    }

    /// Triggers shutdown on Ctrl-C from a small helper thread.
    fn watch_ctrl_c(&self) -> Result<()> {
        let shutdown = self.inner.shutdown.clone();
        thread::Builder::new()
            .name("signal".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        warn!(error = %e, "Ctrl-C handler unavailable");
                        return;
                    }
                };
                runtime.block_on(async {
                    tokio::select! {
                        signal = tokio::signal::ctrl_c() => {
                            if signal.is_ok() {
                                info!("Ctrl-C received");
                                shutdown.trigger();
                            }
                        }
                        () = shutdown.wait() => {}
                    }
                });
            })
            .map_err(|e| Error::process_spawn("signal watcher", e))?;
        Ok(())
    }

    fn worker_env(&self, listeners: Vec<BoundListener>, apply_init_policy: bool) -> WorkerEnv {
        let config = &self.inner.config;
        WorkerEnv {
            registry: Arc::clone(&self.inner.registry),
            connections: self.inner.connections.clone(),
            shutdown: self.inner.shutdown.clone(),
            backend: config.backend,
            tuning: config.tuning(),
            init_policy: config.init_policy,
            apply_init_policy,
            listeners,
            ws_reverse: self.inner.sockets.ws_reverse().to_vec(),
        }
    }

    fn dispatcher(&self, role: ProcessRole, id: u32) -> EventDispatcher {
        EventDispatcher::new(
            Arc::clone(&self.inner.registry),
            ProcessManager::with_role(role, id),
        )
    }

    fn dispatch_init(dispatcher: &EventDispatcher) {
        let descriptor = dispatcher.process().descriptor();
        info!(process = %descriptor, "Running driver.init");
        dispatcher.dispatch_with_handler(&mut Event::process(names::DRIVER_INIT, descriptor));
    }

    /// Single worker on the calling thread; `driver.init` runs first.
    fn run_inline(&self, listeners: Vec<BoundListener>) -> Result<()> {
        let master = self.dispatcher(ProcessRole::Master, 0);
        Self::dispatch_init(&master);
        self.worker_env(listeners, false).run(0)
    }

    /// Master, optional user process, manager, and supervised workers.
    fn run_multi_process(&self, listeners: Vec<BoundListener>) -> Result<()> {
        let config = &self.inner.config;
        let policy = config.init_policy;

        let master = self.dispatcher(ProcessRole::Master, 0);
        if policy.runs_at(InitStage::Master) {
            Self::dispatch_init(&master);
        }

        let user = if policy.needs_user_process() {
            Some(self.spawn_user_process()?)
        } else {
            None
        };

        let manager = self.spawn_manager(self.worker_env(listeners, true), policy)?;

        let manager_result = manager
            .join()
            .map_err(|_| Error::process_spawn("manager", "manager thread panicked"))?;

        if let Some(user) = user
            && user.join().is_err()
        {
            error!("User process panicked");
        }

        manager_result
    }

    fn spawn_user_process(&self) -> Result<thread::JoinHandle<()>> {
        let dispatcher = self.dispatcher(ProcessRole::User, 0);
        let shutdown = self.inner.shutdown.clone();
        let block = self.inner.config.init_in_user_process_block;

        thread::Builder::new()
            .name("user-process".into())
            .spawn(move || {
                let descriptor = dispatcher.process().descriptor();
                dispatcher
                    .dispatch_with_handler(&mut Event::process(names::USER_PROCESS_START, descriptor));
                Self::dispatch_init(&dispatcher);

                if block {
                    wait_blocking(&shutdown);
                }
                debug!(process = %descriptor, "User process exiting");
            })
            .map_err(|e| Error::process_spawn("user process", e))
    }

    fn spawn_manager(
        &self,
        env: WorkerEnv,
        policy: InitPolicy,
    ) -> Result<thread::JoinHandle<Result<()>>> {
        let dispatcher = self.dispatcher(ProcessRole::Manager, 0);
        let shutdown = self.inner.shutdown.clone();
        let count = self.inner.config.worker_count;
        let stack_size = env.tuning.thread_stack_size;

        thread::Builder::new()
            .name("manager".into())
            .spawn(move || {
                let descriptor: ProcessDescriptor = dispatcher.process().descriptor();
                dispatcher.dispatch_with_handler(&mut Event::process(names::MANAGER_START, descriptor));
                if policy.runs_at(InitStage::Manager) {
                    Self::dispatch_init(&dispatcher);
                }

                let env = Arc::new(env);
                let restarts = Monitor::new(shutdown)
                    .with_stack_size(stack_size)
                    .run(count, Arc::new(move |id| env.run(id)));

                dispatcher.dispatch_with_handler(&mut Event::process(names::MANAGER_STOP, descriptor));
                let restarts = restarts?;
                info!(restarts, "Manager stopped");
                Ok(())
            })
            .map_err(|e| Error::process_spawn("manager", e))
    }
}

/// Blocks a plain thread until `shutdown` triggers.
fn wait_blocking(shutdown: &Shutdown) {
    match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime.block_on(shutdown.wait()),
        Err(e) => {
            warn!(error = %e, "Falling back to polling for shutdown");
            while !shutdown.is_triggered() {
                thread::sleep(std::time::Duration::from_millis(50));
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
