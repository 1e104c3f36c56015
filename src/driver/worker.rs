//! Worker body: one runtime, one coroutine context, the accept loops.
//!
//! A worker builds the runtime its backend needs (a multi-thread runtime
//! for the task backend, a [`Reactor`] for the fiber backend), dispatches
//! `worker.start`, runs `driver.init` when the policy says so, starts its
//! transport units, and parks until shutdown.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

use crate::coroutine::{BackendKind, Coroutine, Reactor};
use crate::error::Result;
use crate::event::{Event, EventDispatcher, EventRegistry, names};
use crate::process::policy::InitStage;
use crate::process::{InitPolicy, ProcessManager, ProcessRole};
use crate::shutdown::Shutdown;
use crate::socket::ClientSocket;
use crate::transport::{BoundListener, ConnectionRegistry, TransportContext, reverse};

use super::config::RuntimeTuning;

// ============================================================================
// WorkerEnv
// ============================================================================

/// State shared by every worker of one driver run.
#[derive(Debug, Clone)]
pub(crate) struct WorkerEnv {
    pub registry: Arc<EventRegistry>,
    pub connections: ConnectionRegistry,
    pub shutdown: Shutdown,
    pub backend: BackendKind,
    pub tuning: RuntimeTuning,
    pub init_policy: InitPolicy,
    /// `false` when `driver.init` already ran inline in the master.
    pub apply_init_policy: bool,
    pub listeners: Vec<BoundListener>,
    pub ws_reverse: Vec<ClientSocket>,
}

impl WorkerEnv {
    /// Runs worker `id` on the calling thread until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be built or a listener cannot
    /// be registered with it.
    pub fn run(&self, id: u32) -> Result<()> {
        let process = ProcessManager::with_role(ProcessRole::Worker, id);
        let dispatcher = EventDispatcher::new(Arc::clone(&self.registry), process);

        debug!(worker = id, backend = %self.backend, "Worker starting");
        match self.backend {
            BackendKind::Task => {
                let runtime = self.task_runtime(id)?;
                runtime.block_on(async {
                    let coroutine = Coroutine::task()?;
                    self.serve(id, coroutine, dispatcher).await
                })
            }
            BackendKind::Fiber => Reactor::block_on(async {
                let coroutine = Coroutine::fiber()?;
                self.serve(id, coroutine, dispatcher).await
            })?,
        }
    }

    fn task_runtime(&self, id: u32) -> Result<Runtime> {
        let mut builder = Builder::new_multi_thread();
        builder
            .enable_all()
            .thread_name(format!("worker-{id}-rt"));
        if let Some(threads) = self.tuning.worker_threads {
            builder.worker_threads(threads);
        }
        if let Some(blocking) = self.tuning.max_blocking_threads {
            builder.max_blocking_threads(blocking);
        }
        if let Some(stack) = self.tuning.thread_stack_size {
            builder.thread_stack_size(stack);
        }
        Ok(builder.build()?)
    }

    async fn serve(&self, id: u32, coroutine: Coroutine, dispatcher: EventDispatcher) -> Result<()> {
        let descriptor = dispatcher.process().descriptor();
        let ctx = TransportContext::new(
            dispatcher,
            coroutine,
            self.connections.clone(),
            self.shutdown.clone(),
        );

        ctx.dispatcher()
            .dispatch_with_handler(&mut Event::process(names::WORKER_START, descriptor));

        if self.apply_init_policy && self.init_policy.runs_at(InitStage::Worker(id)) {
            info!(worker = id, policy = ?self.init_policy, "Running driver.init");
            ctx.dispatcher()
                .dispatch_with_handler(&mut Event::process(names::DRIVER_INIT, descriptor));
        }

        for listener in &self.listeners {
            listener.serve(&ctx)?;
        }

        // Outbound connections are owned by the first worker only.
        if id == 0 {
            for socket in &self.ws_reverse {
                reverse::spawn(socket.clone(), &ctx);
            }
        }

        info!(worker = id, listeners = self.listeners.len(), "Worker serving");
        self.shutdown.wait().await;

        ctx.dispatcher()
            .dispatch_with_handler(&mut Event::process(names::WORKER_STOP, descriptor));
        debug!(worker = id, "Worker stopped");
        Ok(())
    }
}
