//! Execution control plane: context registry, dispatch, interrupt.

mod command;
mod context;
mod env;
mod error;
mod interrupt;
mod kernel;
mod sql;
mod status;
mod tail;
mod types;

pub use env::{expand_env, load_extra_env, EXTRA_ENV_FILE_VAR};
pub use error::{RuntimeError, RuntimeResult};
pub use status::CommandStatus;
pub use types::{
    CodeContext, CreateContextRequest, EventSink, ExecEvent, ExecuteRequest, Language,
};

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use log::warn;
use sqlx::MySqlPool;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::jupyter;

/// A prepared execution. Setup (context resolution, busy locking, process
/// spawn, socket connect) has already happened by the time one of these is
/// handed out; running it drives the execution to completion and delivers
/// every outcome through the event sink.
pub struct ExecutionTask {
    inner: BoxFuture<'static, ()>,
}

impl ExecutionTask {
    fn new(fut: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(fut),
        }
    }

    pub async fn run(self) {
        self.inner.await
    }
}

/// A registered Jupyter kernel execution environment.
pub(crate) struct KernelContext {
    /// Kernel id on the Jupyter server.
    pub(crate) kernel_id: String,
    /// Server-side session id, needed for deletion.
    pub(crate) jupyter_session: String,
    pub(crate) language: Language,
    /// At most one execute per context; contenders fail fast.
    pub(crate) busy: Arc<Mutex<()>>,
}

impl KernelContext {
    pub(crate) fn new(
        kernel_id: impl Into<String>,
        jupyter_session: impl Into<String>,
        language: Language,
    ) -> Self {
        Self {
            kernel_id: kernel_id.into(),
            jupyter_session: jupyter_session.into(),
            language,
            busy: Arc::new(Mutex::new(())),
        }
    }
}

/// A registered command execution, kept readable after the process exits.
#[derive(Debug, Clone)]
pub(crate) struct CommandContext {
    pub(crate) pid: i32,
    pub(crate) stdout_path: PathBuf,
    pub(crate) stderr_path: PathBuf,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) exit_code: Option<i32>,
    pub(crate) error: String,
    pub(crate) running: bool,
    pub(crate) background: bool,
    pub(crate) command: String,
}

/// Both context maps and the language-default table live under one lock so
/// dispatch (which consults all three) never observes a torn update.
#[derive(Default)]
struct Registry {
    kernels: HashMap<String, Arc<KernelContext>>,
    commands: HashMap<String, CommandContext>,
    defaults: HashMap<Language, String>,
}

/// Routes execution requests to the right backend and owns all session state.
pub struct Controller {
    base_url: String,
    token: String,
    registry: RwLock<Registry>,
    /// Serializes default-context provisioning per daemon.
    provision: Mutex<()>,
    db: OnceCell<MySqlPool>,
}

impl Controller {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            registry: RwLock::new(Registry::default()),
            provision: Mutex::new(()),
            db: OnceCell::new(),
        }
    }

    /// Dispatch a request to its backend.
    ///
    /// Setup failures (unknown language, missing context, busy session, no
    /// kernel available) are returned here, before anything is streamed. The
    /// returned task must be spawned; it reports everything else through the
    /// sink. When the request carries a timeout, a watchdog cancels the
    /// execution on expiry.
    pub async fn execute(
        self: &Arc<Self>,
        request: ExecuteRequest,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> RuntimeResult<ExecutionTask> {
        let timeout = request.timeout.filter(|t| !t.is_zero());

        let task = match request.language {
            Language::Command => self.run_command(request, sink, cancel.clone()).await?,
            Language::BackgroundCommand => self.run_background_command(request, sink).await?,
            Language::Sql => self.run_sql(request, sink, cancel.clone()).await?,
            lang if lang.is_kernel() => self.run_kernel(request, sink, cancel.clone()).await?,
            lang => return Err(RuntimeError::UnknownLanguage(lang.to_string())),
        };

        match timeout {
            None => Ok(task),
            Some(deadline) => Ok(ExecutionTask::new(async move {
                let watchdog = tokio::spawn(async move {
                    tokio::time::sleep(deadline).await;
                    cancel.cancel();
                });
                task.run().await;
                watchdog.abort();
            })),
        }
    }

    /// Stop execution in a session: Jupyter interrupt for kernel contexts,
    /// process-group termination for command contexts.
    pub async fn interrupt(&self, session: &str) -> RuntimeResult<()> {
        if let Some(kernel) = self.get_kernel_context(session).await {
            warn!("interrupting jupyter kernel {}", kernel.kernel_id);
            self.jupyter_client()?
                .interrupt_kernel(&kernel.kernel_id)
                .await?;
            return Ok(());
        }

        if let Some(command) = self.command_snapshot(session).await {
            return interrupt::kill_pid(command.pid).await;
        }

        Err(RuntimeError::NoSuchSession)
    }

    pub(crate) fn jupyter_client(&self) -> RuntimeResult<jupyter::Client> {
        if self.base_url.is_empty() {
            return Err(RuntimeError::NotConfigured);
        }
        Ok(jupyter::Client::new(
            &self.base_url,
            jupyter::Auth::token(&self.token),
        ))
    }

    pub(crate) fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.token.is_empty()
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Opaque 32-character session identifier.
    pub(crate) fn new_context_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    // ------------------------------------------------------------------
    // Registry access
    // ------------------------------------------------------------------

    pub(crate) async fn store_kernel_context(&self, session: String, context: KernelContext) {
        let mut registry = self.registry.write().await;
        registry.kernels.insert(session, Arc::new(context));
    }

    pub(crate) async fn get_kernel_context(&self, session: &str) -> Option<Arc<KernelContext>> {
        let registry = self.registry.read().await;
        registry.kernels.get(session).cloned()
    }

    pub(crate) async fn store_command_context(&self, session: String, context: CommandContext) {
        let mut registry = self.registry.write().await;
        registry.commands.insert(session, context);
    }

    pub(crate) async fn command_snapshot(&self, session: &str) -> Option<CommandContext> {
        let registry = self.registry.read().await;
        registry.commands.get(session).cloned()
    }

    async fn with_registry<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> R {
        let mut registry = self.registry.write().await;
        f(&mut registry)
    }
}
