//! Kernel-backed execution: resolve a context, hold its busy lock, and pump
//! the websocket execute protocol into the event sink.

use std::sync::Arc;

use log::{error, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    Controller, EventSink, ExecuteRequest, ExecutionTask, RuntimeError, RuntimeResult,
};
use crate::jupyter::{ErrorOutput, ExecutionUpdate, KernelChannels, STREAM_STDERR, STREAM_STDOUT};

impl Controller {
    pub(super) async fn run_kernel(
        self: &Arc<Self>,
        request: ExecuteRequest,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> RuntimeResult<ExecutionTask> {
        if !self.is_configured() {
            return Err(RuntimeError::NotConfigured);
        }

        let target = if request.context.is_empty() {
            self.get_or_create_default(request.language).await?
        } else {
            request.context.clone()
        };

        let kernel = self
            .get_kernel_context(&target)
            .await
            .ok_or(RuntimeError::ContextNotFound)?;

        let busy = kernel
            .busy
            .clone()
            .try_lock_owned()
            .map_err(|_| RuntimeError::SessionBusy)?;

        let client = self.jupyter_client()?;
        let channels =
            KernelChannels::connect(self.base_url(), &kernel.kernel_id, client.auth()).await?;

        let kernel_id = kernel.kernel_id.clone();
        let code = request.code.clone();

        Ok(ExecutionTask::new(async move {
            let _busy = busy;
            sink.init(&target).await;

            let (update_tx, mut update_rx) = mpsc::channel(16);
            let socket = tokio::spawn(channels.execute(code, update_tx));

            loop {
                tokio::select! {
                    update = update_rx.recv() => match update {
                        None => break,
                        Some(update) => forward_update(update, &sink).await,
                    },
                    _ = cancel.cancelled() => {
                        warn!("context cancelled, try to interrupt kernel");
                        if let Err(err) = client.interrupt_kernel(&kernel_id).await {
                            error!("interrupt kernel failed: {err}");
                        }
                        sink.error(ErrorOutput::new("ContextCancelled", "Interrupt kernel"))
                            .await;
                        socket.abort();
                        return;
                    }
                }
            }

            match socket.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("kernel websocket closed with error: {err}"),
                Err(err) if err.is_panic() => error!("kernel websocket task panicked"),
                Err(_) => {}
            }
        }))
    }
}

async fn forward_update(update: ExecutionUpdate, sink: &EventSink) {
    match update {
        ExecutionUpdate::Result {
            execution_count,
            data,
        } => sink.result(data, execution_count).await,
        ExecutionUpdate::Stream { name, text } => match name.as_str() {
            STREAM_STDOUT => sink.stdout(text).await,
            STREAM_STDERR => sink.stderr(text).await,
            _ => {}
        },
        ExecutionUpdate::Status { execution_state } => sink.status(execution_state).await,
        ExecutionUpdate::Error(error) => sink.error(error).await,
        ExecutionUpdate::Completed { elapsed } => sink.complete(elapsed).await,
    }
}
