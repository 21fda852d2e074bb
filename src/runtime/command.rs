//! Shell command execution: foreground with per-line streaming, background
//! with combined output polled by cursor.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use chrono::Utc;
use log::{error, info};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::env::load_extra_env;
use super::tail::{tail_to_sink, TailStream};
use super::{
    CommandContext, Controller, EventSink, ExecuteRequest, ExecutionTask, RuntimeResult,
};
use crate::jupyter::ErrorOutput;

fn stdout_file_name(session: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{session}.stdout"))
}

fn stderr_file_name(session: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{session}.stderr"))
}

fn combined_output_file_name(session: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{session}.output"))
}

fn open_log(path: &PathBuf) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

/// Relay signals received by the daemon to the child's process group.
/// SIGCHLD and SIGURG are never forwarded.
fn spawn_signal_relay(pid: i32, cancel: CancellationToken) -> Option<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    if pid <= 0 {
        return None;
    }

    let mut hup = signal(SignalKind::hangup()).ok()?;
    let mut int = signal(SignalKind::interrupt()).ok()?;
    let mut quit = signal(SignalKind::quit()).ok()?;
    let mut term = signal(SignalKind::terminate()).ok()?;
    let mut usr1 = signal(SignalKind::user_defined1()).ok()?;
    let mut usr2 = signal(SignalKind::user_defined2()).ok()?;

    Some(tokio::spawn(async move {
        loop {
            let forwarded = tokio::select! {
                _ = cancel.cancelled() => return,
                _ = hup.recv() => Signal::SIGHUP,
                _ = int.recv() => Signal::SIGINT,
                _ = quit.recv() => Signal::SIGQUIT,
                _ = term.recv() => Signal::SIGTERM,
                _ = usr1.recv() => Signal::SIGUSR1,
                _ = usr2.recv() => Signal::SIGUSR2,
            };
            let _ = kill(Pid::from_raw(-pid), forwarded);
        }
    }))
}

fn shell_command(request: &ExecuteRequest) -> Command {
    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(&request.code);
    if !request.cwd.is_empty() {
        cmd.current_dir(&request.cwd);
    }
    cmd.envs(load_extra_env());
    cmd.envs(request.envs.iter().cloned());
    // child leads its own process group so signals reach its descendants
    cmd.process_group(0);
    cmd
}

impl Controller {
    /// Foreground path: spawn, tail both log files per line, wait, record.
    pub(super) async fn run_command(
        self: &Arc<Self>,
        request: ExecuteRequest,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> RuntimeResult<ExecutionTask> {
        let session = Self::new_context_id();
        let stdout_path = stdout_file_name(&session);
        let stderr_path = stderr_file_name(&session);
        let stdout_file = open_log(&stdout_path)?;
        let stderr_file = open_log(&stderr_path)?;

        info!("received command: {}", request.code);
        let started = Instant::now();

        let mut cmd = shell_command(&request);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file));

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!("CommandExecError: error starting commands: {err}");
                return Ok(ExecutionTask::new(async move {
                    sink.init(&session).await;
                    sink.error(ErrorOutput::new("CommandExecError", err.to_string()))
                        .await;
                }));
            }
        };

        let pid = child.id().map(|p| p as i32).unwrap_or(-1);
        self.store_command_context(
            session.clone(),
            CommandContext {
                pid,
                stdout_path: stdout_path.clone(),
                stderr_path: stderr_path.clone(),
                started_at: Utc::now(),
                finished_at: None,
                exit_code: None,
                error: String::new(),
                running: true,
                background: false,
                command: request.code.clone(),
            },
        )
        .await;

        let controller = Arc::clone(self);
        Ok(ExecutionTask::new(async move {
            sink.init(&session).await;

            let relay = spawn_signal_relay(pid, cancel.clone());

            let (done_tx, done_rx) = watch::channel(false);
            let stdout_tailer = tokio::spawn(tail_to_sink(
                stdout_path,
                TailStream::Stdout,
                sink.clone(),
                done_rx.clone(),
            ));
            let stderr_tailer = tokio::spawn(tail_to_sink(
                stderr_path,
                TailStream::Stderr,
                sink.clone(),
                done_rx,
            ));

            let mut cancelled = false;
            let status = tokio::select! {
                status = child.wait() => status,
                _ = cancel.cancelled() => {
                    if pid > 0 {
                        let _ = kill(Pid::from_raw(-pid), Signal::SIGKILL);
                    }
                    cancelled = true;
                    child.wait().await
                }
            };

            // drain both tailers, flushing trailing partial lines
            let _ = done_tx.send(true);
            let _ = stdout_tailer.await;
            let _ = stderr_tailer.await;
            if let Some(relay) = relay {
                relay.abort();
            }

            if cancelled {
                let detail = match &status {
                    Ok(status) => status.to_string(),
                    Err(err) => err.to_string(),
                };
                let exit_code = status.as_ref().ok().and_then(|s| s.code()).unwrap_or(-1);
                error!("ContextCancelled: terminated command: {detail}");
                controller
                    .mark_command_finished(&session, exit_code, &detail)
                    .await;
                sink.error(
                    ErrorOutput::new("ContextCancelled", "Terminate process")
                        .with_traceback(vec![detail]),
                )
                .await;
                return;
            }

            match status {
                Ok(status) if status.success() => {
                    controller.mark_command_finished(&session, 0, "").await;
                    sink.complete(started.elapsed()).await;
                }
                Ok(status) => {
                    let exit_code = status.code().unwrap_or(-1);
                    let detail = status.to_string();
                    error!("CommandExecError: error running commands: {detail}");
                    controller
                        .mark_command_finished(&session, exit_code, &detail)
                        .await;
                    sink.error(
                        ErrorOutput::new("CommandExecError", exit_code.to_string())
                            .with_traceback(vec![detail]),
                    )
                    .await;
                }
                Err(err) => {
                    error!("CommandExecError: error running commands: {err}");
                    controller
                        .mark_command_finished(&session, 1, &err.to_string())
                        .await;
                    sink.error(
                        ErrorOutput::new("CommandExecError", err.to_string())
                            .with_traceback(vec![err.to_string()]),
                    )
                    .await;
                }
            }
        }))
    }

    /// Background path: register the context up front, detach spawn + wait,
    /// and return as soon as the stream has its init/complete pair. Output
    /// accumulates in a combined file read back by cursor.
    pub(super) async fn run_background_command(
        self: &Arc<Self>,
        request: ExecuteRequest,
        sink: EventSink,
    ) -> RuntimeResult<ExecutionTask> {
        let session = Self::new_context_id();
        let output_path = combined_output_file_name(&session);
        let output_file = open_log(&output_path)?;
        let stderr_file = output_file.try_clone()?;

        info!("received command: {}", request.code);
        let started = Instant::now();

        // visible to status queries before the spawn task has run
        self.store_command_context(
            session.clone(),
            CommandContext {
                pid: -1,
                stdout_path: output_path.clone(),
                stderr_path: output_path,
                started_at: Utc::now(),
                finished_at: None,
                exit_code: None,
                error: String::new(),
                running: true,
                background: true,
                command: request.code.clone(),
            },
        )
        .await;

        let mut cmd = shell_command(&request);
        // interactive programs must exit immediately in the background
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(output_file))
            .stderr(Stdio::from(stderr_file));

        let controller = Arc::clone(self);
        Ok(ExecutionTask::new(async move {
            sink.init(&session).await;

            tokio::spawn(async move {
                let mut child = match cmd.spawn() {
                    Ok(child) => child,
                    Err(err) => {
                        error!("CommandExecError: error starting commands: {err}");
                        controller
                            .mark_command_finished(&session, 255, &err.to_string())
                            .await;
                        return;
                    }
                };

                let pid = child.id().map(|p| p as i32).unwrap_or(-1);
                controller.set_command_pid(&session, pid).await;

                match child.wait().await {
                    Ok(status) if status.success() => {
                        controller.mark_command_finished(&session, 0, "").await;
                    }
                    Ok(status) => {
                        let detail = status.to_string();
                        error!("CommandExecError: error running commands: {detail}");
                        controller
                            .mark_command_finished(&session, status.code().unwrap_or(1), &detail)
                            .await;
                    }
                    Err(err) => {
                        error!("CommandExecError: error running commands: {err}");
                        controller
                            .mark_command_finished(&session, 1, &err.to_string())
                            .await;
                    }
                }
            });

            sink.complete(started.elapsed()).await;
        }))
    }
}
