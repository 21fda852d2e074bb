//! Command lifecycle snapshots and background output reads.

use std::io::SeekFrom;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{Controller, RuntimeError, RuntimeResult};

/// Lifecycle state of a command session.
#[derive(Debug, Clone, Serialize)]
pub struct CommandStatus {
    pub session: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content: String,
}

impl Controller {
    /// Read-only snapshot of a command session's state.
    pub async fn get_command_status(&self, session: &str) -> RuntimeResult<CommandStatus> {
        let context = self
            .command_snapshot(session)
            .await
            .ok_or_else(|| RuntimeError::CommandNotFound(session.to_string()))?;

        Ok(CommandStatus {
            session: session.to_string(),
            running: context.running,
            exit_code: context.exit_code,
            error: context.error,
            started_at: context.started_at,
            finished_at: context.finished_at,
            content: context.command,
        })
    }

    /// Raw byte read of a background command's combined output from `cursor`
    /// to end of file. Returns the bytes and the new cursor.
    pub async fn seek_background_command_output(
        &self,
        session: &str,
        cursor: i64,
    ) -> RuntimeResult<(Vec<u8>, i64)> {
        let context = self
            .command_snapshot(session)
            .await
            .ok_or_else(|| RuntimeError::CommandNotFound(session.to_string()))?;

        if !context.background {
            return Err(RuntimeError::NotBackground(session.to_string()));
        }

        let mut file = File::open(&context.stdout_path).await?;
        let start = cursor.max(0) as u64;
        file.seek(SeekFrom::Start(start)).await?;

        let mut data = Vec::new();
        file.read_to_end(&mut data).await?;

        let next_cursor = (start + data.len() as u64) as i64;
        Ok((data, next_cursor))
    }

    /// Record process exit. The running -> finished transition happens in one
    /// registry write so readers never observe a half-updated context.
    pub(crate) async fn mark_command_finished(&self, session: &str, exit_code: i32, error: &str) {
        let now = Utc::now();
        self.with_registry(|registry| {
            if let Some(context) = registry.commands.get_mut(session) {
                context.exit_code = Some(exit_code);
                context.error = error.to_string();
                context.running = false;
                context.finished_at = Some(now);
            }
        })
        .await;
    }

    /// Patch the pid once a detached background spawn has completed.
    pub(crate) async fn set_command_pid(&self, session: &str, pid: i32) {
        self.with_registry(|registry| {
            if let Some(context) = registry.commands.get_mut(session) {
                context.pid = pid;
            }
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::super::CommandContext;
    use super::*;
    use std::sync::Arc;

    fn running_context(path: std::path::PathBuf, background: bool) -> CommandContext {
        CommandContext {
            pid: -1,
            stdout_path: path.clone(),
            stderr_path: path,
            started_at: Utc::now(),
            finished_at: None,
            exit_code: None,
            error: String::new(),
            running: true,
            background,
            command: "true".to_string(),
        }
    }

    #[tokio::test]
    async fn status_of_unknown_session_fails() {
        let controller = Controller::new("", "");
        assert!(matches!(
            controller.get_command_status("nope").await,
            Err(RuntimeError::CommandNotFound(_))
        ));
    }

    #[tokio::test]
    async fn finish_transition_is_atomic_and_complete() {
        let controller = Arc::new(Controller::new("", ""));
        let dir = tempfile::tempdir().unwrap();
        controller
            .store_command_context(
                "s1".to_string(),
                running_context(dir.path().join("s1.stdout"), false),
            )
            .await;

        let status = controller.get_command_status("s1").await.unwrap();
        assert!(status.running);
        assert!(status.exit_code.is_none());
        assert!(status.finished_at.is_none());

        controller.mark_command_finished("s1", 3, "exit status: 3").await;

        let status = controller.get_command_status("s1").await.unwrap();
        assert!(!status.running);
        assert_eq!(status.exit_code, Some(3));
        assert!(status.finished_at.is_some());
        assert_eq!(status.error, "exit status: 3");
    }

    #[tokio::test]
    async fn seek_rejects_foreground_sessions() {
        let controller = Arc::new(Controller::new("", ""));
        let dir = tempfile::tempdir().unwrap();
        controller
            .store_command_context(
                "fg".to_string(),
                running_context(dir.path().join("fg.stdout"), false),
            )
            .await;

        assert!(matches!(
            controller.seek_background_command_output("fg", 0).await,
            Err(RuntimeError::NotBackground(_))
        ));
    }

    #[tokio::test]
    async fn seek_returns_bytes_and_monotonic_cursor() {
        let controller = Arc::new(Controller::new("", ""));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bg.output");
        tokio::fs::write(&path, b"line1\nline2\n").await.unwrap();
        controller
            .store_command_context("bg".to_string(), running_context(path.clone(), true))
            .await;

        let (data, cursor) = controller
            .seek_background_command_output("bg", 0)
            .await
            .unwrap();
        assert_eq!(data, b"line1\nline2\n");
        assert_eq!(cursor, 12);

        let (data, next) = controller
            .seek_background_command_output("bg", cursor)
            .await
            .unwrap();
        assert!(data.is_empty());
        assert_eq!(next, cursor);

        tokio::fs::write(&path, b"line1\nline2\nline3\n")
            .await
            .unwrap();
        let (data, next) = controller
            .seek_background_command_output("bg", cursor)
            .await
            .unwrap();
        assert_eq!(data, b"line3\n");
        assert_eq!(next, 18);
    }
}
