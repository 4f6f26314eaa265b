use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::WorkerError;
use crate::queue::Task;

/// Executes one claimed task.
///
/// An `Err` marks the task failed with the error text; it never stops the worker.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<(), WorkerError>;
}

/// Acknowledges every task with a log line. Used when a role has no handler configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHandler;

#[async_trait]
impl TaskHandler for LogHandler {
    async fn handle(&self, task: &Task) -> Result<(), WorkerError> {
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            sender = %task.sender,
            payload = %task.payload,
            "Task acknowledged"
        );
        Ok(())
    }
}

/// Runs an external program per task, feeding the task as JSON on stdin.
///
/// Exit status 0 completes the task; anything else fails it with the captured stderr.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl CommandHandler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: BTreeMap::new(),
        }
    }

    /// Build from `[program, args...]`; `None` for an empty argv
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

#[async_trait]
impl TaskHandler for CommandHandler {
    async fn handle(&self, task: &Task) -> Result<(), WorkerError> {
        let input = serde_json::to_vec(task)
            .map_err(|e| WorkerError::Handler(format!("failed to encode task: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .env("SWITCHBOARD_TASK_ID", &task.id)
            .env("SWITCHBOARD_TASK_TYPE", &task.task_type)
            // lets the handler route its own writes with `switchboard write --role`
            .env("SWITCHBOARD_ROLE", &task.recipient)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerError::Handler(format!("failed to start '{}': {e}", self.program)))?;

        // write concurrently with draining output so a chatty handler cannot deadlock us
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                let result = stdin.write_all(&input).await;
                drop(stdin);
                result
            })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| WorkerError::Handler(format!("failed to wait for '{}': {e}", self.program)))?;

        if let Some(writer) = writer {
            if let Ok(Err(e)) = writer.await {
                // handlers that ignore stdin close it early
                debug!(task_id = %task.id, error = %e, "Handler did not read task input");
            }
        }

        if !output.stdout.is_empty() {
            debug!(
                task_id = %task.id,
                stdout = %String::from_utf8_lossy(&output.stdout).trim(),
                "Handler output"
            );
        }

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(WorkerError::Handler(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::priority::Priority;
    use crate::queue::TaskStatus;
    use chrono::Utc;

    fn task() -> Task {
        Task {
            id: "task-1".into(),
            sender: "planner".into(),
            recipient: "builder".into(),
            task_type: "build".into(),
            priority: Priority::DEFAULT,
            status: TaskStatus::Running,
            payload: serde_json::json!({"target": "release"}),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            duration_ms: None,
            error: None,
            claimed_by: Some("builder".into()),
        }
    }

    fn sh(script: &str) -> CommandHandler {
        CommandHandler::new("sh", vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn test_task_json_is_on_stdin() {
        let handler = sh(
            r#"input=$(cat); echo "$input" | grep -q '"type":"build"' && echo "$input" | grep -q release"#,
        );
        handler.handle(&task()).await.unwrap();
    }

    #[tokio::test]
    async fn test_task_id_and_role_are_exported() {
        let handler = sh(
            r#"cat > /dev/null; test "$SWITCHBOARD_TASK_ID" = task-1 && test "$SWITCHBOARD_ROLE" = builder"#,
        );
        handler.handle(&task()).await.unwrap();
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let handler = sh("echo boom >&2; exit 3");
        let err = handler.handle(&task()).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("boom"), "{message}");
    }

    #[tokio::test]
    async fn test_missing_program_is_a_handler_error() {
        let handler = CommandHandler::new("/nonexistent/switchboard-handler", vec![]);
        assert!(matches!(
            handler.handle(&task()).await,
            Err(WorkerError::Handler(_))
        ));
    }

    #[test]
    fn test_from_argv() {
        assert!(CommandHandler::from_argv(&[]).is_none());
        let handler = CommandHandler::from_argv(&["make".into(), "all".into()]).unwrap();
        assert_eq!(handler.program, "make");
        assert_eq!(handler.args, vec!["all".to_string()]);
    }
}
