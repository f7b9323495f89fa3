use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::catalog::Target;
use crate::config::ActionConfig;
use crate::dispatch::{TargetAction, TaskContext};
use crate::error::{BulkError, Result};
use crate::request::BulkActionConfig;
use crate::types::ActionResult;

const EXCERPT_LIMIT: usize = 500;

/// Runs an external command once per target.
///
/// The target's identity travels in `BULKOPS_*` environment variables and the
/// request's action parameters arrive as JSON on stdin. Exit status 0 is a
/// successful result; any other exit status is a failed result carrying an
/// output excerpt. Failing to spawn, or running past the timeout, is a task
/// error.
#[derive(Debug, Clone)]
pub struct CommandAction {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    workdir: PathBuf,
    timeout: Option<Duration>,
    requires_connection: Option<String>,
}

impl CommandAction {
    /// `root` is the working directory and the base for relative command
    /// paths such as `.bulkops/actions/cleanup.sh`.
    pub fn new(name: impl Into<String>, root: &Path, config: &ActionConfig) -> Self {
        let program = if config.command.contains('/') && Path::new(&config.command).is_relative() {
            root.join(&config.command)
        } else {
            PathBuf::from(&config.command)
        };
        Self {
            name: name.into(),
            program,
            args: config.args.clone(),
            workdir: root.to_path_buf(),
            timeout: config.timeout(),
            requires_connection: config.requires_connection.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command_for(&self, target: &Target, ctx: &TaskContext) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.workdir)
            .env("BULKOPS_ACTION", &self.name)
            .env("BULKOPS_RUN_ID", ctx.run_id.to_string())
            .env("BULKOPS_PROJECT_ID", ctx.project_id.to_string())
            .env("BULKOPS_ENVIRONMENT_ID", target.environment.id.to_string())
            .env("BULKOPS_ENVIRONMENT_NAME", &target.environment.name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(system) = &target.system {
            cmd.env("BULKOPS_SYSTEM_ID", system.id.to_string())
                .env("BULKOPS_SYSTEM_NAME", &system.name);
        }
        cmd
    }

    fn task_error(&self, target: &Target, reason: String) -> BulkError {
        BulkError::TaskFailed {
            target: target.display_name(),
            reason,
        }
    }
}

#[async_trait]
impl TargetAction for CommandAction {
    fn requires_connection(&self) -> Option<&str> {
        self.requires_connection.as_deref()
    }

    async fn execute(
        &self,
        target: &Target,
        config: &BulkActionConfig,
        ctx: &TaskContext,
    ) -> Result<ActionResult> {
        let input = serde_json::to_vec(&json!({
            "action": self.name,
            "runId": ctx.run_id,
            "projectId": ctx.project_id,
            "environment": target.environment,
            "system": target.system,
            "params": config.params,
        }))?;

        let mut child = self.command_for(target, ctx).spawn().map_err(|e| {
            self.task_error(target, format!("cannot spawn {}: {e}", self.program.display()))
        })?;
        debug!(program = %self.program.display(), pid = child.id(), "action process started");

        // Input is fed while output is drained, all under one deadline: a
        // command that never reads stdin must not outlive the timeout.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // The command may exit without reading its input.
                if let Err(e) = stdin.write_all(&input).await {
                    debug!(error = %e, "action process did not accept stdin");
                }
            }
        };
        let work = async {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| self.task_error(target, format!("timed out after {}s", limit.as_secs())))?,
            None => work.await,
        }
        .map_err(|e| self.task_error(target, format!("cannot collect output: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let payload = serde_json::from_str(stdout.trim()).unwrap_or(serde_json::Value::Null);

        let (success, message) = if output.status.success() {
            (true, format!("{} completed", self.name))
        } else {
            let detail = if stderr.trim().is_empty() { &stdout } else { &stderr };
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            (false, format!("exit {code}: {}", excerpt(detail)))
        };
        info!(success, "action finished");

        Ok(ActionResult {
            environment_id: target.environment.id,
            environment_name: target.environment.name.clone(),
            system_id: target.system.as_ref().map(|s| s.id),
            system_name: target.system.as_ref().map(|s| s.name.clone()),
            success,
            message,
            payload,
        })
    }
}

fn excerpt(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(EXCERPT_LIMIT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
