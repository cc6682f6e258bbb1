//! The `terminal` tool: one shell command per call, run under the project root.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clawmini_protocol::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::process::Command;
use tokio::time::{Duration, timeout};
use tracing::{debug, instrument, warn};

use crate::policy::CommandPolicy;
use crate::{Tool, required_str};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandLimits {
    pub max_runtime_secs: u64,
    pub max_output_bytes: usize,
}

impl Default for CommandLimits {
    fn default() -> Self {
        Self {
            max_runtime_secs: 30,
            max_output_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandExecution {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u128,
    pub timed_out: bool,
}

impl CommandExecution {
    /// Text handed back to the model.
    pub fn render(&self) -> String {
        if self.timed_out {
            return self.stderr.clone();
        }
        let mut text = String::new();
        text.push_str(&self.stdout);
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        if self.exit_code != 0 {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("(exit code {})", self.exit_code));
        }
        if text.is_empty() {
            text.push_str("(no output)");
        }
        text
    }
}

pub struct TerminalTool {
    policy: CommandPolicy,
    cwd: PathBuf,
    limits: CommandLimits,
}

impl TerminalTool {
    pub fn new(policy: CommandPolicy, cwd: impl Into<PathBuf>) -> Self {
        Self {
            policy,
            cwd: cwd.into(),
            limits: CommandLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: CommandLimits) -> Self {
        self.limits = limits;
        self
    }

    fn truncate(output: Vec<u8>, max_output_bytes: usize) -> String {
        let mut output = output;
        if output.len() > max_output_bytes {
            output.truncate(max_output_bytes);
        }
        String::from_utf8_lossy(&output).into_owned()
    }

    #[instrument(skip(self), fields(cwd = %self.cwd.display()))]
    pub async fn run(&self, command: &str) -> Result<CommandExecution> {
        self.policy.check(command)?;

        let started = Instant::now();
        let mut child = Command::new("sh");
        child
            .arg("-c")
            .arg(command)
            .current_dir(&self.cwd)
            .kill_on_drop(true);

        let limit = Duration::from_secs(self.limits.max_runtime_secs.max(1));
        match timeout(limit, child.output()).await {
            Ok(output) => {
                let output = output.with_context(|| format!("failed spawning `{command}`"))?;
                let execution = CommandExecution {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: Self::truncate(output.stdout, self.limits.max_output_bytes),
                    stderr: Self::truncate(output.stderr, self.limits.max_output_bytes),
                    duration_ms: started.elapsed().as_millis(),
                    timed_out: false,
                };
                debug!(
                    exit_code = execution.exit_code,
                    duration_ms = execution.duration_ms,
                    "command finished"
                );
                Ok(execution)
            }
            Err(_) => {
                warn!(
                    max_runtime_secs = self.limits.max_runtime_secs,
                    "command timed out"
                );
                Ok(CommandExecution {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!(
                        "command timed out after {} seconds",
                        self.limits.max_runtime_secs
                    ),
                    duration_ms: started.elapsed().as_millis(),
                    timed_out: true,
                })
            }
        }
    }
}

#[async_trait]
impl Tool for TerminalTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "terminal".to_owned(),
            description: "Run a shell command in the project directory and return its output"
                .to_owned(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to run" }
                },
                "required": ["command"]
            }),
        }
    }

    async fn call(&self, input: &Value) -> Result<String> {
        let command = required_str(input, "command", "terminal")?;
        Ok(self.run(command).await?.render())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use clawmini_protocol::CoreError;

    use super::*;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    async fn terminal(name: &str) -> Result<TerminalTool> {
        let root = unique_test_root(name);
        tokio::fs::create_dir_all(&root).await?;
        Ok(TerminalTool::new(CommandPolicy::standard()?, root))
    }

    #[tokio::test]
    async fn runs_in_project_directory() -> Result<()> {
        let tool = terminal("clawmini-terminal-cwd").await?;
        tokio::fs::write(tool.cwd.join("marker.txt"), "here").await?;

        let output = tool.call(&json!({ "command": "ls && echo done" })).await?;
        assert!(output.contains("marker.txt"));
        assert!(output.contains("done"));
        Ok(())
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_raised() -> Result<()> {
        let tool = terminal("clawmini-terminal-exit").await?;
        let output = tool.call(&json!({ "command": "echo oops >&2; exit 3" })).await?;
        assert!(output.contains("oops"));
        assert!(output.ends_with("(exit code 3)"));
        Ok(())
    }

    #[tokio::test]
    async fn blocked_command_is_denied() -> Result<()> {
        let tool = terminal("clawmini-terminal-deny").await?;
        let error = tool
            .call(&json!({ "command": "sudo rm -rf /" }))
            .await
            .err()
            .context("command should be denied")?;
        assert!(matches!(
            error.downcast_ref::<CoreError>(),
            Some(CoreError::ToolDenied(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn long_running_command_times_out() -> Result<()> {
        let tool = terminal("clawmini-terminal-timeout")
            .await?
            .with_limits(CommandLimits {
                max_runtime_secs: 1,
                max_output_bytes: 1024,
            });
        let execution = tool.run("sleep 5").await?;
        assert!(execution.timed_out);
        assert_eq!(execution.render(), "command timed out after 1 seconds");
        Ok(())
    }

    #[tokio::test]
    async fn output_is_truncated() -> Result<()> {
        let tool = terminal("clawmini-terminal-truncate")
            .await?
            .with_limits(CommandLimits {
                max_runtime_secs: 5,
                max_output_bytes: 4,
            });
        let execution = tool.run("echo abcdefgh").await?;
        assert_eq!(execution.stdout, "abcd");
        Ok(())
    }

    #[tokio::test]
    async fn missing_command_argument_is_an_error() -> Result<()> {
        let tool = terminal("clawmini-terminal-args").await?;
        assert!(tool.call(&json!({})).await.is_err());
        Ok(())
    }
}
