use async_trait::async_trait;
use std::time::Duration;

use kana_core::tools::{required_str, Tool, ToolContext, ToolError, ToolFlags, ToolOutput};

use crate::truncate::{truncate_chars, TOOL_OUTPUT_MAX_CHARS};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ShellTool {
    timeout: Duration,
}

impl ShellTool {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output. Use this to run CLI commands, inspect files, check system state, etc."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            }
        })
    }

    fn flags(&self) -> ToolFlags {
        ToolFlags::approval_required()
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let command = required_str(&args, "command")?;

        let output = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&ctx.working_directory)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ToolError::Timeout(self.timeout))?
        .map_err(|e| ToolError::ExecutionFailed(format!("Failed to execute command: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut content = stdout.into_owned();
        if !stderr.is_empty() {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(&stderr);
        }
        if content.is_empty() {
            content = match output.status.code() {
                Some(0) | None => "(no output)".to_string(),
                Some(code) => format!("Exit code: {code}"),
            };
        }

        Ok(ToolOutput::text(truncate_chars(&content, TOOL_OUTPUT_MAX_CHARS)))
    }
}
