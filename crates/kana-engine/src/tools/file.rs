use async_trait::async_trait;

use kana_core::tools::{required_str, Tool, ToolContext, ToolError, ToolOutput};

use super::resolve_path;
use crate::truncate::{truncate_chars, TOOL_OUTPUT_MAX_CHARS};

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path. Returns the file content as text."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                }
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let path = resolve_path(required_str(&args, "path")?, &ctx.working_directory);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => truncate_chars(&content, TOOL_OUTPUT_MAX_CHARS),
            Err(e) => format!("Error reading file: {e}"),
        };
        Ok(ToolOutput::text(content))
    }
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file at the given path. Creates parent directories if needed. Overwrites existing files."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["path", "content"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write to"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let path = resolve_path(required_str(&args, "path")?, &ctx.working_directory);
        let content = required_str(&args, "content")?;

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolOutput::text(format!("Error writing file: {e}")));
            }
        }
        let result = match tokio::fs::write(&path, content).await {
            Ok(()) => format!("Wrote {} bytes to {}", content.len(), path.display()),
            Err(e) => format!("Error writing file: {e}"),
        };
        Ok(ToolOutput::text(result))
    }
}
