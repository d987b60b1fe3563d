use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entries::InfoEntry;
use crate::ids::ConversationId;

/// Static classification carried by every registered tool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFlags {
    /// Runs without asking the user first.
    pub auto_approved: bool,
    /// Executes without emitting activity events.
    pub silent: bool,
    /// Ends the current turn once executed.
    pub terminal: bool,
    /// Asks the caller to rest the session after this turn.
    pub ends_session: bool,
}

impl ToolFlags {
    pub const fn approval_required() -> Self {
        Self {
            auto_approved: false,
            silent: false,
            terminal: false,
            ends_session: false,
        }
    }

    pub const fn auto() -> Self {
        Self {
            auto_approved: true,
            silent: false,
            terminal: false,
            ends_session: false,
        }
    }

    pub const fn silent(self) -> Self {
        Self { silent: true, ..self }
    }

    pub const fn terminal(self) -> Self {
        Self { terminal: true, ..self }
    }

    pub const fn ending_session(self) -> Self {
        Self {
            ends_session: true,
            ..self
        }
    }
}

/// Context available to tools during execution.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub conversation_id: Option<ConversationId>,
    pub working_directory: PathBuf,
}

/// What a tool hands back to the executor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    /// Set by the emotion tool; becomes the tag of the next assistant entry.
    pub emotion: Option<String>,
    /// Display-only block to place ahead of the tool result.
    pub info: Option<InfoEntry>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_emotion(mut self, emotion: impl Into<String>) -> Self {
        self.emotion = Some(emotion.into());
        self
    }

    pub fn with_info(mut self, info: InfoEntry) -> Self {
        self.info = Some(info);
        self
    }
}

/// Tool definition sent to the LLM as part of the request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Trait implemented by each tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    fn flags(&self) -> ToolFlags {
        ToolFlags::approval_required()
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

/// Pull a required string argument out of a tool's argument object.
pub fn required_str<'a>(args: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing required string '{key}'")))
}
