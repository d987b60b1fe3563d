use async_trait::async_trait;
use kana_core::tools::{Tool, ToolContext, ToolError, ToolFlags, ToolOutput};

/// Scratchpad. The thought lives in the call arguments; the result is just an acknowledgement.
pub struct ThinkTool;

#[async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> &str {
        "Use this tool to plan your approach, reason through a problem, or reflect on a tool result before deciding what to do next. \
         The thought itself is what matters. Use it between steps in multi-step tasks."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["thought"],
            "properties": {
                "thought": {
                    "type": "string",
                    "description": "Your reasoning, plan, or reflection"
                }
            }
        })
    }

    fn flags(&self) -> ToolFlags {
        ToolFlags::auto().silent()
    }

    async fn execute(
        &self,
        _args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text("OK"))
    }
}
