use async_trait::async_trait;
use kana_core::entries::InfoEntry;
use kana_core::tools::{required_str, Tool, ToolContext, ToolError, ToolFlags, ToolOutput};

/// Ends the turn and asks the caller to rest the session.
pub struct RestSessionTool;

#[async_trait]
impl Tool for RestSessionTool {
    fn name(&self) -> &str {
        "rest_session"
    }

    fn description(&self) -> &str {
        "End the current session. Call this when the user wants to rest. \
         Pass a second-person narrative description of how you settle down to rest."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["description"],
            "additionalProperties": false,
            "properties": {
                "description": {
                    "type": "string",
                    "description": "Second-person narrative prose describing how you settle down to rest (e.g. stretching, yawning, curling up)."
                }
            }
        })
    }

    fn flags(&self) -> ToolFlags {
        ToolFlags::auto().silent().terminal().ending_session()
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let description = required_str(&args, "description")?;
        Ok(ToolOutput::text("Session ended.")
            .with_info(InfoEntry::new("/rest", description)))
    }
}
