use async_trait::async_trait;
use kana_core::entries::InfoEntry;
use kana_core::tools::{required_str, Tool, ToolContext, ToolError, ToolFlags, ToolOutput};

pub struct DescribeAgentTool;

#[async_trait]
impl Tool for DescribeAgentTool {
    fn name(&self) -> &str {
        "describe_agent"
    }

    fn description(&self) -> &str {
        "Render a descriptive info block about your appearance. Call this when the user looks at you."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["description"],
            "additionalProperties": false,
            "properties": {
                "description": {
                    "type": "string",
                    "description": "Second-person narrative description of your appearance, clothing, expression, and features."
                }
            }
        })
    }

    fn flags(&self) -> ToolFlags {
        ToolFlags::auto().silent()
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let description = required_str(&args, "description")?;
        Ok(ToolOutput::text("Description rendered.").with_info(InfoEntry::new("/look", description)))
    }
}
