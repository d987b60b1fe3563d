use async_trait::async_trait;
use kana_core::tools::{required_str, Tool, ToolContext, ToolError, ToolFlags, ToolOutput};

pub const EMOTIONS: [&str; 15] = [
    "neutral",
    "happy",
    "excited",
    "curious",
    "thinking",
    "surprised",
    "sad",
    "frustrated",
    "confused",
    "amused",
    "proud",
    "embarrassed",
    "anxious",
    "determined",
    "playful",
];

pub struct SetEmotionTool;

#[async_trait]
impl Tool for SetEmotionTool {
    fn name(&self) -> &str {
        "set_emotion"
    }

    fn description(&self) -> &str {
        "Express your current emotion. Call this whenever your emotional state changes during the conversation, \
         for example when the user says something surprising, when you solve a hard problem, or when something is funny."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["emotion"],
            "properties": {
                "emotion": {
                    "type": "string",
                    "enum": EMOTIONS,
                    "description": "Your current emotion"
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
        let emotion = required_str(&args, "emotion")?;
        if !EMOTIONS.contains(&emotion) {
            return Err(ToolError::InvalidArguments(format!("unknown emotion '{emotion}'")));
        }
        Ok(ToolOutput::text(format!("Emotion set to: {emotion}")).with_emotion(emotion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_ctx;

    #[tokio::test]
    async fn sets_emotion() {
        let out = SetEmotionTool
            .execute(serde_json::json!({"emotion": "proud"}), &test_ctx(std::path::Path::new(".")))
            .await
            .unwrap();
        assert_eq!(out.content, "Emotion set to: proud");
        assert_eq!(out.emotion.as_deref(), Some("proud"));
    }

    #[tokio::test]
    async fn rejects_unknown_emotion() {
        let err = SetEmotionTool
            .execute(serde_json::json!({"emotion": "hangry"}), &test_ctx(std::path::Path::new(".")))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
