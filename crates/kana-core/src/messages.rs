use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Developer,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Developer => "developer",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "developer" => Ok(Self::Developer),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A chat message exactly as it is replayed to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<ToolCallId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: ToolCallId,
    #[serde(rename = "type", default = "default_call_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON text as produced by the model. May be malformed.
    pub arguments: String,
}

fn default_call_kind() -> String {
    "function".into()
}

impl ToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: ToolCallId::from_raw(id),
            kind: default_call_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn is_function(&self) -> bool {
        self.kind == "function"
    }
}

// --- Convenience constructors ---

impl Message {
    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn developer(text: impl Into<String>) -> Self {
        Self::plain(Role::Developer, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    pub fn assistant_with_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: if calls.is_empty() { None } else { Some(calls) },
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: ToolCallId, text: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id),
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Function-type tool calls only, in the order the model emitted them.
    pub fn function_calls(&self) -> Vec<ToolCall> {
        self.tool_calls
            .iter()
            .flatten()
            .filter(|c| c.is_function())
            .cloned()
            .collect()
    }

    pub fn is_conversational(&self) -> bool {
        matches!(self.role, Role::User | Role::Assistant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_matches_chat_completions() {
        let msg = Message::assistant_with_calls(
            None,
            vec![ToolCall::function("call_1", "set_emotion", r#"{"emotion":"happy"}"#)],
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json["content"].is_null());
        assert_eq!(json["tool_calls"][0]["type"], "function");
        assert_eq!(json["tool_calls"][0]["function"]["name"], "set_emotion");
        assert!(json.get("tool_call_id").is_none());
    }

    #[test]
    fn missing_call_type_defaults_to_function() {
        let json = r#"{"role":"assistant","content":null,"tool_calls":[{"id":"c1","function":{"name":"think","arguments":"{}"}}]}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.function_calls().len(), 1);
    }

    #[test]
    fn non_function_calls_are_ignored() {
        let mut call = ToolCall::function("c1", "x", "{}");
        call.kind = "custom".into();
        let msg = Message::assistant_with_calls(Some("hi".into()), vec![call]);
        assert!(msg.function_calls().is_empty());
    }

    #[test]
    fn empty_call_list_is_omitted() {
        let msg = Message::assistant_with_calls(Some("hi".into()), vec![]);
        assert!(msg.tool_calls.is_none());
    }

    #[test]
    fn role_parse_and_display() {
        for role in [Role::System, Role::User, Role::Assistant, Role::Developer, Role::Tool] {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
        assert!("narrator".parse::<Role>().is_err());
    }

    #[test]
    fn tool_result_carries_call_id() {
        let msg = Message::tool_result(ToolCallId::from_raw("c9"), "OK");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_ref().map(|i| i.as_str()), Some("c9"));
        assert_eq!(msg.text(), Some("OK"));
    }
}
