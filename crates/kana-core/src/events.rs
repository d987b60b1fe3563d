use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, ToolCallId};

/// Activity notifications emitted while a turn runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A tool call is waiting on the approval channel.
    ToolPending {
        tool_call_id: ToolCallId,
        tool_name: String,
        arguments: String,
    },
    ToolCompleted {
        tool_call_id: ToolCallId,
        tool_name: String,
        result: String,
    },
    ToolDenied {
        tool_call_id: ToolCallId,
        tool_name: String,
    },
    EmotionChanged {
        emotion: String,
    },
    InfoAdded {
        label: String,
        content: String,
    },
    TurnComplete {
        iterations: u32,
        total_tokens: u64,
    },
    SessionRested {
        conversation_id: ConversationId,
        summarized: bool,
    },
}

impl AgentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ToolPending { .. } => "tool_pending",
            Self::ToolCompleted { .. } => "tool_completed",
            Self::ToolDenied { .. } => "tool_denied",
            Self::EmotionChanged { .. } => "emotion_changed",
            Self::InfoAdded { .. } => "info_added",
            Self::TurnComplete { .. } => "turn_complete",
            Self::SessionRested { .. } => "session_rested",
        }
    }
}
