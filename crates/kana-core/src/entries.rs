use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messages::{Message, Role};

/// Emotion tag applied when nothing else has been set.
pub const DEFAULT_EMOTION: &str = "neutral";

/// A conversation record, as shown to the user and stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entry {
    Chat(ChatEntry),
    /// Display-only block. Never replayed to the model and never stored as a message row.
    Info(InfoEntry),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InfoEntry {
    pub label: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl InfoEntry {
    pub fn new(label: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

impl ChatEntry {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            emotion: None,
            label: None,
            timestamp: Utc::now(),
        }
    }
}

impl Entry {
    pub fn as_chat(&self) -> Option<&ChatEntry> {
        match self {
            Self::Chat(c) => Some(c),
            Self::Info(_) => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.as_chat().map(|c| c.message.role)
    }

    /// Text of a user or assistant entry, if any.
    pub fn conversational_text(&self) -> Option<(Role, &str)> {
        let chat = self.as_chat()?;
        if !chat.message.is_conversational() {
            return None;
        }
        chat.message
            .text()
            .filter(|t| !t.trim().is_empty())
            .map(|t| (chat.message.role, t))
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Chat(c) => c.timestamp,
            Self::Info(i) => i.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_entries_have_no_role() {
        let e = Entry::Info(InfoEntry::new("/look", "a small fox"));
        assert!(e.role().is_none());
        assert!(e.conversational_text().is_none());
    }

    #[test]
    fn conversational_text_skips_tool_and_blank() {
        let tool = Entry::Chat(ChatEntry::new(Message::tool_result(
            crate::ids::ToolCallId::from_raw("c"),
            "OK",
        )));
        assert!(tool.conversational_text().is_none());

        let blank = Entry::Chat(ChatEntry::new(Message::assistant("  ")));
        assert!(blank.conversational_text().is_none());

        let user = Entry::Chat(ChatEntry::new(Message::user("hello")));
        assert_eq!(user.conversational_text(), Some((Role::User, "hello")));
    }

    #[test]
    fn entry_serde_is_tagged() {
        let e = Entry::Info(InfoEntry::new("/rest", "zzz"));
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "info");
        let back: Entry = serde_json::from_value(json).unwrap();
        assert_eq!(back, e);
    }
}
