use tracing::{debug, warn};

use kana_core::entries::{ChatEntry, Entry, InfoEntry, DEFAULT_EMOTION};
use kana_core::ids::ConversationId;
use kana_core::messages::{Message, Role};
use kana_store::ConversationRepo;

/// Where a record shows up. Each facet is independent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Facets {
    /// Sent to the model on the next call.
    pub replay: bool,
    /// Backed by a message row in the store.
    pub persisted: bool,
    /// Part of the visible transcript.
    pub display: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LedgerRecord {
    pub entry: Entry,
    pub facets: Facets,
}

#[derive(Clone, Debug, Default)]
pub struct EntryOptions {
    pub emotion: Option<String>,
    pub label: Option<String>,
}

/// The tail removed by [`ConversationLedger::pop_last_turn`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryTurn {
    pub text: String,
    pub removed_rows: usize,
}

/// Append-only log of everything said in a session.
///
/// The wire message list and the display transcript are both views over the
/// same records, filtered by [`Facets`].
pub struct ConversationLedger {
    records: Vec<LedgerRecord>,
    /// Index of the first record of the current session.
    session_start: usize,
    conversation_id: Option<ConversationId>,
    emotion: String,
    repo: Option<ConversationRepo>,
}

impl ConversationLedger {
    /// An empty ledger whose first replayed message is `system_prompt`.
    /// Without a repo nothing is ever persisted.
    pub fn new(system_prompt: impl Into<String>, repo: Option<ConversationRepo>) -> Self {
        let mut ledger = Self {
            records: Vec::new(),
            session_start: 0,
            conversation_id: None,
            emotion: DEFAULT_EMOTION.to_string(),
            repo,
        };
        ledger.push_raw(Message::system(system_prompt));
        ledger
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    pub fn set_conversation_id(&mut self, id: Option<ConversationId>) {
        self.conversation_id = id;
    }

    pub fn emotion(&self) -> &str {
        &self.emotion
    }

    pub fn set_emotion(&mut self, emotion: impl Into<String>) {
        self.emotion = emotion.into();
    }

    /// Append a message to both views. Assistant messages without an explicit
    /// emotion are tagged with the tracked one.
    pub fn add_message(&mut self, message: Message, opts: EntryOptions) {
        let emotion = match (opts.emotion, message.role) {
            (Some(e), _) => Some(e),
            (None, Role::Assistant) => Some(self.emotion.clone()),
            (None, _) => None,
        };
        let entry = ChatEntry {
            emotion,
            label: opts.label,
            ..ChatEntry::new(message)
        };
        let persisted = self.persist(&entry);
        self.records.push(LedgerRecord {
            entry: Entry::Chat(entry),
            facets: Facets {
                replay: true,
                persisted,
                display: true,
            },
        });
    }

    /// Append a message the model sees but that is never shown or stored.
    pub fn push_raw(&mut self, message: Message) {
        self.records.push(LedgerRecord {
            entry: Entry::Chat(ChatEntry::new(message)),
            facets: Facets {
                replay: true,
                ..Facets::default()
            },
        });
    }

    pub fn add_info(&mut self, info: InfoEntry) {
        self.records.push(LedgerRecord {
            entry: Entry::Info(info),
            facets: Facets {
                display: true,
                ..Facets::default()
            },
        });
    }

    /// Replay stored entries into both views and restore the last emotion tag.
    pub fn hydrate(&mut self, entries: Vec<ChatEntry>) {
        for entry in entries {
            if let (Role::Assistant, Some(emotion)) = (entry.message.role, &entry.emotion) {
                self.emotion = emotion.clone();
            }
            self.records.push(LedgerRecord {
                entry: Entry::Chat(entry),
                facets: Facets {
                    replay: true,
                    persisted: true,
                    display: true,
                },
            });
        }
    }

    /// Wire messages, in order, exactly as the model will see them.
    pub fn messages(&self) -> Vec<Message> {
        self.records
            .iter()
            .filter(|r| r.facets.replay)
            .filter_map(|r| r.entry.as_chat().map(|c| c.message.clone()))
            .collect()
    }

    /// The visible transcript.
    pub fn entries(&self) -> Vec<Entry> {
        self.records
            .iter()
            .filter(|r| r.facets.display)
            .map(|r| r.entry.clone())
            .collect()
    }

    /// The visible transcript since the last [`ConversationLedger::new_session`].
    pub fn session_entries(&self) -> Vec<Entry> {
        self.records[self.session_start..]
            .iter()
            .filter(|r| r.facets.display)
            .map(|r| r.entry.clone())
            .collect()
    }

    pub fn records(&self) -> &[LedgerRecord] {
        &self.records
    }

    pub fn persisted_count(&self) -> usize {
        self.records.iter().filter(|r| r.facets.persisted).count()
    }

    /// Drop everything after the most recent replayed user message and delete
    /// the matching rows from the store. `None` if there is no user message.
    pub fn pop_last_turn(&mut self) -> Option<RetryTurn> {
        let idx = self.records.iter().rposition(|r| {
            r.facets.replay && r.entry.role() == Some(Role::User)
        })?;
        let text = self.records[idx]
            .entry
            .as_chat()
            .and_then(|c| c.message.text())
            .unwrap_or_default()
            .to_string();

        let removed_rows = self.records[idx + 1..]
            .iter()
            .filter(|r| r.facets.persisted)
            .count();
        self.records.truncate(idx + 1);

        if removed_rows > 0 {
            if let (Some(repo), Some(id)) = (&self.repo, &self.conversation_id) {
                match repo.delete_last(id, removed_rows) {
                    Ok(deleted) if deleted != removed_rows => {
                        warn!(conversation_id = %id, expected = removed_rows, deleted, "retry deleted an unexpected row count");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(conversation_id = %id, error = %e, "failed to delete retried rows"),
                }
            }
        }

        Some(RetryTurn { text, removed_rows })
    }

    /// Replace the leading system message without touching the rest of history.
    pub fn update_system_prompt(&mut self, text: impl Into<String>) {
        let text = text.into();
        let first = self.records.iter().position(|r| r.facets.replay);
        match first {
            Some(i) if self.records[i].entry.role() == Some(Role::System) => {
                if let Entry::Chat(chat) = &mut self.records[i].entry {
                    chat.message.content = Some(text);
                }
            }
            _ => {
                let at = first.unwrap_or(self.records.len());
                self.records.insert(
                    at,
                    LedgerRecord {
                        entry: Entry::Chat(ChatEntry::new(Message::system(text))),
                        facets: Facets {
                            replay: true,
                            ..Facets::default()
                        },
                    },
                );
            }
        }
    }

    /// Start a fresh model context under `system_prompt`. The old transcript
    /// stays visible but is no longer replayed or tied to a conversation.
    pub fn new_session(&mut self, system_prompt: impl Into<String>) {
        for record in &mut self.records {
            record.facets.replay = false;
            record.facets.persisted = false;
        }
        self.session_start = self.records.len();
        self.conversation_id = None;
        self.emotion = DEFAULT_EMOTION.to_string();
        self.push_raw(Message::system(system_prompt));
    }

    fn persist(&self, entry: &ChatEntry) -> bool {
        let (Some(repo), Some(id)) = (&self.repo, &self.conversation_id) else {
            return false;
        };
        match repo.append_message(id, entry) {
            Ok(row) => {
                debug!(conversation_id = %id, row, role = %entry.message.role, "message persisted");
                true
            }
            Err(e) => {
                warn!(conversation_id = %id, error = %e, "failed to persist message");
                false
            }
        }
    }
}
