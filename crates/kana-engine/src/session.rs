use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use kana_core::entries::{ChatEntry, Entry};
use kana_core::ids::ConversationId;
use kana_core::provider::Summarizer;
use kana_store::kv::keys;
use kana_store::{ConversationRepo, Database, KvRepo};

use crate::error::EngineError;

const SUMMARIZE_INSTRUCTION: &str = "Summarize the following conversation in 1-2 concise sentences. \
Focus on the key topics discussed and any outcomes. Reply with ONLY the summary, nothing else.";

const MERGE_INSTRUCTION: &str = "Merge these two summaries of recent conversations into one concise paragraph (2-4 sentences). \
Keep all key facts, drop redundancy. Reply with ONLY the merged summary.";

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// How long the rolling summary counts as recent.
    pub recent_summary_ttl: chrono::Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recent_summary_ttl: chrono::Duration::hours(24),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResumedSession {
    /// `None` when nothing is open. The conversation is created on the first user message.
    pub conversation_id: Option<ConversationId>,
    pub entries: Vec<ChatEntry>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RestOutcome {
    /// Summary attached to the ended conversation.
    pub summary: Option<String>,
    /// Rolling summary after this rest, if it changed.
    pub rolling_summary: Option<String>,
    pub ended: bool,
}

pub struct SessionManager {
    conversations: ConversationRepo,
    kv: KvRepo,
    summarizer: Arc<dyn Summarizer>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(db: Database, summarizer: Arc<dyn Summarizer>, config: SessionConfig) -> Self {
        Self {
            conversations: ConversationRepo::new(db.clone()),
            kv: KvRepo::new(db),
            summarizer,
            config,
        }
    }

    /// The open conversation and its stored entries, if there is one.
    pub fn resume(&self) -> Result<ResumedSession, EngineError> {
        let Some(row) = self.conversations.active()? else {
            return Ok(ResumedSession::default());
        };
        let entries = self.conversations.messages(&row.id)?;
        info!(conversation_id = %row.id, entries = entries.len(), "resuming conversation");
        Ok(ResumedSession {
            conversation_id: Some(row.id),
            entries,
        })
    }

    /// End `conversation_id`, attaching a summary when one can be produced and
    /// folding it into the rolling summary. Summarization is best-effort; the
    /// conversation is ended either way.
    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    pub async fn rest(&self, conversation_id: Option<&ConversationId>, entries: &[Entry]) -> RestOutcome {
        let Some(id) = conversation_id else {
            return RestOutcome::default();
        };

        let summary = self.summarize(entries).await;
        let rolling_summary = match &summary {
            Some(s) => self.fold_into_rolling(s).await,
            None => None,
        };

        let ended = match self.conversations.end(id, summary.as_deref()) {
            Ok(()) => true,
            Err(e) => {
                warn!(conversation_id = %id, error = %e, "failed to end conversation");
                false
            }
        };

        RestOutcome {
            summary,
            rolling_summary,
            ended,
        }
    }

    async fn summarize(&self, entries: &[Entry]) -> Option<String> {
        let transcript = entries
            .iter()
            .filter_map(Entry::conversational_text)
            .map(|(role, text)| format!("{role}: {text}"))
            .collect::<Vec<_>>();
        if transcript.is_empty() {
            return None;
        }
        match self
            .summarizer
            .compress(SUMMARIZE_INSTRUCTION, &transcript.join("\n"))
            .await
        {
            Ok(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "conversation summary failed");
                None
            }
        }
    }

    async fn fold_into_rolling(&self, summary: &str) -> Option<String> {
        let existing = match self
            .kv
            .get_fresh(keys::RECENT_SUMMARY, self.config.recent_summary_ttl, Utc::now())
        {
            Ok(existing) => existing,
            Err(e) => {
                warn!(error = %e, "failed to read rolling summary");
                None
            }
        };

        let rolling = match existing {
            None => summary.to_string(),
            Some(existing) => {
                let input = format!("Existing:\n{existing}\n\nNew:\n{summary}");
                match self.summarizer.compress(MERGE_INSTRUCTION, &input).await {
                    Ok(merged) if !merged.trim().is_empty() => merged.trim().to_string(),
                    Ok(_) => format!("{existing} {summary}"),
                    Err(e) => {
                        warn!(error = %e, "rolling summary merge failed, concatenating");
                        format!("{existing} {summary}")
                    }
                }
            }
        };

        match self.kv.set(keys::RECENT_SUMMARY, &rolling) {
            Ok(()) => Some(rolling),
            Err(e) => {
                warn!(error = %e, "failed to store rolling summary");
                None
            }
        }
    }
}
