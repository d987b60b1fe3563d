use chrono::Utc;
use tracing::warn;

use kana_store::kv::keys;
use kana_store::{Database, DiaryLevel, DiaryRepo, FactRepo, KvRepo, StoreError};

use crate::profile;

pub const DEFAULT_PERSONA: &str = "You are Kana, a cheerful companion who lives in the user's terminal. \
You chat casually, remember what the user tells you about themselves, and use your tools when they help. \
Call set_emotion whenever your mood changes.";

/// How many recent records of each level go into the prompt.
const DIARY_DEPTH: [(DiaryLevel, usize, &str); 5] = [
    (DiaryLevel::Yearly, 3, "Recent years"),
    (DiaryLevel::Quarterly, 3, "Recent quarters"),
    (DiaryLevel::Monthly, 2, "Recent months"),
    (DiaryLevel::Weekly, 3, "Recent weeks"),
    (DiaryLevel::Daily, 7, "Recent days"),
];

/// Everything remembered that goes into the system prompt.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryContext {
    /// `(heading, summary)` per profiled category.
    pub profile: Vec<(String, String)>,
    /// `(heading, summaries oldest first)` per diary level, largest period first.
    pub diary: Vec<(String, Vec<String>)>,
    pub recent_summary: Option<String>,
}

pub fn render(persona: &str, memory: &MemoryContext) -> String {
    let mut out = format!("# Agent\n{}", persona.trim());

    if !memory.profile.is_empty() {
        let sections = memory
            .profile
            .iter()
            .map(|(heading, summary)| format!("## {heading}\n{summary}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        out.push_str(&format!("\n\n# User Profile\n{sections}"));
    }

    let diary = memory
        .diary
        .iter()
        .filter(|(_, items)| !items.is_empty())
        .map(|(heading, items)| {
            let lines = items.iter().map(|s| format!("- {s}")).collect::<Vec<_>>().join("\n");
            format!("## {heading}\n{lines}")
        })
        .collect::<Vec<_>>();
    if !diary.is_empty() {
        out.push_str(&format!("\n\n# Memory\n{}", diary.join("\n\n")));
    }

    if let Some(recent) = memory.recent_summary.as_deref().filter(|s| !s.trim().is_empty()) {
        out.push_str(&format!("\n\n# Earlier today\n{recent}"));
    }
    out
}

/// Builds the system prompt from the persona and whatever memory the store holds.
pub struct PromptBuilder {
    persona: String,
    diary: DiaryRepo,
    facts: FactRepo,
    kv: KvRepo,
    recent_summary_ttl: chrono::Duration,
}

impl PromptBuilder {
    pub fn new(persona: impl Into<String>, db: Database, recent_summary_ttl: chrono::Duration) -> Self {
        Self {
            persona: persona.into(),
            diary: DiaryRepo::new(db.clone()),
            facts: FactRepo::new(db.clone()),
            kv: KvRepo::new(db),
            recent_summary_ttl,
        }
    }

    /// Store failures drop the affected section and are logged.
    pub fn build(&self) -> String {
        match self.memory() {
            Ok(memory) => render(&self.persona, &memory),
            Err(e) => {
                warn!(error = %e, "failed to load memory for the system prompt");
                render(&self.persona, &MemoryContext::default())
            }
        }
    }

    pub fn memory(&self) -> Result<MemoryContext, StoreError> {
        let profile = self
            .facts
            .profiles()?
            .into_iter()
            .map(|p| (profile::label(p.category).to_string(), p.summary))
            .collect();

        let mut diary = Vec::new();
        for (level, depth, heading) in DIARY_DEPTH {
            let items = self
                .diary
                .recent(level, depth)?
                .into_iter()
                .map(|r| r.summary)
                .collect();
            diary.push((heading.to_string(), items));
        }

        let recent_summary = self
            .kv
            .get_fresh(keys::RECENT_SUMMARY, self.recent_summary_ttl, Utc::now())?;

        Ok(MemoryContext {
            profile,
            diary,
            recent_summary,
        })
    }
}
