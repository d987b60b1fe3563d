use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use kana_core::provider::Summarizer;
use kana_store::kv::keys;
use kana_store::{Database, FactCategory, FactRepo, KvRepo};

use crate::error::EngineError;

pub fn label(category: FactCategory) -> &'static str {
    match category {
        FactCategory::Identity => "Identity & Background",
        FactCategory::Relations => "Relationships",
        FactCategory::Career => "Career & Skills",
        FactCategory::Preferences => "Preferences & Lifestyle",
        FactCategory::Mindset => "Personality & Mindset",
        FactCategory::Timeline => "Timeline & Plans",
    }
}

pub fn subtopics(category: FactCategory) -> &'static [&'static str] {
    match category {
        FactCategory::Identity => &[
            "where they grew up",
            "what languages they speak",
            "their nationality",
            "their timezone or city",
        ],
        FactCategory::Relations => &[
            "their family",
            "whether they have pets",
            "their closest friends",
            "their partner or dating life",
        ],
        FactCategory::Career => &[
            "what they do for work",
            "what programming languages they use",
            "their tech stack",
            "their career goals",
        ],
        FactCategory::Preferences => &[
            "their favorite food",
            "their hobbies",
            "what music they listen to",
            "their morning routine",
        ],
        FactCategory::Mindset => &[
            "what motivates them",
            "their personal philosophy",
            "how they handle stress",
            "what they value most",
        ],
        FactCategory::Timeline => &[
            "what they're working on lately",
            "their plans for the weekend",
            "a recent life milestone",
            "their goals for this year",
        ],
    }
}

fn profile_instruction(category: FactCategory) -> String {
    format!(
        "Summarize the following facts about a user into a concise profile paragraph (2-4 sentences). \
         Category: {}. Write in third person. Reply with ONLY the summary, nothing else.",
        label(category)
    )
}

fn question_prompt(topic: &str, known: Option<&str>) -> String {
    let mut prompt = format!(
        "Write a short, casual question asking someone about {topic}.\n\
         The question must ask about a concrete fact, not feelings or hypotheticals.\n\
         Reply with ONLY the question, nothing else. No quotes. One sentence."
    );
    if let Some(known) = known {
        prompt.push_str(&format!(
            "\n\nWe already know this about them:\n{known}\nAsk about something NOT covered above."
        ));
    }
    prompt
}

/// Keeps per-category profile paragraphs in step with the fact store and
/// queues the next personal question to ask.
pub struct ProfileKeeper {
    facts: FactRepo,
    kv: KvRepo,
    summarizer: Arc<dyn Summarizer>,
}

impl ProfileKeeper {
    pub fn new(db: Database, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            facts: FactRepo::new(db.clone()),
            kv: KvRepo::new(db),
            summarizer,
        }
    }

    /// Rewrite the profile of `category` from its facts. With no facts left
    /// the profile is removed.
    #[instrument(skip(self))]
    pub async fn regenerate(&self, category: FactCategory) -> Result<(), EngineError> {
        let facts = self.facts.list(Some(category))?;
        if facts.is_empty() {
            self.facts.delete_profile(category)?;
            return Ok(());
        }
        let list = facts
            .iter()
            .map(|f| format!("- {}", f.fact))
            .collect::<Vec<_>>()
            .join("\n");
        let summary = self
            .summarizer
            .compress(&profile_instruction(category), &list)
            .await?;
        let summary = summary.trim();
        if !summary.is_empty() {
            self.facts.upsert_profile(category, summary)?;
        }
        Ok(())
    }

    /// Pick a random topic, ask for a question about it and queue it in kv.
    pub async fn generate_next_question(&self) -> Result<Option<String>, EngineError> {
        let (category, topic) = {
            let mut rng = rand::thread_rng();
            pick_topic(&mut rng)
        };
        self.generate_question_about(category, topic).await
    }

    pub async fn generate_question_about(
        &self,
        category: FactCategory,
        topic: &str,
    ) -> Result<Option<String>, EngineError> {
        let known = self
            .facts
            .profiles()?
            .into_iter()
            .find(|p| p.category == category)
            .map(|p| p.summary);
        let question = self
            .summarizer
            .compress("", &question_prompt(topic, known.as_deref()))
            .await?;
        let question = question.trim();
        if question.is_empty() {
            return Ok(None);
        }
        let queued = format!("[{category}] {question}");
        self.kv.set(keys::NEXT_QUESTION, &queued)?;
        debug!(category = %category, "next question queued");
        Ok(Some(queued))
    }

    pub fn queued_question(&self) -> Option<String> {
        match self.kv.get(keys::NEXT_QUESTION) {
            Ok(q) => q,
            Err(e) => {
                warn!(error = %e, "failed to read queued question");
                None
            }
        }
    }

    /// Generate the next question in the background, logging failures.
    pub fn spawn_next_question(self: &Arc<Self>) -> JoinHandle<()> {
        let keeper = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = keeper.generate_next_question().await {
                warn!(error = %e, "next question generation failed");
            }
        })
    }
}

fn pick_topic<R: Rng>(rng: &mut R) -> (FactCategory, &'static str) {
    let category = *FactCategory::ALL
        .choose(rng)
        .unwrap_or(&FactCategory::Identity);
    let topic = subtopics(category)
        .choose(rng)
        .copied()
        .unwrap_or("where they grew up");
    (category, topic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kana_llm::mock::MockSummarizer;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn keeper(summarizer: MockSummarizer) -> (Database, Arc<MockSummarizer>, ProfileKeeper) {
        let db = Database::in_memory().unwrap();
        let summarizer = Arc::new(summarizer);
        (db.clone(), summarizer.clone(), ProfileKeeper::new(db, summarizer))
    }

    #[test]
    fn every_category_has_topics() {
        for category in FactCategory::ALL {
            assert_eq!(subtopics(category).len(), 4);
            assert!(!label(category).is_empty());
        }
    }

    #[test]
    fn pick_topic_stays_within_the_category() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let (category, topic) = pick_topic(&mut rng);
            assert!(subtopics(category).contains(&topic));
        }
    }

    #[tokio::test]
    async fn regenerate_summarizes_facts() {
        let (db, summarizer, keeper) = keeper(MockSummarizer::fixed(" Likes ramen. "));
        let facts = FactRepo::new(db);
        facts.add(FactCategory::Preferences, "likes ramen").unwrap();
        facts.add(FactCategory::Preferences, "hates cilantro").unwrap();

        keeper.regenerate(FactCategory::Preferences).await.unwrap();

        let profiles = facts.profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].summary, "Likes ramen.");
        let (instruction, text) = &summarizer.calls()[0];
        assert!(instruction.contains("Category: Preferences & Lifestyle."));
        assert_eq!(text, "- likes ramen\n- hates cilantro");
    }

    #[tokio::test]
    async fn regenerate_without_facts_drops_profile() {
        let (db, summarizer, keeper) = keeper(MockSummarizer::fixed("x"));
        let facts = FactRepo::new(db);
        facts.upsert_profile(FactCategory::Career, "Writes Rust.").unwrap();

        keeper.regenerate(FactCategory::Career).await.unwrap();
        assert!(facts.profiles().unwrap().is_empty());
        assert_eq!(summarizer.call_count(), 0);
    }

    #[tokio::test]
    async fn question_mentions_known_profile_and_is_queued() {
        let (db, summarizer, keeper) = keeper(MockSummarizer::fixed("Do you have a cat?"));
        FactRepo::new(db.clone())
            .upsert_profile(FactCategory::Relations, "Has a sister.")
            .unwrap();

        let queued = keeper
            .generate_question_about(FactCategory::Relations, "whether they have pets")
            .await
            .unwrap();
        assert_eq!(queued.as_deref(), Some("[relations] Do you have a cat?"));
        assert_eq!(keeper.queued_question().as_deref(), Some("[relations] Do you have a cat?"));

        let (instruction, prompt) = &summarizer.calls()[0];
        assert!(instruction.is_empty());
        assert!(prompt.starts_with("Write a short, casual question asking someone about whether they have pets."));
        assert!(prompt.contains("We already know this about them:\nHas a sister.\n"));
    }

    #[tokio::test]
    async fn failed_generation_leaves_queue_untouched() {
        let (db, _summarizer, keeper) = keeper(MockSummarizer::failing());
        KvRepo::new(db).set(keys::NEXT_QUESTION, "[identity] Where are you from?").unwrap();
        let keeper = Arc::new(keeper);
        keeper.spawn_next_question().await.unwrap();
        assert_eq!(
            keeper.queued_question().as_deref(),
            Some("[identity] Where are you from?")
        );
    }
}
