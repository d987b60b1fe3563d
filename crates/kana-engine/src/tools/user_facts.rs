use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use kana_core::tools::{required_str, Tool, ToolContext, ToolError, ToolFlags, ToolOutput};
use kana_store::{Database, FactCategory, FactRepo, StoreError};

use crate::profile::ProfileKeeper;

fn category_schema(description: &str) -> serde_json::Value {
    let names: Vec<&str> = FactCategory::ALL.iter().map(|c| c.as_str()).collect();
    serde_json::json!({
        "type": "string",
        "enum": names,
        "description": description
    })
}

fn parse_category(args: &serde_json::Value) -> Result<FactCategory, ToolError> {
    required_str(args, "category")?
        .parse()
        .map_err(ToolError::InvalidArguments)
}

fn store_err(e: StoreError) -> ToolError {
    ToolError::ExecutionFailed(e.to_string())
}

/// Rebuild the category profile, then queue a fresh question in the background.
async fn after_change(keeper: &Arc<ProfileKeeper>, category: FactCategory) {
    if let Err(e) = keeper.regenerate(category).await {
        warn!(category = %category, error = %e, "profile regeneration failed");
    }
    keeper.spawn_next_question();
}

pub struct NoteAboutUserTool {
    facts: FactRepo,
    keeper: Arc<ProfileKeeper>,
}

impl NoteAboutUserTool {
    pub fn new(db: Database, keeper: Arc<ProfileKeeper>) -> Self {
        Self {
            facts: FactRepo::new(db),
            keeper,
        }
    }
}

#[async_trait]
impl Tool for NoteAboutUserTool {
    fn name(&self) -> &str {
        "note_about_user"
    }

    fn description(&self) -> &str {
        "Remember a fact about the user. Call this when the user mentions personal details, preferences, \
         or stable traits worth remembering long-term."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["category", "fact"],
            "properties": {
                "category": category_schema(
                    "identity (demographics), relations (family/pets), career (job/skills), \
                     preferences (hobbies/food), mindset (personality/beliefs), timeline (milestones/plans)"
                ),
                "fact": {
                    "type": "string",
                    "description": "The fact to remember, written as a concise statement"
                }
            }
        })
    }

    fn flags(&self) -> ToolFlags {
        ToolFlags::auto()
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let category = parse_category(&args)?;
        let fact = required_str(&args, "fact")?.trim();
        if fact.is_empty() {
            return Err(ToolError::InvalidArguments("fact must not be empty".into()));
        }

        let row = self.facts.add(category, fact).map_err(store_err)?;
        after_change(&self.keeper, category).await;
        Ok(ToolOutput::text(format!("Noted (id={}): {}", row.id, row.fact)))
    }
}

pub struct GetUserFactsTool {
    facts: FactRepo,
}

impl GetUserFactsTool {
    pub fn new(db: Database) -> Self {
        Self {
            facts: FactRepo::new(db),
        }
    }
}

#[async_trait]
impl Tool for GetUserFactsTool {
    fn name(&self) -> &str {
        "get_user_facts"
    }

    fn description(&self) -> &str {
        "Retrieve all remembered facts about the user for a given category. \
         Use when you need detailed recall about a topic."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["category"],
            "properties": {
                "category": category_schema("The category to retrieve facts for")
            }
        })
    }

    fn flags(&self) -> ToolFlags {
        ToolFlags::auto()
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let category = parse_category(&args)?;
        let facts = self.facts.list(Some(category)).map_err(store_err)?;
        if facts.is_empty() {
            return Ok(ToolOutput::text(format!("No facts recorded for \"{category}\".")));
        }
        let lines = facts
            .iter()
            .map(|f| format!("[{}] {}", f.id, f.fact))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ToolOutput::text(lines))
    }
}

pub struct UpdateUserFactTool {
    facts: FactRepo,
    keeper: Arc<ProfileKeeper>,
}

impl UpdateUserFactTool {
    pub fn new(db: Database, keeper: Arc<ProfileKeeper>) -> Self {
        Self {
            facts: FactRepo::new(db),
            keeper,
        }
    }
}

#[async_trait]
impl Tool for UpdateUserFactTool {
    fn name(&self) -> &str {
        "update_user_fact"
    }

    fn description(&self) -> &str {
        "Update or delete an existing fact about the user. \
         Use when the user corrects something or when a fact is outdated."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["id"],
            "properties": {
                "id": {
                    "type": "number",
                    "description": "The ID of the fact to update or delete"
                },
                "fact": {
                    "type": "string",
                    "description": "The updated fact text (omit if deleting)"
                },
                "delete": {
                    "type": "boolean",
                    "description": "Set to true to delete the fact"
                }
            }
        })
    }

    fn flags(&self) -> ToolFlags {
        ToolFlags::auto()
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let id = args["id"]
            .as_i64()
            .or_else(|| args["id"].as_f64().map(|f| f as i64))
            .ok_or_else(|| ToolError::InvalidArguments("id is required".into()))?;

        let existing = match self.facts.get(id) {
            Ok(row) => row,
            Err(StoreError::NotFound(_)) => {
                return Ok(ToolOutput::text(format!("Fact #{id} not found.")));
            }
            Err(e) => return Err(store_err(e)),
        };

        if args["delete"].as_bool().unwrap_or(false) {
            self.facts.delete(id).map_err(store_err)?;
            after_change(&self.keeper, existing.category).await;
            return Ok(ToolOutput::text(format!("Deleted fact #{id}.")));
        }

        match args["fact"].as_str().map(str::trim).filter(|f| !f.is_empty()) {
            Some(fact) => {
                self.facts.update(id, fact).map_err(store_err)?;
                after_change(&self.keeper, existing.category).await;
                Ok(ToolOutput::text(format!("Updated fact #{id}: {fact}")))
            }
            None => Ok(ToolOutput::text(
                "No changes, provide either 'fact' or 'delete: true'.",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_ctx;
    use kana_llm::mock::MockSummarizer;
    use std::path::Path;

    fn setup(summarizer: MockSummarizer) -> (Database, Arc<MockSummarizer>, Arc<ProfileKeeper>) {
        let db = Database::in_memory().unwrap();
        let summarizer = Arc::new(summarizer);
        let keeper = Arc::new(ProfileKeeper::new(db.clone(), summarizer.clone()));
        (db, summarizer, keeper)
    }

    fn ctx() -> ToolContext {
        test_ctx(Path::new("."))
    }

    #[tokio::test]
    async fn note_stores_fact_and_regenerates_profile() {
        let (db, summarizer, keeper) = setup(MockSummarizer::fixed("Owns a cat named Miso."));
        let tool = NoteAboutUserTool::new(db.clone(), keeper);

        let out = tool
            .execute(serde_json::json!({"category": "relations", "fact": "has a cat named Miso"}), &ctx())
            .await
            .unwrap();
        assert!(out.content.starts_with("Noted (id="));
        assert!(out.content.ends_with("): has a cat named Miso"));

        let facts = FactRepo::new(db);
        assert_eq!(facts.list(Some(FactCategory::Relations)).unwrap().len(), 1);
        let profiles = facts.profiles().unwrap();
        assert_eq!(profiles[0].summary, "Owns a cat named Miso.");
        assert!(summarizer.call_count() >= 1);
    }

    #[tokio::test]
    async fn note_rejects_unknown_category() {
        let (db, _s, keeper) = setup(MockSummarizer::echo());
        let tool = NoteAboutUserTool::new(db, keeper);
        let err = tool
            .execute(serde_json::json!({"category": "hobbies", "fact": "x"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn note_survives_summarizer_failure() {
        let (db, _s, keeper) = setup(MockSummarizer::failing());
        let tool = NoteAboutUserTool::new(db.clone(), keeper);
        let out = tool
            .execute(serde_json::json!({"category": "career", "fact": "writes Rust"}), &ctx())
            .await
            .unwrap();
        assert!(out.content.contains("writes Rust"));
        assert!(FactRepo::new(db).profiles().unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_lists_facts_by_category() {
        let (db, _s, _keeper) = setup(MockSummarizer::echo());
        let facts = FactRepo::new(db.clone());
        let a = facts.add(FactCategory::Preferences, "likes ramen").unwrap();
        let b = facts.add(FactCategory::Preferences, "hates cilantro").unwrap();
        facts.add(FactCategory::Career, "writes Rust").unwrap();

        let tool = GetUserFactsTool::new(db);
        let out = tool
            .execute(serde_json::json!({"category": "preferences"}), &ctx())
            .await
            .unwrap();
        assert_eq!(
            out.content,
            format!("[{}] likes ramen\n[{}] hates cilantro", a.id, b.id)
        );

        let empty = tool
            .execute(serde_json::json!({"category": "timeline"}), &ctx())
            .await
            .unwrap();
        assert_eq!(empty.content, "No facts recorded for \"timeline\".");
    }

    #[tokio::test]
    async fn update_edits_deletes_and_reports_missing() {
        let (db, _s, keeper) = setup(MockSummarizer::fixed("Profile."));
        let facts = FactRepo::new(db.clone());
        let row = facts.add(FactCategory::Identity, "lives in Oslo").unwrap();
        let tool = UpdateUserFactTool::new(db, keeper);

        let out = tool
            .execute(serde_json::json!({"id": row.id, "fact": "lives in Bergen"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out.content, format!("Updated fact #{}: lives in Bergen", row.id));
        assert_eq!(facts.get(row.id).unwrap().fact, "lives in Bergen");

        let out = tool.execute(serde_json::json!({"id": row.id}), &ctx()).await.unwrap();
        assert_eq!(out.content, "No changes, provide either 'fact' or 'delete: true'.");

        let out = tool
            .execute(serde_json::json!({"id": row.id, "delete": true}), &ctx())
            .await
            .unwrap();
        assert_eq!(out.content, format!("Deleted fact #{}.", row.id));
        assert!(facts.list(None).unwrap().is_empty());
        // Last fact gone, so the profile goes too.
        assert!(facts.profiles().unwrap().is_empty());

        let out = tool
            .execute(serde_json::json!({"id": row.id, "delete": true}), &ctx())
            .await
            .unwrap();
        assert_eq!(out.content, format!("Fact #{} not found.", row.id));
    }
}
