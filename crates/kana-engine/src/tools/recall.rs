use async_trait::async_trait;
use kana_core::tools::{required_str, Tool, ToolContext, ToolError, ToolFlags, ToolOutput};
use kana_store::{Database, DiaryRepo};

const MAX_RESULTS: usize = 10;

/// Keyword search over diary records.
pub struct RecallTool {
    diary: DiaryRepo,
}

impl RecallTool {
    pub fn new(db: Database) -> Self {
        Self {
            diary: DiaryRepo::new(db),
        }
    }
}

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "recall"
    }

    fn description(&self) -> &str {
        "Search your diary memories by keyword. Use this when the user references something from the past and you want to verify details, \
         or when you need context about previous conversations that aren't in your recent memory."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Keyword or phrase to search for in diary entries"
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
        let query = required_str(&args, "query")?.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidArguments("query must not be empty".into()));
        }
        let records = self
            .diary
            .search(query, MAX_RESULTS)
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        if records.is_empty() {
            return Ok(ToolOutput::text("No matching memories found."));
        }
        let text = records
            .iter()
            .map(|r| format!("[{} {}] {}", r.level, r.period_key, r.summary))
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(ToolOutput::text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_ctx;
    use kana_store::DiaryLevel;

    #[tokio::test]
    async fn finds_matching_records() {
        let db = Database::in_memory().unwrap();
        let diary = DiaryRepo::new(db.clone());
        diary.insert(DiaryLevel::Daily, "2024-03-01", "Talked about the ramen shop.").unwrap();
        diary.insert(DiaryLevel::Weekly, "2024-W09", "A quiet week.").unwrap();

        let tool = RecallTool::new(db);
        let out = tool
            .execute(serde_json::json!({"query": "ramen"}), &test_ctx(std::path::Path::new(".")))
            .await
            .unwrap();
        assert_eq!(out.content, "[daily 2024-03-01] Talked about the ramen shop.");

        let none = tool
            .execute(serde_json::json!({"query": "volcano"}), &test_ctx(std::path::Path::new(".")))
            .await
            .unwrap();
        assert_eq!(none.content, "No matching memories found.");
    }
}
