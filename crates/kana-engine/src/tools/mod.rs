pub mod describe;
pub mod emotion;
pub mod file;
pub mod recall;
pub mod rest;
pub mod shell;
pub mod think;
pub mod user_facts;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kana_core::provider::Summarizer;
use kana_store::Database;

use crate::profile::ProfileKeeper;
use crate::registry::ToolRegistry;

/// Create a ToolRegistry with all built-in tools.
pub fn create_default_registry(db: Database, summarizer: Arc<dyn Summarizer>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    // Expression
    registry.register(Arc::new(emotion::SetEmotionTool));
    registry.register(Arc::new(think::ThinkTool));
    registry.register(Arc::new(describe::DescribeAgentTool));
    registry.register(Arc::new(rest::RestSessionTool));

    // Memory
    let keeper = Arc::new(ProfileKeeper::new(db.clone(), summarizer));
    registry.register(Arc::new(user_facts::NoteAboutUserTool::new(db.clone(), Arc::clone(&keeper))));
    registry.register(Arc::new(user_facts::GetUserFactsTool::new(db.clone())));
    registry.register(Arc::new(user_facts::UpdateUserFactTool::new(db.clone(), keeper)));
    registry.register(Arc::new(recall::RecallTool::new(db)));

    // System
    registry.register(Arc::new(shell::ShellTool::new()));
    registry.register(Arc::new(file::ReadFileTool));
    registry.register(Arc::new(file::WriteFileTool));

    registry
}

fn resolve_path(file_path: &str, working_dir: &Path) -> PathBuf {
    let path = Path::new(file_path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    }
}

#[cfg(test)]
pub(crate) fn test_ctx(dir: &Path) -> kana_core::tools::ToolContext {
    kana_core::tools::ToolContext {
        conversation_id: None,
        working_directory: dir.to_path_buf(),
    }
}
