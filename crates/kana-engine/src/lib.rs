pub mod diary;
pub mod error;
pub mod executor;
pub mod gauge;
pub mod ledger;
pub mod orchestrator;
pub mod profile;
pub mod prompt;
pub mod registry;
pub mod session;
pub mod tools;
pub mod truncate;

pub use diary::{spawn_compaction, CompactionReport, DiaryCompactor};
pub use error::EngineError;
pub use executor::{ApprovalHandler, ApprovalRequest, BatchOutcome, ToolExecutor};
pub use gauge::{CostRefresher, GaugeConfig, ResourceGauge, SharedGauge};
pub use ledger::ConversationLedger;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use profile::ProfileKeeper;
pub use prompt::PromptBuilder;
pub use registry::ToolRegistry;
pub use session::{SessionConfig, SessionManager};
pub use tools::create_default_registry;
