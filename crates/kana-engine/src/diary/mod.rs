pub mod calendar;
pub mod compactor;

pub use compactor::{spawn_compaction, CompactionReport, DiaryCompactor, LevelOutcome};
