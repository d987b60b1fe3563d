use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate, Utc};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use kana_core::provider::Summarizer;
use kana_store::{ConversationRepo, Database, DiaryLevel, DiaryRepo, StoreError};

use super::calendar;
use crate::error::EngineError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LevelOutcome {
    Created,
    AlreadyExists,
    NotEnoughInput { found: usize, required: usize },
    /// The summarizer returned nothing usable.
    EmptySummary,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LevelReport {
    pub level: DiaryLevel,
    pub period_key: String,
    pub outcome: LevelOutcome,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub levels: Vec<LevelReport>,
}

impl CompactionReport {
    pub fn outcome(&self, level: DiaryLevel) -> Option<&LevelOutcome> {
        self.levels.iter().find(|r| r.level == level).map(|r| &r.outcome)
    }

    pub fn created(&self) -> usize {
        self.levels
            .iter()
            .filter(|r| r.outcome == LevelOutcome::Created)
            .count()
    }
}

fn instruction(level: DiaryLevel) -> &'static str {
    match level {
        DiaryLevel::Daily => "Summarize these conversation summaries from a single day into a concise diary entry (2-3 sentences). Capture the key topics, decisions, and emotional tone. Reply with ONLY the summary.",
        DiaryLevel::Weekly => "Summarize these daily diary entries from one week into a concise weekly summary (2-4 sentences). Highlight recurring themes, progress, and mood. Reply with ONLY the summary.",
        DiaryLevel::Monthly => "Summarize these weekly diary entries from one month into a concise monthly summary (3-4 sentences). Focus on major developments, evolving topics, and overall trajectory. Reply with ONLY the summary.",
        DiaryLevel::Quarterly => "Summarize these monthly diary entries from one quarter into a concise quarterly summary (3-5 sentences). Capture the arc of the quarter: themes, growth, and significant events. Reply with ONLY the summary.",
        DiaryLevel::Yearly => "Summarize these quarterly diary entries from one year into a concise yearly summary (4-6 sentences). Paint a big-picture view of the year: major milestones, relationship evolution, and growth. Reply with ONLY the summary.",
    }
}

/// Folds conversation summaries upward into one diary record per calendar period.
pub struct DiaryCompactor {
    diary: DiaryRepo,
    conversations: ConversationRepo,
    summarizer: Arc<dyn Summarizer>,
}

impl DiaryCompactor {
    pub fn new(db: Database, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            diary: DiaryRepo::new(db.clone()),
            conversations: ConversationRepo::new(db),
            summarizer,
        }
    }

    pub async fn run(&self) -> CompactionReport {
        self.run_at(Utc::now().date_naive()).await
    }

    /// Run every level in order, as of `today`. A failing level is logged and
    /// does not stop the levels after it.
    #[instrument(skip(self))]
    pub async fn run_at(&self, today: NaiveDate) -> CompactionReport {
        let mut report = CompactionReport::default();
        for level in DiaryLevel::ALL {
            let period_key = period_key(level, today);
            let outcome = match self.compact(level, today).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(level = %level, period = %period_key, error = %e, "diary compaction failed");
                    LevelOutcome::Failed(e.to_string())
                }
            };
            if outcome == LevelOutcome::Created {
                info!(level = %level, period = %period_key, "diary record created");
            }
            report.levels.push(LevelReport {
                level,
                period_key,
                outcome,
            });
        }
        report
    }

    /// Produce the record for `level`'s most recently finished period, if it
    /// does not exist yet and enough children are present.
    pub async fn compact(&self, level: DiaryLevel, today: NaiveDate) -> Result<LevelOutcome, EngineError> {
        let key = period_key(level, today);
        if self.diary.exists(level, &key)? {
            return Ok(LevelOutcome::AlreadyExists);
        }

        let (children, required) = match level {
            DiaryLevel::Daily => {
                let day = calendar::yesterday(today);
                (self.conversations.summaries_between(day, day + Days::new(1))?, 1)
            }
            DiaryLevel::Weekly => {
                let days = calendar::days_in_week(&key)
                    .ok_or_else(|| EngineError::Internal(format!("bad week key {key}")))?;
                let keys: Vec<String> = days.into_iter().map(calendar::day_key).collect();
                (self.child_summaries(DiaryLevel::Daily, &keys)?, 1)
            }
            DiaryLevel::Monthly => {
                let (year, month) = calendar::previous_month(today);
                let keys = calendar::weeks_overlapping_month(year, month);
                (self.child_summaries(DiaryLevel::Weekly, &keys)?, 1)
            }
            DiaryLevel::Quarterly => {
                let (year, quarter) = calendar::previous_quarter(today);
                let keys = calendar::months_in_quarter(year, quarter);
                (self.child_summaries(DiaryLevel::Monthly, &keys)?, keys.len())
            }
            DiaryLevel::Yearly => {
                let keys = calendar::quarters_in_year(today.year() - 1);
                (self.child_summaries(DiaryLevel::Quarterly, &keys)?, keys.len())
            }
        };

        if children.len() < required {
            return Ok(LevelOutcome::NotEnoughInput {
                found: children.len(),
                required,
            });
        }

        let text = children
            .iter()
            .map(|c| format!("- {c}"))
            .collect::<Vec<_>>()
            .join("\n");
        let summary = self.summarizer.compress(instruction(level), &text).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Ok(LevelOutcome::EmptySummary);
        }

        match self.diary.insert(level, &key, summary) {
            Ok(_) => Ok(LevelOutcome::Created),
            Err(StoreError::Conflict(_)) => Ok(LevelOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    fn child_summaries(&self, level: DiaryLevel, keys: &[String]) -> Result<Vec<String>, StoreError> {
        Ok(self
            .diary
            .records_for(level, keys)?
            .into_iter()
            .map(|r| r.summary)
            .collect())
    }
}

/// Key of the most recently finished period of `level` as of `today`.
pub fn period_key(level: DiaryLevel, today: NaiveDate) -> String {
    match level {
        DiaryLevel::Daily => calendar::day_key(calendar::yesterday(today)),
        DiaryLevel::Weekly => calendar::last_week_key(today),
        DiaryLevel::Monthly => {
            let (year, month) = calendar::previous_month(today);
            calendar::month_key(year, month)
        }
        DiaryLevel::Quarterly => {
            let (year, quarter) = calendar::previous_quarter(today);
            calendar::quarter_key(year, quarter)
        }
        DiaryLevel::Yearly => calendar::year_key(today.year() - 1),
    }
}

/// Run compaction in the background. Failures are logged per level.
pub fn spawn_compaction(compactor: Arc<DiaryCompactor>) -> JoinHandle<CompactionReport> {
    tokio::spawn(async move {
        let report = compactor.run().await;
        info!(created = report.created(), "diary compaction finished");
        report
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kana_llm::mock::MockSummarizer;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn setup(summarizer: MockSummarizer) -> (Database, Arc<MockSummarizer>, DiaryCompactor) {
        let db = Database::in_memory().unwrap();
        let summarizer = Arc::new(summarizer);
        let compactor = DiaryCompactor::new(db.clone(), summarizer.clone());
        (db, summarizer, compactor)
    }

    fn ended_conversation(db: &Database, y: i32, m: u32, day: u32, hour: u32, summary: &str) {
        let repo = ConversationRepo::new(db.clone());
        let at = Utc.with_ymd_and_hms(y, m, day, hour, 0, 0).unwrap();
        let row = repo.create_at(at).unwrap();
        repo.end(&row.id, Some(summary)).unwrap();
    }

    #[tokio::test]
    async fn daily_is_idempotent() {
        let (db, summarizer, compactor) = setup(MockSummarizer::fixed("a quiet day"));
        ended_conversation(&db, 2024, 3, 4, 9, "talked about tea");
        ended_conversation(&db, 2024, 3, 4, 21, "planned a trip");
        ended_conversation(&db, 2024, 3, 5, 1, "not yesterday");

        let today = d(2024, 3, 5);
        assert_eq!(compactor.compact(DiaryLevel::Daily, today).await.unwrap(), LevelOutcome::Created);
        assert_eq!(
            compactor.compact(DiaryLevel::Daily, today).await.unwrap(),
            LevelOutcome::AlreadyExists
        );

        let repo = DiaryRepo::new(db);
        assert_eq!(repo.count(DiaryLevel::Daily).unwrap(), 1);
        assert!(repo.exists(DiaryLevel::Daily, "2024-03-04").unwrap());
        assert_eq!(summarizer.call_count(), 1);
        let (instruction, text) = &summarizer.calls()[0];
        assert!(instruction.contains("2-3 sentences"));
        assert_eq!(text, "- talked about tea\n- planned a trip");
    }

    #[tokio::test]
    async fn daily_without_conversations_is_skipped() {
        let (_db, summarizer, compactor) = setup(MockSummarizer::fixed("x"));
        let outcome = compactor.compact(DiaryLevel::Daily, d(2024, 3, 5)).await.unwrap();
        assert_eq!(outcome, LevelOutcome::NotEnoughInput { found: 0, required: 1 });
        assert_eq!(summarizer.call_count(), 0);
    }

    #[tokio::test]
    async fn weekly_needs_a_daily_inside_the_iso_week() {
        let (db, _summarizer, compactor) = setup(MockSummarizer::fixed("a week"));
        let repo = DiaryRepo::new(db.clone());
        // Today 2024-03-13; a week ago is 2024-03-06, week 2024-W10 (Mar 4 to Mar 10).
        let today = d(2024, 3, 13);
        repo.insert(DiaryLevel::Daily, "2024-03-03", "outside, sunday before").unwrap();
        repo.insert(DiaryLevel::Daily, "2024-03-11", "outside, monday after").unwrap();

        assert_eq!(
            compactor.compact(DiaryLevel::Weekly, today).await.unwrap(),
            LevelOutcome::NotEnoughInput { found: 0, required: 1 }
        );
        assert_eq!(repo.count(DiaryLevel::Weekly).unwrap(), 0);

        repo.insert(DiaryLevel::Daily, "2024-03-10", "sunday inside").unwrap();
        assert_eq!(compactor.compact(DiaryLevel::Weekly, today).await.unwrap(), LevelOutcome::Created);
        assert_eq!(repo.count(DiaryLevel::Weekly).unwrap(), 1);
        assert!(repo.exists(DiaryLevel::Weekly, "2024-W10").unwrap());
    }

    #[tokio::test]
    async fn monthly_gathers_weeks_straddling_the_boundary() {
        let (db, summarizer, compactor) = setup(MockSummarizer::fixed("february"));
        let repo = DiaryRepo::new(db);
        repo.insert(DiaryLevel::Weekly, "2024-W05", "late jan into feb").unwrap();
        repo.insert(DiaryLevel::Weekly, "2024-W09", "end of feb into march").unwrap();
        repo.insert(DiaryLevel::Weekly, "2024-W10", "march only").unwrap();

        let outcome = compactor.compact(DiaryLevel::Monthly, d(2024, 3, 2)).await.unwrap();
        assert_eq!(outcome, LevelOutcome::Created);
        assert!(repo.exists(DiaryLevel::Monthly, "2024-02").unwrap());
        let (_, text) = &summarizer.calls()[0];
        assert_eq!(text, "- late jan into feb\n- end of feb into march");
    }

    #[tokio::test]
    async fn quarterly_requires_all_three_months() {
        let (db, summarizer, compactor) = setup(MockSummarizer::fixed("q1"));
        let repo = DiaryRepo::new(db);
        let today = d(2024, 4, 2);
        repo.insert(DiaryLevel::Monthly, "2024-01", "jan").unwrap();
        repo.insert(DiaryLevel::Monthly, "2024-02", "feb").unwrap();

        assert_eq!(
            compactor.compact(DiaryLevel::Quarterly, today).await.unwrap(),
            LevelOutcome::NotEnoughInput { found: 2, required: 3 }
        );
        assert_eq!(summarizer.call_count(), 0);

        repo.insert(DiaryLevel::Monthly, "2024-03", "mar").unwrap();
        assert_eq!(compactor.compact(DiaryLevel::Quarterly, today).await.unwrap(), LevelOutcome::Created);
        assert_eq!(repo.count(DiaryLevel::Quarterly).unwrap(), 1);
        assert!(repo.exists(DiaryLevel::Quarterly, "2024-Q1").unwrap());
        let (instruction, text) = &summarizer.calls()[0];
        assert!(instruction.contains("3-5 sentences"));
        assert_eq!(text, "- jan\n- feb\n- mar");
    }

    #[tokio::test]
    async fn yearly_requires_all_four_quarters() {
        let (db, _summarizer, compactor) = setup(MockSummarizer::fixed("2023 in review"));
        let repo = DiaryRepo::new(db);
        let today = d(2024, 1, 3);
        for q in ["2023-Q1", "2023-Q2", "2023-Q3"] {
            repo.insert(DiaryLevel::Quarterly, q, q).unwrap();
        }
        assert_eq!(
            compactor.compact(DiaryLevel::Yearly, today).await.unwrap(),
            LevelOutcome::NotEnoughInput { found: 3, required: 4 }
        );
        repo.insert(DiaryLevel::Quarterly, "2023-Q4", "q4").unwrap();
        assert_eq!(compactor.compact(DiaryLevel::Yearly, today).await.unwrap(), LevelOutcome::Created);
        assert!(repo.exists(DiaryLevel::Yearly, "2023").unwrap());
    }

    #[tokio::test]
    async fn empty_summary_is_not_stored() {
        let (db, _summarizer, compactor) = setup(MockSummarizer::fixed("   "));
        ended_conversation(&db, 2024, 3, 4, 9, "talked");
        assert_eq!(
            compactor.compact(DiaryLevel::Daily, d(2024, 3, 5)).await.unwrap(),
            LevelOutcome::EmptySummary
        );
        assert_eq!(DiaryRepo::new(db).count(DiaryLevel::Daily).unwrap(), 0);
    }

    #[tokio::test]
    async fn run_at_chains_levels_and_survives_failures() {
        let (db, summarizer, compactor) = setup(MockSummarizer::scripted(vec![Ok("daily".into())]));
        let repo = DiaryRepo::new(db.clone());
        // 2024-04-01 is a Monday: yesterday closes week 2024-W13, March and Q1.
        let today = d(2024, 4, 1);
        ended_conversation(&db, 2024, 3, 31, 12, "sunday chat");
        repo.insert(DiaryLevel::Weekly, "2024-W09", "a march week").unwrap();

        let report = compactor.run_at(today).await;
        assert_eq!(report.levels.len(), 5);
        assert_eq!(report.outcome(DiaryLevel::Daily), Some(&LevelOutcome::Created));
        // The daily record it just wrote feeds the weekly level, whose summary call fails.
        assert!(matches!(report.outcome(DiaryLevel::Weekly), Some(LevelOutcome::Failed(_))));
        // The monthly level still runs after the failure.
        assert!(matches!(report.outcome(DiaryLevel::Monthly), Some(LevelOutcome::Failed(_))));
        assert_eq!(
            report.outcome(DiaryLevel::Quarterly),
            Some(&LevelOutcome::NotEnoughInput { found: 0, required: 3 })
        );
        assert_eq!(report.created(), 1);
        assert_eq!(summarizer.call_count(), 3);

        let keys: Vec<_> = report.levels.iter().map(|r| r.period_key.as_str()).collect();
        assert_eq!(keys, vec!["2024-03-31", "2024-W13", "2024-03", "2024-Q1", "2023"]);
    }

    #[tokio::test]
    async fn spawned_compaction_returns_report() {
        let (_db, _summarizer, compactor) = setup(MockSummarizer::fixed("x"));
        let report = spawn_compaction(Arc::new(compactor)).await.unwrap();
        assert_eq!(report.levels.len(), 5);
        assert_eq!(report.created(), 0);
    }
}
