use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::{is_constraint_violation, StoreError};
use crate::row_helpers;

/// Rollup level of a diary record, lowest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiaryLevel {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl DiaryLevel {
    pub const ALL: [DiaryLevel; 5] = [
        Self::Daily,
        Self::Weekly,
        Self::Monthly,
        Self::Quarterly,
        Self::Yearly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }
}

impl std::fmt::Display for DiaryLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DiaryLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" => Ok(Self::Yearly),
            other => Err(format!("unknown diary level: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiaryRecord {
    pub level: DiaryLevel,
    pub period_key: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

/// Write-once store of diary records, unique per (level, period key).
pub struct DiaryRepo {
    db: Database,
}

impl DiaryRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn exists(&self, level: DiaryLevel, period_key: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let found: i64 = conn.query_row(
                "SELECT COUNT(*) FROM diary WHERE level = ?1 AND period_key = ?2",
                [level.as_str(), period_key],
                |row| row.get(0),
            )?;
            Ok(found > 0)
        })
    }

    /// Insert a new record. An existing (level, key) pair is a `Conflict`, never an overwrite.
    #[instrument(skip(self, summary))]
    pub fn insert(
        &self,
        level: DiaryLevel,
        period_key: &str,
        summary: &str,
    ) -> Result<DiaryRecord, StoreError> {
        let created_at = Utc::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO diary (level, period_key, summary, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    level.as_str(),
                    period_key,
                    summary,
                    row_helpers::timestamp(created_at)
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::Conflict(format!("diary {level} {period_key} already exists"))
                } else {
                    StoreError::from(e)
                }
            })?;
            Ok(DiaryRecord {
                level,
                period_key: period_key.to_string(),
                summary: summary.to_string(),
                created_at,
            })
        })
    }

    /// Records of `level` whose key is in `keys`, ordered by key.
    pub fn records_for(&self, level: DiaryLevel, keys: &[String]) -> Result<Vec<DiaryRecord>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (0..keys.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT level, period_key, summary, created_at FROM diary
             WHERE level = ?1 AND period_key IN ({placeholders})
             ORDER BY period_key ASC"
        );

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let level_name = level.as_str();
            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&level_name];
            for key in keys {
                params.push(key);
            }
            let mut rows = stmt.query(params.as_slice())?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_record(row)?);
            }
            Ok(out)
        })
    }

    /// Newest `limit` records of a level, returned oldest first.
    pub fn recent(&self, level: DiaryLevel, limit: usize) -> Result<Vec<DiaryRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT level, period_key, summary, created_at FROM diary
                 WHERE level = ?1 ORDER BY period_key DESC LIMIT ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![level.as_str(), limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_record(row)?);
            }
            out.reverse();
            Ok(out)
        })
    }

    /// Case-insensitive substring search over summaries, newest first.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<DiaryRecord>, StoreError> {
        let pattern = format!("%{}%", row_helpers::escape_like(query));
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT level, period_key, summary, created_at FROM diary
                 WHERE summary LIKE ?1 ESCAPE '\\'
                 ORDER BY created_at DESC LIMIT ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![pattern, limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_record(row)?);
            }
            Ok(out)
        })
    }

    pub fn count(&self, level: DiaryLevel) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM diary WHERE level = ?1",
                [level.as_str()],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<DiaryRecord, StoreError> {
    let level: String = row_helpers::get(row, 0, "diary", "level")?;
    let created: String = row_helpers::get(row, 3, "diary", "created_at")?;
    Ok(DiaryRecord {
        level: row_helpers::parse_enum(&level, "diary", "level")?,
        period_key: row_helpers::get(row, 1, "diary", "period_key")?,
        summary: row_helpers::get(row, 2, "diary", "summary")?,
        created_at: row_helpers::parse_timestamp(&created, "diary", "created_at")?,
    })
}
