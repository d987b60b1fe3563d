use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCategory {
    Identity,
    Relations,
    Career,
    Preferences,
    Mindset,
    Timeline,
}

impl FactCategory {
    pub const ALL: [FactCategory; 6] = [
        Self::Identity,
        Self::Relations,
        Self::Career,
        Self::Preferences,
        Self::Mindset,
        Self::Timeline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Relations => "relations",
            Self::Career => "career",
            Self::Preferences => "preferences",
            Self::Mindset => "mindset",
            Self::Timeline => "timeline",
        }
    }
}

impl std::fmt::Display for FactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FactCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identity" => Ok(Self::Identity),
            "relations" => Ok(Self::Relations),
            "career" => Ok(Self::Career),
            "preferences" => Ok(Self::Preferences),
            "mindset" => Ok(Self::Mindset),
            "timeline" => Ok(Self::Timeline),
            other => Err(format!("unknown fact category: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    pub id: i64,
    pub category: FactCategory,
    pub fact: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub category: FactCategory,
    pub summary: String,
    pub updated_at: DateTime<Utc>,
}

/// Facts learned about the user, and the per-category profile summaries built from them.
pub struct FactRepo {
    db: Database,
}

impl FactRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, fact))]
    pub fn add(&self, category: FactCategory, fact: &str) -> Result<FactRow, StoreError> {
        let now = Utc::now();
        self.db.with_conn(|conn| {
            let ts = row_helpers::timestamp(now);
            conn.execute(
                "INSERT INTO user_facts (category, fact, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                rusqlite::params![category.as_str(), fact, ts],
            )?;
            Ok(FactRow {
                id: conn.last_insert_rowid(),
                category,
                fact: fact.to_string(),
                created_at: now,
                updated_at: now,
            })
        })
    }

    pub fn get(&self, id: i64) -> Result<FactRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, category, fact, created_at, updated_at FROM user_facts WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => row_to_fact(row),
                None => Err(StoreError::NotFound(format!("fact {id}"))),
            }
        })
    }

    /// Facts in insertion order, optionally for one category.
    pub fn list(&self, category: Option<FactCategory>) -> Result<Vec<FactRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, category, fact, created_at, updated_at FROM user_facts
                 WHERE ?1 IS NULL OR category = ?1 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query([category.map(|c| c.as_str())])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_fact(row)?);
            }
            Ok(out)
        })
    }

    pub fn update(&self, id: i64, fact: &str) -> Result<FactRow, StoreError> {
        let now = row_helpers::timestamp(Utc::now());
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE user_facts SET fact = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![fact, now, id],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("fact {id}")));
        }
        self.get(id)
    }

    pub fn delete(&self, id: i64) -> Result<(), StoreError> {
        let changed = self
            .db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM user_facts WHERE id = ?1", [id])?))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("fact {id}")));
        }
        Ok(())
    }

    pub fn upsert_profile(&self, category: FactCategory, summary: &str) -> Result<(), StoreError> {
        let now = row_helpers::timestamp(Utc::now());
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_profile (category, summary, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(category) DO UPDATE SET summary = excluded.summary, updated_at = excluded.updated_at",
                rusqlite::params![category.as_str(), summary, now],
            )?;
            Ok(())
        })
    }

    pub fn delete_profile(&self, category: FactCategory) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM user_profile WHERE category = ?1", [category.as_str()])?;
            Ok(())
        })
    }

    pub fn profiles(&self) -> Result<Vec<ProfileRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT category, summary, updated_at FROM user_profile ORDER BY category ASC",
            )?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let category: String = row_helpers::get(row, 0, "user_profile", "category")?;
                let updated: String = row_helpers::get(row, 2, "user_profile", "updated_at")?;
                out.push(ProfileRow {
                    category: row_helpers::parse_enum(&category, "user_profile", "category")?,
                    summary: row_helpers::get(row, 1, "user_profile", "summary")?,
                    updated_at: row_helpers::parse_timestamp(&updated, "user_profile", "updated_at")?,
                });
            }
            Ok(out)
        })
    }
}

fn row_to_fact(row: &rusqlite::Row<'_>) -> Result<FactRow, StoreError> {
    let category: String = row_helpers::get(row, 1, "user_facts", "category")?;
    let created: String = row_helpers::get(row, 3, "user_facts", "created_at")?;
    let updated: String = row_helpers::get(row, 4, "user_facts", "updated_at")?;
    Ok(FactRow {
        id: row_helpers::get(row, 0, "user_facts", "id")?,
        category: row_helpers::parse_enum(&category, "user_facts", "category")?,
        fact: row_helpers::get(row, 2, "user_facts", "fact")?,
        created_at: row_helpers::parse_timestamp(&created, "user_facts", "created_at")?,
        updated_at: row_helpers::parse_timestamp(&updated, "user_facts", "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> FactRepo {
        FactRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn add_list_by_category() {
        let repo = repo();
        repo.add(FactCategory::Identity, "Name is Ada").unwrap();
        repo.add(FactCategory::Career, "Writes compilers").unwrap();
        repo.add(FactCategory::Identity, "Lives in Lisbon").unwrap();

        let identity = repo.list(Some(FactCategory::Identity)).unwrap();
        assert_eq!(identity.len(), 2);
        assert_eq!(identity[1].fact, "Lives in Lisbon");
        assert_eq!(repo.list(None).unwrap().len(), 3);
    }

    #[test]
    fn update_and_delete() {
        let repo = repo();
        let row = repo.add(FactCategory::Preferences, "Likes tea").unwrap();
        let updated = repo.update(row.id, "Likes green tea").unwrap();
        assert_eq!(updated.fact, "Likes green tea");
        assert_eq!(updated.category, FactCategory::Preferences);

        repo.delete(row.id).unwrap();
        assert!(matches!(repo.get(row.id), Err(StoreError::NotFound(_))));
        assert!(matches!(repo.delete(row.id), Err(StoreError::NotFound(_))));
        assert!(matches!(repo.update(row.id, "x"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn profiles_upsert() {
        let repo = repo();
        repo.upsert_profile(FactCategory::Mindset, "Curious").unwrap();
        repo.upsert_profile(FactCategory::Mindset, "Curious and calm").unwrap();
        repo.upsert_profile(FactCategory::Career, "Engineer").unwrap();
        let profiles = repo.profiles().unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].category, FactCategory::Career);
        assert_eq!(profiles[1].summary, "Curious and calm");

        repo.delete_profile(FactCategory::Career).unwrap();
        assert_eq!(repo.profiles().unwrap().len(), 1);
    }

    #[test]
    fn category_parse() {
        for c in FactCategory::ALL {
            assert_eq!(c.to_string().parse::<FactCategory>().unwrap(), c);
        }
        assert!("hobbies".parse::<FactCategory>().is_err());
    }
}
