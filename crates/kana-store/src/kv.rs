use chrono::{DateTime, Duration, Utc};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Well-known keys.
pub mod keys {
    pub const USAGE_TOTAL_TOKENS: &str = "usage_total_tokens";
    pub const DAILY_COST: &str = "daily_cost";
    pub const NEXT_QUESTION: &str = "next_question";
    pub const RECENT_SUMMARY: &str = "recent_conversation_summary";
}

#[derive(Clone, Debug, PartialEq)]
pub struct KvEntry {
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Small cached values with last-updated tracking.
pub struct KvRepo {
    db: Database,
}

impl KvRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get_entry(key)?.map(|e| e.value))
    }

    pub fn get_entry(&self, key: &str) -> Result<Option<KvEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT value, updated_at FROM kv_store WHERE key = ?1")?;
            let mut rows = stmt.query([key])?;
            match rows.next()? {
                Some(row) => {
                    let updated: String = row_helpers::get(row, 1, "kv_store", "updated_at")?;
                    Ok(Some(KvEntry {
                        value: row_helpers::get(row, 0, "kv_store", "value")?,
                        updated_at: row_helpers::parse_timestamp(&updated, "kv_store", "updated_at")?,
                    }))
                }
                None => Ok(None),
            }
        })
    }

    /// Value of `key` if it was written no longer than `max_age` before `now`.
    pub fn get_fresh(
        &self,
        key: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .get_entry(key)?
            .filter(|e| now.signed_duration_since(e.updated_at) <= max_age)
            .map(|e| e.value))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set_at(key, value, Utc::now())
    }

    pub fn set_at(&self, key: &str, value: &str, updated_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![key, value, row_helpers::timestamp(updated_at)],
            )?;
            Ok(())
        })
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM kv_store WHERE key = ?1", [key])?;
            Ok(())
        })
    }

    /// Parse a stored number, treating a missing or unparsable value as absent.
    pub fn get_f64(&self, key: &str) -> Result<Option<f64>, StoreError> {
        Ok(self.get(key)?.and_then(|v| v.trim().parse().ok()))
    }
}
