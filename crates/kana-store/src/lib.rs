pub mod conversations;
pub mod database;
pub mod diary;
pub mod error;
pub mod facts;
pub mod kv;
pub mod row_helpers;
pub mod schema;

pub use conversations::{ConversationRepo, ConversationRow};
pub use database::Database;
pub use diary::{DiaryLevel, DiaryRecord, DiaryRepo};
pub use error::StoreError;
pub use facts::{FactCategory, FactRepo, FactRow, ProfileRow};
pub use kv::{KvEntry, KvRepo};
