use chrono::NaiveDate;
use thiserror::Error;

use crate::models::{DailyActivity, DailyAssignment, ProgressRecord, StudySettings};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence for everything the scheduler reads or writes, one namespace per
/// record kind. Writes are whole-record upserts; the last writer wins.
pub trait Store {
    fn load_assignment(&self, user: &str) -> StoreResult<Option<DailyAssignment>>;
    fn save_assignment(&self, user: &str, assignment: &DailyAssignment) -> StoreResult<()>;
    fn delete_assignment(&self, user: &str) -> StoreResult<()>;

    fn load_progress(&self, user: &str, exercise_id: &str) -> StoreResult<Option<ProgressRecord>>;
    fn list_progress(&self, user: &str) -> StoreResult<Vec<ProgressRecord>>;
    fn save_progress(&self, user: &str, record: &ProgressRecord) -> StoreResult<()>;
    fn delete_progress(&self, user: &str) -> StoreResult<()>;

    fn load_settings(&self, user: &str) -> StoreResult<Option<StudySettings>>;
    fn save_settings(&self, user: &str, settings: &StudySettings) -> StoreResult<()>;

    fn load_activity(&self, user: &str, day: NaiveDate) -> StoreResult<Option<DailyActivity>>;
    /// Upserts the day's counters and drops the user's earlier days.
    fn save_activity(&self, user: &str, activity: &DailyActivity) -> StoreResult<()>;
}


#[cfg(test)]
pub(crate) use memory::MemoryStore;
