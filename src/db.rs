use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::models::{
    DailyActivity, DailyAssignment, ProblemStatus, ProgressRecord, SpotLock, StudySettings,
};
use crate::store::{Store, StoreError, StoreResult};

const DAY_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn init(&self) -> StoreResult<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS daily_assignments (
                user_id TEXT PRIMARY KEY,
                date TEXT NOT NULL,
                revision INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS spot_locks (
                user_id TEXT NOT NULL,
                location_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                topic_display TEXT NOT NULL,
                locked INTEGER NOT NULL DEFAULT 0,
                questions_answered INTEGER NOT NULL DEFAULT 0,
                position INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, location_id),
                FOREIGN KEY (user_id) REFERENCES daily_assignments(user_id) ON DELETE CASCADE
            );

            -- Rows exist only for attempted exercises; a missing row means "new"
            CREATE TABLE IF NOT EXISTS problem_progress (
                user_id TEXT NOT NULL,
                exercise_id TEXT NOT NULL,
                status TEXT NOT NULL CHECK(status IN ('learning', 'mastered')),
                best_score INTEGER NOT NULL DEFAULT 0,
                review_count INTEGER NOT NULL DEFAULT 0,
                qualifying_streak INTEGER NOT NULL DEFAULT 0,
                interval_days INTEGER NOT NULL DEFAULT 0,
                last_reviewed_at TEXT,
                next_due_at TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (user_id, exercise_id)
            );

            CREATE TABLE IF NOT EXISTS study_settings (
                user_id TEXT PRIMARY KEY,
                target_days INTEGER NOT NULL,
                daily_cap INTEGER NOT NULL,
                daily_new_goal INTEGER NOT NULL,
                start_date TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS daily_activity (
                user_id TEXT NOT NULL,
                date TEXT NOT NULL,
                new_completed INTEGER NOT NULL DEFAULT 0,
                attempts_completed INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, date)
            );

            CREATE INDEX IF NOT EXISTS idx_progress_next_due ON problem_progress(user_id, next_due_at);
            CREATE INDEX IF NOT EXISTS idx_progress_status ON problem_progress(user_id, status);
            "#,
        )?;

        Ok(())
    }
}

fn parse_day(s: &str) -> StoreResult<NaiveDate> {
    NaiveDate::parse_from_str(s, DAY_FORMAT)
        .map_err(|e| StoreError::Corrupt(format!("bad date '{}': {}", s, e)))
}

fn parse_timestamp(s: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    match s {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", raw, e))),
    }
}

fn format_day(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

// Raw column values, converted outside the rusqlite row closure so that parse
// failures surface as StoreError::Corrupt.
struct ProgressRow {
    exercise_id: String,
    status: String,
    best_score: u8,
    review_count: u32,
    qualifying_streak: u32,
    interval_days: u32,
    last_reviewed_at: Option<String>,
    next_due_at: Option<String>,
}

impl ProgressRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            exercise_id: row.get(0)?,
            status: row.get(1)?,
            best_score: row.get(2)?,
            review_count: row.get(3)?,
            qualifying_streak: row.get(4)?,
            interval_days: row.get(5)?,
            last_reviewed_at: row.get(6)?,
            next_due_at: row.get(7)?,
        })
    }

    fn into_record(self) -> StoreResult<ProgressRecord> {
        let status = match ProblemStatus::from_str(&self.status) {
            Some(ProblemStatus::New) | None => {
                return Err(StoreError::Corrupt(format!(
                    "invalid status '{}' for {}",
                    self.status, self.exercise_id
                )))
            }
            Some(s) => s,
        };

        Ok(ProgressRecord {
            exercise_id: self.exercise_id,
            status,
            best_score: self.best_score,
            review_count: self.review_count,
            qualifying_streak: self.qualifying_streak,
            interval_days: self.interval_days,
            last_reviewed_at: parse_timestamp(self.last_reviewed_at)?,
            next_due_at: parse_timestamp(self.next_due_at)?,
        })
    }
}

const PROGRESS_COLUMNS: &str = "exercise_id, status, best_score, review_count, qualifying_streak, \
                                interval_days, last_reviewed_at, next_due_at";

impl Store for SqliteStore {
    fn load_assignment(&self, user: &str) -> StoreResult<Option<DailyAssignment>> {
        let header: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT date, revision FROM daily_assignments WHERE user_id = ?1",
                params![user],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((date, revision)) = header else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            r#"
            SELECT location_id, topic, topic_display, locked, questions_answered
            FROM spot_locks
            WHERE user_id = ?1
            ORDER BY position
            "#,
        )?;
        let rows = stmt.query_map(params![user], |row| {
            Ok(SpotLock {
                location_id: row.get(0)?,
                topic: row.get(1)?,
                topic_display: row.get(2)?,
                locked: row.get(3)?,
                questions_answered: row.get(4)?,
            })
        })?;
        let assignments = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(DailyAssignment {
            date: parse_day(&date)?,
            assignments,
            revision: revision as u64,
        }))
    }

    fn save_assignment(&self, user: &str, assignment: &DailyAssignment) -> StoreResult<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO daily_assignments (user_id, date, revision) VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET date = excluded.date, revision = excluded.revision
            "#,
            params![user, format_day(assignment.date), assignment.revision as i64],
        )?;
        tx.execute("DELETE FROM spot_locks WHERE user_id = ?1", params![user])?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO spot_locks
                    (user_id, location_id, topic, topic_display, locked, questions_answered, position)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for (position, lock) in assignment.assignments.iter().enumerate() {
                stmt.execute(params![
                    user,
                    lock.location_id,
                    lock.topic,
                    lock.topic_display,
                    lock.locked,
                    lock.questions_answered,
                    position as i64
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn delete_assignment(&self, user: &str) -> StoreResult<()> {
        self.conn.execute(
            "DELETE FROM daily_assignments WHERE user_id = ?1",
            params![user],
        )?;
        Ok(())
    }

    fn load_progress(&self, user: &str, exercise_id: &str) -> StoreResult<Option<ProgressRecord>> {
        let sql = format!(
            "SELECT {} FROM problem_progress WHERE user_id = ?1 AND exercise_id = ?2",
            PROGRESS_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![user, exercise_id], ProgressRow::from_row)
            .optional()?;

        row.map(ProgressRow::into_record).transpose()
    }

    fn list_progress(&self, user: &str) -> StoreResult<Vec<ProgressRecord>> {
        let sql = format!(
            "SELECT {} FROM problem_progress WHERE user_id = ?1 ORDER BY exercise_id",
            PROGRESS_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user], ProgressRow::from_row)?;
        let rows = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(ProgressRow::into_record).collect()
    }

    fn save_progress(&self, user: &str, record: &ProgressRecord) -> StoreResult<()> {
        if record.status == ProblemStatus::New {
            return Err(StoreError::Corrupt(format!(
                "refusing to persist 'new' status for {}",
                record.exercise_id
            )));
        }

        self.conn.execute(
            r#"
            INSERT INTO problem_progress
                (user_id, exercise_id, status, best_score, review_count, qualifying_streak,
                 interval_days, last_reviewed_at, next_due_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))
            ON CONFLICT(user_id, exercise_id) DO UPDATE SET
                status = excluded.status,
                best_score = excluded.best_score,
                review_count = excluded.review_count,
                qualifying_streak = excluded.qualifying_streak,
                interval_days = excluded.interval_days,
                last_reviewed_at = excluded.last_reviewed_at,
                next_due_at = excluded.next_due_at,
                updated_at = excluded.updated_at
            "#,
            params![
                user,
                record.exercise_id,
                record.status.as_str(),
                record.best_score,
                record.review_count,
                record.qualifying_streak,
                record.interval_days,
                record.last_reviewed_at.map(|t| t.to_rfc3339()),
                record.next_due_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn delete_progress(&self, user: &str) -> StoreResult<()> {
        self.conn.execute(
            "DELETE FROM problem_progress WHERE user_id = ?1",
            params![user],
        )?;
        Ok(())
    }

    fn load_settings(&self, user: &str) -> StoreResult<Option<StudySettings>> {
        let row: Option<(u32, u32, u32, String)> = self
            .conn
            .query_row(
                r#"
                SELECT target_days, daily_cap, daily_new_goal, start_date
                FROM study_settings
                WHERE user_id = ?1
                "#,
                params![user],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((target_days, daily_cap, daily_new_goal, start_date)) => Ok(Some(StudySettings {
                target_days,
                daily_cap,
                daily_new_goal,
                start_date: parse_day(&start_date)?,
            })),
        }
    }

    fn save_settings(&self, user: &str, settings: &StudySettings) -> StoreResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO study_settings (user_id, target_days, daily_cap, daily_new_goal, start_date)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id) DO UPDATE SET
                target_days = excluded.target_days,
                daily_cap = excluded.daily_cap,
                daily_new_goal = excluded.daily_new_goal,
                start_date = excluded.start_date,
                updated_at = datetime('now')
            "#,
            params![
                user,
                settings.target_days,
                settings.daily_cap,
                settings.daily_new_goal,
                format_day(settings.start_date)
            ],
        )?;
        Ok(())
    }

    fn load_activity(&self, user: &str, day: NaiveDate) -> StoreResult<Option<DailyActivity>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT new_completed, attempts_completed
                FROM daily_activity
                WHERE user_id = ?1 AND date = ?2
                "#,
                params![user, format_day(day)],
                |row| {
                    Ok(DailyActivity {
                        date: day,
                        new_completed: row.get(0)?,
                        attempts_completed: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn save_activity(&self, user: &str, activity: &DailyActivity) -> StoreResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let date = format_day(activity.date);

        tx.execute(
            r#"
            INSERT INTO daily_activity (user_id, date, new_completed, attempts_completed)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id, date) DO UPDATE SET
                new_completed = excluded.new_completed,
                attempts_completed = excluded.attempts_completed
            "#,
            params![
                user,
                date,
                activity.new_completed,
                activity.attempts_completed
            ],
        )?;
        tx.execute(
            "DELETE FROM daily_activity WHERE user_id = ?1 AND date < ?2",
            params![user, date],
        )?;

        tx.commit()?;
        Ok(())
    }
}
