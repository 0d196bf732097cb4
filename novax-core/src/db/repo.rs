//! Database repository layer
//!
//! SQLite implementation of the [`SessionLedger`] contract.

use crate::error::{Error, Result};
use crate::ledger::SessionLedger;
use crate::types::*;
use chrono::{DateTime, Utc};
use rusqlite::{ffi, params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Database handle (single connection shared behind a mutex)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves SQLite itself consistent
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_to_session(row: &Row) -> rusqlite::Result<SessionRecord> {
        let status_str: String = row.get("status")?;
        let created_at_str: String = row.get("created_at")?;
        let completed_at_str: Option<String> = row.get("completed_at")?;

        Ok(SessionRecord {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            topic_id: row.get("topic_id")?,
            status: status_str.parse().unwrap_or(SessionStatus::InProgress),
            created_at: parse_timestamp(&created_at_str).unwrap_or_else(Utc::now),
            completed_at: completed_at_str.as_deref().and_then(parse_timestamp),
            transcript_hash: row.get("transcript_hash")?,
        })
    }

    fn row_to_score_point(row: &Row) -> rusqlite::Result<ScorePoint> {
        let value: i64 = row.get("value")?;
        Ok(ScorePoint {
            id: row.get("id")?,
            session_id: row.get("session_id")?,
            dimension: row.get("dimension")?,
            value: u8::try_from(value).unwrap_or(u8::MAX),
        })
    }

    /// Count sessions by durable status
    pub fn count_sessions_by_status(&self) -> Result<BTreeMap<String, i64>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM sessions GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
        Ok(counts)
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn constraint_violated(err: &rusqlite::Error, extended_code: std::os::raw::c_int) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == extended_code
    )
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    constraint_violated(err, ffi::SQLITE_CONSTRAINT_UNIQUE)
}

fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    constraint_violated(err, ffi::SQLITE_CONSTRAINT_FOREIGNKEY)
}

impl SessionLedger for Database {
    fn create_session(
        &self,
        user_id: UserId,
        topic_id: TopicId,
        created_at: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        let conn = self.connection();
        let inserted = conn.execute(
            r#"
            INSERT INTO sessions (user_id, topic_id, status, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                user_id,
                topic_id,
                SessionStatus::InProgress.as_str(),
                created_at.to_rfc3339(),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(Error::ConcurrencyConflict(format!(
                    "user {} already has a session in progress",
                    user_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(SessionRecord {
            id: conn.last_insert_rowid(),
            user_id,
            topic_id,
            status: SessionStatus::InProgress,
            created_at,
            completed_at: None,
            transcript_hash: None,
        })
    }

    fn get_session(&self, session_id: SessionId) -> Result<Option<SessionRecord>> {
        let conn = self.connection();
        conn.query_row(
            "SELECT * FROM sessions WHERE id = ?",
            [session_id],
            Self::row_to_session,
        )
        .optional()
        .map_err(Error::from)
    }

    fn find_sessions(&self, user_id: UserId, status: SessionStatus) -> Result<Vec<SessionRecord>> {
        let conn = self.connection();
        let mut stmt =
            conn.prepare("SELECT * FROM sessions WHERE user_id = ?1 AND status = ?2 ORDER BY id")?;
        let sessions = stmt
            .query_map(params![user_id, status.as_str()], Self::row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    fn delete_in_progress_session(&self, session_id: SessionId) -> Result<bool> {
        let conn = self.connection();
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE id = ?1 AND status = ?2",
            params![session_id, SessionStatus::InProgress.as_str()],
        )?;
        Ok(deleted > 0)
    }

    fn insert_score_points(
        &self,
        session_id: SessionId,
        scores: &[Score],
    ) -> Result<Vec<ScorePoint>> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;

        let mut points = Vec::with_capacity(scores.len());
        for score in scores {
            let inserted = tx.execute(
                "INSERT INTO score_points (session_id, dimension, value) VALUES (?1, ?2, ?3)",
                params![session_id, score.dimension, score.value],
            );
            match inserted {
                Ok(_) => {}
                // The session row is gone
                Err(e) if is_foreign_key_violation(&e) => {
                    return Err(Error::SessionNotFound(session_id));
                }
                Err(e) => return Err(e.into()),
            }
            points.push(ScorePoint {
                id: tx.last_insert_rowid(),
                session_id,
                dimension: score.dimension.clone(),
                value: score.value,
            });
        }

        tx.commit()?;
        Ok(points)
    }

    fn score_points(&self, session_id: SessionId) -> Result<Vec<ScorePoint>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT * FROM score_points WHERE session_id = ? ORDER BY id")?;
        let points = stmt
            .query_map([session_id], Self::row_to_score_point)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(points)
    }

    fn mark_completed(
        &self,
        session_id: SessionId,
        completed_at: DateTime<Utc>,
        transcript_hash: Option<&str>,
    ) -> Result<bool> {
        let conn = self.connection();
        let updated = conn.execute(
            r#"
            UPDATE sessions
            SET status = ?1, completed_at = ?2, transcript_hash = ?3
            WHERE id = ?4 AND status = ?5
            "#,
            params![
                SessionStatus::Completed.as_str(),
                completed_at.to_rfc3339(),
                transcript_hash,
                session_id,
                SessionStatus::InProgress.as_str(),
            ],
        )?;
        Ok(updated == 1)
    }

    fn total_experience(&self, user_id: UserId) -> Result<u64> {
        let conn = self.connection();
        let total: i64 = conn.query_row(
            r#"
            SELECT COALESCE(SUM(p.value), 0)
            FROM score_points p
            JOIN sessions s ON s.id = p.session_id
            WHERE s.user_id = ?1 AND s.status = ?2
            "#,
            params![user_id, SessionStatus::Completed.as_str()],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }

    fn experience_by_dimension(&self, user_id: UserId) -> Result<BTreeMap<String, u64>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            r#"
            SELECT p.dimension, SUM(p.value)
            FROM score_points p
            JOIN sessions s ON s.id = p.session_id
            WHERE s.user_id = ?1 AND s.status = ?2
            GROUP BY p.dimension
            "#,
        )?;
        let totals = stmt
            .query_map(params![user_id, SessionStatus::Completed.as_str()], |row| {
                let total: i64 = row.get(1)?;
                Ok((row.get::<_, String>(0)?, total.max(0) as u64))
            })?
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
        Ok(totals)
    }

    fn completed_sessions(&self, user_id: UserId) -> Result<Vec<CompletedSession>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            r#"
            SELECT s.id, s.topic_id, s.completed_at, p.dimension, p.value
            FROM sessions s
            LEFT JOIN score_points p ON p.session_id = s.id
            WHERE s.user_id = ?1 AND s.status = ?2
            ORDER BY s.completed_at DESC, s.id DESC, p.id ASC
            "#,
        )?;

        let rows = stmt
            .query_map(params![user_id, SessionStatus::Completed.as_str()], |row| {
                Ok((
                    row.get::<_, SessionId>(0)?,
                    row.get::<_, TopicId>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // Rows arrive grouped by session; fold each run into one entry
        let mut sessions: Vec<CompletedSession> = Vec::new();
        for (id, topic_id, completed_at, dimension, value) in rows {
            if sessions.last().map(|s| s.id) != Some(id) {
                sessions.push(CompletedSession {
                    id,
                    topic_id,
                    completed_at: completed_at.as_deref().and_then(parse_timestamp),
                    total_exp: 0,
                    breakdown: BTreeMap::new(),
                });
            }
            if let (Some(session), Some(dimension), Some(value)) =
                (sessions.last_mut(), dimension, value)
            {
                let value = value.max(0) as u64;
                session.total_exp += value;
                *session.breakdown.entry(dimension).or_insert(0) += value;
            }
        }

        Ok(sessions)
    }
}
