//! Durable session ledger contract.
//!
//! The lifecycle manager only needs this narrow surface from durable
//! storage. [`Database`](crate::Database) is the SQLite implementation.

use crate::error::Result;
use crate::types::{
    CompletedSession, Score, ScorePoint, SessionId, SessionRecord, SessionStatus, TopicId, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Permanent storage for session metadata and score points.
pub trait SessionLedger: Send + Sync {
    /// Create an `IN_PROGRESS` record.
    ///
    /// Fails with [`Error::ConcurrencyConflict`](crate::Error::ConcurrencyConflict)
    /// if the user already has a live session.
    fn create_session(
        &self,
        user_id: UserId,
        topic_id: TopicId,
        created_at: DateTime<Utc>,
    ) -> Result<SessionRecord>;

    fn get_session(&self, session_id: SessionId) -> Result<Option<SessionRecord>>;

    fn find_sessions(&self, user_id: UserId, status: SessionStatus) -> Result<Vec<SessionRecord>>;

    /// Delete the record (and any score points) if it is still in
    /// progress. Returns whether a row was removed.
    fn delete_in_progress_session(&self, session_id: SessionId) -> Result<bool>;

    /// Insert all scores for a session atomically.
    fn insert_score_points(&self, session_id: SessionId, scores: &[Score])
        -> Result<Vec<ScorePoint>>;

    fn score_points(&self, session_id: SessionId) -> Result<Vec<ScorePoint>>;

    /// Flip an `IN_PROGRESS` record to `COMPLETED`. Returns false when no
    /// in-progress record matched.
    fn mark_completed(
        &self,
        session_id: SessionId,
        completed_at: DateTime<Utc>,
        transcript_hash: Option<&str>,
    ) -> Result<bool>;

    /// Sum of score points across the user's completed sessions.
    fn total_experience(&self, user_id: UserId) -> Result<u64>;

    /// Per-dimension totals across the user's completed sessions.
    fn experience_by_dimension(&self, user_id: UserId) -> Result<BTreeMap<String, u64>>;

    /// Completed sessions, most recent first.
    fn completed_sessions(&self, user_id: UserId) -> Result<Vec<CompletedSession>>;
}
