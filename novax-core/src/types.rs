//! Core domain types for novax
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | One bounded tutoring conversation between a learner and the mentor, scoped to a topic |
//! | **Transcript** | The ordered, role-tagged messages of a session while it is in progress |
//! | **ScorePoint** | One named-dimension score produced by assessing a finished transcript |
//! | **Experience (EXP)** | Sum of score point values across a user's completed sessions |
//! | **Level** | A stage derived from cumulative EXP through a [`LevelSchedule`](crate::LevelSchedule) |
//!
//! Abandoned sessions are not a status: abandoning deletes the record.

use crate::leveling::LevelProgress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Durable-store-assigned session identifier.
pub type SessionId = i64;

/// Identifier of the learner owning a session.
pub type UserId = i64;

/// Reference to the learning topic a session is scoped to.
pub type TopicId = i64;

// ============================================
// Transcript
// ============================================

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// One message of an in-progress conversation.
///
/// Entries are never mutated after they are appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
}

impl TranscriptEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Short description of a live transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptSummary {
    pub session_id: SessionId,
    pub message_count: usize,
    /// The last few entries as `role: content...`
    pub preview: Vec<String>,
}

// ============================================
// Session
// ============================================

/// Durable status of a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Conversation running; transcript lives in the buffer
    InProgress,
    /// Scored and retained; terminal
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "IN_PROGRESS",
            SessionStatus::Completed => "COMPLETED",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(SessionStatus::InProgress),
            "COMPLETED" => Ok(SessionStatus::Completed),
            _ => Err(format!("unknown session status: {}", s)),
        }
    }
}

/// Session metadata as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub user_id: UserId,
    pub topic_id: TopicId,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// SHA-256 of the assessed transcript, set on completion
    pub transcript_hash: Option<String>,
}

// ============================================
// Scores
// ============================================

/// One dimension of an assessment, before it is attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub dimension: String,
    /// Integer in `0..=100`
    pub value: u8,
}

impl Score {
    pub fn new(dimension: impl Into<String>, value: u8) -> Self {
        Self {
            dimension: dimension.into(),
            value,
        }
    }
}

/// A persisted score owned by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScorePoint {
    pub id: i64,
    pub session_id: SessionId,
    pub dimension: String,
    pub value: u8,
}

/// Result of a successful `complete`.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    pub session_id: SessionId,
    pub score_points: Vec<ScorePoint>,
    /// Experience earned by this session alone
    pub session_exp: u64,
    /// User's experience across all completed sessions, this one included
    pub total_exp: u64,
    pub level: u32,
    pub message_count: usize,
}

/// A completed session with its score breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedSession {
    pub id: SessionId,
    pub topic_id: TopicId,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_exp: u64,
    pub breakdown: BTreeMap<String, u64>,
}

/// Experience dashboard for one user.
#[derive(Debug, Clone, Serialize)]
pub struct ExperienceReport {
    pub user_id: UserId,
    /// Totals per score dimension across completed sessions
    pub by_dimension: BTreeMap<String, u64>,
    pub progress: LevelProgress,
}
