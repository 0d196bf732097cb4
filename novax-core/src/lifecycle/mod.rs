//! Session lifecycle manager.
//!
//! Owns the session state machine:
//!
//! ```text
//! NONE ──start──▶ IN_PROGRESS ──complete──▶ COMPLETED   (record kept)
//!                      │
//!                      └──abandon / evict──▶ ABANDONED   (record deleted)
//! ```
//!
//! and coordinates the transcript buffer, the durable ledger and the
//! scoring gateway. All stores are injected, so the manager holds no
//! process-wide state of its own beyond its lock tables.
//!
//! # Locking
//!
//! - A per-user lock serializes eviction-then-create in [`start`] and
//!   [`cleanup_stale`]. The ledger's unique in-progress index backs this
//!   up across processes.
//! - A per-session lock orders appends and keeps them out of a running
//!   finalization.
//! - A per-session finalization claim makes `complete`, `abandon` and
//!   eviction mutually exclusive; the loser gets
//!   [`Error::ConcurrencyConflict`] immediately.
//!
//! Locks are always taken in the order user, claim, session. Scoring runs
//! holding only its own session's claim and lock.
//!
//! [`start`]: SessionLifecycle::start
//! [`cleanup_stale`]: SessionLifecycle::cleanup_stale

mod locks;

use crate::error::{Error, PartialStage, Result};
use crate::ledger::SessionLedger;
use crate::leveling::LevelSchedule;
use crate::markers::{self, MentorReply};
use crate::scoring::ScoringGateway;
use crate::transcript::{self, TranscriptBuffer};
use crate::types::{
    CompletedSession, CompletionOutcome, ExperienceReport, Role, SessionId, SessionRecord,
    SessionStatus, TopicId, TranscriptEntry, TranscriptSummary, UserId,
};
use chrono::Utc;
use locks::{hold, Claim, ClaimSet, LockTable};
use std::sync::Arc;

/// Session state machine over injected stores.
pub struct SessionLifecycle {
    ledger: Arc<dyn SessionLedger>,
    buffer: Arc<dyn TranscriptBuffer>,
    gateway: Arc<dyn ScoringGateway>,
    schedule: LevelSchedule,
    user_locks: LockTable<UserId>,
    session_locks: LockTable<SessionId>,
    finalizing: ClaimSet<SessionId>,
}

impl SessionLifecycle {
    pub fn new(
        ledger: Arc<dyn SessionLedger>,
        buffer: Arc<dyn TranscriptBuffer>,
        gateway: Arc<dyn ScoringGateway>,
        schedule: LevelSchedule,
    ) -> Self {
        Self {
            ledger,
            buffer,
            gateway,
            schedule,
            user_locks: LockTable::new(),
            session_locks: LockTable::new(),
            finalizing: ClaimSet::new(),
        }
    }

    pub fn schedule(&self) -> &LevelSchedule {
        &self.schedule
    }

    /// Start a session, evicting any in-progress session the user has.
    ///
    /// On return the user has exactly one in-progress session (this one)
    /// and its buffer is empty.
    pub fn start(&self, user_id: UserId, topic_id: TopicId) -> Result<SessionId> {
        let handle = self.user_locks.handle(user_id);
        let _user = hold(&handle);

        let evicted = self.evict_in_progress(user_id)?;
        let record = self.ledger.create_session(user_id, topic_id, Utc::now())?;
        // A shared buffer can outlive the ledger that issued this id
        self.buffer.purge(record.id)?;

        tracing::info!(
            user_id,
            topic_id,
            session_id = record.id,
            evicted,
            "Session started"
        );
        Ok(record.id)
    }

    /// Append one message to an in-progress session.
    ///
    /// The durable record is checked on every call, so messages for an
    /// abandoned or completed session fail with
    /// [`Error::SessionNotFound`] instead of leaking into the buffer.
    pub fn record_message(
        &self,
        session_id: SessionId,
        role: Role,
        content: impl Into<String>,
    ) -> Result<()> {
        let handle = self.session_locks.handle(session_id);
        let _session = hold(&handle);

        self.require_in_progress(session_id)?;
        self.buffer
            .append(session_id, TranscriptEntry::new(role, content))?;
        tracing::debug!(session_id, role = %role, "Message recorded");
        Ok(())
    }

    /// Record a raw mentor reply and return its parsed markers.
    ///
    /// The reply is stored as written; callers show
    /// [`MentorReply::display_text`] to the user.
    pub fn record_mentor_reply(&self, session_id: SessionId, raw: &str) -> Result<MentorReply> {
        let reply = markers::parse_reply(raw);
        self.record_message(session_id, Role::Assistant, raw)?;
        if reply.has_markers() {
            tracing::debug!(
                session_id,
                marker_count = reply.markers.len(),
                final_solution = reply.signals.final_solution,
                exp_reward = reply.signals.exp_reward,
                "Mentor reply carried markers"
            );
        }
        Ok(reply)
    }

    /// Cheap existence probe: true iff the session's buffer is non-empty.
    ///
    /// A started session with no messages yet reads as false. Use
    /// [`durable_status`](Self::durable_status) for an exact answer.
    pub fn status(&self, session_id: SessionId) -> Result<bool> {
        Ok(!self.buffer.is_empty(session_id)?)
    }

    /// Status of the durable record; `None` once abandoned or never started.
    pub fn durable_status(&self, session_id: SessionId) -> Result<Option<SessionStatus>> {
        Ok(self.ledger.get_session(session_id)?.map(|r| r.status))
    }

    /// Score the session, persist its score points, mark it completed and
    /// retire its buffer.
    ///
    /// Nothing durable changes when the transcript is empty or scoring
    /// fails, so those errors are safe to retry. Once score points exist,
    /// a retry never re-scores: it returns [`Error::PartialCompletion`]
    /// (or [`Error::SessionCompleted`] after full success).
    ///
    /// If another process discards the record while it is being scored,
    /// this returns [`Error::ConcurrencyConflict`] and nothing is kept.
    ///
    /// The user's total is read after the session is committed and its
    /// buffer purged. If that read fails the error is returned as is, but
    /// the session is already completed: a retry returns
    /// [`Error::SessionCompleted`], and [`experience`](Self::experience)
    /// reports the totals.
    pub fn complete(
        &self,
        session_id: SessionId,
        user_id: UserId,
        topic_id: TopicId,
    ) -> Result<CompletionOutcome> {
        let _claim = self.claim(session_id)?;
        let handle = self.session_locks.handle(session_id);
        let _session = hold(&handle);

        let record = self
            .ledger
            .get_session(session_id)?
            .filter(|r| r.user_id == user_id && r.topic_id == topic_id)
            .ok_or(Error::SessionNotFound(session_id))?;

        if record.status == SessionStatus::Completed {
            if !self.buffer.is_empty(session_id)? {
                tracing::warn!(session_id, "Purging buffer left behind by completion");
                self.buffer.purge(session_id)?;
            }
            return Err(Error::SessionCompleted(session_id));
        }

        if !self.ledger.score_points(session_id)?.is_empty() {
            return Err(Error::PartialCompletion {
                session_id,
                stage: PartialStage::StatusPending,
                reason: "score points already stored for an in-progress record".to_string(),
            });
        }

        let entries = self.buffer.read_all(session_id)?;
        if entries.is_empty() {
            return Err(Error::EmptySession(session_id));
        }
        let text = transcript::render_transcript(&entries);

        let scores = self.gateway.assess(&text).map_err(|e| match e {
            Error::Assessment(_) => e,
            other => Error::Assessment(other.to_string()),
        })?;
        if scores.is_empty() {
            return Err(Error::Assessment("gateway returned no scores".to_string()));
        }

        let hash = transcript::transcript_hash(&text);
        let score_points = match self.ledger.insert_score_points(session_id, &scores) {
            Ok(points) => points,
            Err(Error::SessionNotFound(_)) => return Err(self.lost_to_discard(session_id)),
            Err(e) => return Err(e),
        };

        match self
            .ledger
            .mark_completed(session_id, Utc::now(), Some(&hash))
        {
            Ok(true) => {}
            Ok(false) => return Err(self.status_flip_refused(session_id)),
            Err(e) => {
                tracing::error!(session_id, error = %e, "Score points stored but status update failed");
                return Err(partial(session_id, PartialStage::StatusPending, e));
            }
        }

        if let Err(e) = self.buffer.purge(session_id) {
            tracing::error!(session_id, error = %e, "Session completed but buffer purge failed");
            return Err(partial(session_id, PartialStage::BufferRetained, e));
        }

        let session_exp: u64 = score_points.iter().map(|p| u64::from(p.value)).sum();
        let total_exp = self.ledger.total_experience(user_id)?;
        let level = self.schedule.exp_to_level(total_exp);

        tracing::info!(
            session_id,
            user_id,
            topic_id,
            message_count = entries.len(),
            session_exp,
            total_exp,
            level,
            "Session completed"
        );

        Ok(CompletionOutcome {
            session_id,
            score_points,
            session_exp,
            total_exp,
            level,
            message_count: entries.len(),
        })
    }

    /// Discard an in-progress session: purge its buffer and delete its
    /// record. Unknown sessions are a no-op; completed records are kept.
    pub fn abandon(&self, session_id: SessionId) -> Result<()> {
        let _claim = self.claim(session_id)?;
        let handle = self.session_locks.handle(session_id);
        let _session = hold(&handle);

        self.discard(session_id)?;
        Ok(())
    }

    /// Evict every in-progress session of the user. Returns how many
    /// records were deleted.
    pub fn cleanup_stale(&self, user_id: UserId) -> Result<usize> {
        let handle = self.user_locks.handle(user_id);
        let _user = hold(&handle);
        self.evict_in_progress(user_id)
    }

    /// Message count and a short preview of the buffered transcript.
    pub fn session_summary(&self, session_id: SessionId) -> Result<Option<TranscriptSummary>> {
        let entries = self.buffer.read_all(session_id)?;
        Ok(transcript::summarize(session_id, &entries))
    }

    /// Experience totals and level progress across completed sessions.
    pub fn experience(&self, user_id: UserId) -> Result<ExperienceReport> {
        let by_dimension = self.ledger.experience_by_dimension(user_id)?;
        let total = self.ledger.total_experience(user_id)?;
        Ok(ExperienceReport {
            user_id,
            by_dimension,
            progress: self.schedule.progress(total),
        })
    }

    /// Completed sessions, most recent first.
    pub fn completed_sessions(&self, user_id: UserId) -> Result<Vec<CompletedSession>> {
        self.ledger.completed_sessions(user_id)
    }

    fn claim(&self, session_id: SessionId) -> Result<Claim<'_, SessionId>> {
        self.finalizing.try_claim(session_id).ok_or_else(|| {
            tracing::warn!(session_id, "Session is already being finalized");
            Error::ConcurrencyConflict(format!("session {session_id} is already being finalized"))
        })
    }

    fn require_in_progress(&self, session_id: SessionId) -> Result<SessionRecord> {
        self.ledger
            .get_session(session_id)?
            .filter(|r| r.status == SessionStatus::InProgress)
            .ok_or(Error::SessionNotFound(session_id))
    }

    /// The record vanished under a running completion.
    fn lost_to_discard(&self, session_id: SessionId) -> Error {
        tracing::warn!(session_id, "Session was discarded while being scored");
        Error::ConcurrencyConflict(format!(
            "session {session_id} was discarded while being completed"
        ))
    }

    /// `mark_completed` matched no in-progress row. Only report a partial
    /// completion when score points actually survived.
    fn status_flip_refused(&self, session_id: SessionId) -> Error {
        let record = match self.ledger.get_session(session_id) {
            Ok(record) => record,
            Err(e) => return partial(session_id, PartialStage::StatusPending, e),
        };
        if record.is_none() {
            return self.lost_to_discard(session_id);
        }
        match self.ledger.score_points(session_id) {
            Ok(points) if points.is_empty() => {
                Error::ConcurrencyConflict(format!(
                    "session {session_id} changed state while being completed"
                ))
            }
            Ok(_) => partial(
                session_id,
                PartialStage::StatusPending,
                "record was no longer in progress",
            ),
            Err(e) => partial(session_id, PartialStage::StatusPending, e),
        }
    }

    /// Purge then delete. Caller holds the claim and session lock.
    fn discard(&self, session_id: SessionId) -> Result<bool> {
        self.buffer.purge(session_id)?;
        let deleted = self.ledger.delete_in_progress_session(session_id)?;
        tracing::info!(session_id, deleted, "Session abandoned");
        Ok(deleted)
    }

    /// Caller holds the user's lock.
    fn evict_in_progress(&self, user_id: UserId) -> Result<usize> {
        let stale = self
            .ledger
            .find_sessions(user_id, SessionStatus::InProgress)?;

        let mut evicted = 0;
        for record in stale {
            let _claim = self.claim(record.id)?;
            let handle = self.session_locks.handle(record.id);
            let _session = hold(&handle);
            if self.discard(record.id)? {
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::info!(user_id, evicted, "Evicted stale sessions");
        }
        Ok(evicted)
    }
}

fn partial(session_id: SessionId, stage: PartialStage, reason: impl ToString) -> Error {
    Error::PartialCompletion {
        session_id,
        stage,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::transcript::MemoryTranscriptBuffer;
    use crate::types::Score;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedGateway {
        calls: AtomicUsize,
    }

    impl ScoringGateway for FixedGateway {
        fn assess(&self, _transcript: &str) -> Result<Vec<Score>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Score::new("Clarity", 60), Score::new("Logic", 40)])
        }
    }

    fn lifecycle() -> (SessionLifecycle, Arc<FixedGateway>) {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let gateway = Arc::new(FixedGateway {
            calls: AtomicUsize::new(0),
        });
        let manager = SessionLifecycle::new(
            Arc::new(db),
            Arc::new(MemoryTranscriptBuffer::default()),
            gateway.clone(),
            LevelSchedule::default(),
        );
        (manager, gateway)
    }

    #[test]
    fn complete_scores_and_retires_buffer() {
        let (manager, gateway) = lifecycle();
        let id = manager.start(1, 2).unwrap();
        manager.record_message(id, Role::User, "hi").unwrap();
        assert!(manager.status(id).unwrap());

        let outcome = manager.complete(id, 1, 2).unwrap();
        assert_eq!(outcome.session_exp, 100);
        assert_eq!(outcome.total_exp, 100);
        assert_eq!(outcome.level, 1);
        assert_eq!(outcome.message_count, 1);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);

        assert!(!manager.status(id).unwrap());
        assert_eq!(
            manager.durable_status(id).unwrap(),
            Some(SessionStatus::Completed)
        );
    }

    #[test]
    fn complete_checks_owner_and_topic() {
        let (manager, _) = lifecycle();
        let id = manager.start(1, 2).unwrap();
        manager.record_message(id, Role::User, "hi").unwrap();

        assert!(matches!(
            manager.complete(id, 9, 2),
            Err(Error::SessionNotFound(_))
        ));
        assert!(matches!(
            manager.complete(id, 1, 9),
            Err(Error::SessionNotFound(_))
        ));
        assert!(manager.complete(id, 1, 2).is_ok());
    }

    #[test]
    fn held_claim_blocks_finalization() {
        let (manager, _) = lifecycle();
        let id = manager.start(1, 2).unwrap();
        manager.record_message(id, Role::User, "hi").unwrap();

        let claim = manager.claim(id).unwrap();
        assert!(matches!(
            manager.abandon(id),
            Err(Error::ConcurrencyConflict(_))
        ));
        assert!(matches!(
            manager.complete(id, 1, 2),
            Err(Error::ConcurrencyConflict(_))
        ));
        assert!(matches!(
            manager.start(1, 3),
            Err(Error::ConcurrencyConflict(_))
        ));
        drop(claim);

        assert!(manager.abandon(id).is_ok());
        assert_eq!(manager.durable_status(id).unwrap(), None);
    }

    #[test]
    fn mentor_reply_is_stored_raw() {
        let (manager, _) = lifecycle();
        let id = manager.start(1, 2).unwrap();
        let reply = manager
            .record_mentor_reply(id, "Good. <FINAL_SOLUTION=YES>")
            .unwrap();
        assert_eq!(reply.display_text, "Good.");
        assert!(reply.signals.final_solution);

        let summary = manager.session_summary(id).unwrap().unwrap();
        assert_eq!(summary.message_count, 1);
        assert!(summary.preview[0].contains("<FINAL_SOLUTION=YES>"));
    }
}
