//! Process-local transcript buffer.

use super::TranscriptBuffer;
use crate::error::Result;
use crate::types::{SessionId, TranscriptEntry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Map size at which inserting a new session first sweeps expired logs.
const SWEEP_THRESHOLD: usize = 1024;

struct SessionLog {
    entries: Vec<TranscriptEntry>,
    touched_at: Instant,
}

impl SessionLog {
    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.touched_at.elapsed() > ttl)
    }
}

/// In-memory [`TranscriptBuffer`].
///
/// The session map is locked only long enough to find a session's own log,
/// so appends to different sessions never wait on each other. With a TTL,
/// a log untouched for longer than the TTL reads as empty. Expired logs
/// are dropped by [`evict_expired`](Self::evict_expired), and by a sweep
/// whenever a new session arrives while the map is large.
pub struct MemoryTranscriptBuffer {
    logs: RwLock<HashMap<SessionId, Arc<Mutex<SessionLog>>>>,
    ttl: Option<Duration>,
}

impl Default for MemoryTranscriptBuffer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MemoryTranscriptBuffer {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn log(&self, session_id: SessionId) -> Option<Arc<Mutex<SessionLog>>> {
        let logs = self.logs.read().unwrap_or_else(PoisonError::into_inner);
        logs.get(&session_id).cloned()
    }

    fn log_or_insert(&self, session_id: SessionId) -> Arc<Mutex<SessionLog>> {
        if let Some(log) = self.log(session_id) {
            return log;
        }
        let mut logs = self.logs.write().unwrap_or_else(PoisonError::into_inner);
        if logs.len() >= SWEEP_THRESHOLD && !logs.contains_key(&session_id) {
            let evicted = sweep(&mut logs, self.ttl);
            if evicted > 0 {
                tracing::debug!(evicted, "Swept expired transcripts");
            }
        }
        logs.entry(session_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(SessionLog {
                    entries: Vec::new(),
                    touched_at: Instant::now(),
                }))
            })
            .clone()
    }

    /// Drop every expired log. Returns how many sessions were evicted.
    pub fn evict_expired(&self) -> usize {
        let mut logs = self.logs.write().unwrap_or_else(PoisonError::into_inner);
        let evicted = sweep(&mut logs, self.ttl);
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired transcripts");
        }
        evicted
    }

    /// Number of sessions currently holding a log.
    pub fn session_count(&self) -> usize {
        self.logs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Drop expired logs nobody else holds. A log held by an in-flight append
/// stays, so that append never lands in a detached log.
fn sweep(logs: &mut HashMap<SessionId, Arc<Mutex<SessionLog>>>, ttl: Option<Duration>) -> usize {
    if ttl.is_none() {
        return 0;
    }
    let before = logs.len();
    logs.retain(|_, log| {
        Arc::strong_count(log) > 1
            || !log
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_expired(ttl)
    });
    before - logs.len()
}

impl TranscriptBuffer for MemoryTranscriptBuffer {
    fn append(&self, session_id: SessionId, entry: TranscriptEntry) -> Result<()> {
        let log = self.log_or_insert(session_id);
        let mut log = log.lock().unwrap_or_else(PoisonError::into_inner);
        if log.is_expired(self.ttl) {
            log.entries.clear();
        }
        log.entries.push(entry);
        log.touched_at = Instant::now();
        Ok(())
    }

    fn read_all(&self, session_id: SessionId) -> Result<Vec<TranscriptEntry>> {
        let Some(log) = self.log(session_id) else {
            return Ok(Vec::new());
        };
        let log = log.lock().unwrap_or_else(PoisonError::into_inner);
        if log.is_expired(self.ttl) {
            return Ok(Vec::new());
        }
        Ok(log.entries.clone())
    }

    fn purge(&self, session_id: SessionId) -> Result<()> {
        let mut logs = self.logs.write().unwrap_or_else(PoisonError::into_inner);
        logs.remove(&session_id);
        Ok(())
    }

    fn len(&self, session_id: SessionId) -> Result<usize> {
        let Some(log) = self.log(session_id) else {
            return Ok(0);
        };
        let log = log.lock().unwrap_or_else(PoisonError::into_inner);
        if log.is_expired(self.ttl) {
            return Ok(0);
        }
        Ok(log.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use std::thread;

    fn entry(content: &str) -> TranscriptEntry {
        TranscriptEntry::new(Role::User, content)
    }

    #[test]
    fn reads_back_in_append_order() {
        let buffer = MemoryTranscriptBuffer::default();
        for i in 0..25 {
            buffer.append(1, entry(&format!("m{i}"))).unwrap();
        }

        let entries = buffer.read_all(1).unwrap();
        assert_eq!(entries.len(), 25);
        for (i, e) in entries.iter().enumerate() {
            assert_eq!(e.content, format!("m{i}"));
        }
        assert_eq!(buffer.len(1).unwrap(), 25);
    }

    #[test]
    fn unknown_session_reads_empty() {
        let buffer = MemoryTranscriptBuffer::default();
        assert!(buffer.read_all(42).unwrap().is_empty());
        assert!(buffer.is_empty(42).unwrap());
    }

    #[test]
    fn purge_is_idempotent_and_scoped() {
        let buffer = MemoryTranscriptBuffer::default();
        buffer.append(1, entry("a")).unwrap();
        buffer.append(2, entry("b")).unwrap();

        buffer.purge(1).unwrap();
        buffer.purge(1).unwrap();
        buffer.purge(99).unwrap();

        assert!(buffer.read_all(1).unwrap().is_empty());
        assert_eq!(buffer.read_all(2).unwrap(), vec![entry("b")]);
        assert_eq!(buffer.session_count(), 1);
    }

    #[test]
    fn duplicate_content_is_kept() {
        let buffer = MemoryTranscriptBuffer::default();
        buffer.append(1, entry("same")).unwrap();
        buffer.append(1, entry("same")).unwrap();
        assert_eq!(buffer.len(1).unwrap(), 2);
    }

    #[test]
    fn concurrent_appends_keep_per_writer_order() {
        let buffer = Arc::new(MemoryTranscriptBuffer::default());
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..200 {
                        buffer.append(7, entry(&format!("{w}:{i}"))).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let entries = buffer.read_all(7).unwrap();
        assert_eq!(entries.len(), 800);
        for w in 0..4 {
            let seen: Vec<usize> = entries
                .iter()
                .filter_map(|e| e.content.strip_prefix(&format!("{w}:")))
                .map(|i| i.parse().unwrap())
                .collect();
            assert_eq!(seen, (0..200).collect::<Vec<_>>());
        }
    }

    #[test]
    fn idle_logs_expire() {
        let buffer = MemoryTranscriptBuffer::new(Some(Duration::from_millis(10)));
        buffer.append(1, entry("old")).unwrap();
        thread::sleep(Duration::from_millis(40));

        assert!(buffer.read_all(1).unwrap().is_empty());
        assert_eq!(buffer.evict_expired(), 1);
        assert_eq!(buffer.session_count(), 0);

        // An expired log restarts on the next append
        buffer.append(2, entry("stale")).unwrap();
        thread::sleep(Duration::from_millis(40));
        buffer.append(2, entry("fresh")).unwrap();
        assert_eq!(buffer.read_all(2).unwrap(), vec![entry("fresh")]);
    }

    #[test]
    fn new_sessions_sweep_expired_logs_once_the_map_is_large() {
        let buffer = MemoryTranscriptBuffer::new(Some(Duration::from_millis(10)));
        for id in 0..SWEEP_THRESHOLD as SessionId {
            buffer.append(id, entry("abandoned")).unwrap();
        }
        assert_eq!(buffer.session_count(), SWEEP_THRESHOLD);
        thread::sleep(Duration::from_millis(40));

        // Appending to an existing session does not sweep
        buffer.append(0, entry("back")).unwrap();
        assert_eq!(buffer.session_count(), SWEEP_THRESHOLD);

        buffer.append(-1, entry("new")).unwrap();
        assert_eq!(buffer.session_count(), 2);
        assert_eq!(buffer.read_all(0).unwrap(), vec![entry("back")]);
        assert_eq!(buffer.read_all(-1).unwrap(), vec![entry("new")]);
    }

    #[test]
    fn large_buffers_without_ttl_keep_every_log() {
        let buffer = MemoryTranscriptBuffer::default();
        for id in 0..=SWEEP_THRESHOLD as SessionId {
            buffer.append(id, entry("kept")).unwrap();
        }
        assert_eq!(buffer.session_count(), SWEEP_THRESHOLD + 1);
    }
}
