//! Transcript buffer: an append-only, per-session log of in-progress
//! conversations.
//!
//! The buffer knows nothing about session status. It is a keyed log that
//! only supports appending, reading everything back in order, and purging
//! a whole session.

mod memory;
#[cfg(feature = "redis")]
mod redis_backend;

pub use memory::MemoryTranscriptBuffer;
#[cfg(feature = "redis")]
pub use redis_backend::RedisTranscriptBuffer;

use crate::config::{BufferBackend, TranscriptConfig};
use crate::error::{Error, Result};
use crate::types::{SessionId, TranscriptEntry, TranscriptSummary};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const PREVIEW_ENTRIES: usize = 3;
const PREVIEW_CHARS: usize = 100;

/// Ephemeral, ordered store of session messages.
pub trait TranscriptBuffer: Send + Sync {
    /// Add one entry to the end of the session's log.
    fn append(&self, session_id: SessionId, entry: TranscriptEntry) -> Result<()>;

    /// All entries in append order; empty when the session has none.
    fn read_all(&self, session_id: SessionId) -> Result<Vec<TranscriptEntry>>;

    /// Remove every entry of the session. Purging an unknown session is a no-op.
    fn purge(&self, session_id: SessionId) -> Result<()>;

    /// Number of buffered entries.
    fn len(&self, session_id: SessionId) -> Result<usize> {
        Ok(self.read_all(session_id)?.len())
    }

    fn is_empty(&self, session_id: SessionId) -> Result<bool> {
        Ok(self.len(session_id)? == 0)
    }
}

/// Build the buffer selected by configuration.
pub fn create_transcript_buffer(config: &TranscriptConfig) -> Result<Arc<dyn TranscriptBuffer>> {
    match config.backend {
        BufferBackend::Memory => Ok(Arc::new(MemoryTranscriptBuffer::new(config.ttl()))),
        #[cfg(feature = "redis")]
        BufferBackend::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                Error::Config("transcript.redis_url is required for redis".to_string())
            })?;
            Ok(Arc::new(RedisTranscriptBuffer::connect(
                url,
                &config.key_prefix,
                config.ttl(),
            )?))
        }
        #[cfg(not(feature = "redis"))]
        BufferBackend::Redis => Err(Error::Config(
            "transcript.backend = \"redis\" needs the `redis` feature".to_string(),
        )),
    }
}

/// Render entries as the `role: content` text handed to scoring.
pub fn render_transcript(entries: &[TranscriptEntry]) -> String {
    entries
        .iter()
        .map(|entry| format!("{}: {}", entry.role, entry.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Hex SHA-256 of rendered transcript text, stored on the completed record.
pub fn transcript_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Summarize a transcript with a preview of its last entries.
pub fn summarize(session_id: SessionId, entries: &[TranscriptEntry]) -> Option<TranscriptSummary> {
    if entries.is_empty() {
        return None;
    }

    let start = entries.len().saturating_sub(PREVIEW_ENTRIES);
    let preview = entries[start..]
        .iter()
        .map(|entry| {
            let head: String = entry.content.chars().take(PREVIEW_CHARS).collect();
            format!("{}: {}...", entry.role, head)
        })
        .collect();

    Some(TranscriptSummary {
        session_id,
        message_count: entries.len(),
        preview,
    })
}
