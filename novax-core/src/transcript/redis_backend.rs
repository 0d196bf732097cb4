//! Redis-backed transcript buffer.
//!
//! Each session is one Redis list at `{prefix}:{session_id}` holding JSON
//! `{"role": ..., "content": ...}` values, appended with RPUSH.

use super::TranscriptBuffer;
use crate::error::{Error, Result};
use crate::types::{SessionId, TranscriptEntry};
use ::redis::{Client, Commands, Connection};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// [`TranscriptBuffer`] shared between processes through Redis.
///
/// Commands are single round trips, so one connection behind a mutex is
/// enough; RPUSH keeps per-session arrival order on the server side.
pub struct RedisTranscriptBuffer {
    conn: Mutex<Connection>,
    key_prefix: String,
    ttl: Option<Duration>,
}

impl RedisTranscriptBuffer {
    pub fn connect(url: &str, key_prefix: &str, ttl: Option<Duration>) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_connection()?;
        tracing::info!(key_prefix, ?ttl, "Connected transcript buffer to redis");
        Ok(Self {
            conn: Mutex::new(conn),
            key_prefix: key_prefix.to_string(),
            ttl,
        })
    }

    fn key(&self, session_id: SessionId) -> String {
        format!("{}:{}", self.key_prefix, session_id)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TranscriptBuffer for RedisTranscriptBuffer {
    fn append(&self, session_id: SessionId, entry: TranscriptEntry) -> Result<()> {
        let key = self.key(session_id);
        let payload = serde_json::to_string(&entry)?;
        let mut conn = self.conn();

        match self.ttl {
            Some(ttl) => {
                ::redis::pipe()
                    .atomic()
                    .cmd("RPUSH")
                    .arg(&key)
                    .arg(payload)
                    .ignore()
                    .cmd("EXPIRE")
                    .arg(&key)
                    .arg(ttl.as_secs().max(1))
                    .ignore()
                    .query::<()>(&mut *conn)?;
            }
            None => {
                conn.rpush::<_, _, ()>(&key, payload)?;
            }
        }
        Ok(())
    }

    fn read_all(&self, session_id: SessionId) -> Result<Vec<TranscriptEntry>> {
        let key = self.key(session_id);
        let raw: Vec<String> = self.conn().lrange(&key, 0, -1)?;
        raw.iter()
            .map(|item| {
                serde_json::from_str(item).map_err(|e| {
                    Error::Buffer(format!("malformed transcript entry in {key}: {e}"))
                })
            })
            .collect()
    }

    fn purge(&self, session_id: SessionId) -> Result<()> {
        self.conn().del::<_, ()>(self.key(session_id))?;
        Ok(())
    }

    fn len(&self, session_id: SessionId) -> Result<usize> {
        let len: usize = self.conn().llen(self.key(session_id))?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    /// Needs a live server: `NOVAX_TEST_REDIS_URL=redis://localhost cargo test --features redis -- --ignored`
    #[test]
    #[ignore]
    fn round_trips_through_redis() {
        let url = std::env::var("NOVAX_TEST_REDIS_URL").expect("NOVAX_TEST_REDIS_URL not set");
        let buffer = RedisTranscriptBuffer::connect(&url, "novax-test", None).unwrap();
        buffer.purge(1).unwrap();

        buffer
            .append(1, TranscriptEntry::new(Role::User, "Explain recursion"))
            .unwrap();
        buffer
            .append(1, TranscriptEntry::new(Role::Assistant, "What is a base case?"))
            .unwrap();

        let entries = buffer.read_all(1).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].role, Role::Assistant);

        buffer.purge(1).unwrap();
        assert_eq!(buffer.len(1).unwrap(), 0);
    }
}
