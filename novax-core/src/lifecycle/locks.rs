//! Keyed locks used by the lifecycle manager.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Idle entries are dropped once the table grows past this many keys.
const PRUNE_THRESHOLD: usize = 1024;

/// One mutex per key, created on demand.
///
/// The table lock is held only to look up a key's mutex, so holders of
/// different keys never wait on each other.
pub(crate) struct LockTable<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Copy> LockTable<K> {
    pub(crate) fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The mutex for `key`. Lock it with [`hold`].
    pub(crate) fn handle(&self, key: K) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.len() > PRUNE_THRESHOLD {
            // Only the table itself references an idle mutex
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Lock a table mutex, recovering from poisoning. The guarded value is
/// `()`, so a panicking holder cannot leave it inconsistent.
pub(crate) fn hold(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Set of keys with an exclusive, non-blocking claim.
///
/// Finalizing operations (complete, abandon, eviction) claim their session
/// first; a second claimant fails fast instead of queueing behind a
/// scoring call.
pub(crate) struct ClaimSet<K> {
    claimed: Mutex<HashSet<K>>,
}

impl<K: Eq + Hash + Copy> ClaimSet<K> {
    pub(crate) fn new() -> Self {
        Self {
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// Claim `key`, or `None` if someone else holds it.
    pub(crate) fn try_claim(&self, key: K) -> Option<Claim<'_, K>> {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        claimed.insert(key).then(|| Claim { set: self, key })
    }

    fn release(&self, key: &K) {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Releases its key on drop.
pub(crate) struct Claim<'a, K: Eq + Hash + Copy> {
    set: &'a ClaimSet<K>,
    key: K,
}

impl<K: Eq + Hash + Copy> Drop for Claim<'_, K> {
    fn drop(&mut self) {
        self.set.release(&self.key);
    }
}
