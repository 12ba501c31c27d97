use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rand::Rng;

use crate::error::{Result, TallyError};
use crate::models::{LockOperation, ProcessLock};
use crate::paths;
use crate::store::Store;

/// Locks older than this are considered abandoned and may be reclaimed.
pub const DEFAULT_LOCK_TTL_SECS: i64 = 120;

const EXPIRY_FIELD: &str = "expires_at_ms";
const HOLDER_FIELD: &str = "holder_id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceKey {
    pub org_id: String,
    pub resource_id: String,
}

impl ResourceKey {
    pub fn new(org_id: &str, resource_id: &str) -> Self {
        Self {
            org_id: org_id.to_string(),
            resource_id: resource_id.to_string(),
        }
    }

    pub fn path(&self) -> String {
        paths::doc(&self.org_id, paths::PROCESS_LOCKS, &self.resource_id)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org_id, self.resource_id)
    }
}

/// Unique holder id for one guarded operation run by `actor`.
pub fn new_holder_id(actor: &str) -> String {
    let suffix: u64 = rand::thread_rng().gen();
    format!("{actor}:{suffix:016x}")
}

/// A held lock. Released by [`LockGuard::release`] or, failing that, on drop.
#[must_use = "dropping the guard releases the lock immediately"]
pub struct LockGuard<'a> {
    store: &'a Store,
    path: String,
    lock: ProcessLock,
    released: bool,
}

impl<'a> LockGuard<'a> {
    #[cfg(test)]
    pub fn lock(&self) -> &ProcessLock {
        &self.lock
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.release_record()
    }

    fn release_record(&self) -> Result<()> {
        let removed = self
            .store
            .delete_where(&self.path, HOLDER_FIELD, &self.lock.holder_id)?;
        if removed {
            debug!(
                "released {} lock on {}",
                self.lock.operation.key(),
                self.lock.resource_key
            );
        } else {
            warn!(
                "lock on {} was no longer held by {} at release",
                self.lock.resource_key, self.lock.holder_id
            );
        }
        Ok(())
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.release_record() {
            warn!("failed to release lock on {}: {e}", self.lock.resource_key);
        }
    }
}

pub fn acquire<'a>(
    store: &'a Store,
    key: &ResourceKey,
    operation: LockOperation,
    holder_id: &str,
) -> Result<LockGuard<'a>> {
    acquire_at(store, key, operation, holder_id, Utc::now())
}

pub fn acquire_at<'a>(
    store: &'a Store,
    key: &ResourceKey,
    operation: LockOperation,
    holder_id: &str,
    now: DateTime<Utc>,
) -> Result<LockGuard<'a>> {
    let path = key.path();
    let now_ms = now.timestamp_millis();
    let lock = ProcessLock {
        resource_key: key.to_string(),
        operation,
        holder_id: holder_id.to_string(),
        acquired_at: now,
        expires_at_ms: now_ms + store.lock_ttl_secs() * 1000,
    };

    // Only used for logging; the decision below is a single conditional write.
    let previous: Option<ProcessLock> = store.get(&path)?;

    if store.create_or_replace_expired(&path, &lock, EXPIRY_FIELD, now_ms)? {
        if let Some(stale) = previous {
            warn!(
                "reclaimed stale {} lock on {key} from {}",
                stale.operation.key(),
                stale.holder_id
            );
        }
        debug!("acquired {} lock on {key} for {holder_id}", operation.key());
        return Ok(LockGuard {
            store,
            path,
            lock,
            released: false,
        });
    }

    let current: Option<ProcessLock> = store.get(&path)?;
    let (holder, op) = match current {
        Some(held) => (held.holder_id, held.operation.key().to_string()),
        None => ("unknown".to_string(), "unknown".to_string()),
    };
    Err(TallyError::Busy {
        key: key.to_string(),
        holder,
        operation: op,
    })
}

/// Run `f` while holding the lock for `key`. The lock is released whether `f`
/// succeeds or fails; an error from `f` wins over a release error.
pub fn with_lock<T>(
    store: &Store,
    key: &ResourceKey,
    operation: LockOperation,
    holder_id: &str,
    f: impl FnOnce(&Store) -> Result<T>,
) -> Result<T> {
    let guard = acquire(store, key, operation, holder_id)?;
    let result = f(store);
    let released = guard.release();
    let value = result?;
    released?;
    Ok(value)
}

pub fn list_locks(store: &Store, org_id: &str) -> Result<Vec<ProcessLock>> {
    let locks: Vec<(String, ProcessLock)> =
        store.list(&paths::collection(org_id, paths::PROCESS_LOCKS))?;
    Ok(locks.into_iter().map(|(_, lock)| lock).collect())
}
