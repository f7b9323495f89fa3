//! Mutual-exclusion gate for bulk runs.
//!
//! A run holds the lock for `"{endpoint} {project_id}"` from before target
//! resolution until its last frame is delivered. Different projects never
//! contend; the same project on the same endpoint is serialized.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{BulkError, Result};

/// Lock key for a run of `endpoint` against `project_id`.
pub fn lock_key(endpoint: &str, project_id: Uuid) -> String {
    format!("{endpoint} {project_id}")
}

/// Held lease. Dropping it releases the lock.
pub struct LockLease {
    _guard: Box<dyn Send + Sync>,
}

impl LockLease {
    pub fn new(guard: impl Send + Sync + 'static) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

/// Named, bounded-wait locks.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Acquire `key`, waiting at most `max_wait`. Fails with
    /// [`BulkError::LockTimeout`] rather than hanging.
    async fn acquire(&self, key: &str, max_wait: Duration) -> Result<LockLease>;
}

/// Run `body` while holding `key`.
///
/// The lease lives on this future's stack, so it is released on every exit
/// path of `body`: return, `?`, panic unwinding, or the future being dropped.
pub async fn with_lock<F, Fut, T>(
    locks: &dyn LockManager,
    key: &str,
    max_wait: Duration,
    body: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let lease = locks.acquire(key, max_wait).await?;
    debug!(key, "lock acquired");
    let out = body().await;
    drop(lease);
    debug!(key, "lock released");
    out
}

// ---------------------------------------------------------------------------
// LocalLockManager
// ---------------------------------------------------------------------------

/// In-process lock manager: one async mutex per key.
#[derive(Default, Clone)]
pub struct LocalLockManager {
    slots: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl LocalLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Drop slots nobody holds or waits on.
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Number of keys currently held or awaited.
    pub fn active_keys(&self) -> usize {
        let slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.values().filter(|s| Arc::strong_count(s) > 1).count()
    }
}

#[async_trait]
impl LockManager for LocalLockManager {
    async fn acquire(&self, key: &str, max_wait: Duration) -> Result<LockLease> {
        let slot = self.slot(key);
        match tokio::time::timeout(max_wait, slot.lock_owned()).await {
            Ok(guard) => Ok(LockLease::new(guard)),
            Err(_) => {
                warn!(key, waited_secs = max_wait.as_secs(), "lock acquisition timed out");
                Err(BulkError::LockTimeout {
                    key: key.to_string(),
                    waited: max_wait,
                })
            }
        }
    }
}
