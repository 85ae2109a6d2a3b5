//! # Synchronization Lock
//!
//! One per [`SyncContext`](crate::SyncContext). Push, pull and purge hold it
//! for their whole duration, so they never overlap on the same store.
//! Local mutations don't take it.

use std::time::Instant;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Named async mutex serializing sync runs.
#[derive(Debug)]
pub struct SyncLock {
    name: String,
    inner: Mutex<()>,
}

/// Held for the duration of one sync run.
#[derive(Debug)]
pub struct SyncLockGuard<'a> {
    name: &'a str,
    purpose: &'static str,
    acquired_at: Instant,
    _guard: MutexGuard<'a, ()>,
}

impl SyncLock {
    pub fn new(name: impl Into<String>) -> Self {
        SyncLock {
            name: name.into(),
            inner: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the lock. `purpose` only shows up in logs.
    pub async fn acquire(&self, purpose: &'static str) -> SyncLockGuard<'_> {
        let guard = self.inner.lock().await;
        debug!(lock = %self.name, purpose, "Sync lock acquired");

        SyncLockGuard {
            name: &self.name,
            purpose,
            acquired_at: Instant::now(),
            _guard: guard,
        }
    }

    /// Takes the lock only if nobody holds it.
    pub fn try_acquire(&self, purpose: &'static str) -> Option<SyncLockGuard<'_>> {
        let guard = self.inner.try_lock().ok()?;
        Some(SyncLockGuard {
            name: &self.name,
            purpose,
            acquired_at: Instant::now(),
            _guard: guard,
        })
    }
}

impl Drop for SyncLockGuard<'_> {
    fn drop(&mut self) {
        debug!(
            lock = %self.name,
            purpose = self.purpose,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Sync lock released"
        );
    }
}
