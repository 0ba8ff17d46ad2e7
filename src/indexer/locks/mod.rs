
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

type KbMutex = Arc<tokio::sync::Mutex<()>>;

/// One async mutex per knowledge base.
///
/// Mutations of a knowledge base hold its guard from the first read until the
/// index file is written. Unused entries are pruned on the next acquire.
#[derive(Debug, Default)]
pub struct KbLocks {
    locks: Mutex<HashMap<i64, KbMutex>>,
}

impl KbLocks {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub async fn acquire(&self, kb_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // entries nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(kb_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of knowledge bases with a held or awaited lock
    #[inline]
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }
}
