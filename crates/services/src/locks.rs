use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use lesson_core::model::{LearnerId, ModuleId};

type Key = (LearnerId, ModuleId);

/// One async mutex per (learner, module) pair.
///
/// Holding the guard serializes every read-modify-write of that learner's
/// progress through the module. Distinct pairs never contend. An entry lives
/// only while someone holds or waits for it.
#[derive(Debug, Default)]
pub struct LockTable {
    entries: Mutex<HashMap<Key, Arc<AsyncMutex<()>>>>,
}

/// Exclusive access to one pair; releases and prunes the entry on drop.
#[derive(Debug)]
pub struct PairGuard<'a> {
    table: &'a LockTable,
    key: Key,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LockTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to the pair.
    pub async fn acquire(&self, learner_id: LearnerId, module_id: ModuleId) -> PairGuard<'_> {
        let key = (learner_id, module_id);
        let entry = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(key).or_default())
        };
        PairGuard {
            table: self,
            key,
            guard: Some(entry.lock_owned().await),
        }
    }

    /// Number of pairs currently held or awaited.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PairGuard<'_> {
    fn drop(&mut self) {
        // the guard's own Arc must go before the count check
        drop(self.guard.take());
        let mut entries = self
            .table
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if entries
            .get(&self.key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            entries.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_pair_is_exclusive() {
        let table = LockTable::new();
        let guard = table.acquire(LearnerId::new(1), ModuleId::new(1)).await;

        let blocked = tokio::time::timeout(
            Duration::from_millis(20),
            table.acquire(LearnerId::new(1), ModuleId::new(1)),
        )
        .await;
        assert!(blocked.is_err());

        drop(guard);
        let _again = table.acquire(LearnerId::new(1), ModuleId::new(1)).await;
    }

    #[tokio::test]
    async fn distinct_pairs_do_not_contend() {
        let table = LockTable::new();
        let _a = table.acquire(LearnerId::new(1), ModuleId::new(1)).await;
        let _b = table.acquire(LearnerId::new(2), ModuleId::new(1)).await;
        let _c = table.acquire(LearnerId::new(1), ModuleId::new(2)).await;
        assert_eq!(table.len(), 3);
    }

    #[tokio::test]
    async fn released_pairs_are_pruned() {
        let table = LockTable::new();
        for id in 1..=10 {
            let _guard = table.acquire(LearnerId::new(id), ModuleId::new(1)).await;
        }
        assert!(table.is_empty());

        let held = table.acquire(LearnerId::new(1), ModuleId::new(1)).await;
        let other = table.acquire(LearnerId::new(2), ModuleId::new(1)).await;
        drop(other);
        assert_eq!(table.len(), 1);
        drop(held);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn entry_survives_while_a_waiter_remains() {
        let table = Arc::new(LockTable::new());
        let held = table.acquire(LearnerId::new(1), ModuleId::new(1)).await;

        let waiter = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                let _guard = table.acquire(LearnerId::new(1), ModuleId::new(1)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(held);
        assert_eq!(table.len(), 1);
        waiter.await.unwrap();
        assert!(table.is_empty());
    }
}
