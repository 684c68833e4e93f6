// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-process registry of named async mutexes.
//!
//! Each name maps to a weakly held mutex. Every caller interested in a name holds a
//! [`LockSlot`], which keeps the mutex alive; when the last slot for a name is dropped the
//! entry is removed, so the registry only ever contains names that are held or awaited.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

type SharedMapping = Arc<SyncMutex<HashMap<String, Weak<AsyncMutex<()>>>>>;

#[derive(Debug, Default, Clone)]
pub(crate) struct NamedLocks {
    mapping: SharedMapping,
}

impl NamedLocks {
    /// Returns the slot for `name`, creating the underlying mutex if nobody holds it.
    pub(crate) fn slot(&self, name: &str) -> LockSlot {
        let mut mapping = self.mapping.lock();

        let lock = match mapping.get(name).and_then(Weak::upgrade) {
            Some(lock) => lock,
            None => {
                let lock = Arc::new(AsyncMutex::new(()));
                mapping.insert(name.to_owned(), Arc::downgrade(&lock));
                lock
            }
        };

        LockSlot {
            lock,
            name: name.to_owned(),
            mapping: Arc::clone(&self.mapping),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.mapping.lock().len()
    }
}

/// A caller's interest in one named lock.
#[derive(Debug)]
pub(crate) struct LockSlot {
    lock: Arc<AsyncMutex<()>>,
    name: String,
    mapping: SharedMapping,
}

impl LockSlot {
    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for LockSlot {
    fn drop(&mut self) {
        let mut mapping = self.mapping.lock();

        // New slots are only handed out under the mapping lock, so the count is stable here.
        if Arc::strong_count(&self.lock) == 1
            && mapping
                .get(&self.name)
                .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(&self.lock)))
        {
            mapping.remove(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_name_is_serialized() {
        let locks = NamedLocks::default();
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let active = Arc::clone(&active);
                let max_active = Arc::clone(&max_active);
                tokio::spawn(async move {
                    let slot = locks.slot("orders");
                    let _guard = slot.lock().await;
                    let now = active.fetch_add(1, Ordering::AcqRel) + 1;
                    max_active.fetch_max(now, Ordering::AcqRel);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::AcqRel);
                })
            })
            .collect();

        for task in tasks {
            task.await.expect("task panicked");
        }

        assert_eq!(max_active.load(Ordering::Acquire), 1);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn different_names_do_not_contend() {
        let locks = NamedLocks::default();
        let first = locks.slot("a");
        let _first_guard = first.lock().await;

        let second = locks.slot("b");
        let acquired = tokio::time::timeout(Duration::from_millis(100), second.lock()).await;
        assert!(acquired.is_ok(), "lock on a different name should not block");
    }

    #[tokio::test]
    async fn entry_is_removed_after_last_slot_drops() {
        let locks = NamedLocks::default();
        let first = locks.slot("a");
        let second = locks.slot("a");
        assert_eq!(locks.len(), 1);

        drop(first);
        assert_eq!(locks.len(), 1);

        drop(second);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_no_entry() {
        let locks = NamedLocks::default();
        let holder = locks.slot("a");
        let guard = holder.lock().await;

        let waiter = locks.slot("a");
        let timed_out = tokio::time::timeout(Duration::from_millis(10), waiter.lock()).await;
        assert!(timed_out.is_err());
        drop(timed_out);
        drop(waiter);

        drop(guard);
        drop(holder);
        assert_eq!(locks.len(), 0);
    }
}
