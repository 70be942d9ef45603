//! Per-instance mutual exclusion.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per workflow instance.
///
/// Every read-modify-write of an instance and its tasks runs under the
/// instance's guard, so cascades for sibling tasks never interleave.
#[derive(Default)]
pub struct InstanceLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the guard for `instance_id`.
    pub async fn lock(&self, instance_id: Uuid) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(instance_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drop the mutex of a finished instance if nobody holds or awaits it.
    pub fn forget(&self, instance_id: Uuid) {
        self.locks
            .remove_if(&instance_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    /// Number of tracked instances.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_instance_serialized() {
        let locks = Arc::new(InstanceLocks::new());
        let id = Uuid::new_v4();
        let inside = Arc::new(AtomicU32::new(0));
        let max_inside = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(id).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_instances_independent() {
        let locks = InstanceLocks::new();
        let _a = locks.lock(Uuid::new_v4()).await;
        let _b = locks.lock(Uuid::new_v4()).await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_forget_keeps_held_lock() {
        let locks = InstanceLocks::new();
        let id = Uuid::new_v4();

        let guard = locks.lock(id).await;
        locks.forget(id);
        assert_eq!(locks.len(), 1);

        drop(guard);
        locks.forget(id);
        assert!(locks.is_empty());
    }
}
