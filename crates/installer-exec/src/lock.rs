//! Per-package-manager exclusive locks (spec §4.8: "two steps that both
//! touch apt must never run concurrently"). Adapted from the grounding
//! workspace's cross-process `flock`-based session lock to an in-process
//! `tokio::sync::Mutex` map, since these locks arbitrate steps within one
//! engine instance rather than across host processes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct PmLockTable {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl PmLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the exclusive lock for `pm` (e.g. `"apt"`), creating it on
    /// first use. The returned guard releases the lock on drop.
    pub async fn acquire(&self, pm: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(pm.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serializes_access_to_the_same_pm() {
        let table = PmLockTable::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let t1 = {
            let table = table.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _g = table.acquire("apt").await;
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                order.lock().await.push(1);
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let t2 = {
            let table = table.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _g = table.acquire("apt").await;
                order.lock().await.push(2);
            })
        };

        t1.await.unwrap();
        t2.await.unwrap();
        assert_eq!(*order.lock().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn different_pms_do_not_contend() {
        let table = PmLockTable::new();
        let apt_guard = table.acquire("apt").await;
        let dnf_guard = tokio::time::timeout(std::time::Duration::from_millis(50), table.acquire("dnf")).await;
        assert!(dnf_guard.is_ok());
        drop(apt_guard);
    }
}
