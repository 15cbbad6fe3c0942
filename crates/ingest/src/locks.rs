//! Per-repository serialization of inclusion.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per repository root, created on first use.
///
/// Holding the guard serializes inclusion into that repository; different
/// roots never contend.
#[derive(Debug, Default)]
pub struct RepositoryLocks {
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl RepositoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `root`.
    pub async fn acquire(&self, root: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("repository locks poisoned");
            Arc::clone(locks.entry(root.to_path_buf()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of repositories seen so far.
    pub fn len(&self) -> usize {
        self.locks.lock().expect("repository locks poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_root_is_exclusive() {
        let locks = Arc::new(RepositoryLocks::new());
        let root = PathBuf::from("/srv/repo/unstable");

        let guard = locks.acquire(&root).await;

        let contender = {
            let locks = locks.clone();
            let root = root.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(&root).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender acquires after release")
            .unwrap();
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn different_roots_do_not_contend() {
        let locks = RepositoryLocks::new();
        let _a = locks.acquire(Path::new("/srv/repo/unstable")).await;
        let _b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(Path::new("/srv/repo/stable")),
        )
        .await
        .expect("independent roots");
        assert_eq!(locks.len(), 2);
    }
}
