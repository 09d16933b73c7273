use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of named async locks.
///
/// Callers that must not interleave (successive posts to one channel, version
/// map appends for one identity) take the lock named after the resource they
/// touch; work on differently named resources proceeds in parallel. Entries
/// are created on first use and kept for the lifetime of the map — the set of
/// names is bounded by the set of live resources.
#[derive(Default)]
pub struct LockMap {
    inner: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockMap {
    /// Creates an empty lock map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock with the given name, waiting until it is free.
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock();
            Arc::clone(map.entry(name.to_owned()).or_default())
        };
        entry.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::Result;

    use super::*;

    #[tokio::test]
    async fn it_serializes_same_name_and_parallelizes_different_names() -> Result<()> {
        let locks = Arc::new(LockMap::new());
        let running = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let running = Arc::clone(&running);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("same").await;
                assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0);
                tokio::task::yield_now().await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        // A differently named lock must not wait on "same".
        let _other = locks.lock("other").await;

        for handle in handles {
            handle.await?;
        }
        Ok(())
    }
}
