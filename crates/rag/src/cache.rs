//! Process-wide cache of vector indexes keyed by document and embedding model.
//!
//! Each key owns a [`tokio::sync::OnceCell`], so concurrent requests for the
//! same document wait on a single build instead of embedding it twice. A
//! failed build leaves the cell empty and the next request retries. Clones
//! share the same slots.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::index::VectorIndex;

static GLOBAL: Lazy<IndexCache> = Lazy::new(IndexCache::new);

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct IndexKey {
    pub path: String,
    pub model: String,
}

impl IndexKey {
    pub fn new(path: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            model: model.into(),
        }
    }
}

type Slot = Arc<OnceCell<Arc<VectorIndex>>>;

#[derive(Clone, Default)]
pub struct IndexCache {
    slots: Arc<Mutex<HashMap<IndexKey, Slot>>>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache shared by every command invocation in this process.
    pub fn global() -> IndexCache {
        GLOBAL.clone()
    }

    pub async fn get_or_create<F, Fut>(&self, key: IndexKey, build: F) -> Result<Arc<VectorIndex>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<VectorIndex>>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            slots.entry(key.clone()).or_default().clone()
        };
        let index = slot
            .get_or_try_init(|| async {
                tracing::debug!(path = %key.path, model = %key.model, "building index");
                build().await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(index))
    }

    pub fn contains(&self, key: &IndexKey) -> bool {
        self.slots
            .lock()
            .get(key)
            .map(|slot| slot.initialized())
            .unwrap_or(false)
    }

    /// Number of built indexes.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn empty_index(path: &str) -> VectorIndex {
        VectorIndex::new(path, "test", Vec::new())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_share_one_build() {
        let cache = Arc::new(IndexCache::new());
        let builds = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let builds = Arc::clone(&builds);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_create(IndexKey::new("/docs/paper.pdf", "m"), || async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(empty_index("/docs/paper.pdf"))
                    })
                    .await
                    .unwrap()
            }));
        }
        let mut indexes = Vec::new();
        for handle in handles {
            indexes.push(handle.await.unwrap());
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(indexes.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let cache = IndexCache::new();
        let clone = cache.clone();
        let key = IndexKey::new("p.pdf", "m");
        let first = cache
            .get_or_create(key.clone(), || async { Ok(empty_index("p.pdf")) })
            .await
            .unwrap();
        let second = clone
            .get_or_create(key.clone(), || async {
                Err(anyhow::anyhow!("must not rebuild"))
            })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(clone.contains(&key));
    }

    #[tokio::test]
    async fn different_models_build_separately() {
        let cache = IndexCache::new();
        let a = cache
            .get_or_create(IndexKey::new("p.pdf", "small"), || async {
                Ok(empty_index("p.pdf"))
            })
            .await
            .unwrap();
        let b = cache
            .get_or_create(IndexKey::new("p.pdf", "large"), || async {
                Ok(empty_index("p.pdf"))
            })
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn different_paths_build_separately() {
        let cache = IndexCache::new();
        let counter = AtomicUsize::new(0);
        let builds = &counter;
        let first = cache
            .get_or_create(IndexKey::new("/docs/a.pdf", "m"), || async move {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(empty_index("/docs/a.pdf"))
            })
            .await
            .unwrap();
        let second = cache
            .get_or_create(IndexKey::new("/docs/b.pdf", "m"), || async move {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(empty_index("/docs/b.pdf"))
            })
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.source(), "/docs/b.pdf");
        assert!(cache.contains(&IndexKey::new("/docs/a.pdf", "m")));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn failed_builds_are_retried() {
        let cache = IndexCache::new();
        let key = IndexKey::new("broken.pdf", "m");
        let err = cache
            .get_or_create(key.clone(), || async { Err(anyhow::anyhow!("boom")) })
            .await;
        assert!(err.is_err());
        assert!(!cache.contains(&key));
        assert!(cache.is_empty());

        cache
            .get_or_create(key.clone(), || async { Ok(empty_index("broken.pdf")) })
            .await
            .unwrap();
        assert!(cache.contains(&key));
    }
}
