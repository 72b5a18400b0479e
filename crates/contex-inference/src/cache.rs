//! SHA-256-keyed LRU cache over an embedding backend.
//!
//! Keys are content hashes rather than raw text so cache keys stay fixed-size
//! and no input text lands in the key space.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use lru::LruCache;
use sha2::{Digest, Sha256};
use tracing::debug;

use contex_core::defaults::EMBEDDING_CACHE_SIZE;
use contex_core::{EmbeddingBackend, Result};

/// Cache hit/miss counters.
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    /// Cumulative backend embed time, milliseconds.
    backend_ms: AtomicU64,
}

/// Snapshot of cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub backend_ms: u64,
}

/// Caching wrapper around any [`EmbeddingBackend`].
///
/// Concurrent-safe; the LRU sits behind a mutex held only for lookups and
/// inserts, never across the backend call, so concurrent misses may each
/// compute the embedding (last write wins, values are identical by
/// determinism).
pub struct CachedEmbedder {
    backend: Arc<dyn EmbeddingBackend>,
    cache: Mutex<LruCache<[u8; 32], Arc<Vec<f32>>>>,
    counters: Counters,
}

impl CachedEmbedder {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(
            NonZeroUsize::new(EMBEDDING_CACHE_SIZE).expect("default cache size is non-zero"),
        );
        Self {
            backend,
            cache: Mutex::new(LruCache::new(capacity)),
            counters: Counters::default(),
        }
    }

    /// Cache key: SHA-256 of the input text.
    fn key(text: &str) -> [u8; 32] {
        let digest = Sha256::digest(text.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        key
    }

    /// Embed with caching. Backend failures propagate; nothing is cached on
    /// failure.
    pub async fn embed(&self, text: &str) -> Result<Arc<Vec<f32>>> {
        let key = Self::key(text);

        if let Some(cached) = self.cache.lock().unwrap().get(&key).cloned() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        let vector = Arc::new(self.backend.embed(text).await?);
        let elapsed = start.elapsed().as_millis() as u64;
        self.counters.backend_ms.fetch_add(elapsed, Ordering::Relaxed);

        debug!(duration_ms = elapsed, "embedding cache miss");
        self.cache.lock().unwrap().put(key, vector.clone());
        Ok(vector)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            entries: self.cache.lock().unwrap().len(),
            backend_ms: self.counters.backend_ms.load(Ordering::Relaxed),
        }
    }

    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub async fn health_check(&self) -> Result<bool> {
        self.backend.health_check().await
    }
}

#[async_trait]
impl EmbeddingBackend for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        CachedEmbedder::embed(self, text).await.map(|v| (*v).clone())
    }

    fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    async fn health_check(&self) -> Result<bool> {
        self.backend.health_check().await
    }
}
