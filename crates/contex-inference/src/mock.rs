//! Mock embedding backend for deterministic testing.
//!
//! Derives unit-norm vectors from token hashes, so texts sharing words score
//! high cosine similarity and unrelated texts score near zero. The same input
//! always produces the same vector, which keeps matcher results stable in
//! tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use contex_core::models::EMBEDDING_DIM;
use contex_core::{EmbeddingBackend, Error, Result};

/// Deterministic embedding backend for tests.
#[derive(Clone)]
pub struct MockEmbeddingBackend {
    dimension: usize,
    fail: Arc<Mutex<bool>>,
    call_log: Arc<Mutex<Vec<String>>>,
}

impl Default for MockEmbeddingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbeddingBackend {
    pub fn new() -> Self {
        Self {
            dimension: EMBEDDING_DIM,
            fail: Arc::new(Mutex::new(false)),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Make subsequent embed calls fail, for error-path testing.
    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock().unwrap() = failing;
    }

    /// Inputs passed to `embed`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.call_log.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    fn token_vector(&self, token: &str) -> Vec<f32> {
        // Hash the token and scatter pseudo-random weight into a few buckets,
        // bag-of-words style. Shared tokens produce overlapping buckets.
        let digest = Sha256::digest(token.as_bytes());
        let mut vector = vec![0.0f32; self.dimension];
        for chunk in digest.chunks_exact(4) {
            let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let bucket = (raw as usize) % self.dimension;
            let weight = ((raw >> 16) as f32 / u16::MAX as f32) + 0.5;
            vector[bucket] += weight;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.call_log.lock().unwrap().push(text.to_string());

        if *self.fail.lock().unwrap() {
            return Err(Error::Embedding("mock backend failure".to_string()));
        }

        let mut vector = vec![0.0f32; self.dimension];
        for token in text.to_ascii_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            for (i, w) in self.token_vector(token).iter().enumerate() {
                vector[i] += w;
            }
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        } else {
            // Empty text still gets a stable, non-zero vector.
            vector[0] = 1.0;
        }

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!*self.fail.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contex_core::cosine_similarity;

    #[tokio::test]
    async fn test_deterministic() {
        let backend = MockEmbeddingBackend::new();
        let a = backend.embed("database schema and tables").await.unwrap();
        let b = backend.embed("database schema and tables").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_unit_norm() {
        let backend = MockEmbeddingBackend::new();
        let v = backend.embed("api configuration").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_shared_tokens_score_higher() {
        let backend = MockEmbeddingBackend::new();
        let query = backend
            .embed("database schema and tables")
            .await
            .unwrap();
        let related = backend
            .embed("users_table database schema columns")
            .await
            .unwrap();
        let unrelated = backend
            .embed("weather forecast precipitation")
            .await
            .unwrap();

        let related_sim = cosine_similarity(&query, &related);
        let unrelated_sim = cosine_similarity(&query, &unrelated);
        assert!(
            related_sim > unrelated_sim,
            "related {related_sim} should beat unrelated {unrelated_sim}"
        );
        assert!(related_sim > 0.5);
    }

    #[tokio::test]
    async fn test_empty_text_stable() {
        let backend = MockEmbeddingBackend::new();
        let a = backend.embed("").await.unwrap();
        let b = backend.embed("").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
    }

    #[tokio::test]
    async fn test_failure_mode() {
        let backend = MockEmbeddingBackend::new();
        backend.set_failing(true);
        assert!(backend.embed("anything").await.is_err());
        assert!(!backend.health_check().await.unwrap());
        backend.set_failing(false);
        assert!(backend.embed("anything").await.is_ok());
    }

    #[tokio::test]
    async fn test_call_log() {
        let backend = MockEmbeddingBackend::new();
        backend.embed("one").await.unwrap();
        backend.embed("two").await.unwrap();
        assert_eq!(backend.calls(), vec!["one".to_string(), "two".to_string()]);
        assert_eq!(backend.call_count(), 2);
    }
}
