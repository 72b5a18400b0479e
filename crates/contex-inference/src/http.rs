//! HTTP embedding backend for Ollama-compatible servers.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use contex_core::defaults::{EMBED_TIMEOUT_SECS, EMBEDDING_MODEL, EMBEDDING_URL};
use contex_core::models::EMBEDDING_DIM;
use contex_core::{EmbeddingBackend, EmbeddingConfig, Error, Result};

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding backend speaking the Ollama `/api/embed` protocol.
pub struct HttpEmbeddingBackend {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
    timeout_secs: u64,
}

impl HttpEmbeddingBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            dimension: EMBEDDING_DIM,
            timeout_secs: EMBED_TIMEOUT_SECS,
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(config.url.clone(), config.model.clone())
    }

    /// Construct with library defaults.
    pub fn with_defaults() -> Result<Self> {
        Self::new(EMBEDDING_URL, EMBEDDING_MODEL)
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: vec![text.to_string()],
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "embedding server returned {status}: {body}"
            )));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("failed to parse response: {e}")))?;

        let vector = result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("empty embeddings array in response".to_string()))?;

        if vector.len() != self.dimension {
            return Err(Error::Embedding(format!(
                "expected {}-dim vector, got {}",
                self.dimension,
                vector.len()
            )));
        }

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(duration_ms = elapsed, model = %self.model, "embedding complete");
        if elapsed > 5000 {
            warn!(duration_ms = elapsed, slow = true, "slow embedding operation");
        }

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        Ok(matches!(response, Ok(r) if r.status().is_success()))
    }
}
