//! # contex-inference
//!
//! Embedding backends for the Contex routing engine: an HTTP backend for
//! Ollama-compatible embedding servers, a deterministic mock for tests, and a
//! SHA-256-keyed LRU caching wrapper.

pub mod cache;
pub mod http;
pub mod mock;

pub use cache::{CacheStats, CachedEmbedder};
pub use http::HttpEmbeddingBackend;
pub use mock::MockEmbeddingBackend;
