//! # contex-search
//!
//! Semantic matching for the Contex routing engine: cosine top-K retrieval
//! through the vector index, optional BM25 keyword fusion via Reciprocal
//! Rank Fusion, and per-need match grouping.

pub mod matcher;
pub mod rrf;

pub use matcher::SemanticMatcher;
pub use rrf::{rrf_fuse, FusedHit};
