//! Semantic matcher: embeds queries, searches the vector index, and
//! optionally fuses keyword scores.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument};

use contex_core::{
    KeywordIndex, Match, MatchingConfig, NeedMatches, Result, VectorIndex,
};
use contex_inference::CachedEmbedder;

use crate::rrf::rrf_fuse;

/// Matches agent semantic needs and ad-hoc queries to indexed context nodes.
///
/// Results are deterministic given identical index state, threshold, and
/// `top_k`: ties are broken by `node_key` and the embedding backend is
/// referentially transparent.
pub struct SemanticMatcher {
    embedder: Arc<CachedEmbedder>,
    index: Arc<dyn VectorIndex>,
    keyword: Option<Arc<dyn KeywordIndex>>,
    config: MatchingConfig,
}

impl SemanticMatcher {
    pub fn new(
        embedder: Arc<CachedEmbedder>,
        index: Arc<dyn VectorIndex>,
        keyword: Option<Arc<dyn KeywordIndex>>,
        config: MatchingConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            keyword,
            config,
        }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub fn embedder(&self) -> &Arc<CachedEmbedder> {
        &self.embedder
    }

    /// Run the matcher for a list of query strings, preserving per-query
    /// grouping. `top_k`, `threshold`, and `hybrid` override the configured
    /// defaults when given.
    #[instrument(skip(self, queries), fields(subsystem = "matcher", op = "query"))]
    pub async fn query(
        &self,
        project_id: &str,
        queries: &[String],
        top_k: Option<i64>,
        threshold: Option<f32>,
        hybrid: Option<bool>,
    ) -> Result<Vec<NeedMatches>> {
        let top_k = top_k.unwrap_or(self.config.max_matches);
        let threshold = threshold.unwrap_or(self.config.similarity_threshold);
        let hybrid = hybrid.unwrap_or(self.config.hybrid_search_enabled);

        let mut results = Vec::with_capacity(queries.len());
        for (need_index, query) in queries.iter().enumerate() {
            let matches = self
                .match_one(project_id, query, need_index, top_k, threshold, hybrid)
                .await?;
            results.push(NeedMatches {
                need: query.clone(),
                need_index,
                matches,
            });
        }
        Ok(results)
    }

    /// Match an agent's needs with the configured defaults.
    pub async fn match_needs(
        &self,
        project_id: &str,
        needs: &[String],
    ) -> Result<Vec<NeedMatches>> {
        self.query(project_id, needs, None, None, None).await
    }

    async fn match_one(
        &self,
        project_id: &str,
        query: &str,
        need_index: usize,
        top_k: i64,
        threshold: f32,
        hybrid: bool,
    ) -> Result<Vec<Match>> {
        if top_k <= 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let query_embedding = self.embedder.embed(query).await?;

        // Over-fetch so fusion and truncation have candidates to work with.
        let fetch = top_k * 2;
        let semantic = self
            .index
            .search(project_id, &query_embedding, fetch, threshold)
            .await?;

        let mut matches: Vec<Match> = match (&self.keyword, hybrid) {
            (Some(keyword), true) => {
                let keyword_hits = keyword.search(project_id, query, fetch).await?;
                rrf_fuse(
                    semantic,
                    keyword_hits,
                    self.config.knn_weight,
                    self.config.bm25_weight,
                )
                .into_iter()
                // The vector search already enforced the similarity floor;
                // fusion keeps only semantic hits, so the threshold holds.
                .map(|fused| Match {
                    node_key: fused.hit.node_key,
                    data_key: fused.hit.data_key,
                    description: fused.hit.description,
                    data: fused.hit.data,
                    similarity: fused.similarity,
                    need_index,
                })
                .collect()
            }
            _ => semantic
                .into_iter()
                .map(|hit| Match {
                    node_key: hit.node_key,
                    data_key: hit.data_key,
                    description: hit.description,
                    data: hit.data,
                    similarity: hit.score,
                    need_index,
                })
                .collect(),
        };

        matches.truncate(top_k as usize);

        debug!(
            subsystem = "matcher",
            op = "match_one",
            project_id,
            result_count = matches.len(),
            hybrid,
            duration_ms = start.elapsed().as_millis() as u64,
            "Need matched"
        );
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use contex_core::memory::{MemoryKeywordIndex, MemoryVectorIndex};
    use contex_core::{ContextNode, EmbeddingBackend};
    use contex_inference::MockEmbeddingBackend;

    async fn indexed_node(
        index: &MemoryVectorIndex,
        backend: &MockEmbeddingBackend,
        project: &str,
        node_key: &str,
        description: &str,
    ) {
        let now = Utc::now();
        let embedding = backend.embed(description).await.unwrap();
        index
            .upsert(&ContextNode {
                project_id: project.to_string(),
                data_key: node_key.split('#').next().unwrap().to_string(),
                node_key: node_key.to_string(),
                description: description.to_string(),
                data: json!({"description": description}),
                data_format: "json".to_string(),
                embedding,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    fn matcher(
        index: Arc<MemoryVectorIndex>,
        keyword: Option<Arc<dyn KeywordIndex>>,
        backend: MockEmbeddingBackend,
    ) -> SemanticMatcher {
        let embedder = Arc::new(CachedEmbedder::new(Arc::new(backend), 256));
        let config = MatchingConfig {
            similarity_threshold: 0.5,
            max_matches: 10,
            max_context_size: 51_200,
            hybrid_search_enabled: false,
            bm25_weight: 0.7,
            knn_weight: 0.3,
        };
        SemanticMatcher::new(embedder, index, keyword, config)
    }

    #[tokio::test]
    async fn test_query_matches_related_node() {
        let backend = MockEmbeddingBackend::new();
        let index = Arc::new(MemoryVectorIndex::new());
        indexed_node(
            &index,
            &backend,
            "p",
            "api_config",
            "api_config base_url api endpoints configuration",
        )
        .await;
        indexed_node(&index, &backend, "p", "weather", "weather forecast rain").await;

        let matcher = matcher(index, None, backend);
        let results = matcher
            .query(
                "p",
                &["API configuration and endpoints".to_string()],
                Some(3),
                Some(0.5),
                None,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        let matches = &results[0].matches;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].node_key, "api_config");
        assert!(matches[0].similarity >= 0.5);
        assert_eq!(matches[0].need_index, 0);
    }

    #[tokio::test]
    async fn test_query_deterministic() {
        let backend = MockEmbeddingBackend::new();
        let index = Arc::new(MemoryVectorIndex::new());
        for i in 0..5 {
            indexed_node(
                &index,
                &backend,
                "p",
                &format!("node_{i}"),
                &format!("node_{i} database schema tables columns"),
            )
            .await;
        }

        let matcher = matcher(index, None, backend);
        let queries = vec!["database schema".to_string()];
        let first = matcher.query("p", &queries, Some(3), Some(0.1), None).await.unwrap();
        let second = matcher.query("p", &queries, Some(3), Some(0.1), None).await.unwrap();

        let keys = |r: &[NeedMatches]| -> Vec<String> {
            r[0].matches.iter().map(|m| m.node_key.clone()).collect()
        };
        assert_eq!(keys(&first), keys(&second));
    }

    #[tokio::test]
    async fn test_top_k_zero_yields_empty() {
        let backend = MockEmbeddingBackend::new();
        let index = Arc::new(MemoryVectorIndex::new());
        indexed_node(&index, &backend, "p", "a", "anything at all").await;

        let matcher = matcher(index, None, backend);
        let results = matcher
            .query("p", &["anything".to_string()], Some(0), None, None)
            .await
            .unwrap();
        assert!(results[0].matches.is_empty());
    }

    #[tokio::test]
    async fn test_multi_need_grouping_preserved() {
        let backend = MockEmbeddingBackend::new();
        let index = Arc::new(MemoryVectorIndex::new());
        indexed_node(&index, &backend, "p", "db", "db database schema tables").await;
        indexed_node(&index, &backend, "p", "api", "api endpoints routes rest").await;

        let matcher = matcher(index, None, backend);
        let results = matcher
            .match_needs(
                "p",
                &[
                    "database schema tables".to_string(),
                    "api endpoints routes".to_string(),
                ],
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].need_index, 0);
        assert_eq!(results[1].need_index, 1);
        assert_eq!(results[0].matches[0].node_key, "db");
        assert_eq!(results[1].matches[0].node_key, "api");
        // Each match records which need produced it.
        assert_eq!(results[1].matches[0].need_index, 1);
    }

    #[tokio::test]
    async fn test_hybrid_requires_keyword_index() {
        let backend = MockEmbeddingBackend::new();
        let index = Arc::new(MemoryVectorIndex::new());
        indexed_node(&index, &backend, "p", "db", "db database schema").await;

        // hybrid=true without a keyword index falls back to vector-only.
        let matcher = matcher(index, None, backend);
        let results = matcher
            .query("p", &["database schema".to_string()], None, Some(0.1), Some(true))
            .await
            .unwrap();
        assert!(!results[0].matches.is_empty());
    }

    #[tokio::test]
    async fn test_hybrid_fusion_reranks() {
        let backend = MockEmbeddingBackend::new();
        let index = Arc::new(MemoryVectorIndex::new());
        // Both nodes match semantically; keyword signal should re-rank.
        indexed_node(
            &index,
            &backend,
            "p",
            "generic",
            "database schema storage layout",
        )
        .await;
        indexed_node(
            &index,
            &backend,
            "p",
            "users_table",
            "users_table database schema tables columns email",
        )
        .await;

        let keyword: Arc<dyn KeywordIndex> =
            Arc::new(MemoryKeywordIndex::new(index.clone()));
        let matcher = matcher(index, Some(keyword), backend);

        let results = matcher
            .query(
                "p",
                &["users email columns".to_string()],
                Some(5),
                Some(0.0),
                Some(true),
            )
            .await
            .unwrap();

        assert!(!results[0].matches.is_empty());
        assert_eq!(results[0].matches[0].node_key, "users_table");
    }

    #[tokio::test]
    async fn test_embedding_cache_reused_across_queries() {
        let backend = MockEmbeddingBackend::new();
        let index = Arc::new(MemoryVectorIndex::new());
        indexed_node(&index, &backend, "p", "a", "something").await;

        let matcher = matcher(index, None, backend.clone());
        let calls_before = backend.call_count();
        let queries = vec!["repeated query".to_string()];
        matcher.query("p", &queries, None, None, None).await.unwrap();
        matcher.query("p", &queries, None, None, None).await.unwrap();
        // Second query hits the embedding cache.
        assert_eq!(backend.call_count(), calls_before + 1);
    }
}
