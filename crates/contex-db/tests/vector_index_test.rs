//! Vector index integration tests. Requires PostgreSQL with pgvector.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use contex_core::models::EMBEDDING_DIM;
use contex_core::{ContextNode, VectorIndex};
use contex_db::test_fixtures::test_database_url;
use contex_db::{create_pool, run_migrations, PgVectorIndex};

async fn setup() -> PgVectorIndex {
    let pool = create_pool(&test_database_url())
        .await
        .expect("Failed to connect to test DB");
    run_migrations(&pool).await.expect("migrations failed");
    PgVectorIndex::new(pool)
}

fn test_project() -> String {
    format!("proj-{}", Uuid::new_v4())
}

/// Unit vector with weight concentrated on one axis.
fn axis_vector(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[axis] = 1.0;
    v
}

fn node(project: &str, node_key: &str, embedding: Vec<f32>) -> ContextNode {
    let now = Utc::now();
    ContextNode {
        project_id: project.to_string(),
        data_key: node_key.split('#').next().unwrap().to_string(),
        node_key: node_key.to_string(),
        description: format!("{node_key} test node"),
        data: json!({"key": node_key}),
        data_format: "json".to_string(),
        embedding,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn test_upsert_and_get() {
    let index = setup().await;
    let project = test_project();

    index.upsert(&node(&project, "api_config", axis_vector(0))).await.unwrap();

    let fetched = index.get(&project, "api_config").await.unwrap().unwrap();
    assert_eq!(fetched.node_key, "api_config");
    assert_eq!(fetched.embedding.len(), EMBEDDING_DIM);
    assert_eq!(fetched.embedding[0], 1.0);
}

#[tokio::test]
async fn test_upsert_replaces_existing() {
    let index = setup().await;
    let project = test_project();

    index.upsert(&node(&project, "cfg", axis_vector(0))).await.unwrap();
    let mut replacement = node(&project, "cfg", axis_vector(1));
    replacement.data = json!({"replaced": true});
    index.upsert(&replacement).await.unwrap();

    let all = index.list(&project).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].data, json!({"replaced": true}));
    assert_eq!(all[0].embedding[1], 1.0);
}

#[tokio::test]
async fn test_search_orders_by_similarity() {
    let index = setup().await;
    let project = test_project();

    // Exact match, partial overlap, orthogonal.
    index.upsert(&node(&project, "exact", axis_vector(0))).await.unwrap();
    let mut partial = vec![0.0f32; EMBEDDING_DIM];
    partial[0] = 1.0;
    partial[1] = 1.0;
    index.upsert(&node(&project, "partial", partial)).await.unwrap();
    index.upsert(&node(&project, "orthogonal", axis_vector(2))).await.unwrap();

    let hits = index.search(&project, &axis_vector(0), 10, 0.1).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].node_key, "exact");
    assert!((hits[0].score - 1.0).abs() < 1e-5);
    assert_eq!(hits[1].node_key, "partial");
    assert!(hits[1].score < hits[0].score);
}

#[tokio::test]
async fn test_search_threshold_boundary_inclusive() {
    let index = setup().await;
    let project = test_project();

    index.upsert(&node(&project, "only", axis_vector(0))).await.unwrap();

    // Find the exact stored score, then re-query with it as the threshold.
    let hits = index.search(&project, &axis_vector(0), 10, 0.0).await.unwrap();
    let score = hits[0].score;

    let at_boundary = index.search(&project, &axis_vector(0), 10, score).await.unwrap();
    assert_eq!(at_boundary.len(), 1, "similarity == threshold must surface");
}

#[tokio::test]
async fn test_search_top_k_zero_is_empty() {
    let index = setup().await;
    let project = test_project();

    index.upsert(&node(&project, "n", axis_vector(0))).await.unwrap();
    let hits = index.search(&project, &axis_vector(0), 0, 0.0).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_search_tie_break_by_node_key() {
    let index = setup().await;
    let project = test_project();

    // Identical embeddings: identical scores, lexicographic key order.
    index.upsert(&node(&project, "zeta", axis_vector(0))).await.unwrap();
    index.upsert(&node(&project, "alpha", axis_vector(0))).await.unwrap();

    let hits = index.search(&project, &axis_vector(0), 10, 0.5).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].node_key, "alpha");
    assert_eq!(hits[1].node_key, "zeta");
}

#[tokio::test]
async fn test_search_scoped_to_project() {
    let index = setup().await;
    let ours = test_project();
    let theirs = test_project();

    index.upsert(&node(&ours, "shared_key", axis_vector(0))).await.unwrap();
    index.upsert(&node(&theirs, "shared_key", axis_vector(0))).await.unwrap();

    let hits = index.search(&ours, &axis_vector(0), 10, 0.0).await.unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_delete_removes_node() {
    let index = setup().await;
    let project = test_project();

    index.upsert(&node(&project, "gone", axis_vector(0))).await.unwrap();
    index.delete(&project, "gone").await.unwrap();
    assert!(index.get(&project, "gone").await.unwrap().is_none());

    // Deleting a missing key is not an error.
    index.delete(&project, "never_existed").await.unwrap();
}

#[tokio::test]
async fn test_list_ordered_by_node_key() {
    let index = setup().await;
    let project = test_project();

    for key in ["c", "a", "b"] {
        index.upsert(&node(&project, key, axis_vector(0))).await.unwrap();
    }
    let all = index.list(&project).await.unwrap();
    let keys: Vec<&str> = all.iter().map(|n| n.node_key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b", "c"]);
}
