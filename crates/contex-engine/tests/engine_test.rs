//! End-to-end engine scenarios over the in-memory backends: publish/query,
//! registration with live updates and snapshot catch-up, idempotent
//! republish, degradation behavior, and export/import.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use contex_core::memory::{
    MemoryEventLog, MemoryPubSub, MemoryRegistrationRepository, MemoryVectorIndex,
};
use contex_core::{
    ContexConfig, DataUpdate, DegradationMode, DeliveryMode, Error, EventType, RegisterRequest,
};
use contex_dispatch::RetryPolicy;
use contex_engine::{Component, ContextEngine, EngineDeps, PublishRequest};
use contex_inference::MockEmbeddingBackend;

struct Fixture {
    engine: Arc<ContextEngine>,
    pubsub: Arc<MemoryPubSub>,
}

fn fixture() -> Fixture {
    let pubsub = Arc::new(MemoryPubSub::new());
    let index = Arc::new(MemoryVectorIndex::new());
    let deps = EngineDeps {
        log: Arc::new(MemoryEventLog::new()),
        index,
        keyword: None,
        registrations: Arc::new(MemoryRegistrationRepository::new()),
        embedding: Arc::new(MockEmbeddingBackend::new()),
        pubsub: pubsub.clone(),
    };
    let engine =
        ContextEngine::with_retry_policy(ContexConfig::default(), deps, RetryPolicy::fast())
            .unwrap();
    Fixture {
        engine: Arc::new(engine),
        pubsub,
    }
}

fn publish_request(project: &str, data_key: &str, data: serde_json::Value) -> PublishRequest {
    PublishRequest {
        project_id: project.to_string(),
        data_key: data_key.to_string(),
        data,
        description: None,
        data_format: None,
    }
}

fn register_request(agent_id: &str, project: &str, needs: &[&str]) -> RegisterRequest {
    RegisterRequest {
        agent_id: agent_id.to_string(),
        project_id: project.to_string(),
        needs: needs.iter().map(|n| n.to_string()).collect(),
        delivery: DeliveryMode::PubSub {
            channel: String::new(),
        },
        since: None,
    }
}

async fn recv_update(
    rx: &mut tokio::sync::broadcast::Receiver<String>,
) -> Option<DataUpdate> {
    loop {
        let raw = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .ok()?
            .ok()?;
        // Skip non-update traffic (initial context, catch-up events).
        if let Ok(update) = serde_json::from_str::<DataUpdate>(&raw) {
            if update.kind == "data_update" {
                return Some(update);
            }
        }
    }
}

#[tokio::test]
async fn test_publish_then_query() {
    let f = fixture();
    let receipt = f
        .engine
        .publish(PublishRequest {
            project_id: "p".to_string(),
            data_key: "api_config".to_string(),
            data: json!({"base_url": "https://api.example.com", "timeout": 30}),
            description: Some("API configuration endpoints base url timeout".to_string()),
            data_format: None,
        })
        .await
        .unwrap();
    assert_eq!(receipt.sequence, 1);
    assert_eq!(receipt.node_keys, vec!["api_config".to_string()]);

    let results = f
        .engine
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
    assert_eq!(matches[0].data["timeout"], 30);
}

#[tokio::test]
async fn test_publish_sequences_and_event_stream() {
    let f = fixture();
    for i in 1..=3 {
        let receipt = f
            .engine
            .publish(publish_request("p", &format!("key_{i}"), json!({"i": i})))
            .await
            .unwrap();
        assert_eq!(receipt.sequence, i);
    }

    let events = f.engine.events("p", 0, None).await.unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].event_type, EventType::DataPublished);
    assert_eq!(events[0].data["data_key"], "key_1");
    assert_eq!(events[0].data["node_keys"][0], "key_1");

    // since beyond head is empty, not an error.
    assert!(f.engine.events("p", 99, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_register_then_live_update() {
    let f = fixture();
    let response = f
        .engine
        .register(register_request(
            "g1",
            "p",
            &["database schema and tables"],
        ))
        .await
        .unwrap();
    assert_eq!(response.channel, "agent:g1:updates");
    assert_eq!(response.matched_needs_count, 0);
    assert_eq!(response.last_seen_sequence, 0);

    let mut rx = f.pubsub.subscribe("agent:g1:updates");
    f.engine
        .publish(PublishRequest {
            project_id: "p".to_string(),
            data_key: "users_table".to_string(),
            data: json!({"columns": ["id", "email"]}),
            description: Some("users_table database schema tables columns".to_string()),
            data_format: None,
        })
        .await
        .unwrap();

    let update = recv_update(&mut rx).await.expect("expected live update");
    assert_eq!(update.kind, "data_update");
    assert_eq!(update.data_key, "users_table");
    assert_eq!(update.sequence, 1);
    assert_eq!(update.matched_need, "database schema and tables");

    // Exactly one update.
    assert!(
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_initial_snapshot_catch_up() {
    let f = fixture();
    for key in ["users_table", "orders_table"] {
        f.engine
            .publish(PublishRequest {
                project_id: "p".to_string(),
                data_key: key.to_string(),
                data: json!({"columns": ["id"]}),
                description: Some(format!("{key} database schema tables columns")),
                data_format: None,
            })
            .await
            .unwrap();
    }

    let mut request = register_request("g1", "p", &["database schema and tables"]);
    request.since = Some(0);
    let response = f.engine.register(request).await.unwrap();

    // Both prior records surface in the snapshot, and both missed events
    // were replayed on the channel.
    assert!(response.matched_needs_count >= 2);
    assert_eq!(response.caught_up_events, 2);
    assert_eq!(response.last_seen_sequence, 0);

    // Live deliveries start strictly after the catch-up point.
    let mut rx = f.pubsub.subscribe("agent:g1:updates");
    f.engine
        .publish(PublishRequest {
            project_id: "p".to_string(),
            data_key: "sessions_table".to_string(),
            data: json!({"columns": ["token"]}),
            description: Some("sessions_table database schema tables columns".to_string()),
            data_format: None,
        })
        .await
        .unwrap();
    let update = recv_update(&mut rx).await.unwrap();
    assert_eq!(update.sequence, 3);
}

#[tokio::test]
async fn test_initial_context_payload_sent() {
    let f = fixture();
    f.engine
        .publish(PublishRequest {
            project_id: "p".to_string(),
            data_key: "users_table".to_string(),
            data: json!({"columns": ["id"]}),
            description: Some("users_table database schema tables".to_string()),
            data_format: None,
        })
        .await
        .unwrap();

    // Subscribe before registering so the snapshot lands in the channel.
    let mut rx = f.pubsub.subscribe("agent:g1:updates");
    f.engine
        .register(register_request(
            "g1",
            "p",
            &["database schema and tables"],
        ))
        .await
        .unwrap();

    let raw = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let payload: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(payload["type"], "initial_context");
    assert_eq!(payload["agent_id"], "g1");
    assert_eq!(payload["sequence"], 1);
    assert_eq!(payload["context"][0]["matches"][0]["node_key"], "users_table");
}

#[tokio::test]
async fn test_republish_identical_data_no_duplicate_delivery() {
    let f = fixture();
    f.engine
        .register(register_request("g1", "p", &["database schema and tables"]))
        .await
        .unwrap();

    let request = PublishRequest {
        project_id: "p".to_string(),
        data_key: "users_table".to_string(),
        data: json!({"columns": ["id", "email"]}),
        description: Some("users_table database schema tables columns".to_string()),
        data_format: None,
    };

    let mut rx = f.pubsub.subscribe("agent:g1:updates");
    f.engine.publish(request.clone()).await.unwrap();
    assert!(recv_update(&mut rx).await.is_some());

    // Identical republish: one node, two events, no second delivery.
    f.engine.publish(request).await.unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(300), rx.recv())
            .await
            .is_err()
    );
    assert_eq!(f.engine.events("p", 0, None).await.unwrap().len(), 2);

    let results = f
        .engine
        .query("p", &["database schema and tables".to_string()], Some(10), Some(0.1), None)
        .await
        .unwrap();
    assert_eq!(results[0].matches.len(), 1);
}

#[tokio::test]
async fn test_republish_changed_data_delivers_again() {
    let f = fixture();
    f.engine
        .register(register_request("g1", "p", &["database schema and tables"]))
        .await
        .unwrap();

    let mut rx = f.pubsub.subscribe("agent:g1:updates");
    f.engine
        .publish(PublishRequest {
            project_id: "p".to_string(),
            data_key: "users_table".to_string(),
            data: json!({"columns": ["id"]}),
            description: Some("users_table database schema tables v1".to_string()),
            data_format: None,
        })
        .await
        .unwrap();
    assert_eq!(recv_update(&mut rx).await.unwrap().sequence, 1);

    f.engine
        .publish(PublishRequest {
            project_id: "p".to_string(),
            data_key: "users_table".to_string(),
            data: json!({"columns": ["id", "email"]}),
            description: Some("users_table database schema tables v2".to_string()),
            data_format: None,
        })
        .await
        .unwrap();
    assert_eq!(recv_update(&mut rx).await.unwrap().sequence, 2);
}

#[tokio::test]
async fn test_reregistration_replaces_and_resets() {
    let f = fixture();
    f.engine
        .register(register_request("g1", "p", &["database schema"]))
        .await
        .unwrap();

    f.engine
        .publish(publish_request("p", "k", json!({"x": 1})))
        .await
        .unwrap();

    // Re-register with an explicit since.
    let mut request = register_request("g1", "p", &["api endpoints"]);
    request.since = Some(0);
    let response = f.engine.register(request).await.unwrap();
    assert_eq!(response.last_seen_sequence, 0);

    let stored = f.engine.get_agent("g1").await.unwrap().unwrap();
    assert_eq!(stored.needs, vec!["api endpoints".to_string()]);
    assert_eq!(stored.last_seen_sequence, 0);
}

#[tokio::test]
async fn test_unregister() {
    let f = fixture();
    f.engine
        .register(register_request("g1", "p", &["anything at all"]))
        .await
        .unwrap();
    f.engine.unregister("g1").await.unwrap();

    assert!(f.engine.get_agent("g1").await.unwrap().is_none());
    assert!(matches!(
        f.engine.unregister("g1").await.unwrap_err(),
        Error::NotFound(_)
    ));
}

#[tokio::test]
async fn test_degraded_rejects_queries_but_accepts_publishes() {
    let f = fixture();
    for _ in 0..3 {
        f.engine.degradation().record_failure(Component::VectorIndex);
    }
    assert_eq!(f.engine.mode(), DegradationMode::Degraded);

    let err = f
        .engine
        .query("p", &["anything".to_string()], None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransientBackend(_)));

    let err = f
        .engine
        .register(register_request("g1", "p", &["anything"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransientBackend(_)));

    // Publishes still succeed; fan-out parks in the outbox.
    let receipt = f
        .engine
        .publish(publish_request("p", "k", json!({"x": 1})))
        .await
        .unwrap();
    assert_eq!(receipt.sequence, 1);
    assert_eq!(f.engine.outbox_len(), 1);
}

#[tokio::test]
async fn test_outbox_drains_on_recovery() {
    let f = fixture();
    f.engine
        .register(register_request("g1", "p", &["database schema and tables"]))
        .await
        .unwrap();

    for _ in 0..3 {
        f.engine.degradation().record_failure(Component::VectorIndex);
    }
    let mut rx = f.pubsub.subscribe("agent:g1:updates");
    f.engine
        .publish(PublishRequest {
            project_id: "p".to_string(),
            data_key: "users_table".to_string(),
            data: json!({"columns": ["id"]}),
            description: Some("users_table database schema tables".to_string()),
            data_format: None,
        })
        .await
        .unwrap();
    assert_eq!(f.engine.outbox_len(), 1);
    // Nothing delivered while degraded.
    assert!(
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err()
    );

    // Recovery: two successful probes, then the drain applies index writes
    // and fan-out.
    f.engine.degradation().record_success(Component::VectorIndex);
    f.engine.degradation().record_success(Component::VectorIndex);
    f.engine.probe_once().await;
    assert_eq!(f.engine.mode(), DegradationMode::Normal);
    assert_eq!(f.engine.outbox_len(), 0);

    let update = recv_update(&mut rx).await.expect("deferred update delivered");
    assert_eq!(update.data_key, "users_table");

    // The deferred index write landed too.
    let results = f
        .engine
        .query("p", &["database schema and tables".to_string()], None, Some(0.1), None)
        .await
        .unwrap();
    assert_eq!(results[0].matches.len(), 1);
}

#[tokio::test]
async fn test_unavailable_rejects_mutations() {
    let f = fixture();
    for _ in 0..3 {
        f.engine.degradation().record_failure(Component::EventLog);
    }
    assert_eq!(f.engine.mode(), DegradationMode::Unavailable);

    let err = f
        .engine
        .publish(publish_request("p", "k", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransientBackend(_)));
    assert!(err.is_retryable());
    assert_eq!(err.status_code(), 503);
}

#[tokio::test]
async fn test_validation_errors() {
    let f = fixture();
    assert!(matches!(
        f.engine
            .publish(publish_request("p", "", json!({})))
            .await
            .unwrap_err(),
        Error::Validation(_)
    ));
    assert!(matches!(
        f.engine
            .register(register_request("g1", "p", &[]))
            .await
            .unwrap_err(),
        Error::Validation(_)
    ));
    let mut bad_webhook = register_request("g1", "p", &["anything"]);
    bad_webhook.delivery = DeliveryMode::Webhook {
        url: String::new(),
        hmac_secret: None,
    };
    assert!(matches!(
        f.engine.register(bad_webhook).await.unwrap_err(),
        Error::Validation(_)
    ));
}

#[tokio::test]
async fn test_yaml_publish_normalized() {
    let f = fixture();
    f.engine
        .publish(PublishRequest {
            project_id: "p".to_string(),
            data_key: "service_config".to_string(),
            data: json!("host: localhost\nport: 8080\n"),
            description: Some("service_config host port settings".to_string()),
            data_format: Some("yaml".to_string()),
        })
        .await
        .unwrap();

    let results = f
        .engine
        .query("p", &["service host port settings".to_string()], None, Some(0.3), None)
        .await
        .unwrap();
    assert_eq!(results[0].matches.len(), 1);
    // Payload was normalized to structured JSON.
    assert_eq!(results[0].matches[0].data["port"], 8080);
}

#[tokio::test]
async fn test_nested_payload_decomposes_into_nodes() {
    let f = fixture();
    let receipt = f
        .engine
        .publish(publish_request(
            "p",
            "infra",
            json!({
                "service": {
                    "db": {"host": "localhost", "port": 5432},
                    "cache": {"host": "redis", "port": 6379}
                }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(receipt.node_keys.len(), 3);
    assert!(receipt.node_keys.contains(&"infra".to_string()));
    assert!(receipt.node_keys.contains(&"infra#/service/db".to_string()));
    assert!(receipt
        .node_keys
        .contains(&"infra#/service/cache".to_string()));
}

#[tokio::test]
async fn test_delete_data_removes_all_nodes() {
    let f = fixture();
    f.engine
        .publish(publish_request(
            "p",
            "infra",
            json!({"service": {"db": {"host": "h", "port": 1}}}),
        ))
        .await
        .unwrap();

    let sequence = f.engine.delete_data("p", "infra").await.unwrap();
    assert_eq!(sequence, 2);

    let results = f
        .engine
        .query("p", &["infra service db".to_string()], None, Some(0.0), None)
        .await
        .unwrap();
    assert!(results[0].matches.is_empty());

    assert!(matches!(
        f.engine.delete_data("p", "infra").await.unwrap_err(),
        Error::NotFound(_)
    ));
}

#[tokio::test]
async fn test_export_import_round_trip_rankings() {
    let f = fixture();
    for (key, desc) in [
        ("users_table", "users_table database schema tables columns"),
        ("orders_table", "orders_table database schema orders"),
        ("api_config", "api_config endpoints base url"),
    ] {
        f.engine
            .publish(PublishRequest {
                project_id: "p".to_string(),
                data_key: key.to_string(),
                data: json!({"key": key}),
                description: Some(desc.to_string()),
                data_format: None,
            })
            .await
            .unwrap();
    }

    let queries = vec!["database schema and tables".to_string()];
    let original = f
        .engine
        .query("p", &queries, Some(5), Some(0.1), None)
        .await
        .unwrap();

    let export = f.engine.export_project("p").await.unwrap();
    assert_eq!(export.nodes.len(), 3);
    assert_eq!(export.events.len(), 3);

    let imported_count = f.engine.import_project(&export, "p2").await.unwrap();
    assert_eq!(imported_count, 3);

    let imported = f
        .engine
        .query("p2", &queries, Some(5), Some(0.1), None)
        .await
        .unwrap();

    let keys = |r: &[contex_core::NeedMatches]| -> Vec<(String, String)> {
        r[0].matches
            .iter()
            .map(|m| (m.node_key.clone(), format!("{:.6}", m.similarity)))
            .collect()
    };
    assert_eq!(keys(&original), keys(&imported));

    // Importing over a non-empty project is refused.
    assert!(matches!(
        f.engine.import_project(&export, "p").await.unwrap_err(),
        Error::Conflict(_)
    ));
}

#[tokio::test]
async fn test_shutdown_drains_deliveries() {
    let f = fixture();
    f.engine
        .register(register_request("g1", "p", &["database schema and tables"]))
        .await
        .unwrap();
    let mut rx = f.pubsub.subscribe("agent:g1:updates");
    f.engine
        .publish(PublishRequest {
            project_id: "p".to_string(),
            data_key: "users_table".to_string(),
            data: json!({"columns": ["id"]}),
            description: Some("users_table database schema tables".to_string()),
            data_format: None,
        })
        .await
        .unwrap();

    f.engine.shutdown().await;
    assert!(recv_update(&mut rx).await.is_some());
}
