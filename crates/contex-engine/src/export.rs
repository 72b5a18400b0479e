//! Project export and import.
//!
//! Exports carry stored embeddings verbatim, so an imported project answers
//! identical queries with identical rankings, with no re-embedding drift.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use contex_core::{ContextNode, Error, Event, EventLog, Result, VectorIndex};

/// Serializable snapshot of one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectExport {
    pub project_id: String,
    pub exported_at: DateTime<Utc>,
    pub nodes: Vec<ExportedNode>,
    pub events: Vec<Event>,
}

/// A context node with its stored embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedNode {
    pub data_key: String,
    pub node_key: String,
    pub description: String,
    pub data: JsonValue,
    pub data_format: String,
    pub embedding: Vec<f32>,
}

/// Export all nodes and events for a project.
pub async fn export_project(
    index: &dyn VectorIndex,
    log: &dyn EventLog,
    project_id: &str,
) -> Result<ProjectExport> {
    let nodes = index.list(project_id).await?;
    let mut events = Vec::new();
    let mut since = 0i64;
    loop {
        let page = log.read(project_id, since, 1000).await?;
        if page.is_empty() {
            break;
        }
        since = page.last().map(|e| e.sequence).unwrap_or(since);
        events.extend(page);
    }

    info!(
        subsystem = "engine",
        op = "export",
        project_id,
        node_count = nodes.len(),
        result_count = events.len(),
        "Project exported"
    );

    Ok(ProjectExport {
        project_id: project_id.to_string(),
        exported_at: Utc::now(),
        nodes: nodes
            .into_iter()
            .map(|n| ExportedNode {
                data_key: n.data_key,
                node_key: n.node_key,
                description: n.description,
                data: n.data,
                data_format: n.data_format,
                embedding: n.embedding,
            })
            .collect(),
        events,
    })
}

/// Import an export into a project, replaying nodes with their stored
/// embeddings and re-appending the event history in order.
///
/// The target project must be empty; importing over existing state would
/// interleave sequences.
pub async fn import_project(
    index: &dyn VectorIndex,
    log: &dyn EventLog,
    export: &ProjectExport,
    project_id: &str,
) -> Result<usize> {
    if log.length(project_id).await? > 0 {
        return Err(Error::Conflict(format!(
            "project {project_id} already has events"
        )));
    }

    let now = Utc::now();
    for node in &export.nodes {
        index
            .upsert(&ContextNode {
                project_id: project_id.to_string(),
                data_key: node.data_key.clone(),
                node_key: node.node_key.clone(),
                description: node.description.clone(),
                data: node.data.clone(),
                data_format: node.data_format.clone(),
                embedding: node.embedding.clone(),
                created_at: now,
                updated_at: now,
            })
            .await?;
    }
    for event in &export.events {
        log.append(project_id, event.event_type, event.data.clone())
            .await?;
    }

    info!(
        subsystem = "engine",
        op = "import",
        project_id,
        node_count = export.nodes.len(),
        result_count = export.events.len(),
        "Project imported"
    );
    Ok(export.nodes.len())
}
