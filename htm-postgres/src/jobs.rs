//! Background extraction jobs.
//!
//! Embeddings, tags, and propositions are attached to nodes
//! out-of-band from the write path. Jobs are idempotent and tolerate a
//! node being soft-deleted between enqueue and execution; failures are
//! logged and dropped for the attempt (the external queue may retry on
//! its own).

use crate::store::{AddNode, LongTermMemory};
use htm_core::error::Result;
use htm_core::jobs::Job;
use std::sync::Arc;
use tracing::debug;

/// Enqueue the extraction jobs for a freshly inserted node.
pub async fn enqueue_extraction_jobs(
    store: &Arc<LongTermMemory>,
    node_id: i64,
    robot_id: i64,
) -> Result<()> {
    store
        .dispatcher()
        .dispatch(embed_node_job(Arc::clone(store), node_id))
        .await?;
    store
        .dispatcher()
        .dispatch(tag_node_job(Arc::clone(store), node_id))
        .await?;
    if store.proposition_service().enabled() {
        store
            .dispatcher()
            .dispatch(extract_propositions_job(
                Arc::clone(store),
                node_id,
                robot_id,
            ))
            .await?;
    }
    Ok(())
}

/// Generate and attach the embedding for a node.
#[must_use]
pub fn embed_node_job(store: Arc<LongTermMemory>, node_id: i64) -> Job {
    Job::new(
        "generate_embedding",
        serde_json::json!({ "node_id": node_id }),
        async move {
            let Some(node) = store.get_node(node_id).await? else {
                debug!("Embedding job skipped: node {} is gone", node_id);
                return Ok(());
            };
            if node.deleted_at.is_some() {
                debug!("Embedding job skipped: node {} is deleted", node_id);
                return Ok(());
            }
            let vector = store.embedding_service().generate(&node.content).await?;
            store.set_node_embedding(node_id, &vector).await
        },
    )
}

/// Extract and attach tags (with their ancestor closure) for a node.
#[must_use]
pub fn tag_node_job(store: Arc<LongTermMemory>, node_id: i64) -> Job {
    Job::new(
        "extract_tags",
        serde_json::json!({ "node_id": node_id }),
        async move {
            let Some(node) = store.get_node(node_id).await? else {
                debug!("Tag job skipped: node {} is gone", node_id);
                return Ok(());
            };
            if node.deleted_at.is_some() {
                debug!("Tag job skipped: node {} is deleted", node_id);
                return Ok(());
            }
            let ontology = store.popular_tag_names().await.unwrap_or_default();
            let tags = store
                .tag_extraction_service()
                .extract(&node.content, &ontology)
                .await?;
            for tag in tags {
                store.add_tag(node_id, &tag).await?;
            }
            Ok(())
        },
    )
}

/// Decompose a node into propositions, stored as linked nodes.
#[must_use]
pub fn extract_propositions_job(
    store: Arc<LongTermMemory>,
    node_id: i64,
    robot_id: i64,
) -> Job {
    Job::new(
        "extract_propositions",
        serde_json::json!({ "node_id": node_id, "robot_id": robot_id }),
        async move {
            let Some(node) = store.get_node(node_id).await? else {
                debug!("Proposition job skipped: node {} is gone", node_id);
                return Ok(());
            };
            if node.deleted_at.is_some() {
                debug!("Proposition job skipped: node {} is deleted", node_id);
                return Ok(());
            }
            let propositions = store
                .proposition_service()
                .extract(&node.content)
                .await?;
            for proposition in propositions {
                let token_count = store.token_counter().count(&proposition);
                // Plain add: proposition nodes do not recurse into
                // further extraction.
                store
                    .add(AddNode {
                        content: proposition,
                        token_count: token_count as i32,
                        robot_id,
                        embedding: None,
                        metadata: serde_json::json!({
                            "source": "proposition",
                            "parent_node_id": node_id,
                        }),
                        working_memory: false,
                    })
                    .await?;
            }
            Ok(())
        },
    )
}
