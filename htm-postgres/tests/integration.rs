//! End-to-end scenarios against a provisioned PostgreSQL.
//!
//! These tests need a server with the `vector` and `pg_trgm`
//! extensions available, reachable through `HTM_TEST_DATABASE_URL`.
//! They are ignored by default; run them with
//! `cargo test -p htm-postgres -- --ignored`.

use async_trait::async_trait;
use htm_core::config::HtmConfig;
use htm_core::error::Result;
use htm_core::extract::{
    EmbeddingBackend, HeuristicTokenCounter, PropositionBackend, TagBackend,
};
use htm_core::JobBackend;
use htm_postgres::store::{AddNode, ExtractorBackends, LongTermMemory, TopicMatch};
use htm_postgres::RobotGroup;
use std::sync::Arc;

/// Deterministic embedding: a small vector derived from byte sums, so
/// identical content always embeds identically without a model server.
struct ByteSumEmbedding;

#[async_trait]
impl EmbeddingBackend for ByteSumEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0_f32; 8];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % 8] += f32::from(byte) / 255.0;
        }
        Ok(vector)
    }
}

struct NoTags;

#[async_trait]
impl TagBackend for NoTags {
    async fn extract_tags(&self, _text: &str, _existing: &[String]) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

struct NoPropositions;

#[async_trait]
impl PropositionBackend for NoPropositions {
    async fn extract_propositions(&self, _text: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

fn backends() -> ExtractorBackends {
    ExtractorBackends {
        embedding: Arc::new(ByteSumEmbedding),
        tag: Arc::new(NoTags),
        proposition: Arc::new(NoPropositions),
        token_counter: Arc::new(HeuristicTokenCounter),
        job_queue: None,
    }
}

async fn connect() -> Arc<LongTermMemory> {
    let mut config = HtmConfig::default();
    config.database.url = std::env::var("HTM_TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/htm_test".to_string());
    // Inline jobs keep the tests deterministic.
    config.job_backend = JobBackend::Inline;
    Arc::new(
        LongTermMemory::connect(config, backends())
            .await
            .expect("test database must be reachable"),
    )
}

fn unique(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    format!("{prefix}-{nanos}")
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server with pgvector and pg_trgm"]
async fn dedup_and_restore_roundtrip() {
    let store = connect().await;
    let robot = store.get_or_create_robot(&unique("dedup-bot")).await.unwrap();
    let content = unique("hello world");

    let first = store
        .add(AddNode::new(content.clone(), 3, robot.id))
        .await
        .unwrap();
    assert!(first.is_new);

    // Same content: same node, not new, remember count bumped.
    let second = store
        .add(AddNode::new(content.clone(), 3, robot.id))
        .await
        .unwrap();
    assert_eq!(second.node_id, first.node_id);
    assert!(!second.is_new);
    assert_eq!(second.robot_node.remember_count, 2);

    // Soft delete, then adding the same content restores the row.
    store.delete(first.node_id, true).await.unwrap();
    let restored = store
        .add(AddNode::new(content, 3, robot.id))
        .await
        .unwrap();
    assert_eq!(restored.node_id, first.node_id);
    assert!(!restored.is_new);
    let node = store.get_node(first.node_id).await.unwrap().unwrap();
    assert!(node.deleted_at.is_none());
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server with pgvector and pg_trgm"]
async fn tag_closure_and_prefix_queries() {
    let store = connect().await;
    let robot = store.get_or_create_robot(&unique("tag-bot")).await.unwrap();
    let outcome = store
        .add(AddNode::new(unique("async runtimes in rust"), 5, robot.id))
        .await
        .unwrap();

    store
        .add_tag(outcome.node_id, "programming:rust:async")
        .await
        .unwrap();

    // Closure: every prefix matches in prefix mode.
    for prefix in ["programming", "programming:rust", "programming:rust:async"] {
        let ids = store
            .nodes_by_topic(prefix, TopicMatch::Prefix, 10)
            .await
            .unwrap();
        assert!(ids.contains(&outcome.node_id), "prefix '{prefix}' must match");
    }

    let tags = store
        .batch_load_node_tags(&[outcome.node_id])
        .await
        .unwrap();
    let names = &tags[&outcome.node_id];
    assert!(names.contains(&"programming".to_string()));
    assert!(names.contains(&"programming:rust".to_string()));
    assert!(names.contains(&"programming:rust:async".to_string()));
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server with pgvector and pg_trgm"]
async fn retrieve_tracks_access_atomically() {
    let store = connect().await;
    let robot = store.get_or_create_robot(&unique("access-bot")).await.unwrap();
    let outcome = store
        .add(AddNode::new(unique("counted content"), 2, robot.id))
        .await
        .unwrap();

    let before = store.get_node(outcome.node_id).await.unwrap().unwrap();
    let retrieved = store.retrieve(outcome.node_id).await.unwrap().unwrap();
    assert_eq!(retrieved.access_count, before.access_count + 1);
    assert!(retrieved.last_accessed.is_some());
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server with pgvector and pg_trgm"]
async fn group_failover_keeps_members_in_sync() {
    let store = connect().await;
    let group = RobotGroup::new(unique("failover-group"), Arc::clone(&store));

    let a = unique("robot-a");
    let b = unique("robot-b");
    group.add_active(&a).await.unwrap();
    group.add_passive(&b).await.unwrap();

    let first = group.remember("the first shared fact", None).await.unwrap();
    assert!(group.in_sync().await.unwrap());
    assert!(group
        .member_memory(&a)
        .unwrap()
        .contains(first.node_id));
    assert!(group
        .member_memory(&b)
        .unwrap()
        .contains(first.node_id));

    let promoted = group.failover().unwrap();
    assert_eq!(promoted.name, b);

    let second = group.remember("the second shared fact", None).await.unwrap();
    assert!(group.in_sync().await.unwrap());
    for name in [&a, &b] {
        let memory = group.member_memory(name).unwrap();
        assert!(memory.contains(first.node_id));
        assert!(memory.contains(second.node_id));
    }
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server with pgvector and pg_trgm"]
async fn re_remembering_resident_content_does_not_evict() {
    use htm_core::extract::TokenCounter;

    let store = connect().await;
    let first_content = unique("fact-one");
    let second_content = unique("fact-two");
    let counter = HeuristicTokenCounter;
    let first_tokens = counter.count(&first_content);
    let second_tokens = counter.count(&second_content);

    // Budget fits both records exactly, so a spurious space check on a
    // re-remember would evict one of them.
    let group = RobotGroup::with_budget(
        unique("re-remember-group"),
        Arc::clone(&store),
        first_tokens + second_tokens,
    );
    let name = unique("re-remember-bot");
    group.add_active(&name).await.unwrap();

    let first = group.remember(&first_content, None).await.unwrap();
    let second = group.remember(&second_content, None).await.unwrap();

    // Same content dedupes to the same node; both records stay put.
    let again = group.remember(&first_content, None).await.unwrap();
    assert_eq!(again.node_id, first.node_id);

    let memory = group.member_memory(&name).unwrap();
    assert!(memory.contains(first.node_id));
    assert!(memory.contains(second.node_id));
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server with pgvector and pg_trgm"]
async fn fulltext_finds_stemmed_matches() {
    let store = connect().await;
    let robot = store.get_or_create_robot(&unique("fts-bot")).await.unwrap();
    let marker = unique("zebra");
    store
        .add(AddNode::new(
            format!("{marker} deployments are running smoothly"),
            6,
            robot.id,
        ))
        .await
        .unwrap();

    let hits = store
        .search_fulltext(
            &format!("{marker} deployment"),
            &htm_postgres::SearchOptions::with_limit(5),
        )
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits[0].node.content.contains(&marker));
}
