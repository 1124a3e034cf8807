//! Node CRUD: content-hash deduplication, soft delete and restore,
//! access tracking.

use super::LongTermMemory;
use crate::jobs as background;
use crate::sql::{pad_to_max, sanitize_embedding};
use crate::types::{
    map_db_error, node_from_row, robot_node_from_row, AddOutcome, Node, RobotNode, NODE_COLUMNS,
};
use htm_core::error::{Error, Result};
use htm_core::query_cache::CachedMethod;
use sha2::{Digest, Sha256};
use sqlx::Postgres;
use sqlx::Transaction;
use std::sync::Arc;
use tracing::{debug, info};

/// Options for adding a node.
#[derive(Debug, Clone)]
pub struct AddNode {
    /// Node content; must be non-empty
    pub content: String,
    /// Token count of the content
    pub token_count: i32,
    /// Robot remembering the node
    pub robot_id: i64,
    /// Embedding, when already available (usually attached later by a
    /// background job)
    pub embedding: Option<Vec<f32>>,
    /// Open metadata mapping
    pub metadata: serde_json::Value,
    /// Whether the robot's join row is flagged as working memory
    pub working_memory: bool,
}

impl AddNode {
    /// Options with content and token count only.
    #[must_use]
    pub fn new(content: impl Into<String>, token_count: i32, robot_id: i64) -> Self {
        Self {
            content: content.into(),
            token_count,
            robot_id,
            embedding: None,
            metadata: serde_json::json!({}),
            working_memory: false,
        }
    }
}

/// SHA-256 hex digest of node content.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

impl LongTermMemory {
    /// Store a node, deduplicating by content hash.
    ///
    /// Inside one transaction: a live node with the same hash is
    /// linked (not re-inserted); a soft-deleted one is restored and
    /// linked; otherwise a new row is inserted. Only a genuine insert
    /// invalidates the search-method cache entries.
    pub async fn add(&self, options: AddNode) -> Result<AddOutcome> {
        if options.content.trim().is_empty() {
            return Err(Error::Validation("node content must not be empty".to_string()));
        }
        if options.token_count < 0 {
            return Err(Error::Validation("token_count must be >= 0".to_string()));
        }

        let hash = content_hash(&options.content);
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        // Hash lookup includes soft-deleted rows so duplicates restore.
        let existing = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE content_hash = $1 \
             ORDER BY (deleted_at IS NULL) DESC LIMIT 1"
        ))
        .bind(&hash)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_error)?;

        let outcome = if let Some(row) = existing {
            let node = node_from_row(&row)?;
            if node.deleted_at.is_some() {
                sqlx::query("UPDATE nodes SET deleted_at = NULL, updated_at = now() WHERE id = $1")
                    .bind(node.id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_db_error)?;
                info!("Restored soft-deleted node {} on duplicate content", node.id);
            } else {
                sqlx::query("UPDATE nodes SET updated_at = now() WHERE id = $1")
                    .bind(node.id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_db_error)?;
            }
            let robot_node = upsert_robot_node(
                &mut tx,
                options.robot_id,
                node.id,
                options.working_memory,
            )
            .await?;
            AddOutcome {
                node_id: node.id,
                is_new: false,
                robot_node,
            }
        } else {
            let embedding_literal = match &options.embedding {
                Some(vector) => {
                    let original_len = vector.len();
                    if original_len > crate::schema::MAX_EMBEDDING_DIMENSION {
                        return Err(Error::Validation(format!(
                            "embedding dimension {} exceeds maximum {}",
                            original_len,
                            crate::schema::MAX_EMBEDDING_DIMENSION
                        )));
                    }
                    sanitize_embedding(vector)?;
                    Some((sanitize_embedding(&pad_to_max(vector))?, original_len as i32))
                }
                None => None,
            };

            let row = match &embedding_literal {
                Some((literal, dimensions)) => sqlx::query(&format!(
                    "INSERT INTO nodes \
                         (content, content_hash, token_count, embedding, \
                          embedding_dimensions, metadata) \
                     VALUES ($1, $2, $3, $4::vector, $5, $6) \
                     RETURNING {NODE_COLUMNS}"
                ))
                .bind(&options.content)
                .bind(&hash)
                .bind(options.token_count)
                .bind(literal)
                .bind(dimensions)
                .bind(&options.metadata)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_db_error)?,
                None => sqlx::query(&format!(
                    "INSERT INTO nodes (content, content_hash, token_count, metadata) \
                     VALUES ($1, $2, $3, $4) RETURNING {NODE_COLUMNS}"
                ))
                .bind(&options.content)
                .bind(&hash)
                .bind(options.token_count)
                .bind(&options.metadata)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_db_error)?,
            };
            let node = node_from_row(&row)?;
            let robot_node = upsert_robot_node(
                &mut tx,
                options.robot_id,
                node.id,
                options.working_memory,
            )
            .await?;
            debug!("Inserted node {} ({} tokens)", node.id, node.token_count);
            AddOutcome {
                node_id: node.id,
                is_new: true,
                robot_node,
            }
        };

        tx.commit().await.map_err(map_db_error)?;

        if outcome.is_new {
            self.cache.invalidate_methods(&[
                CachedMethod::Search,
                CachedMethod::Fulltext,
                CachedMethod::Hybrid,
            ]);
        }
        Ok(outcome)
    }

    /// Store a node, then enqueue the embedding/tag/proposition jobs
    /// for it when the row is new.
    pub async fn add_and_extract(self: &Arc<Self>, options: AddNode) -> Result<AddOutcome> {
        let robot_id = options.robot_id;
        let outcome = self.add(options).await?;
        if outcome.is_new {
            background::enqueue_extraction_jobs(self, outcome.node_id, robot_id).await?;
        }
        Ok(outcome)
    }

    /// Fetch a node and atomically bump its access counters in one
    /// UPDATE. Returns `None` for missing or soft-deleted nodes.
    pub async fn retrieve(&self, node_id: i64) -> Result<Option<Node>> {
        let row = sqlx::query(&format!(
            "UPDATE nodes SET access_count = access_count + 1, last_accessed = now() \
             WHERE id = $1 AND deleted_at IS NULL RETURNING {NODE_COLUMNS}"
        ))
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        row.as_ref().map(node_from_row).transpose()
    }

    /// Fetch a node without touching its access counters. Soft-deleted
    /// rows are returned with `deleted_at` set.
    pub async fn get_node(&self, node_id: i64) -> Result<Option<Node>> {
        let row = sqlx::query(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = $1"))
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        row.as_ref().map(node_from_row).transpose()
    }

    /// Whether a live node with this id exists.
    pub async fn exists(&self, node_id: i64) -> Result<bool> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE id = $1 AND deleted_at IS NULL)",
        )
        .bind(node_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(row.0)
    }

    /// Set `last_accessed` without changing the access count.
    pub async fn update_last_accessed(&self, node_id: i64) -> Result<()> {
        sqlx::query("UPDATE nodes SET last_accessed = now() WHERE id = $1")
            .bind(node_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    /// Bulk atomic access bump for a result set.
    pub async fn track_access(&self, node_ids: &[i64]) -> Result<()> {
        if node_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE nodes SET access_count = access_count + 1, last_accessed = now() \
             WHERE id = ANY($1)",
        )
        .bind(node_ids)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }

    /// Clear the `working_memory` flag on a robot's join rows (bulk).
    pub async fn mark_evicted(&self, robot_id: i64, node_ids: &[i64]) -> Result<()> {
        if node_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE robot_nodes SET working_memory = FALSE \
             WHERE robot_id = $1 AND node_id = ANY($2)",
        )
        .bind(robot_id)
        .bind(node_ids)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }

    /// Delete a node. Soft delete marks `deleted_at`; hard delete
    /// removes the row and cascades its join rows.
    pub async fn delete(&self, node_id: i64, soft: bool) -> Result<()> {
        let affected = if soft {
            sqlx::query(
                "UPDATE nodes SET deleted_at = now(), updated_at = now() \
                 WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(node_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?
            .rows_affected()
        } else {
            sqlx::query("DELETE FROM nodes WHERE id = $1")
                .bind(node_id)
                .execute(&self.pool)
                .await
                .map_err(map_db_error)?
                .rows_affected()
        };

        if affected == 0 {
            return Err(Error::NotFound(format!("node {node_id}")));
        }
        self.cache.invalidate_methods(&[
            CachedMethod::Search,
            CachedMethod::Fulltext,
            CachedMethod::Hybrid,
        ]);
        Ok(())
    }

    /// Attach an embedding produced by a background job, recording the
    /// original dimension and padding for index compatibility.
    pub async fn set_node_embedding(&self, node_id: i64, vector: &[f32]) -> Result<()> {
        if vector.len() > crate::schema::MAX_EMBEDDING_DIMENSION {
            return Err(Error::Validation(format!(
                "embedding dimension {} exceeds maximum {}",
                vector.len(),
                crate::schema::MAX_EMBEDDING_DIMENSION
            )));
        }
        sanitize_embedding(vector)?;
        let literal = sanitize_embedding(&pad_to_max(vector))?;

        let affected = sqlx::query(
            "UPDATE nodes SET embedding = $1::vector, embedding_dimensions = $2, \
             updated_at = now() WHERE id = $3 AND deleted_at IS NULL",
        )
        .bind(&literal)
        .bind(vector.len() as i32)
        .bind(node_id)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?
        .rows_affected();

        if affected > 0 {
            self.cache.invalidate_methods(&[
                CachedMethod::Search,
                CachedMethod::Fulltext,
                CachedMethod::Hybrid,
            ]);
        } else {
            debug!("Embedding write skipped: node {} is gone", node_id);
        }
        Ok(())
    }

    /// Clear every `working_memory` flag a robot holds.
    pub async fn clear_working_memory_flags(&self, robot_id: i64) -> Result<u64> {
        let affected = sqlx::query(
            "UPDATE robot_nodes SET working_memory = FALSE \
             WHERE robot_id = $1 AND working_memory",
        )
        .bind(robot_id)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?
        .rows_affected();
        Ok(affected)
    }

    /// Node ids currently flagged as a robot's working memory.
    pub async fn working_memory_node_ids(&self, robot_id: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT node_id FROM robot_nodes \
             WHERE robot_id = $1 AND working_memory ORDER BY node_id",
        )
        .bind(robot_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Upsert a robot-node join row outside a transaction.
    pub async fn link_robot_node(
        &self,
        robot_id: i64,
        node_id: i64,
        working_memory: bool,
    ) -> Result<RobotNode> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        let robot_node = upsert_robot_node(&mut tx, robot_id, node_id, working_memory).await?;
        tx.commit().await.map_err(map_db_error)?;
        Ok(robot_node)
    }
}

/// Find-or-create the join row; an existing row gets its remember
/// count bumped and keeps its working-memory flag unless the caller
/// raises it.
async fn upsert_robot_node(
    tx: &mut Transaction<'_, Postgres>,
    robot_id: i64,
    node_id: i64,
    working_memory: bool,
) -> Result<RobotNode> {
    let row = sqlx::query(
        "INSERT INTO robot_nodes \
             (robot_id, node_id, first_remembered_at, last_remembered_at, \
              remember_count, working_memory) \
         VALUES ($1, $2, now(), now(), 1, $3) \
         ON CONFLICT (robot_id, node_id) DO UPDATE SET \
             remember_count = robot_nodes.remember_count + 1, \
             last_remembered_at = now(), \
             working_memory = robot_nodes.working_memory OR EXCLUDED.working_memory \
         RETURNING robot_id, node_id, first_remembered_at, last_remembered_at, \
                   remember_count, working_memory",
    )
    .bind(robot_id)
    .bind(node_id)
    .bind(working_memory)
    .fetch_one(&mut **tx)
    .await
    .map_err(map_db_error)?;

    sqlx::query("UPDATE robots SET last_active = now() WHERE id = $1")
        .bind(robot_id)
        .execute(&mut **tx)
        .await
        .map_err(map_db_error)?;

    robot_node_from_row(&row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_sha256_hex() {
        let hash = content_hash("hello world");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        // Deterministic
        assert_eq!(hash, content_hash("hello world"));
        assert_ne!(hash, content_hash("hello world!"));
    }

    #[test]
    fn add_options_default_shape() {
        let options = AddNode::new("text", 3, 1);
        assert!(options.embedding.is_none());
        assert!(!options.working_memory);
        assert_eq!(options.metadata, serde_json::json!({}));
    }
}
