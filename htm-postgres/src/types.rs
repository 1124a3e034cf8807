//! Persistent entity types and row mapping.

use chrono::{DateTime, Utc};
use htm_core::error::{Error, Result};
use sqlx::postgres::PgRow;
use sqlx::Row;

/// Columns selected for a full node row.
pub(crate) const NODE_COLUMNS: &str = "id, content, content_hash, token_count, \
     embedding_dimensions, metadata, access_count, last_accessed, created_at, \
     updated_at, deleted_at";

/// The node columns qualified with a table alias.
pub(crate) fn node_columns_prefixed(alias: &str) -> String {
    NODE_COLUMNS
        .split(", ")
        .map(|column| format!("{alias}.{}", column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A stored memory node.
#[derive(Debug, Clone)]
pub struct Node {
    /// Database-assigned id
    pub id: i64,
    /// Node content
    pub content: String,
    /// SHA-256 hex digest of the content
    pub content_hash: String,
    /// Token count of the content
    pub token_count: i32,
    /// Original embedding length before padding, when an embedding has
    /// been attached
    pub embedding_dimensions: Option<i32>,
    /// Open metadata mapping
    pub metadata: serde_json::Value,
    /// Retrieval count
    pub access_count: i64,
    /// Last retrieval time
    pub last_accessed: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A robot (logical agent).
#[derive(Debug, Clone)]
pub struct Robot {
    /// Database-assigned id
    pub id: i64,
    /// Unique robot name
    pub name: String,
    /// Bumped on every operation touching the robot's nodes
    pub last_active: DateTime<Utc>,
}

/// Join row linking a robot to a node.
#[derive(Debug, Clone)]
pub struct RobotNode {
    /// Robot id
    pub robot_id: i64,
    /// Node id
    pub node_id: i64,
    /// First time this robot remembered the node
    pub first_remembered_at: DateTime<Utc>,
    /// Most recent time this robot remembered the node
    pub last_remembered_at: DateTime<Utc>,
    /// How many times the robot remembered the node
    pub remember_count: i64,
    /// Whether the node is currently in the robot's working set
    pub working_memory: bool,
}

/// Outcome of an add operation.
#[derive(Debug, Clone)]
pub struct AddOutcome {
    /// The stored (new, existing, or restored) node id
    pub node_id: i64,
    /// Whether a new row was inserted
    pub is_new: bool,
    /// The robot's join row after the operation
    pub robot_node: RobotNode,
}

/// A scored search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The matched node
    pub node: Node,
    /// Strategy-specific score (similarity, rank, RRF score, or
    /// relevance in `[0, 10]`)
    pub score: f64,
    /// Tags attached to the node, batch-loaded
    pub tags: Vec<String>,
}

/// Tag usage count.
#[derive(Debug, Clone)]
pub struct TagUsage {
    /// Tag name
    pub name: String,
    /// Number of live nodes carrying it
    pub usage_count: i64,
}

/// Co-occurrence edge between two tags.
#[derive(Debug, Clone)]
pub struct TopicRelationship {
    /// First tag name
    pub left: String,
    /// Second tag name
    pub right: String,
    /// Number of nodes carrying both
    pub shared_nodes: i64,
}

/// A tag matched against a query, with its match priority
/// (1 = exact, 2 = ancestor prefix, 3 = component, 4 = fuzzy).
#[derive(Debug, Clone)]
pub struct MatchedTag {
    /// Tag name
    pub name: String,
    /// Match priority, lower is stronger
    pub priority: i32,
}

/// Store-wide statistics.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Live (non-deleted) node count
    pub node_count: i64,
    /// Soft-deleted node count
    pub deleted_node_count: i64,
    /// Robot count
    pub robot_count: i64,
    /// Tag count
    pub tag_count: i64,
    /// Rows currently flagged as working memory
    pub working_memory_count: i64,
}

/// Map a database error, distinguishing statement-timeout
/// cancellations.
pub(crate) fn map_db_error(error: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db) = &error {
        // 57014: query_canceled, raised by statement_timeout
        if db.code().as_deref() == Some("57014") {
            return Error::QueryTimeout;
        }
    }
    Error::Database(error.to_string())
}

/// Decode a full node row.
pub(crate) fn node_from_row(row: &PgRow) -> Result<Node> {
    Ok(Node {
        id: row.try_get("id").map_err(map_db_error)?,
        content: row.try_get("content").map_err(map_db_error)?,
        content_hash: row.try_get("content_hash").map_err(map_db_error)?,
        token_count: row.try_get("token_count").map_err(map_db_error)?,
        embedding_dimensions: row
            .try_get("embedding_dimensions")
            .map_err(map_db_error)?,
        metadata: row.try_get("metadata").map_err(map_db_error)?,
        access_count: row.try_get("access_count").map_err(map_db_error)?,
        last_accessed: row.try_get("last_accessed").map_err(map_db_error)?,
        created_at: row.try_get("created_at").map_err(map_db_error)?,
        updated_at: row.try_get("updated_at").map_err(map_db_error)?,
        deleted_at: row.try_get("deleted_at").map_err(map_db_error)?,
    })
}

/// Decode a robot row.
pub(crate) fn robot_from_row(row: &PgRow) -> Result<Robot> {
    Ok(Robot {
        id: row.try_get("id").map_err(map_db_error)?,
        name: row.try_get("name").map_err(map_db_error)?,
        last_active: row.try_get("last_active").map_err(map_db_error)?,
    })
}

/// Decode a robot-node join row.
pub(crate) fn robot_node_from_row(row: &PgRow) -> Result<RobotNode> {
    Ok(RobotNode {
        robot_id: row.try_get("robot_id").map_err(map_db_error)?,
        node_id: row.try_get("node_id").map_err(map_db_error)?,
        first_remembered_at: row
            .try_get("first_remembered_at")
            .map_err(map_db_error)?,
        last_remembered_at: row.try_get("last_remembered_at").map_err(map_db_error)?,
        remember_count: row.try_get("remember_count").map_err(map_db_error)?,
        working_memory: row.try_get("working_memory").map_err(map_db_error)?,
    })
}
