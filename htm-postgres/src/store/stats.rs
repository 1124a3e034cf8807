//! Store-wide statistics.

use super::LongTermMemory;
use crate::types::{map_db_error, StoreStats};
use htm_core::error::Result;

impl LongTermMemory {
    /// Counts across nodes, robots, tags, and working-memory flags.
    pub async fn stats(&self) -> Result<StoreStats> {
        let (node_count, deleted_node_count, robot_count, tag_count, working_memory_count): (
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(
            "SELECT \
                 (SELECT COUNT(*) FROM nodes WHERE deleted_at IS NULL), \
                 (SELECT COUNT(*) FROM nodes WHERE deleted_at IS NOT NULL), \
                 (SELECT COUNT(*) FROM robots), \
                 (SELECT COUNT(*) FROM tags), \
                 (SELECT COUNT(*) FROM robot_nodes WHERE working_memory)",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(StoreStats {
            node_count,
            deleted_node_count,
            robot_count,
            tag_count,
            working_memory_count,
        })
    }
}
