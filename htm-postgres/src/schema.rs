//! Database schema.
//!
//! Applied idempotently at startup. Requires the `vector` (pgvector)
//! and `pg_trgm` extensions; the ANN index uses cosine distance to
//! match the `<=>` operator used by vector search.

use crate::types::map_db_error;
use htm_core::error::Result;
use sqlx::PgPool;
use tracing::info;

/// Maximum embedding dimension the vector column accepts. Shorter
/// vectors are zero-padded on write; the original length is kept in
/// `embedding_dimensions`.
pub const MAX_EMBEDDING_DIMENSION: usize = 2000;

const EXTENSIONS: &[&str] = &[
    "CREATE EXTENSION IF NOT EXISTS vector",
    "CREATE EXTENSION IF NOT EXISTS pg_trgm",
];

const TABLES: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS nodes (
        id                   BIGSERIAL PRIMARY KEY,
        content              TEXT NOT NULL CHECK (content <> ''),
        content_hash         CHAR(64) NOT NULL,
        token_count          INTEGER NOT NULL DEFAULT 0 CHECK (token_count >= 0),
        embedding            vector(2000),
        embedding_dimensions INTEGER,
        metadata             JSONB NOT NULL DEFAULT '{}'::jsonb,
        access_count         BIGINT NOT NULL DEFAULT 0,
        last_accessed        TIMESTAMPTZ,
        created_at           TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at           TIMESTAMPTZ NOT NULL DEFAULT now(),
        deleted_at           TIMESTAMPTZ
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS robots (
        id          BIGSERIAL PRIMARY KEY,
        name        TEXT NOT NULL UNIQUE,
        last_active TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS robot_nodes (
        robot_id            BIGINT NOT NULL REFERENCES robots(id) ON DELETE CASCADE,
        node_id             BIGINT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        first_remembered_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        last_remembered_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        remember_count      BIGINT NOT NULL DEFAULT 1,
        working_memory      BOOLEAN NOT NULL DEFAULT FALSE,
        PRIMARY KEY (robot_id, node_id)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS tags (
        id   BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS node_tags (
        node_id BIGINT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        tag_id  BIGINT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
        PRIMARY KEY (node_id, tag_id)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS file_sources (
        id         BIGSERIAL PRIMARY KEY,
        path       TEXT NOT NULL UNIQUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    ",
];

const INDEXES: &[&str] = &[
    // One live row per content hash; soft-deleted rows are excluded so
    // a restore can reuse the hash.
    r"CREATE UNIQUE INDEX IF NOT EXISTS nodes_content_hash_live
      ON nodes (content_hash) WHERE deleted_at IS NULL",
    r"CREATE INDEX IF NOT EXISTS nodes_embedding_cosine
      ON nodes USING ivfflat (embedding vector_cosine_ops)",
    r"CREATE INDEX IF NOT EXISTS nodes_content_trgm
      ON nodes USING gin (content gin_trgm_ops)",
    r"CREATE INDEX IF NOT EXISTS nodes_metadata ON nodes USING gin (metadata)",
    r"CREATE INDEX IF NOT EXISTS nodes_created_at ON nodes (created_at)",
    r"CREATE INDEX IF NOT EXISTS tags_name_trgm
      ON tags USING gin (name gin_trgm_ops)",
    r"CREATE INDEX IF NOT EXISTS robot_nodes_working
      ON robot_nodes (robot_id) WHERE working_memory",
    r"CREATE INDEX IF NOT EXISTS node_tags_tag ON node_tags (tag_id)",
];

/// Apply extensions, tables, and indexes idempotently.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    for statement in EXTENSIONS.iter().chain(TABLES).chain(INDEXES) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(map_db_error)?;
    }
    info!("Schema migration complete");
    Ok(())
}
