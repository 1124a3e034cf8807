//! Tag operations: hierarchical closure, topic queries, batch loading,
//! usage statistics, and query-to-tag matching.

use super::LongTermMemory;
use crate::sql::{bind_args, sanitize_like_pattern, FilterBuilder, SqlArg};
use crate::timeframe::Timeframe;
use crate::types::{map_db_error, MatchedTag, TagUsage, TopicRelationship};
use htm_core::error::{Error, Result};
use htm_core::tags::{ancestors, validate_tag};
use sqlx::Row;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Hard cap applied to every topic query limit.
const MAX_TOPIC_LIMIT: i64 = 1000;

/// Trigram similarity floor for fuzzy topic matching.
const MIN_TOPIC_SIMILARITY: f64 = 0.3;

/// TTL of the process-wide popular-tags cache.
const POPULAR_TAGS_TTL: Duration = Duration::from_secs(300);

/// How many popular tags back the query-matching ontology.
const POPULAR_TAGS_SAMPLE: i64 = 500;

/// Topic matching mode for [`LongTermMemory::nodes_by_topic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopicMatch {
    /// Tag name equals the topic path
    Exact,
    /// Trigram similarity at or above the configured floor
    Fuzzy,
    /// Tag name starts with the topic path (escaped for LIKE)
    #[default]
    Prefix,
}

impl LongTermMemory {
    /// Attach a tag and its whole ancestor chain to a node;
    /// idempotent.
    pub async fn add_tag(&self, node_id: i64, tag: &str) -> Result<()> {
        let tag = tag.trim().to_lowercase();
        validate_tag(&tag, self.config.tag.max_depth)?;

        if !self.exists(node_id).await? {
            return Err(Error::NotFound(format!("node {node_id}")));
        }

        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        for name in ancestors(&tag) {
            // The do-update no-op makes RETURNING yield the id for
            // both the insert and the conflict path.
            let (tag_id,): (i64,) = sqlx::query_as(
                "INSERT INTO tags (name) VALUES ($1) \
                 ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name \
                 RETURNING id",
            )
            .bind(&name)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_error)?;

            sqlx::query(
                "INSERT INTO node_tags (node_id, tag_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(node_id)
            .bind(tag_id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;
        }
        tx.commit().await.map_err(map_db_error)?;
        debug!("Tagged node {} with '{}' and its ancestors", node_id, tag);
        Ok(())
    }

    /// Node ids matching a topic path, deduplicated and newest first.
    /// The limit is capped at 1000 regardless of the caller's request.
    pub async fn nodes_by_topic(
        &self,
        topic_path: &str,
        mode: TopicMatch,
        limit: i64,
    ) -> Result<Vec<i64>> {
        if topic_path.trim().is_empty() {
            return Err(Error::Validation("topic path must not be empty".to_string()));
        }
        let limit = limit.clamp(1, MAX_TOPIC_LIMIT);

        let (condition, operand) = match mode {
            TopicMatch::Exact => ("t.name = $1", topic_path.to_string()),
            TopicMatch::Fuzzy => ("similarity(t.name, $1) >= $3", topic_path.to_string()),
            TopicMatch::Prefix => (
                "t.name LIKE $1",
                format!("{}%", sanitize_like_pattern(topic_path)),
            ),
        };

        let sql = format!(
            "SELECT DISTINCT n.id, n.created_at FROM nodes n \
             JOIN node_tags nt ON nt.node_id = n.id \
             JOIN tags t ON t.id = nt.tag_id \
             WHERE n.deleted_at IS NULL AND {condition} \
             ORDER BY n.created_at DESC LIMIT $2"
        );

        let mut query = sqlx::query(&sql).bind(&operand).bind(limit);
        if mode == TopicMatch::Fuzzy {
            query = query.bind(MIN_TOPIC_SIMILARITY);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(map_db_error)?;
        rows.iter()
            .map(|row| row.try_get::<i64, _>("id").map_err(map_db_error))
            .collect()
    }

    /// Load tags for a result set in one query, grouped by node id.
    /// Nodes without tags are absent from the map.
    pub async fn batch_load_node_tags(
        &self,
        node_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<String>>> {
        if node_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            "SELECT nt.node_id, t.name FROM node_tags nt \
             JOIN tags t ON t.id = nt.tag_id \
             WHERE nt.node_id = ANY($1) ORDER BY nt.node_id, t.name",
        )
        .bind(node_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        let mut grouped: HashMap<i64, Vec<String>> = HashMap::new();
        for row in rows {
            let node_id: i64 = row.try_get("node_id").map_err(map_db_error)?;
            let name: String = row.try_get("name").map_err(map_db_error)?;
            grouped.entry(node_id).or_default().push(name);
        }
        Ok(grouped)
    }

    /// Tag usage counts over live nodes, optionally scoped to a time
    /// window on node creation.
    pub async fn popular_tags(
        &self,
        limit: i64,
        timeframe: &Timeframe,
    ) -> Result<Vec<TagUsage>> {
        let limit = limit.clamp(1, MAX_TOPIC_LIMIT);
        let resolved = timeframe.resolve(self.config.week_start)?;

        let mut filters = FilterBuilder::starting_at(2);
        filters.timeframe(&resolved, "n.created_at");

        let sql = format!(
            "SELECT t.name, COUNT(*) AS usage_count FROM node_tags nt \
             JOIN tags t ON t.id = nt.tag_id \
             JOIN nodes n ON n.id = nt.node_id \
             WHERE n.deleted_at IS NULL{} \
             GROUP BY t.name ORDER BY usage_count DESC, t.name LIMIT $1",
            filters.and_clause()
        );

        let query = bind_args(sqlx::query(&sql).bind(limit), filters.args());
        let rows = query.fetch_all(&self.pool).await.map_err(map_db_error)?;
        rows.iter()
            .map(|row| {
                Ok(TagUsage {
                    name: row.try_get("name").map_err(map_db_error)?,
                    usage_count: row.try_get("usage_count").map_err(map_db_error)?,
                })
            })
            .collect()
    }

    /// Co-occurrence edges over tag pairs sharing at least
    /// `min_shared_nodes` live nodes.
    pub async fn topic_relationships(
        &self,
        min_shared_nodes: i64,
        limit: i64,
    ) -> Result<Vec<TopicRelationship>> {
        let limit = limit.clamp(1, MAX_TOPIC_LIMIT);
        let rows = sqlx::query(
            "SELECT t1.name AS left_name, t2.name AS right_name, \
                    COUNT(*) AS shared_nodes \
             FROM node_tags a \
             JOIN node_tags b ON a.node_id = b.node_id AND a.tag_id < b.tag_id \
             JOIN nodes n ON n.id = a.node_id AND n.deleted_at IS NULL \
             JOIN tags t1 ON t1.id = a.tag_id \
             JOIN tags t2 ON t2.id = b.tag_id \
             GROUP BY t1.name, t2.name \
             HAVING COUNT(*) >= $1 \
             ORDER BY shared_nodes DESC, t1.name, t2.name LIMIT $2",
        )
        .bind(min_shared_nodes.max(1))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        rows.iter()
            .map(|row| {
                Ok(TopicRelationship {
                    left: row.try_get("left_name").map_err(map_db_error)?,
                    right: row.try_get("right_name").map_err(map_db_error)?,
                    shared_nodes: row.try_get("shared_nodes").map_err(map_db_error)?,
                })
            })
            .collect()
    }

    /// Extract tags from a query and match them against existing tags
    /// in one UNION pass, strongest match class first:
    ///
    /// 1. exact name match
    /// 2. ancestor-prefix match
    /// 3. component match at any hierarchy level
    /// 4. trigram fuzzy match on components
    ///
    /// Extractor failures degrade to an empty extraction rather than
    /// failing the read.
    pub async fn find_query_matching_tags(
        &self,
        query: &str,
        include_extracted: bool,
    ) -> Result<Vec<MatchedTag>> {
        let ontology = self.popular_tag_names().await?;
        let extracted = match self.tag_service.extract(query, &ontology).await {
            Ok(tags) => tags,
            Err(e) if e.is_circuit_open() || e.is_recoverable() => {
                warn!("Tag extraction degraded for query matching: {}", e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        if extracted.is_empty() {
            return Ok(Vec::new());
        }

        let mut ancestor_names: Vec<String> = Vec::new();
        let mut components: Vec<String> = Vec::new();
        for tag in &extracted {
            for ancestor in ancestors(tag) {
                if ancestor != *tag && !ancestor_names.contains(&ancestor) {
                    ancestor_names.push(ancestor);
                }
            }
            for component in tag.split(':') {
                let component = component.to_string();
                if !components.contains(&component) {
                    components.push(component);
                }
            }
        }

        // Arms 3 and 4 need one clause per component with its own
        // binds; assemble the UNION with running placeholder numbers.
        let mut args: Vec<SqlArg> = Vec::new();
        let mut arms: Vec<String> = Vec::new();

        // Exact and ancestor arms use array binds.
        args.push(SqlArg::TextArray(extracted.clone()));
        arms.push(format!(
            "SELECT name, 1 AS priority FROM tags WHERE name = ANY(${})",
            args.len()
        ));
        if !ancestor_names.is_empty() {
            args.push(SqlArg::TextArray(ancestor_names.clone()));
            arms.push(format!(
                "SELECT name, 2 AS priority FROM tags WHERE name = ANY(${})",
                args.len()
            ));
        }

        for component in &components {
            let escaped = sanitize_like_pattern(component);
            let patterns = [
                component.clone(),
                format!("{escaped}:%"),
                format!("%:{escaped}"),
                format!("%:{escaped}:%"),
            ];
            let mut likes = Vec::with_capacity(patterns.len());
            for pattern in patterns {
                args.push(SqlArg::Text(pattern));
                likes.push(format!("name LIKE ${}", args.len()));
            }
            arms.push(format!(
                "SELECT name, 3 AS priority FROM tags WHERE {}",
                likes.join(" OR ")
            ));

            args.push(SqlArg::Text(component.clone()));
            let sim_idx = args.len();
            args.push(SqlArg::Float(MIN_TOPIC_SIMILARITY));
            arms.push(format!(
                "SELECT name, 4 AS priority FROM tags \
                 WHERE similarity(name, ${sim_idx}) >= ${}",
                args.len()
            ));
        }

        let sql = format!(
            "SELECT name, MIN(priority) AS priority FROM ({}) matches \
             GROUP BY name ORDER BY priority, name",
            arms.join(" UNION ALL ")
        );

        let query = bind_args(sqlx::query(&sql), &args);
        let rows = query.fetch_all(&self.pool).await.map_err(map_db_error)?;

        let mut matches: Vec<MatchedTag> = rows
            .iter()
            .map(|row| {
                Ok(MatchedTag {
                    name: row.try_get("name").map_err(map_db_error)?,
                    priority: row.try_get("priority").map_err(map_db_error)?,
                })
            })
            .collect::<Result<_>>()?;

        if include_extracted {
            for tag in extracted {
                if !matches.iter().any(|m| m.name == tag) {
                    matches.push(MatchedTag {
                        name: tag,
                        priority: 1,
                    });
                }
            }
        }
        Ok(matches)
    }

    /// Extract query tags, degrading to empty on recoverable failures.
    pub(crate) async fn extract_query_tags(&self, query: &str) -> Vec<String> {
        let ontology = self.popular_tag_names().await.unwrap_or_default();
        match self.tag_service.extract(query, &ontology).await {
            Ok(tags) => tags,
            Err(e) => {
                warn!("Query tag extraction degraded: {}", e);
                Vec::new()
            }
        }
    }

    /// Popular tag names from the TTL cache, refreshed at most every
    /// five minutes.
    pub(crate) async fn popular_tag_names(&self) -> Result<Vec<String>> {
        if let Some((loaded_at, names)) = self.popular_tags_cache.lock().as_ref() {
            if loaded_at.elapsed() < POPULAR_TAGS_TTL {
                return Ok(names.clone());
            }
        }

        let usage = self
            .popular_tags(POPULAR_TAGS_SAMPLE, &Timeframe::All)
            .await?;
        let names: Vec<String> = usage.into_iter().map(|t| t.name).collect();
        *self.popular_tags_cache.lock() = Some((Instant::now(), names.clone()));
        Ok(names)
    }
}

