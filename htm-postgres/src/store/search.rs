//! The four search strategies: vector, full-text, hybrid RRF, and
//! relevance-ranked.
//!
//! Every path consults the query cache first, batch-loads tags for the
//! result set, tracks access counters, and records its end-to-end
//! latency per strategy. Recoverable extractor failures degrade the
//! affected arm to empty results instead of failing the read.

use super::LongTermMemory;
use crate::sql::{bind_args, pad_to_max, sanitize_embedding, FilterBuilder};
use crate::timeframe::{ResolvedTimeframe, Timeframe};
use crate::types::{map_db_error, node_columns_prefixed, node_from_row, SearchHit, NODE_COLUMNS};
use htm_core::error::{Error, Result};
use htm_core::query_cache::{CacheArg, CachedMethod};
use htm_core::relevance::RelevanceInput;
use htm_core::tags::{ancestors, tag_depth_score};
use sqlx::Row;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Hard limit bounds for every search.
const MAX_SEARCH_LIMIT: i64 = 1000;

/// Rank boost of the tsvector pass over the trigram fallback; larger
/// than any trigram similarity so stemmed matches always rank first.
const FULLTEXT_BOOST: f64 = 1.0;

/// Trigram similarity floor for the fulltext fallback pass.
const FULLTEXT_TRGM_MIN: f64 = 0.1;

/// Common search options.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum results, enforced into `[1, 1000]`
    pub limit: i64,
    /// Time filter over node creation
    pub timeframe: Timeframe,
    /// JSONB containment filter over node metadata
    pub metadata: serde_json::Value,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            timeframe: Timeframe::All,
            metadata: serde_json::json!({}),
        }
    }
}

impl SearchOptions {
    /// Options with a limit only.
    #[must_use]
    pub fn with_limit(limit: i64) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }
}

fn guard_limit(limit: i64) -> Result<i64> {
    if limit < 1 {
        return Err(Error::Validation(format!(
            "search limit must be at least 1, got {limit}"
        )));
    }
    if limit > MAX_SEARCH_LIMIT {
        warn!("Search limit {} capped to {}", limit, MAX_SEARCH_LIMIT);
        return Ok(MAX_SEARCH_LIMIT);
    }
    Ok(limit)
}

/// Whether an extractor error degrades an arm to empty results.
fn degrades(error: &Error) -> bool {
    matches!(
        error,
        Error::CircuitOpen(_) | Error::EmbeddingFailed(_) | Error::TagFailed(_)
    )
}

fn metadata_cache_arg(metadata: &serde_json::Value) -> CacheArg {
    fn convert(value: &serde_json::Value) -> CacheArg {
        match value {
            serde_json::Value::Null => CacheArg::None,
            serde_json::Value::Bool(b) => CacheArg::Bool(*b),
            serde_json::Value::Number(n) => n.as_i64().map_or_else(
                || CacheArg::Float(n.as_f64().unwrap_or(0.0)),
                CacheArg::Int,
            ),
            serde_json::Value::String(s) => CacheArg::Str(s.clone()),
            serde_json::Value::Array(items) => {
                CacheArg::List(items.iter().map(convert).collect())
            }
            serde_json::Value::Object(map) => CacheArg::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), convert(v)))
                    .collect::<BTreeMap<_, _>>(),
            ),
        }
    }
    convert(metadata)
}

fn timeframe_cache_arg(resolved: &ResolvedTimeframe) -> CacheArg {
    match resolved {
        ResolvedTimeframe::All => CacheArg::None,
        ResolvedTimeframe::Ranges(ranges) => CacheArg::List(
            ranges
                .iter()
                .map(|(start, end)| {
                    CacheArg::TimeRange(start.timestamp_millis(), end.timestamp_millis())
                })
                .collect(),
        ),
    }
}

impl LongTermMemory {
    /// Vector similarity search (§ the `vector` strategy).
    ///
    /// Embeds the query, filters to live nodes that have an embedding,
    /// and orders by cosine distance, projecting `1 - distance` as the
    /// similarity score. A failing embedding service degrades to empty
    /// results.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchHit>> {
        let limit = guard_limit(options.limit)?;
        let (resolved, effective_query) = self.effective_query(query, &options.timeframe)?;

        let cache_args = vec![
            CacheArg::Str(effective_query.clone()),
            CacheArg::Int(limit),
            timeframe_cache_arg(&resolved),
            metadata_cache_arg(&options.metadata),
        ];
        if let Some(hits) = self.cache.get(CachedMethod::Search, &cache_args) {
            return Ok(hits);
        }

        let timer = self.telemetry.histogram("search_latency_vector").start_timer();
        let hits = match self
            .vector_candidates(&effective_query, limit, &resolved, &options.metadata)
            .await
        {
            Ok(hits) => hits,
            Err(e) if degrades(&e) => {
                warn!("Vector search degraded to empty: {}", e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let hits = self.finish_results(hits).await?;
        self.cache.put(CachedMethod::Search, &cache_args, hits.clone());
        timer.observe();
        Ok(hits)
    }

    /// Full-text search: a stemmed tsvector pass boosted above a
    /// trigram fallback pass, fused by maximum rank.
    pub async fn search_fulltext(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let limit = guard_limit(options.limit)?;
        let (resolved, effective_query) = self.effective_query(query, &options.timeframe)?;

        let cache_args = vec![
            CacheArg::Str(effective_query.clone()),
            CacheArg::Int(limit),
            timeframe_cache_arg(&resolved),
            metadata_cache_arg(&options.metadata),
        ];
        if let Some(hits) = self.cache.get(CachedMethod::Fulltext, &cache_args) {
            return Ok(hits);
        }

        let timer = self
            .telemetry
            .histogram("search_latency_fulltext")
            .start_timer();
        let hits = self
            .fulltext_candidates(&effective_query, limit, &resolved, &options.metadata)
            .await?;

        let hits = self.finish_results(hits).await?;
        self.cache
            .put(CachedMethod::Fulltext, &cache_args, hits.clone());
        timer.observe();
        Ok(hits)
    }

    /// Hybrid search: Reciprocal Rank Fusion over the vector,
    /// full-text, and tag arms.
    ///
    /// Each arm retrieves `3 x limit` candidates. A broken embedding
    /// service empties the vector arm; no extracted tags empties the
    /// tag arm; the merge proceeds with whatever arms remain.
    pub async fn search_hybrid(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let limit = guard_limit(options.limit)?;
        let (resolved, effective_query) = self.effective_query(query, &options.timeframe)?;

        let cache_args = vec![
            CacheArg::Str(effective_query.clone()),
            CacheArg::Int(limit),
            timeframe_cache_arg(&resolved),
            metadata_cache_arg(&options.metadata),
        ];
        if let Some(hits) = self.cache.get(CachedMethod::Hybrid, &cache_args) {
            return Ok(hits);
        }

        let timer = self
            .telemetry
            .histogram("search_latency_hybrid")
            .start_timer();
        let candidate_limit = (limit * 3).min(MAX_SEARCH_LIMIT);

        let vector_arm = match self
            .vector_candidates(&effective_query, candidate_limit, &resolved, &options.metadata)
            .await
        {
            Ok(hits) => hits,
            Err(e) if degrades(&e) => {
                warn!("Hybrid vector arm degraded to empty: {}", e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let fulltext_arm = self
            .fulltext_candidates(&effective_query, candidate_limit, &resolved, &options.metadata)
            .await?;
        let (tag_arm_ids, tag_scores) = self
            .tag_candidates(&effective_query, candidate_limit)
            .await?;

        let vector_ids: Vec<i64> = vector_arm.iter().map(|h| h.node.id).collect();
        let fulltext_ids: Vec<i64> = fulltext_arm.iter().map(|h| h.node.id).collect();
        let fused = self
            .rrf
            .fuse(&[vector_ids, fulltext_ids, tag_arm_ids.clone()]);

        // Rows already retrieved by the vector/fulltext arms are
        // reused; tag-only candidates need one fetch.
        let mut rows: HashMap<i64, SearchHit> = HashMap::new();
        for hit in vector_arm.into_iter().chain(fulltext_arm) {
            rows.entry(hit.node.id).or_insert(hit);
        }
        let missing: Vec<i64> = fused
            .iter()
            .filter(|f| !rows.contains_key(&f.id))
            .map(|f| f.id)
            .collect();
        if !missing.is_empty() {
            for node in self.nodes_by_ids(&missing).await? {
                let score = tag_scores.get(&node.id).copied().unwrap_or(0.0);
                rows.insert(
                    node.id,
                    SearchHit {
                        node,
                        score,
                        tags: Vec::new(),
                    },
                );
            }
        }

        let mut hits = Vec::with_capacity(limit as usize);
        for fused_result in fused.into_iter().take(limit as usize) {
            if let Some(mut hit) = rows.remove(&fused_result.id) {
                hit.score = fused_result.rrf_score;
                hits.push(hit);
            }
        }

        let hits = self.finish_results(hits).await?;
        self.cache.put(CachedMethod::Hybrid, &cache_args, hits.clone());
        timer.observe();
        Ok(hits)
    }

    /// Relevance-ranked search: vector candidates re-ranked by the
    /// composite semantic/tag/recency/access score in `[0, 10]`.
    ///
    /// Falls back to full-text candidates when the embedding service is
    /// unavailable, so the read still returns results.
    pub async fn search_with_relevance(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let limit = guard_limit(options.limit)?;
        let (resolved, effective_query) = self.effective_query(query, &options.timeframe)?;
        let candidate_limit = (limit * 3).min(MAX_SEARCH_LIMIT);

        let timer = self
            .telemetry
            .histogram("search_latency_relevance")
            .start_timer();
        let candidates = match self
            .vector_candidates(&effective_query, candidate_limit, &resolved, &options.metadata)
            .await
        {
            Ok(hits) => hits,
            Err(e) if degrades(&e) => {
                warn!("Relevance search falling back to fulltext candidates: {}", e);
                self.fulltext_candidates(
                    &effective_query,
                    candidate_limit,
                    &resolved,
                    &options.metadata,
                )
                .await?
                .into_iter()
                .map(|mut hit| {
                    // Fulltext rank is not a cosine similarity; treat
                    // the signal as absent.
                    hit.score = f64::NAN;
                    hit
                })
                .collect()
            }
            Err(e) => return Err(e),
        };

        let query_tags = self.extract_query_tags(&effective_query).await;
        let hits = self
            .rank_by_relevance(candidates, &query_tags, limit)
            .await?;
        timer.observe();
        Ok(hits)
    }

    /// Tag-driven search: nodes carrying any of the given tags,
    /// re-ranked by the composite relevance score (semantic signal
    /// absent).
    pub async fn search_by_tags(&self, tags: &[String], limit: i64) -> Result<Vec<SearchHit>> {
        if tags.is_empty() {
            return Err(Error::Validation("search_by_tags requires at least one tag".to_string()));
        }
        let limit = guard_limit(limit)?;

        let timer = self.telemetry.histogram("search_latency_tags").start_timer();
        let names: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT {} FROM nodes n \
             JOIN node_tags nt ON nt.node_id = n.id \
             JOIN tags t ON t.id = nt.tag_id \
             WHERE n.deleted_at IS NULL AND t.name = ANY($1) \
             ORDER BY n.created_at DESC LIMIT $2",
            node_columns_prefixed("n")
        ))
        .bind(&names)
        .bind((limit * 3).min(MAX_SEARCH_LIMIT))
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        let candidates: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                Ok(SearchHit {
                    node: node_from_row(row)?,
                    score: f64::NAN,
                    tags: Vec::new(),
                })
            })
            .collect::<Result<_>>()?;

        let hits = self.rank_by_relevance(candidates, &names, limit).await?;
        timer.observe();
        Ok(hits)
    }

    /// Resolve the timeframe, handling the `Auto` sentinel by
    /// extracting the expression from the query itself.
    fn effective_query(
        &self,
        query: &str,
        timeframe: &Timeframe,
    ) -> Result<(ResolvedTimeframe, String)> {
        if query.trim().is_empty() {
            return Err(Error::Validation("search query must not be empty".to_string()));
        }
        match timeframe {
            Timeframe::Auto => {
                let (resolved, extraction) =
                    Timeframe::resolve_auto(query, self.config.week_start);
                Ok((resolved, extraction.stripped_query))
            }
            other => Ok((other.resolve(self.config.week_start)?, query.to_string())),
        }
    }

    /// Vector-arm retrieval without caching or access tracking.
    async fn vector_candidates(
        &self,
        query: &str,
        limit: i64,
        timeframe: &ResolvedTimeframe,
        metadata: &serde_json::Value,
    ) -> Result<Vec<SearchHit>> {
        let embedding = self.embeddings.generate(query).await?;
        let literal = sanitize_embedding(&pad_to_max(&embedding))?;

        let mut filters = FilterBuilder::starting_at(3);
        filters.timeframe(timeframe, "created_at");
        filters.metadata(metadata, "metadata");

        let sql = format!(
            "SELECT {NODE_COLUMNS}, \
                    (1 - (embedding <=> $1::vector))::float8 AS similarity \
             FROM nodes \
             WHERE embedding IS NOT NULL AND deleted_at IS NULL{} \
             ORDER BY embedding <=> $1::vector LIMIT $2",
            filters.and_clause()
        );

        let query = bind_args(sqlx::query(&sql).bind(&literal).bind(limit), filters.args());
        let rows = query.fetch_all(&self.pool).await.map_err(map_db_error)?;
        rows.iter()
            .map(|row| {
                Ok(SearchHit {
                    node: node_from_row(row)?,
                    score: row.try_get("similarity").map_err(map_db_error)?,
                    tags: Vec::new(),
                })
            })
            .collect()
    }

    /// Fulltext-arm retrieval without caching or access tracking.
    async fn fulltext_candidates(
        &self,
        query: &str,
        limit: i64,
        timeframe: &ResolvedTimeframe,
        metadata: &serde_json::Value,
    ) -> Result<Vec<SearchHit>> {
        let mut filters = FilterBuilder::starting_at(3);
        filters.timeframe(timeframe, "created_at");
        filters.metadata(metadata, "metadata");
        let clause = filters.and_clause();

        let sql = format!(
            "WITH matches AS ( \
                 SELECT id, \
                        ({FULLTEXT_BOOST} + ts_rank(to_tsvector('english', content), \
                                                    plainto_tsquery('english', $1)))::float8 AS score \
                 FROM nodes \
                 WHERE deleted_at IS NULL \
                   AND to_tsvector('english', content) @@ plainto_tsquery('english', $1){clause} \
                 UNION ALL \
                 SELECT id, similarity(content, $1)::float8 AS score \
                 FROM nodes \
                 WHERE deleted_at IS NULL \
                   AND similarity(content, $1) >= {FULLTEXT_TRGM_MIN} \
                   AND NOT (to_tsvector('english', content) @@ plainto_tsquery('english', $1)){clause} \
             ), ranked AS ( \
                 SELECT id, MAX(score) AS rank FROM matches GROUP BY id \
             ) \
             SELECT {}, ranked.rank FROM nodes n \
             JOIN ranked ON ranked.id = n.id \
             ORDER BY ranked.rank DESC LIMIT $2",
            node_columns_prefixed("n")
        );

        let query = bind_args(sqlx::query(&sql).bind(query).bind(limit), filters.args());
        let rows = query.fetch_all(&self.pool).await.map_err(map_db_error)?;
        rows.iter()
            .map(|row| {
                Ok(SearchHit {
                    node: node_from_row(row)?,
                    score: row.try_get("rank").map_err(map_db_error)?,
                    tags: Vec::new(),
                })
            })
            .collect()
    }

    /// Tag-arm retrieval: extract tags from the query, find nodes
    /// carrying any matched tag (including ancestors), and score by
    /// tag depth. Returns ids ordered by score plus the score map.
    async fn tag_candidates(
        &self,
        query: &str,
        limit: i64,
    ) -> Result<(Vec<i64>, HashMap<i64, f64>)> {
        let extracted = self.extract_query_tags(query).await;
        if extracted.is_empty() {
            return Ok((Vec::new(), HashMap::new()));
        }

        let mut names: Vec<String> = Vec::new();
        for tag in &extracted {
            for ancestor in ancestors(tag) {
                if !names.contains(&ancestor) {
                    names.push(ancestor);
                }
            }
        }

        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT DISTINCT nt.node_id FROM node_tags nt \
             JOIN tags t ON t.id = nt.tag_id \
             JOIN nodes n ON n.id = nt.node_id \
             WHERE n.deleted_at IS NULL AND t.name = ANY($1)",
        )
        .bind(&names)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        let candidate_ids: Vec<i64> = rows.into_iter().map(|(id,)| id).collect();
        if candidate_ids.is_empty() {
            return Ok((Vec::new(), HashMap::new()));
        }

        let node_tags = self.batch_load_node_tags(&candidate_ids).await?;
        let mut scored: Vec<(i64, f64)> = candidate_ids
            .into_iter()
            .map(|id| {
                let tags = node_tags.get(&id).cloned().unwrap_or_default();
                (id, tag_depth_score(&extracted, &tags))
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(limit as usize);

        let ids: Vec<i64> = scored.iter().map(|(id, _)| *id).collect();
        let scores: HashMap<i64, f64> = scored.into_iter().collect();
        Ok((ids, scores))
    }

    /// Fetch full rows for a set of ids (live nodes only).
    async fn nodes_by_ids(&self, ids: &[i64]) -> Result<Vec<crate::types::Node>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE id = ANY($1) AND deleted_at IS NULL"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        rows.iter().map(node_from_row).collect()
    }

    /// Re-rank candidates with the composite relevance score and
    /// finish the result set.
    async fn rank_by_relevance(
        &self,
        candidates: Vec<SearchHit>,
        query_tags: &[String],
        limit: i64,
    ) -> Result<Vec<SearchHit>> {
        let ids: Vec<i64> = candidates.iter().map(|h| h.node.id).collect();
        let node_tags = self.batch_load_node_tags(&ids).await?;

        let mut scored: Vec<SearchHit> = candidates
            .into_iter()
            .map(|mut hit| {
                let tags = node_tags.get(&hit.node.id).cloned().unwrap_or_default();
                let input = RelevanceInput {
                    semantic_similarity: if hit.score.is_nan() {
                        None
                    } else {
                        Some(hit.score)
                    },
                    query_tags: query_tags.to_vec(),
                    node_tags: tags.clone(),
                    created_at: hit.node.created_at,
                    access_count: hit.node.access_count.max(0) as u64,
                };
                hit.score = self.scorer.score(&input);
                hit.tags = tags;
                hit
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.node.id.cmp(&b.node.id))
        });
        scored.truncate(limit as usize);

        let ids: Vec<i64> = scored.iter().map(|h| h.node.id).collect();
        self.track_access(&ids).await?;
        Ok(scored)
    }

    /// Attach batch-loaded tags and track access for a result set.
    async fn finish_results(&self, mut hits: Vec<SearchHit>) -> Result<Vec<SearchHit>> {
        let ids: Vec<i64> = hits.iter().map(|h| h.node.id).collect();
        let node_tags = self.batch_load_node_tags(&ids).await?;
        for hit in &mut hits {
            hit.tags = node_tags.get(&hit.node.id).cloned().unwrap_or_default();
        }
        self.track_access(&ids).await?;
        Ok(hits)
    }
}
