//! The PostgreSQL long-term memory store.
//!
//! Owns the connection pool, the query-result cache, the extractor
//! services, and the job dispatcher. Operations are grouped by area:
//! node CRUD, tag operations, robot operations, the four search
//! strategies, and statistics.

mod nodes;
mod robots;
mod search;
mod stats;
mod tags;

pub use nodes::{content_hash, AddNode};
pub use search::SearchOptions;
pub use tags::TopicMatch;

use crate::schema;
use crate::types::SearchHit;
use htm_core::breaker::CircuitBreaker;
use htm_core::config::{HtmConfig, JobBackend};
use htm_core::error::{Error, Result};
use htm_core::extract::{
    EmbeddingBackend, EmbeddingService, PropositionBackend, PropositionService, TagBackend,
    TagService, TokenCounter,
};
use htm_core::jobs::{JobDispatcher, JobQueue};
use htm_core::query_cache::QueryCache;
use htm_core::relevance::RelevanceScorer;
use htm_core::rrf::RrfMerge;
use htm_core::telemetry::Telemetry;
use parking_lot::Mutex;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Externally supplied extractor callables wired into the store.
pub struct ExtractorBackends {
    /// Embedding callable
    pub embedding: Arc<dyn EmbeddingBackend>,
    /// Tag-extraction callable
    pub tag: Arc<dyn TagBackend>,
    /// Proposition-extraction callable
    pub proposition: Arc<dyn PropositionBackend>,
    /// Token counter
    pub token_counter: Arc<dyn TokenCounter>,
    /// External job queue, required only for [`JobBackend::Queue`]
    pub job_queue: Option<Arc<dyn JobQueue>>,
}

/// Durable storage, search, and taxonomy management over PostgreSQL.
pub struct LongTermMemory {
    pub(crate) pool: PgPool,
    pub(crate) config: HtmConfig,
    pub(crate) cache: QueryCache<Vec<SearchHit>>,
    pub(crate) embeddings: EmbeddingService,
    pub(crate) tag_service: TagService,
    pub(crate) propositions: PropositionService,
    pub(crate) dispatcher: JobDispatcher,
    pub(crate) scorer: RelevanceScorer,
    pub(crate) telemetry: Telemetry,
    pub(crate) token_counter: Arc<dyn TokenCounter>,
    pub(crate) rrf: RrfMerge,
    /// Cached popular-tag names with their load time (5-minute TTL),
    /// backing `find_query_matching_tags`.
    pub(crate) popular_tags_cache: Mutex<Option<(Instant, Vec<String>)>>,
}

impl LongTermMemory {
    /// Connect a pool, run migrations, and assemble the store.
    pub async fn connect(config: HtmConfig, backends: ExtractorBackends) -> Result<Self> {
        config.validate()?;

        let statement_timeout = config.database.statement_timeout_ms;
        let pool = PgPoolOptions::new()
            .max_connections(config.database.pool_size)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    // Statement timeout and search path are installed
                    // once per connection.
                    let timeout_stmt = format!("SET statement_timeout = {statement_timeout}");
                    conn.execute(timeout_stmt.as_str()).await?;
                    conn.execute("SET search_path = public").await?;
                    Ok(())
                })
            })
            .connect(&config.database.url)
            .await
            .map_err(|e| Error::Database(format!("failed to connect pool: {e}")))?;

        schema::migrate(&pool).await?;
        info!(
            "Connected long-term memory (pool_size={}, statement_timeout={}ms)",
            config.database.pool_size, statement_timeout
        );
        Self::with_pool(pool, config, backends)
    }

    /// Assemble the store over an existing pool (no migration is run).
    pub fn with_pool(
        pool: PgPool,
        config: HtmConfig,
        backends: ExtractorBackends,
    ) -> Result<Self> {
        config.validate()?;

        let breaker_config = config.circuit_breaker.clone();
        let embeddings = EmbeddingService::new(
            backends.embedding,
            Arc::new(CircuitBreaker::new("embedding", breaker_config.clone())),
        );
        let tag_service = TagService::new(
            backends.tag,
            Arc::new(CircuitBreaker::new("tags", breaker_config.clone())),
            config.tag.max_depth,
        );
        let propositions = PropositionService::new(
            backends.proposition,
            Arc::new(CircuitBreaker::new("propositions", breaker_config)),
            config.proposition.clone(),
        );

        let dispatcher = match (config.job_backend, backends.job_queue) {
            (JobBackend::Queue, Some(queue)) => JobDispatcher::with_queue(queue),
            (JobBackend::Queue, None) => {
                return Err(Error::Configuration(
                    "job_backend = queue requires a JobQueue adapter".to_string(),
                ))
            }
            (backend, _) => JobDispatcher::new(backend)?,
        };

        let scorer = RelevanceScorer::new(config.relevance.clone())?;
        let telemetry = Telemetry::with_enabled(config.telemetry_enabled);

        Ok(Self {
            pool,
            cache: QueryCache::new(),
            embeddings,
            tag_service,
            propositions,
            dispatcher,
            scorer,
            telemetry,
            token_counter: backends.token_counter,
            rrf: RrfMerge::default(),
            popular_tags_cache: Mutex::new(None),
            config,
        })
    }

    /// The connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &HtmConfig {
        &self.config
    }

    /// The embedding service.
    #[must_use]
    pub fn embedding_service(&self) -> &EmbeddingService {
        &self.embeddings
    }

    /// The tag-extraction service.
    #[must_use]
    pub fn tag_extraction_service(&self) -> &TagService {
        &self.tag_service
    }

    /// The proposition-extraction service.
    #[must_use]
    pub fn proposition_service(&self) -> &PropositionService {
        &self.propositions
    }

    /// The job dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }

    /// The token counter.
    #[must_use]
    pub fn token_counter(&self) -> &Arc<dyn TokenCounter> {
        &self.token_counter
    }

    /// The telemetry registry.
    #[must_use]
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Query-cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> htm_core::query_cache::QueryCacheStats {
        self.cache.stats()
    }
}
