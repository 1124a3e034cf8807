//! # HTM Core
//!
//! Core machinery for the hierarchical tagged memory engine: the
//! working-memory cache, tag taxonomy, relevance scoring, rank fusion,
//! extractor service contracts, job dispatch, and the shared
//! infrastructure (errors, configuration, telemetry, circuit breaker,
//! query cache).
//!
//! ## Core Concepts
//!
//! - **Nodes**: short text units stored durably with optional embeddings
//!   and hierarchical tags
//! - **Robots**: logical agents, each with a token-bounded working
//!   memory in front of the shared long-term store
//! - **Tags**: `:`-joined lowercase paths where every prefix is itself a
//!   tag
//! - **Relevance**: a weighted blend of semantic, tag, recency, and
//!   access signals
//!
//! This crate is storage-agnostic; the PostgreSQL long-term store, the
//! robot-group coordinator, and the pub/sub channel live in
//! `htm-postgres`.
//!
//! ## Quick Start
//!
//! ```
//! use htm_core::working_memory::{AddRecord, ContextStrategy, WorkingMemory};
//!
//! let wm = WorkingMemory::new(100);
//! wm.add(1, AddRecord::new("the deploy runs at noon", 8));
//! wm.add(2, AddRecord::new("staging uses the blue cluster", 9));
//!
//! if !wm.has_space(20) {
//!     let evicted = wm.evict_to_make_space(20);
//!     println!("evicted {} records", evicted.len());
//! }
//!
//! let context = wm.assemble_context(ContextStrategy::Recent, None);
//! assert!(context.contains("blue cluster"));
//! ```
//!
//! ## Error Handling
//!
//! Fallible operations return [`Result`]. Extractor failures under a
//! circuit breaker are recorded and re-raised; the
//! [`Error::CircuitOpen`] kind is never wrapped so callers can tell a
//! protecting fast-fail from a real service failure.

pub mod breaker;
pub mod config;
pub mod error;
pub mod extract;
pub mod jobs;
pub mod query_cache;
pub mod relevance;
pub mod rrf;
pub mod tags;
pub mod telemetry;
pub mod working_memory;

// Re-export commonly used types
pub use breaker::{BreakerStats, CircuitBreaker, CircuitState};
pub use config::{
    BreakerConfig, ChunkingConfig, DatabaseConfig, EmbeddingConfig, Environment, HtmConfig,
    JobBackend, PropositionConfig, Provider, RelevanceConfig, TagConfig, WeekStart,
};
pub use error::{Error, Result};
pub use extract::{
    EmbeddingBackend, EmbeddingService, HeuristicTokenCounter, PropositionBackend,
    PropositionService, TagBackend, TagService, TokenCounter,
};
pub use jobs::{Job, JobDispatcher, JobQueue};
pub use query_cache::{CacheArg, CachedMethod, QueryCache, QueryCacheStats};
pub use relevance::{RelevanceInput, RelevanceScorer};
pub use rrf::{FusedResult, RrfMerge, RRF_K};
pub use tags::{ancestors, is_valid_tag, tag_depth_score, validate_tag,
    weighted_hierarchical_jaccard};
pub use telemetry::{Telemetry, TelemetrySummary};
pub use working_memory::{
    AddRecord, ContextStrategy, EvictedRecord, MemoryRecord, WorkingMemory, WorkingMemoryStats,
};
