//! # HTM PostgreSQL backend
//!
//! The durable half of the hierarchical tagged memory engine: a
//! PostgreSQL long-term store (pgvector cosine search, stemmed and
//! trigram full-text search, JSONB metadata filtering), the
//! NOTIFY/LISTEN pub/sub channel, the robot-group coordinator, and the
//! background jobs that attach embeddings, tags, and propositions to
//! nodes.
//!
//! ## Layout
//!
//! - [`store`]: [`store::LongTermMemory`] — CRUD, the four search
//!   strategies, tag and robot operations, statistics
//! - [`channel`]: [`channel::PubSubChannel`] — group event transport
//! - [`group`]: [`group::RobotGroup`] — shared working memory with
//!   active/passive roles and failover
//! - [`jobs`]: background extraction jobs
//! - [`schema`], [`sql`], [`timeframe`], [`types`]: DDL, fragment
//!   builders, timeframe normalization, row types
//!
//! ## Quick Start
//!
//! ```no_run
//! use htm_core::config::HtmConfig;
//! use htm_postgres::store::{ExtractorBackends, LongTermMemory, SearchOptions};
//! use htm_postgres::group::RobotGroup;
//! use std::sync::Arc;
//!
//! # async fn example(backends: ExtractorBackends) -> htm_core::Result<()> {
//! let config = HtmConfig::from_env()?;
//! let store = Arc::new(LongTermMemory::connect(config, backends).await?);
//!
//! let group = RobotGroup::new("fleet", Arc::clone(&store));
//! group.start()?;
//! group.add_active("scout").await?;
//! group.add_passive("standby").await?;
//!
//! group.remember("the deploy window opens at noon", None).await?;
//!
//! let hits = store
//!     .search_hybrid("when does the deploy start?", &SearchOptions::default())
//!     .await?;
//! println!("found {} nodes", hits.len());
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod group;
pub mod jobs;
pub mod schema;
pub mod sql;
pub mod store;
pub mod timeframe;
pub mod types;

pub use channel::{channel_name, ChannelStats, GroupEvent, PubSubChannel};
pub use group::{GroupRobot, GroupStats, RobotGroup, Role};
pub use schema::MAX_EMBEDDING_DIMENSION;
pub use store::{AddNode, ExtractorBackends, LongTermMemory, SearchOptions, TopicMatch};
pub use timeframe::{AutoExtraction, ResolvedTimeframe, Timeframe};
pub use types::{
    AddOutcome, MatchedTag, Node, Robot, RobotNode, SearchHit, StoreStats, TagUsage,
    TopicRelationship,
};
