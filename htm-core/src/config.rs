// ============================================================================
// Configuration
// ============================================================================

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Language-model provider for the extractor backends.
///
/// The core never talks to a vendor API directly; the provider name only
/// selects which externally supplied callable a deployment wires in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI API
    OpenAi,
    /// Anthropic API
    Anthropic,
    /// Google Gemini API
    Gemini,
    /// Azure OpenAI deployment
    Azure,
    /// Local Ollama server
    Ollama,
    /// HuggingFace inference
    HuggingFace,
    /// OpenRouter gateway
    OpenRouter,
    /// AWS Bedrock
    Bedrock,
    /// DeepSeek API
    DeepSeek,
}

impl Provider {
    /// Parse a provider from its configuration name.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            "azure" => Ok(Self::Azure),
            "ollama" => Ok(Self::Ollama),
            "huggingface" => Ok(Self::HuggingFace),
            "openrouter" => Ok(Self::OpenRouter),
            "bedrock" => Ok(Self::Bedrock),
            "deepseek" => Ok(Self::DeepSeek),
            other => Err(Error::Validation(format!("unknown provider '{other}'"))),
        }
    }
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development
    #[default]
    Development,
    /// Test runs
    Test,
    /// Production
    Production,
}

impl Environment {
    /// The suffix this environment contributes to the database name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Production => "production",
        }
    }

    /// Parse an environment name.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            "production" | "prod" => Ok(Self::Production),
            other => Err(Error::Configuration(format!(
                "unknown environment '{other}'"
            ))),
        }
    }
}

/// First day of the week used by timeframe normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekStart {
    /// Weeks start on Sunday
    Sunday,
    /// Weeks start on Monday
    #[default]
    Monday,
}

/// Execution backend for background jobs.
///
/// This is an explicit configuration choice; the engine never probes the
/// host runtime to pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobBackend {
    /// Run synchronously on the caller
    Inline,
    /// Detached OS thread driving the job to completion
    Thread,
    /// Cooperative task on the async runtime
    #[default]
    EventLoop,
    /// Hand off to an external task queue
    Queue,
}

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL (`postgres://...`)
    pub url: String,
    /// Connection pool size
    pub pool_size: u32,
    /// Per-query statement timeout in milliseconds, installed at
    /// connection time
    pub statement_timeout_ms: u64,
    /// Optional sslmode override appended to the connection options
    pub sslmode: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/htm_development".to_string(),
            pool_size: 5,
            statement_timeout_ms: 30_000,
            sslmode: None,
        }
    }
}

/// Embedding extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider serving the embedding callable
    pub provider: Provider,
    /// Model tag
    pub model: String,
    /// Expected output dimensions (None = provider default)
    pub dimensions: Option<usize>,
    /// Maximum dimension supported by the store's vector column
    pub max_dimension: usize,
    /// Call timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            model: "nomic-embed-text".to_string(),
            dimensions: None,
            max_dimension: 2000,
            timeout_secs: 120,
        }
    }
}

/// Tag extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagConfig {
    /// Provider serving the tag-extraction callable
    pub provider: Provider,
    /// Model tag
    pub model: String,
    /// Maximum hierarchy depth (segments) a tag may have
    pub max_depth: usize,
    /// Call timeout in seconds
    pub timeout_secs: u64,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            model: "llama3.2".to_string(),
            max_depth: 4,
            timeout_secs: 180,
        }
    }
}

/// Proposition extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropositionConfig {
    /// Provider serving the proposition callable
    pub provider: Provider,
    /// Model tag
    pub model: String,
    /// Whether proposition extraction runs at all
    pub enabled: bool,
    /// Call timeout in seconds
    pub timeout_secs: u64,
    /// Minimum proposition length in characters
    pub min_length: usize,
    /// Maximum proposition length in characters
    pub max_length: usize,
    /// Minimum word count
    pub min_words: usize,
}

impl Default for PropositionConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            model: "llama3.2".to_string(),
            enabled: false,
            timeout_secs: 180,
            min_length: 10,
            max_length: 1000,
            min_words: 5,
        }
    }
}

/// Text chunking configuration for oversized inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size in tokens
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in tokens
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            chunk_overlap: 64,
        }
    }
}

/// Circuit-breaker configuration shared by every extractor service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Seconds to wait in the open state before probing recovery
    pub reset_timeout_secs: u64,
    /// Consecutive half-open successes required to close
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 60,
            half_open_max_calls: 3,
        }
    }
}

impl BreakerConfig {
    /// Reset timeout as a [`Duration`].
    #[must_use]
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

/// Weights for the composite relevance score.
///
/// The four weights must sum to 1 within a tolerance of 0.01; anything
/// else is rejected at configuration load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceConfig {
    /// Weight of the semantic (cosine) signal
    pub semantic_weight: f64,
    /// Weight of the hierarchical tag-similarity signal
    pub tag_weight: f64,
    /// Weight of the recency signal
    pub recency_weight: f64,
    /// Weight of the access-frequency signal
    pub access_weight: f64,
    /// Half-life in hours for the recency exponential decay
    pub recency_half_life_hours: f64,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.5,
            tag_weight: 0.3,
            recency_weight: 0.1,
            access_weight: 0.1,
            recency_half_life_hours: 168.0,
        }
    }
}

impl RelevanceConfig {
    /// Validate that the weights form a convex combination.
    pub fn validate(&self) -> Result<()> {
        let sum =
            self.semantic_weight + self.tag_weight + self.recency_weight + self.access_weight;
        if (sum - 1.0).abs() > 0.01 {
            return Err(Error::Configuration(format!(
                "relevance weights must sum to 1.0 +/- 0.01, got {sum}"
            )));
        }
        for (name, w) in [
            ("semantic_weight", self.semantic_weight),
            ("tag_weight", self.tag_weight),
            ("recency_weight", self.recency_weight),
            ("access_weight", self.access_weight),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(Error::Configuration(format!(
                    "{name} must be between 0.0 and 1.0, got {w}"
                )));
            }
        }
        if self.recency_half_life_hours <= 0.0 {
            return Err(Error::Configuration(
                "recency_half_life_hours must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmConfig {
    /// Deployment environment
    pub environment: Environment,
    /// Database connection settings
    pub database: DatabaseConfig,
    /// Embedding extraction settings
    pub embedding: EmbeddingConfig,
    /// Tag extraction settings
    pub tag: TagConfig,
    /// Proposition extraction settings
    pub proposition: PropositionConfig,
    /// Chunking settings for oversized inputs
    pub chunking: ChunkingConfig,
    /// Circuit-breaker settings
    pub circuit_breaker: BreakerConfig,
    /// Relevance scoring weights
    pub relevance: RelevanceConfig,
    /// Background job backend
    pub job_backend: JobBackend,
    /// First day of the week for timeframe normalization
    pub week_start: WeekStart,
    /// Whether telemetry instruments are live or no-ops
    pub telemetry_enabled: bool,
    /// Log level filter string (`tracing_subscriber` env-filter syntax)
    pub log_level: String,
}

impl Default for HtmConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            database: DatabaseConfig::default(),
            embedding: EmbeddingConfig::default(),
            tag: TagConfig::default(),
            proposition: PropositionConfig::default(),
            chunking: ChunkingConfig::default(),
            circuit_breaker: BreakerConfig::default(),
            relevance: RelevanceConfig::default(),
            job_backend: JobBackend::default(),
            week_start: WeekStart::default(),
            telemetry_enabled: true,
            log_level: "info".to_string(),
        }
    }
}

impl HtmConfig {
    /// Load configuration from a TOML document, then validate.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| Error::Configuration(format!("invalid config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from environment variables over defaults.
    ///
    /// Recognized variables: `HTM_DATABASE_URL`, `HTM_POOL_SIZE`,
    /// `HTM_ENVIRONMENT`, `HTM_JOB_BACKEND`, `HTM_TELEMETRY`,
    /// `HTM_LOG_LEVEL`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("HTM_DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(size) = std::env::var("HTM_POOL_SIZE") {
            if let Ok(value) = size.parse::<u32>() {
                config.database.pool_size = value.max(1);
            }
        }
        if let Ok(env) = std::env::var("HTM_ENVIRONMENT") {
            config.environment = Environment::parse(&env)?;
        }
        if let Ok(backend) = std::env::var("HTM_JOB_BACKEND") {
            config.job_backend = match backend.to_lowercase().as_str() {
                "inline" => JobBackend::Inline,
                "thread" => JobBackend::Thread,
                "event_loop" | "eventloop" | "fiber" => JobBackend::EventLoop,
                "queue" => JobBackend::Queue,
                other => {
                    tracing::warn!("Invalid HTM_JOB_BACKEND '{}', using default", other);
                    JobBackend::default()
                }
            };
        }
        if let Ok(enabled) = std::env::var("HTM_TELEMETRY") {
            config.telemetry_enabled =
                matches!(enabled.to_lowercase().as_str(), "true" | "1" | "yes" | "on");
        }
        if let Ok(level) = std::env::var("HTM_LOG_LEVEL") {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.relevance.validate()?;
        if self.embedding.max_dimension == 0 || self.embedding.max_dimension > 2000 {
            return Err(Error::Configuration(format!(
                "embedding.max_dimension must be in 1..=2000, got {}",
                self.embedding.max_dimension
            )));
        }
        if self.tag.max_depth == 0 {
            return Err(Error::Configuration(
                "tag.max_depth must be at least 1".to_string(),
            ));
        }
        if self.proposition.min_length > self.proposition.max_length {
            return Err(Error::Configuration(
                "proposition.min_length exceeds max_length".to_string(),
            ));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::Configuration(
                "chunking.chunk_overlap must be smaller than chunk_size".to_string(),
            ));
        }
        Ok(())
    }

    /// Enforce the `<service>_<environment>` database naming convention.
    pub fn validate_database_name(&self, service: &str, name: &str) -> Result<()> {
        let expected = format!("{service}_{}", self.environment.as_str());
        if name != expected {
            return Err(Error::Configuration(format!(
                "database name '{name}' does not match required '{expected}'"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(HtmConfig::default().validate().is_ok());
    }

    #[test]
    fn relevance_weights_must_sum_to_one() {
        let bad = RelevanceConfig {
            semantic_weight: 0.4,
            tag_weight: 0.3,
            recency_weight: 0.2,
            access_weight: 0.2,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(Error::Configuration(_))));

        let good = RelevanceConfig::default();
        assert!(good.validate().is_ok());
    }

    #[test]
    fn relevance_weights_tolerance() {
        // 0.995 is inside the +/- 0.01 band
        let close = RelevanceConfig {
            semantic_weight: 0.495,
            tag_weight: 0.3,
            recency_weight: 0.1,
            access_weight: 0.1,
            ..Default::default()
        };
        assert!(close.validate().is_ok());
    }

    #[test]
    fn provider_parse() {
        assert_eq!(Provider::parse("openai").unwrap(), Provider::OpenAi);
        assert_eq!(Provider::parse("OLLAMA").unwrap(), Provider::Ollama);
        assert!(Provider::parse("mystery").is_err());
    }

    #[test]
    fn database_name_convention() {
        let mut config = HtmConfig::default();
        config.environment = Environment::Test;
        assert!(config.validate_database_name("htm", "htm_test").is_ok());
        assert!(config
            .validate_database_name("htm", "htm_production")
            .is_err());
    }

    #[test]
    fn toml_roundtrip() {
        let text = r#"
            environment = "test"
            job_backend = "inline"

            [relevance]
            semantic_weight = 0.5
            tag_weight = 0.3
            recency_weight = 0.1
            access_weight = 0.1
            recency_half_life_hours = 168.0
        "#;
        let config = HtmConfig::from_toml_str(text).unwrap();
        assert_eq!(config.environment, Environment::Test);
        assert_eq!(config.job_backend, JobBackend::Inline);
        // untouched sections keep their defaults
        assert_eq!(config.database.pool_size, 5);
    }

    #[test]
    fn toml_rejects_bad_weights() {
        let text = r#"
            [relevance]
            semantic_weight = 0.9
            tag_weight = 0.3
            recency_weight = 0.1
            access_weight = 0.1
            recency_half_life_hours = 168.0
        "#;
        assert!(HtmConfig::from_toml_str(text).is_err());
    }
}
