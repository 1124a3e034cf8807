//! Error taxonomy for the memory engine.

/// Result type alias for memory operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the hierarchical tagged memory engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad arguments: empty content, unknown strategy, malformed
    /// embedding, unknown provider.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A node, robot, or tag that was expected to exist is missing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A bounded resource could not be freed (working-memory budget,
    /// connection pool).
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A single embedding call failed.
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    /// A single tag-extraction call failed.
    #[error("Tag extraction failed: {0}")]
    TagFailed(String),

    /// A single proposition-extraction call failed.
    #[error("Proposition extraction failed: {0}")]
    PropositionFailed(String),

    /// The circuit breaker protecting a service rejected the call.
    /// Never wrapped by the service error kinds above.
    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    /// Generic storage failure.
    #[error("Database error: {0}")]
    Database(String),

    /// The database cancelled a statement at the configured timeout.
    #[error("Query timeout")]
    QueryTimeout,

    /// Invalid environment, database naming, or missing required options.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Reserved for future multi-tenancy; never raised by the core
    /// today.
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Serialization error from metadata or pub/sub payloads.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check whether this error is recoverable (transient, may succeed on
    /// retry). The circuit breaker only counts recoverable errors as
    /// failures.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Database(_)
            | Error::QueryTimeout
            | Error::EmbeddingFailed(_)
            | Error::TagFailed(_)
            | Error::PropositionFailed(_) => true,
            Error::Validation(_)
            | Error::NotFound(_)
            | Error::ResourceExhausted(_)
            | Error::CircuitOpen(_)
            | Error::Configuration(_)
            | Error::Authorization(_)
            | Error::Serialization(_) => false,
        }
    }

    /// Check whether this is a circuit-breaker rejection.
    ///
    /// Search paths use this to degrade an arm to empty results instead
    /// of propagating the failure.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::CircuitOpen(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(Error::Database("connection reset".into()).is_recoverable());
        assert!(Error::QueryTimeout.is_recoverable());
        assert!(Error::EmbeddingFailed("503".into()).is_recoverable());
        assert!(!Error::Validation("empty content".into()).is_recoverable());
        assert!(!Error::CircuitOpen("embedding".into()).is_recoverable());
        assert!(!Error::Configuration("bad weights".into()).is_recoverable());
    }

    #[test]
    fn circuit_open_is_distinct() {
        assert!(Error::CircuitOpen("tags".into()).is_circuit_open());
        assert!(!Error::TagFailed("parse".into()).is_circuit_open());
    }
}
