//! Extractor service contracts.
//!
//! Three services share the same shape: they call an externally supplied
//! callable under circuit-breaker protection, validate the response, and
//! return a typed value. The callables are deployment concerns (a
//! language-model client per provider); the engine only depends on the
//! traits defined here.

pub mod embedding;
pub mod proposition;
pub mod tag;

pub use embedding::{EmbeddingService, EmbeddingStats};
pub use proposition::PropositionService;
pub use tag::TagService;

use crate::error::Result;
use async_trait::async_trait;

/// Externally supplied embedding callable.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a text into a dense vector of length between 1 and the
    /// store's maximum dimension.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Externally supplied tag-extraction callable.
#[async_trait]
pub trait TagBackend: Send + Sync {
    /// Propose hierarchical tags for a text, given the existing ontology
    /// as context.
    async fn extract_tags(&self, text: &str, existing_ontology: &[String])
        -> Result<Vec<String>>;
}

/// Externally supplied proposition-extraction callable.
#[async_trait]
pub trait PropositionBackend: Send + Sync {
    /// Decompose a text into standalone factual statements.
    async fn extract_propositions(&self, text: &str) -> Result<Vec<String>>;
}

/// Token counting callable.
pub trait TokenCounter: Send + Sync {
    /// Count the tokens of a text under the deployment's tokenizer.
    fn count(&self, text: &str) -> usize;
}

/// Default token counter: one token per four characters, minimum one
/// per non-empty text. Deployments with a real tokenizer substitute
/// their own implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            0
        } else {
            (text.chars().count() / 4).max(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_counter_scales_with_length() {
        let counter = HeuristicTokenCounter;
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("hi"), 1);
        assert_eq!(counter.count("a".repeat(400).as_str()), 100);
    }
}
