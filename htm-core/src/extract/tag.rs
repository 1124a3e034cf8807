//! Tag extraction service: breaker-protected, grammar-filtered.

use super::TagBackend;
use crate::breaker::CircuitBreaker;
use crate::error::{Error, Result};
use crate::tags::is_valid_tag;
use std::sync::Arc;
use tracing::debug;

/// Breaker-protected tag extraction.
///
/// The backend response is parsed tolerantly (entries may themselves be
/// newline-separated or bulleted), then filtered against the taxonomy
/// grammar: lowercase `[a-z0-9-]+` segments joined by `:`, bounded
/// depth, no duplicate segments, root distinct from leaf.
pub struct TagService {
    backend: Arc<dyn TagBackend>,
    breaker: Arc<CircuitBreaker>,
    max_depth: usize,
}

impl TagService {
    /// Create a service over a backend and its breaker.
    #[must_use]
    pub fn new(
        backend: Arc<dyn TagBackend>,
        breaker: Arc<CircuitBreaker>,
        max_depth: usize,
    ) -> Self {
        Self {
            backend,
            breaker,
            max_depth,
        }
    }

    /// Maximum tag depth accepted by this service.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Extract tags for `text`, filtered and deduplicated.
    ///
    /// A breaker rejection surfaces as [`Error::CircuitOpen`] verbatim;
    /// every other backend failure is wrapped in [`Error::TagFailed`].
    pub async fn extract(&self, text: &str, existing_ontology: &[String]) -> Result<Vec<String>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let backend = Arc::clone(&self.backend);
        let owned_text = text.to_string();
        let ontology = existing_ontology.to_vec();
        let raw = self
            .breaker
            .call(|| async move {
                backend
                    .extract_tags(&owned_text, &ontology)
                    .await
                    .map_err(wrap_tag_error)
            })
            .await?;

        let tags = self.filter(raw);
        debug!("Extracted {} valid tags", tags.len());
        Ok(tags)
    }

    /// Normalize and filter a raw backend response.
    #[must_use]
    pub fn filter(&self, raw: Vec<String>) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut tags = Vec::new();
        for entry in raw {
            for line in entry.lines() {
                let candidate = normalize_line(line);
                if candidate.is_empty() {
                    continue;
                }
                if !is_valid_tag(&candidate, self.max_depth) {
                    continue;
                }
                if seen.insert(candidate.clone()) {
                    tags.push(candidate);
                }
            }
        }
        tags
    }
}

/// Strip bullet markers and surrounding noise from one response line.
fn normalize_line(line: &str) -> String {
    let trimmed = line
        .trim()
        .trim_start_matches(['-', '*', '•'])
        .trim()
        .trim_matches(['`', '"', '\''])
        .trim();
    trimmed.to_lowercase()
}

/// Keep `CircuitOpen` untouched, wrap everything else as a tag failure.
fn wrap_tag_error(error: Error) -> Error {
    match error {
        Error::CircuitOpen(_) | Error::TagFailed(_) => error,
        other => Error::TagFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::config::BreakerConfig;

    struct StaticBackend(Vec<String>);

    #[async_trait]
    impl TagBackend for StaticBackend {
        async fn extract_tags(
            &self,
            _text: &str,
            _existing_ontology: &[String],
        ) -> Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    fn service(response: Vec<&str>) -> TagService {
        let backend = Arc::new(StaticBackend(
            response.into_iter().map(String::from).collect(),
        ));
        let breaker = Arc::new(CircuitBreaker::new("tags", BreakerConfig::default()));
        TagService::new(backend, breaker, 4)
    }

    #[tokio::test]
    async fn filters_grammar_violations() {
        let service = service(vec![
            "programming:rust",
            "Programming:Rust", // normalized to lowercase, duplicate
            "bad tag with spaces",
            "a:b:c:d:e", // too deep
            "x:y:x:z",   // duplicate segment
            "solo:solo", // root equals leaf
        ]);

        let tags = service.extract("some text", &[]).await.unwrap();
        assert_eq!(tags, vec!["programming:rust".to_string()]);
    }

    #[tokio::test]
    async fn parses_newline_and_bullet_shapes() {
        let service = service(vec!["- alpha\n* beta:leaf\n• gamma"]);
        let tags = service.extract("some text", &[]).await.unwrap();
        assert_eq!(
            tags,
            vec!["alpha".to_string(), "beta:leaf".to_string(), "gamma".to_string()]
        );
    }

    #[tokio::test]
    async fn empty_text_short_circuits() {
        let service = service(vec!["never-called"]);
        let tags = service.extract("   ", &[]).await.unwrap();
        assert!(tags.is_empty());
    }

    #[tokio::test]
    async fn wraps_backend_failures() {
        struct FailingBackend;
        #[async_trait]
        impl TagBackend for FailingBackend {
            async fn extract_tags(
                &self,
                _text: &str,
                _existing_ontology: &[String],
            ) -> Result<Vec<String>> {
                Err(Error::Database("timeout".to_string()))
            }
        }
        let breaker = Arc::new(CircuitBreaker::new("tags", BreakerConfig::default()));
        let service = TagService::new(Arc::new(FailingBackend), breaker, 4);
        let err = service.extract("text", &[]).await.unwrap_err();
        assert!(matches!(err, Error::TagFailed(_)));
    }
}
