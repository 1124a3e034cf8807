//! Proposition extraction service: breaker-protected, filtered against
//! meta responses and length bounds.

use super::PropositionBackend;
use crate::breaker::CircuitBreaker;
use crate::config::PropositionConfig;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::debug;

/// Phrases that mark a model meta response rather than a proposition.
const META_RESPONSE_MARKERS: [&str; 6] = [
    "please provide",
    "i need the text",
    "i cannot",
    "i'm unable",
    "as an ai",
    "here are the propositions",
];

/// Breaker-protected proposition extraction.
///
/// The backend response is split on newlines, stripped of bullet
/// markers (`-`, `*`, `•`, `1.`), filtered against known meta-response
/// patterns, bounded by the configured word and character limits, and
/// deduplicated in order.
pub struct PropositionService {
    backend: Arc<dyn PropositionBackend>,
    breaker: Arc<CircuitBreaker>,
    config: PropositionConfig,
}

impl PropositionService {
    /// Create a service over a backend and its breaker.
    #[must_use]
    pub fn new(
        backend: Arc<dyn PropositionBackend>,
        breaker: Arc<CircuitBreaker>,
        config: PropositionConfig,
    ) -> Self {
        Self {
            backend,
            breaker,
            config,
        }
    }

    /// Whether proposition extraction is enabled at all.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Extract propositions for `text`.
    ///
    /// A breaker rejection surfaces as [`Error::CircuitOpen`] verbatim;
    /// every other backend failure is wrapped in
    /// [`Error::PropositionFailed`].
    pub async fn extract(&self, text: &str) -> Result<Vec<String>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let backend = Arc::clone(&self.backend);
        let owned = text.to_string();
        let raw = self
            .breaker
            .call(|| async move {
                backend
                    .extract_propositions(&owned)
                    .await
                    .map_err(wrap_proposition_error)
            })
            .await?;

        let propositions = self.filter(raw);
        debug!("Extracted {} propositions", propositions.len());
        Ok(propositions)
    }

    /// Normalize and filter a raw backend response.
    #[must_use]
    pub fn filter(&self, raw: Vec<String>) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut propositions = Vec::new();
        for entry in raw {
            for line in entry.lines() {
                let candidate = strip_bullet(line);
                if candidate.is_empty() || self.is_rejected(&candidate) {
                    continue;
                }
                if seen.insert(candidate.to_lowercase()) {
                    propositions.push(candidate);
                }
            }
        }
        propositions
    }

    fn is_rejected(&self, candidate: &str) -> bool {
        let lower = candidate.to_lowercase();
        if META_RESPONSE_MARKERS.iter().any(|m| lower.contains(m)) {
            return true;
        }
        if candidate.chars().count() < self.config.min_length
            || candidate.chars().count() > self.config.max_length
        {
            return true;
        }
        candidate.split_whitespace().count() < self.config.min_words
    }
}

/// Strip leading bullet markers: `-`, `*`, `•`, and `1.`-style ordinals.
fn strip_bullet(line: &str) -> String {
    let trimmed = line.trim();
    let without_symbol = trimmed
        .strip_prefix(['-', '*', '•'])
        .map_or(trimmed, str::trim_start);

    // Numbered list markers: digits followed by a dot
    let without_ordinal = {
        let digits = without_symbol
            .chars()
            .take_while(char::is_ascii_digit)
            .count();
        if digits > 0 && without_symbol[digits..].starts_with('.') {
            without_symbol[digits + 1..].trim_start()
        } else {
            without_symbol
        }
    };
    without_ordinal.trim().to_string()
}

/// Keep `CircuitOpen` untouched, wrap everything else as a proposition
/// failure.
fn wrap_proposition_error(error: Error) -> Error {
    match error {
        Error::CircuitOpen(_) | Error::PropositionFailed(_) => error,
        other => Error::PropositionFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use async_trait::async_trait;

    struct StaticBackend(Vec<String>);

    #[async_trait]
    impl PropositionBackend for StaticBackend {
        async fn extract_propositions(&self, _text: &str) -> Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    fn service(response: Vec<&str>) -> PropositionService {
        let backend = Arc::new(StaticBackend(
            response.into_iter().map(String::from).collect(),
        ));
        let breaker = Arc::new(CircuitBreaker::new("propositions", BreakerConfig::default()));
        let config = PropositionConfig {
            enabled: true,
            min_length: 10,
            max_length: 100,
            min_words: 3,
            ..Default::default()
        };
        PropositionService::new(backend, breaker, config)
    }

    #[tokio::test]
    async fn strips_bullets_and_ordinals() {
        let service = service(vec![
            "- Rust guarantees memory safety\n* Tokio schedules async tasks\n3. Postgres supports logical replication",
        ]);
        let propositions = service.extract("text").await.unwrap();
        assert_eq!(
            propositions,
            vec![
                "Rust guarantees memory safety".to_string(),
                "Tokio schedules async tasks".to_string(),
                "Postgres supports logical replication".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn rejects_meta_responses() {
        let service = service(vec![
            "Please provide the text you would like analyzed",
            "I need the text before I can help",
            "The working set fits within its budget",
        ]);
        let propositions = service.extract("text").await.unwrap();
        assert_eq!(
            propositions,
            vec!["The working set fits within its budget".to_string()]
        );
    }

    #[tokio::test]
    async fn enforces_length_bounds() {
        let long = "word ".repeat(40);
        let service = service(vec!["too short", "tiny one here", long.as_str()]);
        let propositions = service.extract("text").await.unwrap();
        // "too short" fails min_words; the 200-char line fails
        // max_length; "tiny one here" passes (13 chars, 3 words).
        assert_eq!(propositions, vec!["tiny one here".to_string()]);
    }

    #[tokio::test]
    async fn dedups_case_insensitively() {
        let service = service(vec![
            "Rust guarantees memory safety",
            "rust guarantees memory safety",
        ]);
        let propositions = service.extract("text").await.unwrap();
        assert_eq!(propositions.len(), 1);
    }
}
