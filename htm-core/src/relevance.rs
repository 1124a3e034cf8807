//! Dynamic multi-signal relevance scoring.
//!
//! Re-ranks search candidates by a convex combination of semantic
//! similarity, hierarchical tag similarity, recency, and access
//! frequency, scaled to `[0, 10]`.

use crate::config::RelevanceConfig;
use crate::error::Result;
use crate::tags::weighted_hierarchical_jaccard;
use chrono::{DateTime, Utc};

/// Signals for one candidate node.
#[derive(Debug, Clone, Default)]
pub struct RelevanceInput {
    /// Cosine similarity from the vector search row, when present
    pub semantic_similarity: Option<f64>,
    /// Tags extracted from the query
    pub query_tags: Vec<String>,
    /// Tags attached to the node
    pub node_tags: Vec<String>,
    /// Node creation time
    pub created_at: DateTime<Utc>,
    /// Node access count
    pub access_count: u64,
}

/// Composite relevance scorer with validated weights.
#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    config: RelevanceConfig,
}

impl RelevanceScorer {
    /// Create a scorer, validating the weight configuration.
    pub fn new(config: RelevanceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Score one candidate. The result is always within `[0, 10]`.
    ///
    /// Signal conventions:
    /// - semantic: the row's cosine similarity, 0.5 when absent
    /// - tag: hierarchical Jaccard, 0.5 when either tag set is empty
    /// - recency: `exp(-age_hours / half_life_hours)`
    /// - access: `ln(1 + access_count) / 10`
    #[must_use]
    pub fn score(&self, input: &RelevanceInput) -> f64 {
        self.score_at(input, Utc::now())
    }

    /// Score against an explicit reference time. Exposed for tests.
    #[must_use]
    pub fn score_at(&self, input: &RelevanceInput, now: DateTime<Utc>) -> f64 {
        let semantic = input.semantic_similarity.unwrap_or(0.5).clamp(0.0, 1.0);

        let tag = if input.query_tags.is_empty() || input.node_tags.is_empty() {
            0.5
        } else {
            weighted_hierarchical_jaccard(&input.query_tags, &input.node_tags)
        };

        let age_hours = (now
            .signed_duration_since(input.created_at)
            .num_milliseconds() as f64
            / 3_600_000.0)
            .max(0.0);
        let recency = (-age_hours / self.config.recency_half_life_hours).exp();

        let access = ((1.0 + input.access_count as f64).ln() / 10.0).clamp(0.0, 1.0);

        let combined = self.config.semantic_weight * semantic
            + self.config.tag_weight * tag.clamp(0.0, 1.0)
            + self.config.recency_weight * recency.clamp(0.0, 1.0)
            + self.config.access_weight * access;

        (10.0 * combined).clamp(0.0, 10.0)
    }

    /// The validated weight configuration.
    #[must_use]
    pub fn config(&self) -> &RelevanceConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn scorer() -> RelevanceScorer {
        RelevanceScorer::new(RelevanceConfig::default()).unwrap()
    }

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn rejects_invalid_weights() {
        let bad = RelevanceConfig {
            semantic_weight: 0.4,
            tag_weight: 0.3,
            recency_weight: 0.2,
            access_weight: 0.2,
            ..Default::default()
        };
        assert!(RelevanceScorer::new(bad).is_err());
    }

    #[test]
    fn score_is_bounded() {
        let scorer = scorer();
        let now = Utc::now();

        let best = RelevanceInput {
            semantic_similarity: Some(1.0),
            query_tags: tags(&["a:b"]),
            node_tags: tags(&["a:b"]),
            created_at: now,
            access_count: u64::MAX / 2,
        };
        let score = scorer.score_at(&best, now);
        assert!((0.0..=10.0).contains(&score));

        let worst = RelevanceInput {
            semantic_similarity: Some(0.0),
            query_tags: tags(&["a"]),
            node_tags: tags(&["zz"]),
            created_at: now - Duration::days(3650),
            access_count: 0,
        };
        let score = scorer.score_at(&worst, now);
        assert!((0.0..=10.0).contains(&score));
    }

    #[test]
    fn missing_semantic_defaults_to_midpoint() {
        let scorer = scorer();
        let now = Utc::now();
        let absent = RelevanceInput {
            semantic_similarity: None,
            created_at: now,
            ..Default::default()
        };
        let midpoint = RelevanceInput {
            semantic_similarity: Some(0.5),
            created_at: now,
            ..Default::default()
        };
        let a = scorer.score_at(&absent, now);
        let b = scorer.score_at(&midpoint, now);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn empty_tag_sets_use_neutral_signal() {
        let scorer = scorer();
        let now = Utc::now();
        let no_tags = RelevanceInput {
            semantic_similarity: Some(0.8),
            created_at: now,
            ..Default::default()
        };
        let matching_tags = RelevanceInput {
            semantic_similarity: Some(0.8),
            query_tags: tags(&["a:b"]),
            node_tags: tags(&["a:b"]),
            created_at: now,
            ..Default::default()
        };
        // Identical tags (1.0) beat the neutral 0.5 default.
        assert!(scorer.score_at(&matching_tags, now) > scorer.score_at(&no_tags, now));
    }

    #[test]
    fn recency_decays_with_half_life() {
        let scorer = scorer();
        let now = Utc::now();
        let fresh = RelevanceInput {
            created_at: now,
            ..Default::default()
        };
        let week_old = RelevanceInput {
            created_at: now - Duration::hours(168),
            ..Default::default()
        };
        let fresh_score = scorer.score_at(&fresh, now);
        let old_score = scorer.score_at(&week_old, now);
        assert!(fresh_score > old_score);

        // One half-life: recency term contributes e^-1 of its weight.
        let expected_drop = 10.0 * scorer.config().recency_weight * (1.0 - (-1.0_f64).exp());
        assert!((fresh_score - old_score - expected_drop).abs() < 1e-6);
    }

    #[test]
    fn access_signal_is_logarithmic() {
        let scorer = scorer();
        let now = Utc::now();
        let quiet = RelevanceInput {
            access_count: 0,
            created_at: now,
            ..Default::default()
        };
        let busy = RelevanceInput {
            access_count: 100,
            created_at: now,
            ..Default::default()
        };
        let very_busy = RelevanceInput {
            access_count: 10_000,
            created_at: now,
            ..Default::default()
        };
        let q = scorer.score_at(&quiet, now);
        let b = scorer.score_at(&busy, now);
        let v = scorer.score_at(&very_busy, now);
        assert!(b > q);
        // Logarithmic growth: the second hundredfold increase adds less
        // than twice the first.
        assert!(v - b < 2.0 * (b - q));
    }
}
