//! Hierarchical tag taxonomy.
//!
//! Tags are `:`-joined paths of lowercase segments (`[a-z0-9-]+`), e.g.
//! `programming:rust:async`. Every prefix of a tag is itself a tag, and
//! attaching a tag to a node attaches the whole ancestor chain
//! (hierarchical closure).

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Check a single tag segment against the `[a-z0-9-]+` alphabet.
fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Validate a tag name against the taxonomy grammar.
///
/// Rules:
/// - every segment matches `[a-z0-9-]+`
/// - depth (segment count) is at most `max_depth`
/// - no duplicate segments within the tag
/// - first segment differs from the last when depth > 1
pub fn validate_tag(tag: &str, max_depth: usize) -> Result<()> {
    if tag.is_empty() {
        return Err(Error::Validation("tag must not be empty".to_string()));
    }
    let segments: Vec<&str> = tag.split(':').collect();
    if segments.len() > max_depth {
        return Err(Error::Validation(format!(
            "tag '{tag}' exceeds maximum depth {max_depth}"
        )));
    }
    for segment in &segments {
        if !valid_segment(segment) {
            return Err(Error::Validation(format!(
                "tag '{tag}' has invalid segment '{segment}'"
            )));
        }
    }
    for (i, segment) in segments.iter().enumerate() {
        if segments[..i].contains(segment) {
            return Err(Error::Validation(format!(
                "tag '{tag}' repeats segment '{segment}'"
            )));
        }
    }
    if segments.len() > 1 && segments.first() == segments.last() {
        return Err(Error::Validation(format!(
            "tag '{tag}' has identical root and leaf"
        )));
    }
    Ok(())
}

/// Check whether a tag conforms to the grammar without an error value.
#[must_use]
pub fn is_valid_tag(tag: &str, max_depth: usize) -> bool {
    validate_tag(tag, max_depth).is_ok()
}

/// Expand a tag to its ancestor chain, shallowest first.
///
/// `ancestors("a:b:c")` is `["a", "a:b", "a:b:c"]`.
#[must_use]
pub fn ancestors(tag: &str) -> Vec<String> {
    let segments: Vec<&str> = tag.split(':').collect();
    (1..=segments.len())
        .map(|depth| segments[..depth].join(":"))
        .collect()
}

/// Tag-depth score for a hybrid-search candidate node.
///
/// For every query tag of depth `D` and every prefix of it of depth
/// `d <= D`, the node's best contribution is `d / D` when it carries
/// that prefix. The final score is the maximum over query tags, plus a
/// multi-match bonus of `min(0.05 * (k - 1), 0.2)` for `k` matched
/// tags, clamped to `[0, 1]`.
#[must_use]
pub fn tag_depth_score(query_tags: &[String], node_tags: &[String]) -> f64 {
    if query_tags.is_empty() || node_tags.is_empty() {
        return 0.0;
    }

    let node_set: std::collections::HashSet<&str> =
        node_tags.iter().map(String::as_str).collect();

    let mut best = 0.0_f64;
    let mut matched = 0usize;
    for query_tag in query_tags {
        let full_depth = query_tag.split(':').count();
        let mut tag_best = 0.0_f64;
        for prefix in ancestors(query_tag) {
            if node_set.contains(prefix.as_str()) {
                let depth = prefix.split(':').count();
                tag_best = tag_best.max(depth as f64 / full_depth as f64);
            }
        }
        if tag_best > 0.0 {
            matched += 1;
        }
        best = best.max(tag_best);
    }

    let bonus = if matched > 1 {
        (0.05 * (matched - 1) as f64).min(0.2)
    } else {
        0.0
    };
    (best + bonus).clamp(0.0, 1.0)
}

/// Pairwise similarity of two pre-split tags: shared prefix depth over
/// the longer path length.
fn prefix_similarity(a: &[&str], b: &[&str]) -> f64 {
    let common = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        0.0
    } else {
        common as f64 / max_len as f64
    }
}

/// Weighted hierarchical Jaccard similarity between two tag sets.
///
/// Identical sets score exactly 1.0. Otherwise each tag in `a` is
/// compared against the `b` tags sharing its root segment (or all of
/// `b` when none share), with pairwise similarity
/// `common_prefix_depth / max(len)` weighted by `1 / max(len)` so
/// shallow disagreements cost more than deep ones.
#[must_use]
pub fn weighted_hierarchical_jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    // Fast path: exact set equality
    let set_a: std::collections::HashSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: std::collections::HashSet<&str> = b.iter().map(String::as_str).collect();
    if set_a == set_b {
        return 1.0;
    }

    let split_b: Vec<Vec<&str>> = b.iter().map(|t| t.split(':').collect()).collect();
    let mut by_root: HashMap<&str, Vec<&Vec<&str>>> = HashMap::new();
    for parts in &split_b {
        if let Some(root) = parts.first() {
            by_root.entry(root).or_default().push(parts);
        }
    }
    let all_b: Vec<&Vec<&str>> = split_b.iter().collect();

    let mut weighted_sum = 0.0_f64;
    let mut weight_total = 0.0_f64;
    for tag in a {
        let parts_a: Vec<&str> = tag.split(':').collect();
        let candidates = parts_a
            .first()
            .and_then(|root| by_root.get(root))
            .unwrap_or(&all_b);
        for parts_b in candidates {
            let max_len = parts_a.len().max(parts_b.len());
            let weight = 1.0 / max_len as f64;
            weighted_sum += prefix_similarity(&parts_a, parts_b) * weight;
            weight_total += weight;
        }
    }

    if weight_total == 0.0 {
        0.0
    } else {
        weighted_sum / weight_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn grammar_accepts_hierarchical_paths() {
        assert!(is_valid_tag("programming", 4));
        assert!(is_valid_tag("programming:rust:async", 4));
        assert!(is_valid_tag("v2:api-design", 4));
    }

    #[test]
    fn grammar_rejects_bad_shapes() {
        assert!(!is_valid_tag("", 4));
        assert!(!is_valid_tag("Programming", 4));
        assert!(!is_valid_tag("a b", 4));
        assert!(!is_valid_tag("a::b", 4));
        // Too deep
        assert!(!is_valid_tag("a:b:c:d:e", 4));
        // Duplicate segment
        assert!(!is_valid_tag("rust:async:rust:await", 4));
        // Root equals leaf
        assert!(!is_valid_tag("rust:rust", 4));
    }

    #[test]
    fn ancestor_closure() {
        assert_eq!(ancestors("a:b:c"), vec!["a", "a:b", "a:b:c"]);
        assert_eq!(ancestors("solo"), vec!["solo"]);
    }

    #[test]
    fn depth_score_full_match() {
        let score = tag_depth_score(&tags(&["a:b:c"]), &tags(&["a:b:c"]));
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn depth_score_partial_prefix() {
        // Node carries only the depth-1 ancestor of a depth-3 query tag.
        let score = tag_depth_score(&tags(&["a:b:c"]), &tags(&["a"]));
        assert!((score - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn depth_score_multi_match_bonus() {
        // Both query tags match only at their depth-1 ancestor (0.5),
        // so the bonus is visible below the clamp.
        let single = tag_depth_score(&tags(&["a:b"]), &tags(&["a"]));
        let double = tag_depth_score(&tags(&["a:b", "x:y"]), &tags(&["a", "x"]));
        assert!((single - 0.5).abs() < 1e-9);
        assert!((double - 0.55).abs() < 1e-9);

        // Bonus caps at 0.2 and the total clamps to 1.0
        let many: Vec<String> = (0..10).map(|i| format!("t{i}:leaf")).collect();
        let score = tag_depth_score(&many, &many);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn depth_score_empty_sides() {
        assert_eq!(tag_depth_score(&[], &tags(&["a"])), 0.0);
        assert_eq!(tag_depth_score(&tags(&["a"]), &[]), 0.0);
    }

    #[test]
    fn jaccard_identity() {
        let set = tags(&["programming:rust", "database:postgres"]);
        assert!((weighted_hierarchical_jaccard(&set, &set) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn jaccard_empty_is_zero() {
        assert_eq!(weighted_hierarchical_jaccard(&[], &tags(&["a"])), 0.0);
        assert_eq!(weighted_hierarchical_jaccard(&tags(&["a"]), &[]), 0.0);
    }

    #[test]
    fn jaccard_shared_root_scores_higher_than_disjoint() {
        let query = tags(&["programming:rust"]);
        let related = tags(&["programming:python"]);
        let unrelated = tags(&["cooking:pasta"]);

        let close = weighted_hierarchical_jaccard(&query, &related);
        let far = weighted_hierarchical_jaccard(&query, &unrelated);
        assert!(close > far);
    }

    #[test]
    fn jaccard_is_symmetric_for_singletons() {
        let a = tags(&["a:b:c"]);
        let b = tags(&["a:b"]);
        let ab = weighted_hierarchical_jaccard(&a, &b);
        let ba = weighted_hierarchical_jaccard(&b, &a);
        assert!((ab - ba).abs() < 1e-9);
        // Shared prefix of depth 2 over max length 3, single pair
        assert!((ab - 2.0 / 3.0).abs() < 1e-9);
    }

    #[cfg(test)]
    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn tag_strategy() -> impl Strategy<Value = String> {
            proptest::collection::vec("[a-z]{1,6}", 1..4).prop_map(|segments| segments.join(":"))
        }

        proptest! {
            #[test]
            fn jaccard_self_similarity_is_one(
                set in proptest::collection::vec(tag_strategy(), 1..6)
            ) {
                let score = weighted_hierarchical_jaccard(&set, &set);
                prop_assert!((score - 1.0).abs() < 1e-9);
            }

            #[test]
            fn jaccard_is_bounded(
                a in proptest::collection::vec(tag_strategy(), 0..6),
                b in proptest::collection::vec(tag_strategy(), 0..6)
            ) {
                let score = weighted_hierarchical_jaccard(&a, &b);
                prop_assert!((0.0..=1.0).contains(&score));
            }

            #[test]
            fn depth_score_is_bounded(
                a in proptest::collection::vec(tag_strategy(), 0..6),
                b in proptest::collection::vec(tag_strategy(), 0..6)
            ) {
                let score = tag_depth_score(&a, &b);
                prop_assert!((0.0..=1.0).contains(&score));
            }
        }
    }
}
