//! Reciprocal Rank Fusion.
//!
//! Merges the ordered result lists of independent search arms (vector,
//! full-text, tag) into a single ranking: each id at 1-based rank `r`
//! in a list contributes `1 / (k + r)` to its accumulated score. Ids
//! appearing in multiple lists naturally dominate.

use std::collections::HashMap;
use std::hash::Hash;

/// The standard RRF smoothing constant.
pub const RRF_K: u32 = 60;

/// A fused result with its accumulated score.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedResult<Id> {
    /// Candidate id
    pub id: Id,
    /// Accumulated reciprocal-rank score
    pub rrf_score: f64,
}

/// Reciprocal Rank Fusion merge over ordered id lists.
#[derive(Debug, Clone)]
pub struct RrfMerge {
    k: u32,
}

impl Default for RrfMerge {
    fn default() -> Self {
        Self::new(RRF_K)
    }
}

impl RrfMerge {
    /// Create a merge with a custom smoothing constant.
    #[must_use]
    pub fn new(k: u32) -> Self {
        Self { k }
    }

    /// Fuse the given ordered lists, best first in each.
    ///
    /// Ties are broken by first insertion across the lists in the order
    /// given, which keeps the merge stable and deterministic.
    #[must_use]
    pub fn fuse<Id>(&self, lists: &[Vec<Id>]) -> Vec<FusedResult<Id>>
    where
        Id: Eq + Hash + Clone,
    {
        let mut scores: HashMap<Id, f64> = HashMap::new();
        // Remembers first-seen order for the stable tie-break
        let mut order: Vec<Id> = Vec::new();

        for list in lists {
            for (index, id) in list.iter().enumerate() {
                let rank = index as u32 + 1;
                let contribution = 1.0 / f64::from(self.k + rank);
                match scores.get_mut(id) {
                    Some(score) => *score += contribution,
                    None => {
                        scores.insert(id.clone(), contribution);
                        order.push(id.clone());
                    }
                }
            }
        }

        let position: HashMap<&Id, usize> =
            order.iter().enumerate().map(|(i, id)| (id, i)).collect();

        let mut fused: Vec<FusedResult<Id>> = order
            .iter()
            .map(|id| FusedResult {
                id: id.clone(),
                rrf_score: scores[id],
            })
            .collect();
        fused.sort_by(|a, b| {
            b.rrf_score
                .partial_cmp(&a.rrf_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| position[&a.id].cmp(&position[&b.id]))
        });
        fused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_follow_the_formula() {
        let merge = RrfMerge::default();
        // Vector order: [X, Y, Z]; fulltext: [Y, X]; tag: [Z]
        let fused = merge.fuse(&[vec!["x", "y", "z"], vec!["y", "x"], vec!["z"]]);

        let score = |id: &str| {
            fused
                .iter()
                .find(|r| r.id == id)
                .map(|r| r.rrf_score)
                .unwrap()
        };

        assert!((score("x") - (1.0 / 61.0 + 1.0 / 62.0)).abs() < 1e-12);
        assert!((score("y") - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
        assert!((score("z") - (1.0 / 63.0 + 1.0 / 61.0)).abs() < 1e-12);

        // X and Y tie exactly; X was inserted first, Z trails.
        assert_eq!(fused[0].id, "x");
        assert_eq!(fused[1].id, "y");
        assert_eq!(fused[2].id, "z");
    }

    #[test]
    fn every_listed_id_scores_positive() {
        let merge = RrfMerge::default();
        let fused = merge.fuse(&[vec![1_i64, 2, 3], vec![], vec![4]]);
        assert_eq!(fused.len(), 4);
        assert!(fused.iter().all(|r| r.rrf_score > 0.0));
    }

    #[test]
    fn more_lists_strictly_increase_the_score() {
        let merge = RrfMerge::default();

        let one_list = merge.fuse(&[vec![7_i64]]);
        let two_lists = merge.fuse(&[vec![7_i64], vec![7_i64]]);

        assert!(two_lists[0].rrf_score > one_list[0].rrf_score);
    }

    #[test]
    fn empty_input_fuses_to_empty() {
        let merge = RrfMerge::default();
        let fused: Vec<FusedResult<i64>> = merge.fuse(&[]);
        assert!(fused.is_empty());
    }

    #[cfg(test)]
    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn fused_scores_are_positive_and_sorted(
                lists in proptest::collection::vec(
                    proptest::collection::vec(0_i64..50, 0..20),
                    0..4,
                )
            ) {
                let fused = RrfMerge::default().fuse(&lists);
                prop_assert!(fused.iter().all(|r| r.rrf_score > 0.0));
                prop_assert!(fused
                    .windows(2)
                    .all(|w| w[0].rrf_score >= w[1].rrf_score));
            }
        }
    }
}
