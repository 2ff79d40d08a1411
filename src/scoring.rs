//! Linear, explainable scoring.
//!
//! `total = interest_match + popularity + diversity`, where
//! - `interest_match = |tags ∩ interests| * w.interest` (exact string equality),
//! - `popularity = max(item.popularity, 0) * w.popularity`,
//! - `diversity = |interests| * DIVERSITY_UNIT * w.diversity`.
//!
//! The diversity term is the same for every item in a call. It never changes
//! ranking within one request but stays in the breakdown for transparency.

use crate::interests::InterestSet;
use crate::model::{Item, ScoreBreakdown, ScoredItem};
use crate::weights::WeightConfig;

pub const DIVERSITY_UNIT: f64 = 0.01;

pub fn score(item: &Item, interests: &InterestSet, weights: &WeightConfig) -> ScoreBreakdown {
    let hits = item.tags.iter().filter(|t| interests.contains(t)).count();
    let popularity = if item.popularity.is_finite() {
        item.popularity.max(0.0)
    } else {
        0.0
    };

    ScoreBreakdown::new(
        hits as f64 * weights.interest,
        popularity * weights.popularity,
        interests.len() as f64 * DIVERSITY_UNIT * weights.diversity,
    )
}

/// Scores every item and sorts by descending total. The sort is stable:
/// exact ties keep their fetch order.
pub fn rank(items: Vec<Item>, interests: &InterestSet, weights: &WeightConfig) -> Vec<ScoredItem> {
    let mut scored: Vec<ScoredItem> = items
        .into_iter()
        .map(|item| {
            let breakdown = score(&item, interests, weights);
            ScoredItem { item, breakdown }
        })
        .collect();
    scored.sort_by(|a, b| b.breakdown.total().total_cmp(&a.breakdown.total()));
    scored
}

/// Tags of `item` that are also in `interests`.
pub fn matched_tags(item: &Item, interests: &InterestSet) -> Vec<String> {
    item.tags
        .iter()
        .filter(|t| interests.contains(t))
        .cloned()
        .collect()
}
