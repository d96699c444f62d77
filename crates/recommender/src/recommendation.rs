//! Scoring and ranking
//!
//! Turns a trained generation and an external user id into an ordered,
//! deduplicated, size-bounded list of external item ids.
//!
//! Items the user already rated are not filtered out: the ranking covers
//! every item known to the generation.

use crate::error::{RecommenderError, Result};
use crate::generation::ModelGeneration;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

pub const DEFAULT_NUM_RECOMMENDATIONS: usize = 20;

/// One ranked item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredItem {
    pub item_id: String,
    pub score: f32,
}

pub struct Recommender;

impl Recommender {
    /// Top `num_items` external item ids for `user_id`, best first
    pub fn recommend(
        generation: Option<&ModelGeneration>,
        user_id: &str,
        num_items: usize,
    ) -> Result<Vec<String>> {
        Ok(Self::rank(generation, user_id, num_items)?
            .into_iter()
            .map(|scored| scored.item_id)
            .collect())
    }

    /// Same as [`Recommender::recommend`] with the predicted scores attached
    pub fn rank(
        generation: Option<&ModelGeneration>,
        user_id: &str,
        num_items: usize,
    ) -> Result<Vec<ScoredItem>> {
        let generation = generation.ok_or(RecommenderError::ModelNotTrained)?;
        if num_items == 0 {
            return Err(RecommenderError::Validation(
                "number of recommendations must be positive".to_string(),
            ));
        }

        let user_idx = generation
            .mapping
            .users
            .to_internal(user_id)
            .map_err(|_| RecommenderError::UserNotFound(user_id.to_string()))?;

        let scores = generation.score_items(user_idx)?;
        let ranked = Self::sort_by_score(&scores);

        let mut seen = HashSet::new();
        let mut recommendations = Vec::with_capacity(num_items.min(ranked.len()));
        for item_idx in ranked {
            let item_id = match generation.mapping.items.to_external(item_idx) {
                Ok(id) => id,
                Err(_) => {
                    tracing::warn!(item_idx, "Skipping item without external identifier");
                    continue;
                }
            };
            if !seen.insert(item_id) {
                continue;
            }
            recommendations.push(ScoredItem {
                item_id: item_id.to_string(),
                score: scores[item_idx],
            });
            if recommendations.len() >= num_items {
                break;
            }
        }

        tracing::debug!(
            user_id,
            returned = recommendations.len(),
            requested = num_items,
            "Generated recommendations"
        );
        Ok(recommendations)
    }

    /// Item indices by descending score, ties by ascending index.
    /// NaN scores rank last.
    fn sort_by_score(scores: &[f32]) -> Vec<usize> {
        let key = |i: usize| {
            let s = scores[i];
            if s.is_nan() {
                f32::NEG_INFINITY
            } else {
                s
            }
        };
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| match key(b).total_cmp(&key(a)) {
            Ordering::Equal => a.cmp(&b),
            other => other,
        });
        order
    }
}
