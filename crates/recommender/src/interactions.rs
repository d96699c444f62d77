//! Interaction and item-feature matrix construction
//!
//! Turns raw ratings and item metadata into the sparse structures consumed by
//! the factorization model, registering identifiers along the way.

use crate::error::{RecommenderError, Result};
use crate::features::{FeatureBuilder, ItemMetadata};
use crate::rating::confidence_weight;
use crate::registry::DatasetMapping;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Raw (user, item, rating) record as supplied with a training request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawInteraction {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "itemId")]
    pub item_id: String,
    pub rating: f32,
}

impl RawInteraction {
    pub fn new(user_id: impl Into<String>, item_id: impl Into<String>, rating: f32) -> Self {
        Self {
            user_id: user_id.into(),
            item_id: item_id.into(),
            rating,
        }
    }
}

/// How repeated (user, item) pairs end up in the interaction matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Every occurrence is an independent weighted entry
    #[default]
    KeepAll,
    /// The last occurrence replaces the weight of earlier ones
    LastWins,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keep_all" => Ok(DuplicatePolicy::KeepAll),
            "last_wins" => Ok(DuplicatePolicy::LastWins),
            other => Err(format!(
                "unknown duplicate policy '{}', expected keep_all or last_wins",
                other
            )),
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicatePolicy::KeepAll => write!(f, "keep_all"),
            DuplicatePolicy::LastWins => write!(f, "last_wins"),
        }
    }
}

/// Sparse weighted user-item interaction matrix in coordinate form
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InteractionMatrix {
    /// (user_index, item_index, confidence weight)
    pub entries: Vec<(usize, usize, f32)>,
    pub num_users: usize,
    pub num_items: usize,
}

impl InteractionMatrix {
    pub fn new(num_users: usize, num_items: usize) -> Self {
        Self {
            entries: Vec::new(),
            num_users,
            num_items,
        }
    }

    pub fn insert(&mut self, user_idx: usize, item_idx: usize, weight: f32) {
        self.entries.push((user_idx, item_idx, weight));
        self.num_users = self.num_users.max(user_idx + 1);
        self.num_items = self.num_items.max(item_idx + 1);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Weights recorded for one (user, item) pair, in insertion order
    pub fn weights(&self, user_idx: usize, item_idx: usize) -> Vec<f32> {
        self.entries
            .iter()
            .filter(|(u, i, _)| *u == user_idx && *i == item_idx)
            .map(|(_, _, w)| *w)
            .collect()
    }

    /// Items each user interacted with, indexed by user
    pub fn items_by_user(&self) -> Vec<Vec<usize>> {
        let mut by_user = vec![Vec::new(); self.num_users];
        for &(u, i, _) in &self.entries {
            by_user[u].push(i);
        }
        for items in &mut by_user {
            items.sort_unstable();
            items.dedup();
        }
        by_user
    }
}

/// Sparse item-feature matrix in row form
///
/// Row `i` lists the `(column, weight)` pairs of item `i`; weights of a row
/// sum to 1. Columns `0..num_items` are item identity features.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemFeatureMatrix {
    rows: Vec<Vec<(usize, f32)>>,
    num_features: usize,
}

impl ItemFeatureMatrix {
    /// Build from explicit rows, checking every column fits the width
    pub fn from_rows(rows: Vec<Vec<(usize, f32)>>, num_features: usize) -> Result<Self> {
        for (item, row) in rows.iter().enumerate() {
            for &(col, weight) in row {
                if col >= num_features {
                    return Err(RecommenderError::Validation(format!(
                        "item {} references feature column {} beyond width {}",
                        item, col, num_features
                    )));
                }
                if !weight.is_finite() {
                    return Err(RecommenderError::Validation(format!(
                        "item {} has a non-finite weight for column {}",
                        item, col
                    )));
                }
            }
        }
        Ok(Self { rows, num_features })
    }

    pub fn num_items(&self) -> usize {
        self.rows.len()
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn row(&self, item_idx: usize) -> &[(usize, f32)] {
        self.rows.get(item_idx).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn rows(&self) -> &[Vec<(usize, f32)>] {
        &self.rows
    }
}

/// Everything the factorization model is fitted on
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub mapping: DatasetMapping,
    pub interactions: InteractionMatrix,
    pub item_features: ItemFeatureMatrix,
}

pub struct InteractionMatrixBuilder {
    duplicate_policy: DuplicatePolicy,
}

impl InteractionMatrixBuilder {
    pub fn new(duplicate_policy: DuplicatePolicy) -> Self {
        Self { duplicate_policy }
    }

    /// Build the dataset mapping and both sparse structures.
    ///
    /// Registration order: users from interactions, then items from
    /// interactions, then items only present in the feature records.
    pub fn build(
        &self,
        interactions: &[RawInteraction],
        items: &[ItemMetadata],
    ) -> Result<TrainingSet> {
        if interactions.is_empty() {
            return Err(RecommenderError::EmptyTrainingSet(
                "no user interactions supplied".to_string(),
            ));
        }
        if items.is_empty() {
            return Err(RecommenderError::EmptyTrainingSet(
                "no item features supplied".to_string(),
            ));
        }

        let mut mapping = DatasetMapping::default();

        for interaction in interactions {
            mapping.users.register(&interaction.user_id);
        }
        for interaction in interactions {
            mapping.items.register(&interaction.item_id);
        }
        for item in items {
            mapping.items.register(&item.item_id);
        }

        let feature_sets = FeatureBuilder::build(items)?;
        let token_sets: Vec<(usize, Vec<String>)> = feature_sets
            .iter()
            .map(|set| {
                mapping
                    .items
                    .to_internal(&set.item_id)
                    .map(|idx| (idx, set.token_strings()))
            })
            .collect::<Result<_>>()?;
        for (_, tokens) in &token_sets {
            for token in tokens {
                mapping.features.register(token);
            }
        }

        let interaction_matrix = self.build_interactions(&mapping, interactions)?;
        let item_features = Self::build_item_features(&mapping, &token_sets)?;

        tracing::debug!(
            users = mapping.users.len(),
            items = mapping.items.len(),
            tokens = mapping.features.len(),
            entries = interaction_matrix.len(),
            "Built training set"
        );

        Ok(TrainingSet {
            mapping,
            interactions: interaction_matrix,
            item_features,
        })
    }

    fn build_interactions(
        &self,
        mapping: &DatasetMapping,
        interactions: &[RawInteraction],
    ) -> Result<InteractionMatrix> {
        let mut matrix = InteractionMatrix::new(mapping.users.len(), mapping.items.len());
        let mut positions: HashMap<(usize, usize), usize> = HashMap::new();

        for interaction in interactions {
            let user_idx = mapping.users.to_internal(&interaction.user_id)?;
            let item_idx = mapping.items.to_internal(&interaction.item_id)?;
            let weight = confidence_weight(interaction.rating);

            match self.duplicate_policy {
                DuplicatePolicy::KeepAll => matrix.insert(user_idx, item_idx, weight),
                DuplicatePolicy::LastWins => match positions.get(&(user_idx, item_idx)) {
                    Some(&pos) => matrix.entries[pos].2 = weight,
                    None => {
                        positions.insert((user_idx, item_idx), matrix.len());
                        matrix.insert(user_idx, item_idx, weight);
                    }
                },
            }
        }

        Ok(matrix)
    }

    fn build_item_features(
        mapping: &DatasetMapping,
        token_sets: &[(usize, Vec<String>)],
    ) -> Result<ItemFeatureMatrix> {
        let num_items = mapping.items.len();
        let mut rows: Vec<BTreeMap<usize, f32>> = (0..num_items)
            .map(|item_idx| BTreeMap::from([(item_idx, 1.0)]))
            .collect();

        for (item_idx, tokens) in token_sets {
            for token in tokens {
                let col = num_items + mapping.features.to_internal(token)?;
                *rows[*item_idx].entry(col).or_insert(0.0) += 1.0;
            }
        }

        let rows = rows
            .into_iter()
            .map(|row| {
                let total: f32 = row.values().sum();
                row.into_iter().map(|(col, w)| (col, w / total)).collect()
            })
            .collect();

        ItemFeatureMatrix::from_rows(rows, mapping.feature_width())
    }
}
