//! Model generations
//!
//! A generation is one complete, immutable, servable snapshot of trained
//! state. It is produced by a successful training run or by loading the
//! persisted artifacts, and is replaced wholesale by the next one.

use crate::error::{RecommenderError, Result};
use crate::features::ItemMetadata;
use crate::interactions::{
    DuplicatePolicy, InteractionMatrixBuilder, ItemFeatureMatrix, RawInteraction,
};
use crate::matrix_factorization::{FactorizationConfig, HybridFactorization, LatentFactorModel};
use crate::registry::DatasetMapping;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ModelGeneration {
    pub id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub mapping: DatasetMapping,
    pub item_features: ItemFeatureMatrix,
    pub model: HybridFactorization,
}

impl ModelGeneration {
    /// Run a full training pass and bundle the result.
    ///
    /// Nothing is shared with any live generation, so a failure here leaves
    /// no trace.
    pub fn train(
        config: &FactorizationConfig,
        duplicate_policy: DuplicatePolicy,
        interactions: &[RawInteraction],
        items: &[ItemMetadata],
        trained_at: DateTime<Utc>,
    ) -> Result<Self> {
        let training_set =
            InteractionMatrixBuilder::new(duplicate_policy).build(interactions, items)?;

        let mut model = HybridFactorization::new(config.clone());
        model.fit(
            &training_set.interactions,
            &training_set.item_features,
            config.epochs,
        )?;

        let generation = Self {
            id: Uuid::new_v4(),
            trained_at,
            mapping: training_set.mapping,
            item_features: training_set.item_features,
            model,
        };
        generation.validate()?;
        Ok(generation)
    }

    /// Check the three parts describe the same dataset
    pub fn validate(&self) -> Result<()> {
        let items = self.mapping.items.len();
        if self.item_features.num_items() != items {
            return Err(RecommenderError::Validation(format!(
                "feature matrix has {} rows but {} items are registered",
                self.item_features.num_items(),
                items
            )));
        }
        if self.item_features.num_features() != self.mapping.feature_width() {
            return Err(RecommenderError::Validation(format!(
                "feature matrix width {} does not match {} items + {} tokens",
                self.item_features.num_features(),
                items,
                self.mapping.features.len()
            )));
        }

        let weights = self.model.weights().ok_or(RecommenderError::ModelNotTrained)?;
        if weights.num_users() != self.mapping.users.len() {
            return Err(RecommenderError::Validation(format!(
                "model has {} user rows but {} users are registered",
                weights.num_users(),
                self.mapping.users.len()
            )));
        }
        if weights.num_features() != self.item_features.num_features() {
            return Err(RecommenderError::Validation(format!(
                "model has {} feature rows but the feature matrix is {} wide",
                weights.num_features(),
                self.item_features.num_features()
            )));
        }
        Ok(())
    }

    /// Scores of every item for one user, indexed by internal item index
    pub fn score_items(&self, user_idx: usize) -> Result<Vec<f32>> {
        self.model.predict_scores(user_idx, &self.item_features)
    }

    /// Score one user-item pair by external identifiers
    pub fn score(&self, user_id: &str, item_id: &str) -> Result<f32> {
        let user_idx = self.mapping.users.to_internal(user_id)?;
        let item_idx = self.mapping.items.to_internal(item_id)?;
        self.model.predict(user_idx, item_idx, &self.item_features)
    }

    pub fn num_users(&self) -> usize {
        self.mapping.users.len()
    }

    pub fn num_items(&self) -> usize {
        self.mapping.items.len()
    }
}
