//! Service state
//!
//! `RecommenderService` owns everything a running process needs: the
//! configuration, the training coordinator holding the live generation, and
//! the optional persistence store. Handlers receive it through `web::Data`.

use crate::config::RecommenderConfig;
use crate::coordinator::{Clock, SystemClock, TrainingCoordinator, TrainingPhase};
use crate::error::Result;
use crate::features::ItemMetadata;
use crate::generation::ModelGeneration;
use crate::interactions::RawInteraction;
use crate::persistence::PersistenceStore;
use crate::recommendation::Recommender;
use std::sync::Arc;

pub struct RecommenderService {
    config: RecommenderConfig,
    coordinator: TrainingCoordinator<ModelGeneration>,
    store: Option<PersistenceStore>,
}

impl RecommenderService {
    /// Service with the system clock and a store at the configured paths
    pub fn new(config: RecommenderConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RecommenderConfig, clock: Arc<dyn Clock>) -> Self {
        let coordinator = TrainingCoordinator::with_clock(config.training.cooldown, clock);
        let store = Some(PersistenceStore::new(config.storage.clone()));
        Self {
            config,
            coordinator,
            store,
        }
    }

    /// Drop the persistence store; trained generations stay in memory only
    pub fn without_persistence(mut self) -> Self {
        self.store = None;
        self
    }

    /// Load the persisted generation, if any, and make it live.
    ///
    /// Returns `Ok(None)` when nothing has been persisted yet. Corrupt or
    /// partial state is an error and nothing is installed.
    pub fn restore(&self) -> Result<Option<Arc<ModelGeneration>>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        match store.load_if_present()? {
            Some(generation) => {
                tracing::info!(
                    generation_id = %generation.id,
                    trained_at = %generation.trained_at,
                    "Restored persisted generation"
                );
                Ok(Some(self.coordinator.install(generation)))
            }
            None => {
                tracing::info!("No persisted generation found, starting untrained");
                Ok(None)
            }
        }
    }

    /// Train a new generation and make it live.
    ///
    /// With persistence enabled the generation is saved before the swap, so
    /// a failed save leaves the previous generation serving.
    pub fn train(
        &self,
        interactions: &[RawInteraction],
        items: &[ItemMetadata],
    ) -> Result<Arc<ModelGeneration>> {
        self.coordinator.try_train(|started_at| {
            let span = tracing::info_span!(
                "train",
                interactions = interactions.len(),
                items = items.len()
            );
            let _entered = span.enter();

            let generation = ModelGeneration::train(
                &self.config.model,
                self.config.training.duplicate_policy,
                interactions,
                items,
                started_at,
            )?;

            tracing::info!(
                generation_id = %generation.id,
                users = generation.num_users(),
                items = generation.num_items(),
                features = generation.mapping.features.len(),
                "Trained model generation"
            );

            if self.config.training.persist_on_train {
                if let Some(store) = &self.store {
                    store.save(&generation)?;
                }
            }
            Ok(generation)
        })
    }

    /// Recommendations from the live generation.
    ///
    /// `num_items` falls back to the configured default when absent.
    pub fn recommend(&self, user_id: &str, num_items: Option<usize>) -> Result<Vec<String>> {
        let num_items = num_items.unwrap_or(self.config.server.default_num_recommendations);
        let generation = self.coordinator.current();
        Recommender::recommend(generation.as_deref(), user_id, num_items)
    }

    pub fn current(&self) -> Option<Arc<ModelGeneration>> {
        self.coordinator.current()
    }

    pub fn phase(&self) -> TrainingPhase {
        self.coordinator.phase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::ManualClock;
    use crate::error::RecommenderError;
    use crate::matrix_factorization::FactorizationConfig;
    use chrono::Utc;

    fn small_config() -> RecommenderConfig {
        RecommenderConfig {
            model: FactorizationConfig {
                no_components: 4,
                epochs: 5,
                ..FactorizationConfig::default()
            },
            ..RecommenderConfig::default()
        }
    }

    fn training_data() -> (Vec<RawInteraction>, Vec<ItemMetadata>) {
        (
            vec![
                RawInteraction::new("u1", "i1", 5.0),
                RawInteraction::new("u2", "i2", 3.0),
            ],
            vec![ItemMetadata::new("i1"), ItemMetadata::new("i2")],
        )
    }

    #[test]
    fn test_recommend_before_training() {
        let service = RecommenderService::new(small_config()).without_persistence();
        assert!(matches!(
            service.recommend("u1", None),
            Err(RecommenderError::ModelNotTrained)
        ));
        assert!(service.restore().unwrap().is_none());
    }

    #[test]
    fn test_train_then_cooldown() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = RecommenderService::with_clock(small_config(), clock.clone())
            .without_persistence();
        let (interactions, items) = training_data();

        let generation = service.train(&interactions, &items).unwrap();
        assert_eq!(service.current().unwrap().id, generation.id);
        assert_eq!(service.phase(), TrainingPhase::Cooldown);
        assert!(matches!(
            service.train(&interactions, &items),
            Err(RecommenderError::CooldownActive { remaining_seconds: 120 })
        ));

        clock.advance(chrono::Duration::seconds(121));
        assert_eq!(service.phase(), TrainingPhase::Idle);
        assert!(service.train(&interactions, &items).is_ok());
    }

    #[test]
    fn test_default_num_recommendations() {
        let mut config = small_config();
        config.server.default_num_recommendations = 1;
        let service = RecommenderService::new(config).without_persistence();
        let (interactions, items) = training_data();
        service.train(&interactions, &items).unwrap();

        assert_eq!(service.recommend("u1", None).unwrap().len(), 1);
        assert_eq!(service.recommend("u1", Some(5)).unwrap().len(), 2);
    }
}
