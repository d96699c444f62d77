//! Media Gateway Recommender
//!
//! Personalized item recommendations from explicit ratings and item
//! metadata. Ratings become confidence weights, item metadata becomes
//! sparse feature tokens, and a hybrid latent-factor model is trained over
//! both. Trained state lives in immutable generations that are swapped in
//! atomically, persisted to disk and restored on startup.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod features;
pub mod generation;
pub mod handlers;
pub mod interactions;
pub mod matrix_factorization;
pub mod persistence;
pub mod rating;
pub mod recommendation;
pub mod registry;
pub mod service;

// Re-export key types
pub use config::{RecommenderConfig, ServerConfig, StorageConfig, TrainingConfig};
pub use coordinator::{Clock, SystemClock, TrainingCoordinator, TrainingPhase};
pub use error::{RecommenderError, Result};
pub use features::{FeatureBuilder, FeatureToken, ItemFeatureSet, ItemMetadata, PopularityBand};
pub use generation::ModelGeneration;
pub use interactions::{
    DuplicatePolicy, InteractionMatrix, InteractionMatrixBuilder, ItemFeatureMatrix,
    RawInteraction, TrainingSet,
};
pub use matrix_factorization::{
    FactorWeights, FactorizationConfig, HybridFactorization, LatentFactorModel, Loss,
};
pub use persistence::{Artifact, PersistenceStore};
pub use rating::confidence_weight;
pub use recommendation::{Recommender, ScoredItem, DEFAULT_NUM_RECOMMENDATIONS};
pub use registry::{DatasetMapping, IdentifierRegistry};
pub use service::RecommenderService;

// Deterministic clock for exercising cooldowns in tests
pub use coordinator::ManualClock;
