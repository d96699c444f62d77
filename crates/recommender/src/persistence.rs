//! Generation Persistence
//!
//! Stores one model generation as three independent artifacts:
//! - model weights (factor matrices, biases and hyper-parameters)
//! - dataset mapping (user/item registries and feature vocabulary)
//! - item-feature matrix
//!
//! Each artifact is a bincode envelope whose header carries a format tag, a
//! schema version and the generation id. Loading validates every header and
//! cross-checks the three artifacts before anything is returned, so a torn or
//! mixed set of files is reported as `CorruptPersistedState`.

use crate::config::StorageConfig;
use crate::error::{RecommenderError, Result};
use crate::generation::ModelGeneration;
use crate::interactions::ItemFeatureMatrix;
use crate::matrix_factorization::{FactorWeights, FactorizationConfig, HybridFactorization, Loss};
use crate::registry::{DatasetMapping, IdentifierRegistry};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;

const SCHEMA_VERSION: u32 = 1;
const MODEL_FORMAT: &str = "recommender/model-weights";
const DATASET_FORMAT: &str = "recommender/dataset-mapping";
const ITEM_FEATURES_FORMAT: &str = "recommender/item-features";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ArtifactHeader {
    format: String,
    version: u32,
    generation_id: Uuid,
    trained_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    header: ArtifactHeader,
    body: T,
}

/// Serializable representation of the trained factor model
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializableModel {
    loss: String,
    no_components: usize,
    learning_rate: f32,
    epochs: usize,
    regularization: f32,
    seed: u64,
    user_factors_shape: (usize, usize),
    user_factors: Vec<f32>,
    user_biases: Vec<f32>,
    feature_factors_shape: (usize, usize),
    feature_factors: Vec<f32>,
    feature_biases: Vec<f32>,
}

impl SerializableModel {
    fn from_model(model: &HybridFactorization) -> Result<Self> {
        let weights = model.weights().ok_or(RecommenderError::ModelNotTrained)?;
        let config = model.config();

        Ok(Self {
            loss: config.loss.to_string(),
            no_components: config.no_components,
            learning_rate: config.learning_rate,
            epochs: config.epochs,
            regularization: config.regularization,
            seed: config.seed,
            user_factors_shape: weights.user_factors.dim(),
            user_factors: weights.user_factors.iter().copied().collect(),
            user_biases: weights.user_biases.to_vec(),
            feature_factors_shape: weights.feature_factors.dim(),
            feature_factors: weights.feature_factors.iter().copied().collect(),
            feature_biases: weights.feature_biases.to_vec(),
        })
    }

    fn to_model(&self) -> std::result::Result<HybridFactorization, String> {
        let loss: Loss = self.loss.parse()?;
        let config = FactorizationConfig {
            loss,
            no_components: self.no_components,
            learning_rate: self.learning_rate,
            epochs: self.epochs,
            regularization: self.regularization,
            seed: self.seed,
        };

        let user_factors = Array2::from_shape_vec(self.user_factors_shape, self.user_factors.clone())
            .map_err(|e| format!("user factors: {}", e))?;
        let feature_factors =
            Array2::from_shape_vec(self.feature_factors_shape, self.feature_factors.clone())
                .map_err(|e| format!("feature factors: {}", e))?;

        if self.user_biases.len() != user_factors.nrows() {
            return Err(format!(
                "{} user biases for {} user rows",
                self.user_biases.len(),
                user_factors.nrows()
            ));
        }
        if self.feature_biases.len() != feature_factors.nrows() {
            return Err(format!(
                "{} feature biases for {} feature rows",
                self.feature_biases.len(),
                feature_factors.nrows()
            ));
        }
        if user_factors.ncols() != self.no_components || feature_factors.ncols() != self.no_components
        {
            return Err(format!(
                "factor width does not match {} components",
                self.no_components
            ));
        }

        let weights = FactorWeights {
            user_factors,
            user_biases: Array1::from(self.user_biases.clone()),
            feature_factors,
            feature_biases: Array1::from(self.feature_biases.clone()),
        };
        Ok(HybridFactorization::from_weights(config, weights))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializableDataset {
    users: Vec<String>,
    items: Vec<String>,
    features: Vec<String>,
}

impl SerializableDataset {
    fn from_mapping(mapping: &DatasetMapping) -> Self {
        Self {
            users: mapping.users.ids().to_vec(),
            items: mapping.items.ids().to_vec(),
            features: mapping.features.ids().to_vec(),
        }
    }

    fn to_mapping(&self) -> Result<DatasetMapping> {
        Ok(DatasetMapping {
            users: IdentifierRegistry::from_ordered(self.users.iter().cloned())?,
            items: IdentifierRegistry::from_ordered(self.items.iter().cloned())?,
            features: IdentifierRegistry::from_ordered(self.features.iter().cloned())?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializableItemFeatures {
    num_features: usize,
    rows: Vec<Vec<(usize, f32)>>,
}

/// Which of the three artifacts a path or error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Model,
    Dataset,
    ItemFeatures,
}

impl Artifact {
    fn name(&self) -> &'static str {
        match self {
            Artifact::Model => "model weights",
            Artifact::Dataset => "dataset mapping",
            Artifact::ItemFeatures => "item features",
        }
    }

    fn format(&self) -> &'static str {
        match self {
            Artifact::Model => MODEL_FORMAT,
            Artifact::Dataset => DATASET_FORMAT,
            Artifact::ItemFeatures => ITEM_FEATURES_FORMAT,
        }
    }
}

/// File-backed store for one generation
#[derive(Debug, Clone)]
pub struct PersistenceStore {
    storage: StorageConfig,
}

impl PersistenceStore {
    pub fn new(storage: StorageConfig) -> Self {
        Self { storage }
    }

    pub fn path(&self, artifact: Artifact) -> &Path {
        match artifact {
            Artifact::Model => &self.storage.model_file,
            Artifact::Dataset => &self.storage.dataset_file,
            Artifact::ItemFeatures => &self.storage.item_features_file,
        }
    }

    /// Write all three artifacts of `generation`.
    ///
    /// Every artifact is first written to a temporary sibling. Only once all
    /// three are staged are they renamed into place; a failed write removes
    /// the staged files and leaves the previously saved generation intact.
    pub fn save(&self, generation: &ModelGeneration) -> Result<()> {
        let start = Instant::now();
        let header = |artifact: Artifact| ArtifactHeader {
            format: artifact.format().to_string(),
            version: SCHEMA_VERSION,
            generation_id: generation.id,
            trained_at: generation.trained_at,
        };

        let model = SerializableModel::from_model(&generation.model)?;
        let dataset = SerializableDataset::from_mapping(&generation.mapping);
        let item_features = SerializableItemFeatures {
            num_features: generation.item_features.num_features(),
            rows: generation.item_features.rows().to_vec(),
        };

        let encoded = [
            (Artifact::Model, encode(header(Artifact::Model), model)?),
            (Artifact::Dataset, encode(header(Artifact::Dataset), dataset)?),
            (
                Artifact::ItemFeatures,
                encode(header(Artifact::ItemFeatures), item_features)?,
            ),
        ];

        let mut staged = Vec::with_capacity(encoded.len());
        for (artifact, bytes) in &encoded {
            match self.stage_artifact(*artifact, bytes) {
                Ok(tmp) => staged.push((*artifact, tmp)),
                Err(e) => {
                    tracing::error!(
                        artifact = artifact.name(),
                        "Failed to stage artifact, keeping previous generation: {}",
                        e
                    );
                    discard_staged(&staged);
                    return Err(e);
                }
            }
        }

        for (artifact, tmp) in &staged {
            fs::rename(tmp, self.path(*artifact))?;
        }

        tracing::info!(
            generation_id = %generation.id,
            bytes = encoded.iter().map(|(_, bytes)| bytes.len()).sum::<usize>(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Saved model generation"
        );
        Ok(())
    }

    /// Restore a generation from the three artifacts
    pub fn load(&self) -> Result<ModelGeneration> {
        let start = Instant::now();

        let model: Envelope<SerializableModel> = self.read_artifact(Artifact::Model)?;
        let dataset: Envelope<SerializableDataset> = self.read_artifact(Artifact::Dataset)?;
        let features: Envelope<SerializableItemFeatures> =
            self.read_artifact(Artifact::ItemFeatures)?;

        for (artifact, header) in [
            (Artifact::Dataset, &dataset.header),
            (Artifact::ItemFeatures, &features.header),
        ] {
            if header.generation_id != model.header.generation_id {
                return Err(RecommenderError::corrupt(
                    artifact.name(),
                    format!(
                        "belongs to generation {} but the model weights belong to {}",
                        header.generation_id, model.header.generation_id
                    ),
                ));
            }
        }

        let mapping = dataset
            .body
            .to_mapping()
            .map_err(|e| RecommenderError::corrupt(Artifact::Dataset.name(), e.to_string()))?;
        let item_features =
            ItemFeatureMatrix::from_rows(features.body.rows, features.body.num_features)
                .map_err(|e| {
                    RecommenderError::corrupt(Artifact::ItemFeatures.name(), e.to_string())
                })?;
        let factor_model = model
            .body
            .to_model()
            .map_err(|e| RecommenderError::corrupt(Artifact::Model.name(), e))?;

        let generation = ModelGeneration {
            id: model.header.generation_id,
            trained_at: model.header.trained_at,
            mapping,
            item_features,
            model: factor_model,
        };
        generation
            .validate()
            .map_err(|e| RecommenderError::corrupt("generation", e.to_string()))?;

        tracing::info!(
            generation_id = %generation.id,
            users = generation.num_users(),
            items = generation.num_items(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded model generation"
        );
        Ok(generation)
    }

    /// `None` when no artifact exists at all; otherwise behaves like [`load`](Self::load)
    pub fn load_if_present(&self) -> Result<Option<ModelGeneration>> {
        let any_present = [Artifact::Model, Artifact::Dataset, Artifact::ItemFeatures]
            .iter()
            .any(|a| self.path(*a).exists());
        if !any_present {
            return Ok(None);
        }
        self.load().map(Some)
    }

    fn stage_artifact(&self, artifact: Artifact, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path(artifact);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = temp_path(path);
        if let Err(e) = fs::write(&tmp, bytes) {
            // The failed write may still have created the file
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        tracing::debug!(
            artifact = artifact.name(),
            path = %tmp.display(),
            bytes = bytes.len(),
            "Staged artifact"
        );
        Ok(tmp)
    }

    fn read_artifact<T: DeserializeOwned>(&self, artifact: Artifact) -> Result<Envelope<T>> {
        let path = self.path(artifact);
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RecommenderError::corrupt(
                    artifact.name(),
                    format!("missing at {}", path.display()),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let header: ArtifactHeader = bincode::deserialize(&bytes).map_err(|e| {
            RecommenderError::corrupt(artifact.name(), format!("unreadable header: {}", e))
        })?;
        if header.format != artifact.format() {
            return Err(RecommenderError::corrupt(
                artifact.name(),
                format!(
                    "expected format '{}', found '{}'",
                    artifact.format(),
                    header.format
                ),
            ));
        }
        if header.version != SCHEMA_VERSION {
            return Err(RecommenderError::corrupt(
                artifact.name(),
                format!(
                    "unsupported schema version {} (expected {})",
                    header.version, SCHEMA_VERSION
                ),
            ));
        }

        bincode::deserialize(&bytes)
            .map_err(|e| RecommenderError::corrupt(artifact.name(), format!("undecodable: {}", e)))
    }
}

fn encode<T: Serialize>(header: ArtifactHeader, body: T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(&Envelope { header, body })?)
}

fn discard_staged(staged: &[(Artifact, PathBuf)]) {
    for (artifact, tmp) in staged {
        if let Err(e) = fs::remove_file(tmp) {
            tracing::warn!(
                artifact = artifact.name(),
                path = %tmp.display(),
                "Failed to remove staged artifact: {}",
                e
            );
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
