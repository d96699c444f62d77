//! Hybrid Matrix Factorization
//!
//! Latent-factor model over users and item feature columns. An item is
//! represented by the weighted sum of the embeddings of its feature columns
//! (its identity column plus its metadata tokens), so items sharing tokens
//! share signal. Trained with seeded SGD for reproducible generations.

use crate::error::{RecommenderError, Result};
use crate::interactions::{InteractionMatrix, ItemFeatureMatrix};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::str::FromStr;

/// Attempts at drawing a negative item the user has not interacted with
const NEGATIVE_SAMPLE_ATTEMPTS: usize = 10;

/// Contract of a trainable latent-factor model
pub trait LatentFactorModel: Send + Sync {
    /// Fit from scratch on the given structures
    fn fit(
        &mut self,
        interactions: &InteractionMatrix,
        item_features: &ItemFeatureMatrix,
        epochs: usize,
    ) -> Result<()>;

    /// Score every item row of `item_features` for one user
    fn predict_scores(
        &self,
        user_idx: usize,
        item_features: &ItemFeatureMatrix,
    ) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Loss {
    /// Pointwise cross-entropy against the confidence weight as a soft label
    #[default]
    Logistic,
    /// Pairwise ranking of observed items over sampled unobserved ones
    Bpr,
}

impl FromStr for Loss {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "logistic" => Ok(Loss::Logistic),
            "bpr" => Ok(Loss::Bpr),
            other => Err(format!(
                "unsupported loss '{}', expected logistic or bpr",
                other
            )),
        }
    }
}

impl fmt::Display for Loss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Loss::Logistic => write!(f, "logistic"),
            Loss::Bpr => write!(f, "bpr"),
        }
    }
}

/// Factorization hyper-parameters
#[derive(Debug, Clone, PartialEq)]
pub struct FactorizationConfig {
    pub loss: Loss,
    /// Number of latent factors (embedding dimension)
    pub no_components: usize,
    pub learning_rate: f32,
    /// Number of passes over the interactions
    pub epochs: usize,
    /// L2 penalty applied to embeddings
    pub regularization: f32,
    /// Seed for initialization and sample order
    pub seed: u64,
}

impl Default for FactorizationConfig {
    fn default() -> Self {
        Self {
            loss: Loss::Logistic,
            no_components: 64,
            learning_rate: 0.05,
            epochs: 20,
            regularization: 0.0,
            seed: 42,
        }
    }
}

/// Trained parameters
#[derive(Debug, Clone, PartialEq)]
pub struct FactorWeights {
    /// [num_users x no_components]
    pub user_factors: Array2<f32>,
    pub user_biases: Array1<f32>,
    /// [num_feature_columns x no_components]
    pub feature_factors: Array2<f32>,
    pub feature_biases: Array1<f32>,
}

impl FactorWeights {
    fn initialize(num_users: usize, num_features: usize, k: usize, rng: &mut StdRng) -> Self {
        let scale = 1.0 / k as f32;
        let mut init = |rows: usize| {
            Array2::from_shape_fn((rows, k), |_| (rng.gen::<f32>() - 0.5) * scale)
        };
        let user_factors = init(num_users);
        let feature_factors = init(num_features);

        Self {
            user_factors,
            user_biases: Array1::zeros(num_users),
            feature_factors,
            feature_biases: Array1::zeros(num_features),
        }
    }

    pub fn num_users(&self) -> usize {
        self.user_factors.nrows()
    }

    pub fn num_features(&self) -> usize {
        self.feature_factors.nrows()
    }

    pub fn no_components(&self) -> usize {
        self.user_factors.ncols()
    }

    /// Embedding and bias of an item from its feature row
    fn item_representation(&self, row: &[(usize, f32)]) -> (Array1<f32>, f32) {
        let mut repr = Array1::<f32>::zeros(self.no_components());
        let mut bias = 0.0;
        for &(col, weight) in row {
            repr.scaled_add(weight, &self.feature_factors.row(col));
            bias += weight * self.feature_biases[col];
        }
        (repr, bias)
    }

    fn score(&self, user_idx: usize, item_repr: &Array1<f32>, item_bias: f32) -> f32 {
        self.user_factors.row(user_idx).dot(item_repr) + self.user_biases[user_idx] + item_bias
    }

    /// Apply `d(loss)/d(score) = grad` for one item row
    fn update_item(
        &mut self,
        row: &[(usize, f32)],
        user_vec: &Array1<f32>,
        grad: f32,
        lr: f32,
        reg: f32,
    ) {
        for &(col, weight) in row {
            let mut factors = self.feature_factors.row_mut(col);
            factors *= 1.0 - lr * reg;
            factors.scaled_add(-lr * grad * weight, user_vec);
            self.feature_biases[col] -= lr * grad * weight;
        }
    }

    fn update_user(
        &mut self,
        user_idx: usize,
        direction: &Array1<f32>,
        grad: f32,
        lr: f32,
        reg: f32,
    ) {
        let mut factors = self.user_factors.row_mut(user_idx);
        factors *= 1.0 - lr * reg;
        factors.scaled_add(-lr * grad, direction);
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// LightFM-style hybrid factorization model
#[derive(Debug, Clone)]
pub struct HybridFactorization {
    config: FactorizationConfig,
    weights: Option<FactorWeights>,
}

impl HybridFactorization {
    pub fn new(config: FactorizationConfig) -> Self {
        Self {
            config,
            weights: None,
        }
    }

    /// Rebuild a trained model from stored parameters
    pub fn from_weights(config: FactorizationConfig, weights: FactorWeights) -> Self {
        Self {
            config,
            weights: Some(weights),
        }
    }

    pub fn config(&self) -> &FactorizationConfig {
        &self.config
    }

    pub fn weights(&self) -> Option<&FactorWeights> {
        self.weights.as_ref()
    }

    /// Predict the score of one user-item pair
    pub fn predict(
        &self,
        user_idx: usize,
        item_idx: usize,
        item_features: &ItemFeatureMatrix,
    ) -> Result<f32> {
        let weights = self.trained_weights(item_features)?;
        if user_idx >= weights.num_users() {
            return Err(RecommenderError::IndexOutOfRange(user_idx));
        }
        if item_idx >= item_features.num_items() {
            return Err(RecommenderError::IndexOutOfRange(item_idx));
        }
        let (repr, bias) = weights.item_representation(item_features.row(item_idx));
        Ok(weights.score(user_idx, &repr, bias))
    }

    fn trained_weights(&self, item_features: &ItemFeatureMatrix) -> Result<&FactorWeights> {
        let weights = self.weights.as_ref().ok_or(RecommenderError::ModelNotTrained)?;
        if item_features.num_features() != weights.num_features() {
            return Err(RecommenderError::Validation(format!(
                "item feature width {} does not match the model's {} feature rows",
                item_features.num_features(),
                weights.num_features()
            )));
        }
        Ok(weights)
    }

    fn logistic_step(
        weights: &mut FactorWeights,
        user_idx: usize,
        row: &[(usize, f32)],
        target: f32,
        lr: f32,
        reg: f32,
    ) -> f32 {
        let (repr, bias) = weights.item_representation(row);
        let prediction = sigmoid(weights.score(user_idx, &repr, bias));
        let grad = prediction - target;
        let user_vec = weights.user_factors.row(user_idx).to_owned();

        weights.update_item(row, &user_vec, grad, lr, reg);
        weights.update_user(user_idx, &repr, grad, lr, reg);
        weights.user_biases[user_idx] -= lr * grad;

        let p = prediction.clamp(1e-7, 1.0 - 1e-7);
        -(target * p.ln() + (1.0 - target) * (1.0 - p).ln())
    }

    fn bpr_step(
        weights: &mut FactorWeights,
        user_idx: usize,
        positive: &[(usize, f32)],
        negative: &[(usize, f32)],
        confidence: f32,
        lr: f32,
        reg: f32,
    ) -> f32 {
        let (pos_repr, pos_bias) = weights.item_representation(positive);
        let (neg_repr, neg_bias) = weights.item_representation(negative);
        let user_vec = weights.user_factors.row(user_idx).to_owned();
        let diff = user_vec.dot(&pos_repr) + pos_bias - user_vec.dot(&neg_repr) - neg_bias;

        // d/d(diff) of -confidence * ln(sigmoid(diff))
        let grad = -confidence * (1.0 - sigmoid(diff));
        weights.update_item(positive, &user_vec, grad, lr, reg);
        weights.update_item(negative, &user_vec, -grad, lr, reg);
        weights.update_user(user_idx, &(&pos_repr - &neg_repr), grad, lr, reg);

        -confidence * sigmoid(diff).max(1e-7).ln()
    }

    fn sample_negative(rng: &mut StdRng, num_items: usize, seen: &[usize]) -> Option<usize> {
        if seen.len() >= num_items {
            return None;
        }
        (0..NEGATIVE_SAMPLE_ATTEMPTS)
            .map(|_| rng.gen_range(0..num_items))
            .find(|candidate| seen.binary_search(candidate).is_err())
    }
}

impl LatentFactorModel for HybridFactorization {
    fn fit(
        &mut self,
        interactions: &InteractionMatrix,
        item_features: &ItemFeatureMatrix,
        epochs: usize,
    ) -> Result<()> {
        if interactions.is_empty() {
            return Err(RecommenderError::EmptyTrainingSet(
                "interaction matrix has no entries".to_string(),
            ));
        }
        if interactions.num_items > item_features.num_items() {
            return Err(RecommenderError::Validation(format!(
                "interactions reference {} items but the feature matrix has {} rows",
                interactions.num_items,
                item_features.num_items()
            )));
        }

        let k = self.config.no_components;
        let lr = self.config.learning_rate;
        let reg = self.config.regularization;
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut weights = FactorWeights::initialize(
            interactions.num_users,
            item_features.num_features(),
            k,
            &mut rng,
        );

        let seen = interactions.items_by_user();
        let num_items = item_features.num_items();
        let mut order: Vec<usize> = (0..interactions.len()).collect();

        for epoch in 0..epochs {
            order.shuffle(&mut rng);
            let mut loss = 0.0;
            let mut steps = 0usize;

            for &idx in &order {
                let (user_idx, item_idx, confidence) = interactions.entries[idx];
                let row = item_features.row(item_idx);

                let step_loss = match self.config.loss {
                    Loss::Logistic => {
                        Self::logistic_step(&mut weights, user_idx, row, confidence, lr, reg)
                    }
                    Loss::Bpr => {
                        let Some(negative) =
                            Self::sample_negative(&mut rng, num_items, &seen[user_idx])
                        else {
                            continue;
                        };
                        Self::bpr_step(
                            &mut weights,
                            user_idx,
                            row,
                            item_features.row(negative),
                            confidence,
                            lr,
                            reg,
                        )
                    }
                };

                if !step_loss.is_finite() {
                    return Err(RecommenderError::Internal(format!(
                        "training diverged in epoch {}",
                        epoch + 1
                    )));
                }
                loss += step_loss;
                steps += 1;
            }

            let mean_loss = if steps > 0 { loss / steps as f32 } else { 0.0 };
            tracing::debug!("Completed epoch {}: loss = {:.4}", epoch + 1, mean_loss);
        }

        self.weights = Some(weights);
        Ok(())
    }

    fn predict_scores(
        &self,
        user_idx: usize,
        item_features: &ItemFeatureMatrix,
    ) -> Result<Vec<f32>> {
        let weights = self.trained_weights(item_features)?;
        if user_idx >= weights.num_users() {
            return Err(RecommenderError::IndexOutOfRange(user_idx));
        }

        Ok(item_features
            .rows()
            .iter()
            .map(|row| {
                let (repr, bias) = weights.item_representation(row);
                weights.score(user_idx, &repr, bias)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_features(num_items: usize) -> ItemFeatureMatrix {
        let rows = (0..num_items).map(|i| vec![(i, 1.0)]).collect();
        ItemFeatureMatrix::from_rows(rows, num_items).unwrap()
    }

    fn small_config(loss: Loss) -> FactorizationConfig {
        FactorizationConfig {
            loss,
            no_components: 8,
            learning_rate: 0.1,
            epochs: 30,
            regularization: 0.0,
            seed: 7,
        }
    }

    #[test]
    fn test_fit_shapes() {
        let mut matrix = InteractionMatrix::new(2, 3);
        matrix.insert(0, 0, 0.7);
        matrix.insert(1, 2, 0.3);
        let features = identity_features(3);

        let mut model = HybridFactorization::new(small_config(Loss::Logistic));
        model.fit(&matrix, &features, 5).unwrap();

        let weights = model.weights().unwrap();
        assert_eq!(weights.user_factors.dim(), (2, 8));
        assert_eq!(weights.feature_factors.dim(), (3, 8));
        assert_eq!(model.predict_scores(0, &features).unwrap().len(), 3);
    }

    #[test]
    fn test_logistic_follows_confidence() {
        let mut matrix = InteractionMatrix::new(1, 2);
        matrix.insert(0, 0, 0.73);
        matrix.insert(0, 1, 0.27);
        let features = identity_features(2);

        let mut model = HybridFactorization::new(small_config(Loss::Logistic));
        model.fit(&matrix, &features, 30).unwrap();

        let scores = model.predict_scores(0, &features).unwrap();
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_bpr_prefers_observed_items() {
        let mut matrix = InteractionMatrix::new(1, 4);
        matrix.insert(0, 0, 0.9);
        let features = identity_features(4);

        let mut model = HybridFactorization::new(small_config(Loss::Bpr));
        model.fit(&matrix, &features, 50).unwrap();

        let scores = model.predict_scores(0, &features).unwrap();
        for other in 1..4 {
            assert!(scores[0] > scores[other]);
        }
    }

    #[test]
    fn test_fit_is_reproducible() {
        let mut matrix = InteractionMatrix::new(2, 2);
        matrix.insert(0, 0, 0.7);
        matrix.insert(1, 1, 0.5);
        matrix.insert(1, 0, 0.3);
        let features = identity_features(2);

        let mut a = HybridFactorization::new(small_config(Loss::Logistic));
        let mut b = HybridFactorization::new(small_config(Loss::Logistic));
        a.fit(&matrix, &features, 10).unwrap();
        b.fit(&matrix, &features, 10).unwrap();

        assert_eq!(a.weights(), b.weights());
    }

    #[test]
    fn test_untrained_and_out_of_range() {
        let features = identity_features(2);
        let model = HybridFactorization::new(FactorizationConfig::default());
        assert!(matches!(
            model.predict_scores(0, &features),
            Err(RecommenderError::ModelNotTrained)
        ));

        let mut matrix = InteractionMatrix::new(1, 2);
        matrix.insert(0, 1, 0.5);
        let mut model = HybridFactorization::new(small_config(Loss::Logistic));
        model.fit(&matrix, &features, 1).unwrap();
        assert!(matches!(
            model.predict_scores(3, &features),
            Err(RecommenderError::IndexOutOfRange(3))
        ));
        assert!(matches!(
            model.predict_scores(0, &identity_features(5)),
            Err(RecommenderError::Validation(_))
        ));
    }

    #[test]
    fn test_predict_matches_predict_scores() {
        let mut matrix = InteractionMatrix::new(1, 3);
        matrix.insert(0, 1, 0.6);
        let features = identity_features(3);
        let mut model = HybridFactorization::new(small_config(Loss::Logistic));
        model.fit(&matrix, &features, 3).unwrap();

        let scores = model.predict_scores(0, &features).unwrap();
        for (item, score) in scores.iter().enumerate() {
            let single = model.predict(0, item, &features).unwrap();
            assert!((single - score).abs() < 1e-6);
        }
    }

    #[test]
    fn test_loss_parse() {
        assert_eq!("logistic".parse::<Loss>().unwrap(), Loss::Logistic);
        assert_eq!("BPR".parse::<Loss>().unwrap(), Loss::Bpr);
        assert!("warp".parse::<Loss>().is_err());
    }

    #[test]
    fn test_empty_interactions_rejected() {
        let mut model = HybridFactorization::new(FactorizationConfig::default());
        let result = model.fit(&InteractionMatrix::default(), &identity_features(1), 1);
        assert!(matches!(result, Err(RecommenderError::EmptyTrainingSet(_))));
    }
}
