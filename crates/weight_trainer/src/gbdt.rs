//! Gradient Boosted Decision Tree (GBDT) booster
//!
//! Deterministic least-squares boosting with leaf-wise CART trees and early
//! stopping on validation RMSE. Output is LightGBM v3 model text truncated at
//! the best iteration.

use smartweight_core::{FeatureOrder, Result, TrainedModel, WeightError};
use std::time::Duration;
use tracing::{debug, info};

use crate::booster::{check_inputs, Booster, Deadline};
use crate::cart::{CartBuilder, RegressionTree, TreeConfig};
use crate::dataset::Dataset;
use crate::model_text::ModelText;

/// GBDT training configuration
#[derive(Clone, Debug)]
pub struct GbdtConfig {
    pub num_rounds: usize,
    pub learning_rate: f64,
    pub early_stopping_rounds: usize,
    pub tree: TreeConfig,
    pub timeout: Option<Duration>,
}

impl Default for GbdtConfig {
    fn default() -> Self {
        Self {
            num_rounds: 1000,
            learning_rate: 0.03,
            early_stopping_rounds: 100,
            tree: TreeConfig::default(),
            timeout: None,
        }
    }
}

/// Built-in booster
pub struct GbdtBooster {
    config: GbdtConfig,
}

/// Trees and bookkeeping from one boosting run
#[derive(Debug, Clone)]
pub struct BoostedEnsemble {
    /// Tree 0 carries the initial score
    pub trees: Vec<RegressionTree>,
    pub best_iteration: usize,
    pub total_iterations: usize,
    pub best_rmse: f64,
}

impl BoostedEnsemble {
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.trees.iter().map(|t| t.predict(features)).sum()
    }
}

impl GbdtBooster {
    pub fn new(config: GbdtConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GbdtConfig {
        &self.config
    }

    /// Run boosting rounds until `num_rounds`, early stopping or the deadline
    pub fn fit(&self, train: &Dataset, valid: &Dataset) -> Result<BoostedEnsemble> {
        let deadline = Deadline::start(self.config.timeout);
        let bias = calculate_bias(&train.targets);
        let patience = self.config.early_stopping_rounds;

        let mut train_pred = vec![bias; train.len()];
        let mut valid_pred = vec![bias; valid.len()];
        let mut trees: Vec<RegressionTree> = Vec::new();
        let mut best_iteration = 0usize;
        let mut best_rmse = f64::INFINITY;

        for round in 0..self.config.num_rounds {
            deadline.check()?;

            let gradients: Vec<f64> = train_pred
                .iter()
                .zip(&train.targets)
                .map(|(p, t)| p - t)
                .collect();
            let hessians = vec![1.0; train.len()];

            let mut tree =
                CartBuilder::new(&train.features, &gradients, &hessians, &self.config.tree).build();
            tree.shrink(self.config.learning_rate);

            for (pred, row) in train_pred.iter_mut().zip(&train.features) {
                *pred += tree.predict(row);
            }
            for (pred, row) in valid_pred.iter_mut().zip(&valid.features) {
                *pred += tree.predict(row);
            }
            trees.push(tree);

            let rmse = calculate_rmse(&valid_pred, &valid.targets);
            if !rmse.is_finite() {
                return Err(WeightError::TrainingFailure(format!(
                    "validation rmse diverged at round {}",
                    round + 1
                )));
            }
            debug!("[{}] valid rmse: {}", round + 1, rmse);

            if rmse < best_rmse {
                best_rmse = rmse;
                best_iteration = round + 1;
            } else if patience > 0 && round + 1 - best_iteration >= patience {
                info!(
                    "Early stopping at round {}, best iteration is {} (rmse {})",
                    round + 1,
                    best_iteration,
                    best_rmse
                );
                break;
            }
        }

        let total_iterations = trees.len();
        if best_iteration == 0 {
            return Err(WeightError::TrainingFailure("no boosting rounds were run".into()));
        }

        trees.truncate(best_iteration);
        if let Some(first) = trees.first_mut() {
            first.add_bias(bias);
        }

        Ok(BoostedEnsemble {
            trees,
            best_iteration,
            total_iterations,
            best_rmse,
        })
    }

    fn parameters(&self) -> Vec<(&'static str, String)> {
        let tree = &self.config.tree;
        vec![
            ("boosting", "gbdt".to_string()),
            ("objective", "regression".to_string()),
            ("metric", "rmse".to_string()),
            ("num_iterations", self.config.num_rounds.to_string()),
            ("learning_rate", self.config.learning_rate.to_string()),
            ("num_leaves", tree.num_leaves.to_string()),
            (
                "max_depth",
                tree.max_depth.map_or("-1".to_string(), |d| d.to_string()),
            ),
            ("min_data_in_leaf", tree.min_data_in_leaf.to_string()),
            ("lambda_l2", tree.lambda_l2.to_string()),
            ("early_stopping_round", self.config.early_stopping_rounds.to_string()),
            ("boost_from_average", "1".to_string()),
        ]
    }
}

impl Booster for GbdtBooster {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn train(&self, train: &Dataset, valid: &Dataset, order: &FeatureOrder) -> Result<TrainedModel> {
        check_inputs(train, valid, order)?;

        info!(
            "Boosting up to {} rounds (learning rate {}, patience {})",
            self.config.num_rounds, self.config.learning_rate, self.config.early_stopping_rounds
        );
        let ensemble = self.fit(train, valid)?;
        info!(
            "Best iteration {} of {} (valid rmse {})",
            ensemble.best_iteration, ensemble.total_iterations, ensemble.best_rmse
        );

        let ranges = train.feature_stats();
        let parameters = self.parameters();
        let text = ModelText {
            feature_names: order.names(),
            feature_ranges: &ranges,
            trees: &ensemble.trees,
            shrinkage: self.config.learning_rate,
            parameters: &parameters,
        }
        .render();

        Ok(TrainedModel::new(
            text,
            ensemble.best_iteration,
            ensemble.total_iterations,
        ))
    }
}

/// Calculate initial score (mean of targets)
fn calculate_bias(targets: &[f64]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    targets.iter().sum::<f64>() / targets.len() as f64
}

fn calculate_rmse(predictions: &[f64], targets: &[f64]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let sse: f64 = predictions
        .iter()
        .zip(targets)
        .map(|(p, t)| (p - t) * (p - t))
        .sum();
    (sse / targets.len() as f64).sqrt()
}
