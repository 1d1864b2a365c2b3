//! End-to-end training run
//!
//! Resolve order → load data → fit scalers → boost → write artifact. Stages
//! run strictly in sequence and any failure aborts before the artifact path
//! is touched.

use smartweight_core::{
    ArtifactMetadata, ArtifactReceipt, ArtifactWriter, FeatureOrder, FeatureOrderResolver,
    OrderSource, Result, ScalerFitter,
};
use tracing::{debug, info, warn};

use crate::booster::{BackendKind, Booster};
use crate::config::{FitScope, TrainerConfig, TrainingConfig};
use crate::dataset::Dataset;
use crate::gbdt::GbdtBooster;
use crate::lightgbm::LightGbmCliBooster;

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub order_source: OrderSource,
    pub feature_count: usize,
    pub rows: usize,
    pub train_rows: usize,
    pub valid_rows: usize,
    pub backend: &'static str,
    pub best_iteration: usize,
    pub total_iterations: usize,
    pub receipt: ArtifactReceipt,
}

/// Backend selected by the training section
pub fn build_booster(training: &TrainingConfig) -> Box<dyn Booster> {
    match training.backend {
        BackendKind::Builtin => Box::new(GbdtBooster::new(training.gbdt_config())),
        BackendKind::LightgbmCli => Box::new(LightGbmCliBooster::new(
            training.gbdt_config(),
            training.lightgbm_path.clone(),
        )),
    }
}

/// Training pipeline
pub struct Pipeline {
    config: TrainerConfig,
    booster: Box<dyn Booster>,
}

impl Pipeline {
    pub fn new(config: TrainerConfig) -> Self {
        let booster = build_booster(&config.training);
        Self { config, booster }
    }

    /// Use `booster` instead of the configured backend
    pub fn with_booster(config: TrainerConfig, booster: Box<dyn Booster>) -> Self {
        Self { config, booster }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn run(&self) -> Result<RunSummary> {
        let paths = &self.config.paths;
        let training = &self.config.training;

        for warning in self.config.validate()? {
            warn!("{}", warning);
        }

        let resolution = FeatureOrderResolver::new().resolve(&paths.feature_source)?;
        let order = resolution.order;
        self.config.scalers.validate(&order)?;

        let mut dataset = Dataset::from_csv(&paths.data, &order)?;
        info!(
            "Loaded {} samples with {} features",
            dataset.len(),
            dataset.feature_count()
        );
        for (i, (min, max)) in dataset.feature_stats().iter().enumerate() {
            debug!("  {}: min={}, max={}", order.names()[i], min, max);
        }

        if training.shuffle {
            info!("Shuffling dataset with seed: {}", training.seed);
            dataset.shuffle(training.seed);
        }

        let fitter = ScalerFitter::new(self.config.scalers.clone());
        let (fitted, train, valid) = match training.fit_scope {
            FitScope::FullDataset => {
                let fitted = fitter.fit(&order, &dataset.features)?;
                let scaled = dataset.with_features(fitted.transform(&dataset.features)?)?;
                let (train, valid) = scaled.split(training.validation_fraction)?;
                (fitted, train, valid)
            }
            FitScope::TrainSplit => {
                let (train, valid) = dataset.split(training.validation_fraction)?;
                let fitted = fitter.fit(&order, &train.features)?;
                let train = train.with_features(fitted.transform(&train.features)?)?;
                let valid = valid.with_features(fitted.transform(&valid.features)?)?;
                (fitted, train, valid)
            }
        };
        info!(
            "Fitted scalers: {} standard, {} robust, {} untransformed",
            fitted.standard.len(),
            fitted.robust.len(),
            fitted.untransformed(&order).len()
        );

        info!(
            "Training with {} backend on {} rows, validating on {}",
            self.booster.name(),
            train.len(),
            valid.len()
        );
        let model = self.booster.train(&train, &valid, &order)?;
        info!(
            "Training complete: best iteration {} of {}",
            model.best_iteration, model.total_iterations
        );

        let metadata = ArtifactMetadata::new(&order, &fitted);
        let receipt =
            ArtifactWriter::new(self.config.artifact.layout).write(&paths.output, &model, &metadata)?;

        Ok(RunSummary {
            order_source: resolution.source,
            feature_count: order.len(),
            rows: dataset.len(),
            train_rows: train.len(),
            valid_rows: valid.len(),
            backend: self.booster.name(),
            best_iteration: model.best_iteration,
            total_iterations: model.total_iterations,
            receipt,
        })
    }
}

/// Resolve the order configured in `config` without training
pub fn resolve_order(config: &TrainerConfig) -> Result<(FeatureOrder, OrderSource)> {
    let resolution = FeatureOrderResolver::new().resolve(&config.paths.feature_source)?;
    Ok((resolution.order, resolution.source))
}
