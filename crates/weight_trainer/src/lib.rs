//! Smart-weight trainer - offline model training for the smart-weight scorer
//!
//! Loads the training CSV in the resolved feature order, fits the scalers,
//! runs a boosting backend with early stopping and writes the composite
//! artifact consumed by the runtime.

pub mod booster;
pub mod cart;
pub mod config;
pub mod dataset;
pub mod deterministic;
pub mod gbdt;
pub mod lightgbm;
pub mod model_text;
pub mod pipeline;

use smartweight_core::Result;

pub use booster::{BackendKind, Booster};
pub use config::{FitScope, TrainerConfig, TrainingConfig};
pub use dataset::{Dataset, TARGET_COLUMN};
pub use gbdt::{GbdtBooster, GbdtConfig};
pub use lightgbm::LightGbmCliBooster;
pub use pipeline::{Pipeline, RunSummary};

/// Run the full pipeline with `config`.
pub fn train_from_config(config: TrainerConfig) -> Result<RunSummary> {
    Pipeline::new(config).run()
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
