//! Boosting backend seam
//!
//! A backend receives train and validation matrices in feature order and
//! returns native model text already truncated at its best iteration.

use serde::{Deserialize, Serialize};
use smartweight_core::{FeatureOrder, Result, TrainedModel, WeightError};
use std::time::{Duration, Instant};

use crate::dataset::Dataset;

/// Gradient boosting backend
pub trait Booster {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Train on `train`, early-stop on `valid`.
    fn train(&self, train: &Dataset, valid: &Dataset, order: &FeatureOrder) -> Result<TrainedModel>;
}

/// Selectable backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process deterministic GBDT
    #[default]
    Builtin,
    /// External `lightgbm` executable
    LightgbmCli,
}

impl std::str::FromStr for BackendKind {
    type Err = WeightError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "builtin" => Ok(Self::Builtin),
            "lightgbm_cli" | "lightgbm-cli" | "lightgbm" => Ok(Self::LightgbmCli),
            other => Err(WeightError::InvalidConfig(format!("unknown backend '{}'", other))),
        }
    }
}

/// Both matrices must carry exactly the resolved feature columns.
pub fn check_inputs(train: &Dataset, valid: &Dataset, order: &FeatureOrder) -> Result<()> {
    train.verify_columns(order)?;
    valid.verify_columns(order)?;
    if train.is_empty() || valid.is_empty() {
        return Err(WeightError::TrainingFailure(format!(
            "empty split: {} training rows, {} validation rows",
            train.len(),
            valid.len()
        )));
    }
    Ok(())
}

/// Wall-clock limit on one training call
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn start(limit: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn expired(&self) -> bool {
        self.limit.map_or(false, |limit| self.started.elapsed() >= limit)
    }

    /// `TrainingFailure` once the limit has passed
    pub fn check(&self) -> Result<()> {
        match self.limit {
            Some(limit) if self.expired() => Err(WeightError::TrainingFailure(format!(
                "training exceeded timeout of {:?}",
                limit
            ))),
            _ => Ok(()),
        }
    }
}
