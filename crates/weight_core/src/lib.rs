//! Smart-weight core: the contract between the trainer and the scoring runtime
//!
//! Modules:
//! - `feature_order`: canonical feature order, its resolver and fallback
//! - `scaler`: standard and robust scaler fitting with captured parameters
//! - `artifact`: model text + metadata artifact writer and reader
//! - `model`: trained ensemble handed over by a boosting backend
//! - `errors`: error taxonomy shared by every stage

pub mod artifact;
pub mod errors;
pub mod feature_order;
pub mod model;
pub mod scaler;

pub use artifact::{
    read_transforms, ArtifactLayout, ArtifactMetadata, ArtifactReceipt, ArtifactWriter,
    FeatureTransforms,
};
pub use errors::{ErrorKind, OrderDefect, Result, WeightError};
pub use feature_order::{
    FeatureOrder, FeatureOrderResolver, OrderSource, Resolution, FALLBACK_FEATURE_ORDER,
};
pub use model::TrainedModel;
pub use scaler::{FittedScalers, ScalerConfig, ScalerFitter, ScalerKind, ScalerSpec};

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
