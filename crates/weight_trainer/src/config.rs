//! Trainer configuration
//!
//! Loaded from a TOML file, then overridden by `SMARTWEIGHT_*` environment
//! variables, then by command-line flags.

use serde::{Deserialize, Serialize};
use smartweight_core::{ArtifactLayout, Result, ScalerConfig, WeightError};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::booster::BackendKind;
use crate::cart::TreeConfig;
use crate::gbdt::GbdtConfig;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "SMARTWEIGHT_";

/// Complete trainer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub paths: PathsConfig,
    pub scalers: ScalerConfig,
    pub training: TrainingConfig,
    pub artifact: ArtifactConfig,
}

/// Input and output locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Go source declaring the feature order, or a JSON schema
    pub feature_source: PathBuf,
    /// Training CSV
    pub data: PathBuf,
    /// Artifact destination
    pub output: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            feature_source: PathBuf::from("transform.go"),
            data: PathBuf::from("smart_weight_data.csv"),
            output: PathBuf::from("Model.bin"),
        }
    }
}

/// Which rows the scalers are fitted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitScope {
    /// Training split only; validation rows are transformed with those
    /// parameters
    #[default]
    TrainSplit,
    /// Every loaded row, before splitting
    FullDataset,
}

impl FromStr for FitScope {
    type Err = WeightError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "train_split" => Ok(Self::TrainSplit),
            "full_dataset" => Ok(Self::FullDataset),
            other => Err(WeightError::InvalidConfig(format!("unknown fit scope '{}'", other))),
        }
    }
}

/// Boosting parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub backend: BackendKind,
    pub num_rounds: usize,
    pub learning_rate: f64,
    pub num_leaves: usize,
    /// `None` grows without a depth limit
    pub max_depth: Option<usize>,
    pub min_data_in_leaf: usize,
    pub lambda_l2: f64,
    /// 0 disables early stopping
    pub early_stopping_rounds: usize,
    pub validation_fraction: f64,
    pub seed: u64,
    pub shuffle: bool,
    pub fit_scope: FitScope,
    /// Wall-clock bound on the boosting call
    pub timeout_secs: Option<u64>,
    /// Explicit `lightgbm` executable for the CLI backend
    pub lightgbm_path: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Builtin,
            num_rounds: 1000,
            learning_rate: 0.03,
            num_leaves: 31,
            max_depth: None,
            min_data_in_leaf: 20,
            lambda_l2: 0.0,
            early_stopping_rounds: 100,
            validation_fraction: 0.2,
            seed: 42,
            shuffle: true,
            fit_scope: FitScope::TrainSplit,
            timeout_secs: None,
            lightgbm_path: None,
        }
    }
}

impl TrainingConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Booster parameters derived from this section
    pub fn gbdt_config(&self) -> GbdtConfig {
        GbdtConfig {
            num_rounds: self.num_rounds,
            learning_rate: self.learning_rate,
            early_stopping_rounds: self.early_stopping_rounds,
            tree: TreeConfig {
                num_leaves: self.num_leaves,
                max_depth: self.max_depth,
                min_data_in_leaf: self.min_data_in_leaf,
                lambda_l2: self.lambda_l2,
            },
            timeout: self.timeout(),
        }
    }
}

/// Artifact rendering options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub layout: ArtifactLayout,
}

impl TrainerConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| {
            WeightError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| WeightError::InvalidConfig(format!("failed to parse config: {}", e)))
    }

    /// Apply `SMARTWEIGHT_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<Vec<String>> {
        self.apply_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, returning the variables that were set.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<Vec<String>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();
        let mut get = |suffix: &str| {
            let key = format!("{}{}", ENV_PREFIX, suffix);
            let value = lookup(&key);
            if value.is_some() {
                applied.push(key);
            }
            value
        };

        if let Some(val) = get("FEATURE_SOURCE") {
            self.paths.feature_source = PathBuf::from(val);
        }
        if let Some(val) = get("DATA") {
            self.paths.data = PathBuf::from(val);
        }
        if let Some(val) = get("OUTPUT") {
            self.paths.output = PathBuf::from(val);
        }
        if let Some(val) = get("BACKEND") {
            self.training.backend = val.parse()?;
        }
        if let Some(val) = get("NUM_ROUNDS") {
            self.training.num_rounds = parse_env("NUM_ROUNDS", &val)?;
        }
        if let Some(val) = get("LEARNING_RATE") {
            self.training.learning_rate = parse_env("LEARNING_RATE", &val)?;
        }
        if let Some(val) = get("EARLY_STOPPING_ROUNDS") {
            self.training.early_stopping_rounds = parse_env("EARLY_STOPPING_ROUNDS", &val)?;
        }
        if let Some(val) = get("VALIDATION_FRACTION") {
            self.training.validation_fraction = parse_env("VALIDATION_FRACTION", &val)?;
        }
        if let Some(val) = get("SEED") {
            self.training.seed = parse_env("SEED", &val)?;
        }
        if let Some(val) = get("FIT_SCOPE") {
            self.training.fit_scope = val.parse()?;
        }
        if let Some(val) = get("TIMEOUT_SECS") {
            self.training.timeout_secs = Some(parse_env("TIMEOUT_SECS", &val)?);
        }
        if let Some(val) = get("LIGHTGBM_PATH") {
            self.training.lightgbm_path = Some(PathBuf::from(val));
        }
        if let Some(val) = get("ARTIFACT_LAYOUT") {
            self.artifact.layout = match val.trim().to_ascii_lowercase().as_str() {
                "canonical" => ArtifactLayout::Canonical,
                "legacy" => ArtifactLayout::Legacy,
                other => {
                    return Err(WeightError::InvalidConfig(format!(
                        "unknown artifact layout '{}'",
                        other
                    )))
                }
            };
        }

        if !applied.is_empty() {
            info!("Applied environment overrides: {}", applied.join(", "));
        }
        Ok(applied)
    }

    /// Reject unusable settings; return warnings for questionable ones
    pub fn validate(&self) -> Result<Vec<String>> {
        let t = &self.training;
        let mut warnings = Vec::new();

        if t.num_rounds == 0 {
            return Err(WeightError::InvalidConfig("num_rounds must be at least 1".into()));
        }
        if !(t.learning_rate.is_finite() && t.learning_rate > 0.0) {
            return Err(WeightError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                t.learning_rate
            )));
        }
        if !(t.validation_fraction > 0.0 && t.validation_fraction < 1.0) {
            return Err(WeightError::InvalidConfig(format!(
                "validation_fraction must be in (0, 1), got {}",
                t.validation_fraction
            )));
        }
        if t.num_leaves < 2 {
            return Err(WeightError::InvalidConfig("num_leaves must be at least 2".into()));
        }
        if !(t.lambda_l2.is_finite() && t.lambda_l2 >= 0.0) {
            return Err(WeightError::InvalidConfig("lambda_l2 must be non-negative".into()));
        }
        if t.max_depth == Some(0) {
            return Err(WeightError::InvalidConfig("max_depth must be at least 1".into()));
        }
        if t.timeout_secs == Some(0) {
            return Err(WeightError::InvalidConfig("timeout_secs must be at least 1".into()));
        }
        if self.paths.output.as_os_str().is_empty() {
            return Err(WeightError::InvalidConfig("output path is empty".into()));
        }

        if t.learning_rate > 1.0 {
            warnings.push(format!("learning_rate {} is unusually high", t.learning_rate));
        }
        if t.early_stopping_rounds == 0 {
            warnings.push("early stopping disabled; all rounds will be kept".to_string());
        }
        if t.fit_scope == FitScope::FullDataset {
            warnings.push("scalers fitted on validation rows too".to_string());
        }
        if t.lightgbm_path.is_some() && t.backend != BackendKind::LightgbmCli {
            warnings.push("lightgbm_path is ignored by the builtin backend".to_string());
        }

        Ok(warnings)
    }
}

fn parse_env<T: FromStr>(suffix: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        WeightError::InvalidConfig(format!("{}{}='{}': {}", ENV_PREFIX, suffix, value, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = TrainerConfig::default();
        assert_eq!(config.paths.output, PathBuf::from("Model.bin"));
        assert_eq!(config.training.num_rounds, 1000);
        assert_eq!(config.training.learning_rate, 0.03);
        assert_eq!(config.training.early_stopping_rounds, 100);
        assert_eq!(config.training.seed, 42);
        assert_eq!(config.training.validation_fraction, 0.2);
        assert_eq!(config.artifact.layout, ArtifactLayout::Canonical);
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn test_partial_toml() {
        let config = TrainerConfig::from_toml_str(
            r#"
            [paths]
            data = "rows.csv"

            [scalers]
            robust = ["success"]

            [training]
            backend = "lightgbm_cli"
            num_rounds = 50
            fit_scope = "full_dataset"

            [artifact]
            layout = "legacy"
            "#,
        )
        .unwrap();

        assert_eq!(config.paths.data, PathBuf::from("rows.csv"));
        assert_eq!(config.paths.output, PathBuf::from("Model.bin"));
        assert_eq!(config.scalers.robust, vec!["success"]);
        assert_eq!(config.scalers.standard.len(), 7);
        assert_eq!(config.training.backend, BackendKind::LightgbmCli);
        assert_eq!(config.training.num_rounds, 50);
        assert_eq!(config.training.learning_rate, 0.03);
        assert_eq!(config.training.fit_scope, FitScope::FullDataset);
        assert_eq!(config.artifact.layout, ArtifactLayout::Legacy);
    }

    #[test]
    fn test_bad_toml_is_invalid_config() {
        let err = TrainerConfig::from_toml_str("[training]\nnum_rounds = \"many\"").unwrap_err();
        assert!(matches!(err, WeightError::InvalidConfig(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SMARTWEIGHT_OUTPUT", "/tmp/out/Model.bin"),
            ("SMARTWEIGHT_NUM_ROUNDS", "25"),
            ("SMARTWEIGHT_TIMEOUT_SECS", "60"),
            ("SMARTWEIGHT_ARTIFACT_LAYOUT", "legacy"),
        ]
        .into_iter()
        .collect();

        let mut config = TrainerConfig::default();
        let applied = config
            .apply_env_overrides_from(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(applied.len(), 4);
        assert_eq!(config.paths.output, PathBuf::from("/tmp/out/Model.bin"));
        assert_eq!(config.training.num_rounds, 25);
        assert_eq!(config.training.timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.artifact.layout, ArtifactLayout::Legacy);
    }

    #[test]
    fn test_env_override_parse_error() {
        let mut config = TrainerConfig::default();
        let err = config
            .apply_env_overrides_from(|k| (k == "SMARTWEIGHT_SEED").then(|| "abc".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("SMARTWEIGHT_SEED"));
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = TrainerConfig::default();
        config.training.validation_fraction = 1.0;
        assert!(config.validate().is_err());

        let mut config = TrainerConfig::default();
        config.training.num_rounds = 0;
        assert!(config.validate().is_err());

        let mut config = TrainerConfig::default();
        config.training.early_stopping_rounds = 0;
        assert_eq!(config.validate().unwrap().len(), 1);
    }

    #[test]
    fn test_gbdt_config_mapping() {
        let mut training = TrainingConfig::default();
        training.max_depth = Some(6);
        training.timeout_secs = Some(5);
        let gbdt = training.gbdt_config();
        assert_eq!(gbdt.tree.max_depth, Some(6));
        assert_eq!(gbdt.tree.num_leaves, 31);
        assert_eq!(gbdt.timeout, Some(Duration::from_secs(5)));
    }
}
