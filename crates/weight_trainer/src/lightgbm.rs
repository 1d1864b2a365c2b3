//! LightGBM command-line backend
//!
//! Writes both splits as headed CSV into a scratch directory, generates a
//! training config and runs the `lightgbm` executable on it. The saved model
//! text is returned verbatim.

use once_cell::sync::Lazy;
use regex::Regex;
use smartweight_core::{FeatureOrder, Result, TrainedModel, WeightError};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::booster::{check_inputs, Booster, Deadline};
use crate::dataset::{Dataset, TARGET_COLUMN};
use crate::gbdt::GbdtConfig;

static ITERATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Iteration:(\d+)").expect("static regex"));

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs an installed LightGBM binary
pub struct LightGbmCliBooster {
    config: GbdtConfig,
    executable: Option<PathBuf>,
}

impl LightGbmCliBooster {
    /// `executable` overrides the `PATH` lookup
    pub fn new(config: GbdtConfig, executable: Option<PathBuf>) -> Self {
        Self { config, executable }
    }

    fn resolve_executable(&self) -> Result<PathBuf> {
        if let Some(path) = &self.executable {
            if path.exists() {
                return Ok(path.clone());
            }
            return Err(WeightError::TrainingFailure(format!(
                "lightgbm executable not found at {}",
                path.display()
            )));
        }

        let binary = if cfg!(windows) { "lightgbm.exe" } else { "lightgbm" };
        find_in_path(binary).ok_or_else(|| {
            WeightError::TrainingFailure(
                "lightgbm executable not found in PATH; install the LightGBM CLI or use the builtin backend"
                    .into(),
            )
        })
    }

    /// Contents of the generated `train.conf`
    pub fn render_config(&self, train: &Path, valid: &Path, output: &Path) -> String {
        let tree = &self.config.tree;
        let mut conf = String::new();
        let _ = writeln!(conf, "task=train");
        let _ = writeln!(conf, "objective=regression");
        let _ = writeln!(conf, "metric=rmse");
        let _ = writeln!(conf, "data={}", train.display());
        let _ = writeln!(conf, "valid={}", valid.display());
        let _ = writeln!(conf, "header=true");
        let _ = writeln!(conf, "label_column=name:{}", TARGET_COLUMN);
        let _ = writeln!(conf, "num_iterations={}", self.config.num_rounds);
        let _ = writeln!(conf, "learning_rate={}", self.config.learning_rate);
        let _ = writeln!(conf, "num_leaves={}", tree.num_leaves);
        let _ = writeln!(conf, "max_depth={}", tree.max_depth.map_or(-1, |d| d as i64));
        let _ = writeln!(conf, "min_data_in_leaf={}", tree.min_data_in_leaf);
        let _ = writeln!(conf, "lambda_l2={}", tree.lambda_l2);
        if self.config.early_stopping_rounds > 0 {
            let _ = writeln!(conf, "early_stopping_round={}", self.config.early_stopping_rounds);
        }
        let _ = writeln!(conf, "metric_freq=1");
        let _ = writeln!(conf, "deterministic=true");
        let _ = writeln!(conf, "num_threads=1");
        let _ = writeln!(conf, "seed=0");
        let _ = writeln!(conf, "output_model={}", output.display());
        conf
    }
}

impl Booster for LightGbmCliBooster {
    fn name(&self) -> &'static str {
        "lightgbm_cli"
    }

    fn train(&self, train: &Dataset, valid: &Dataset, order: &FeatureOrder) -> Result<TrainedModel> {
        check_inputs(train, valid, order)?;
        let deadline = Deadline::start(self.config.timeout);

        let exe_path = self.resolve_executable()?;
        info!("Using LightGBM executable at {}", exe_path.display());

        let scratch = TempDir::new().map_err(|e| failure("create scratch directory", e))?;
        let train_path = scratch.path().join("train.csv");
        let valid_path = scratch.path().join("valid.csv");
        let model_path = scratch.path().join("model.txt");
        let conf_path = scratch.path().join("train.conf");
        let log_path = scratch.path().join("lightgbm.log");

        write_csv(train, &train_path)?;
        write_csv(valid, &valid_path)?;
        fs::write(&conf_path, self.render_config(&train_path, &valid_path, &model_path))
            .map_err(|e| failure("write config", e))?;
        debug!(
            "Wrote {} training and {} validation rows to {}",
            train.len(),
            valid.len(),
            scratch.path().display()
        );

        let log = File::create(&log_path).map_err(|e| failure("create log", e))?;
        let log_err = log.try_clone().map_err(|e| failure("create log", e))?;
        let mut child = Command::new(&exe_path)
            .arg(format!("config={}", conf_path.display()))
            .current_dir(scratch.path())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|e| failure("spawn lightgbm", e))?;

        let status = loop {
            if let Some(status) = child.try_wait().map_err(|e| failure("wait for lightgbm", e))? {
                break status;
            }
            if deadline.expired() {
                warn!("LightGBM exceeded the training timeout, killing pid {}", child.id());
                let _ = child.kill();
                let _ = child.wait();
                deadline.check()?;
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let log_text = fs::read_to_string(&log_path).unwrap_or_default();
        if !status.success() {
            let tail: Vec<&str> = log_text.lines().rev().take(5).collect();
            return Err(WeightError::TrainingFailure(format!(
                "lightgbm training failed with {}: {}",
                status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }

        let text = fs::read_to_string(&model_path).map_err(|e| failure("read saved model", e))?;
        let model = TrainedModel::new(text, 0, 0);
        let best_iteration = model.tree_count();
        if best_iteration == 0 {
            return Err(WeightError::TrainingFailure("lightgbm saved a model without trees".into()));
        }
        let total_iterations = last_iteration(&log_text).unwrap_or(best_iteration).max(best_iteration);
        info!(
            "LightGBM finished: best iteration {} of {}",
            best_iteration, total_iterations
        );

        Ok(TrainedModel::new(model.text, best_iteration, total_iterations))
    }
}

fn write_csv(dataset: &Dataset, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| csv_failure(path, e))?;

    let header = std::iter::once(TARGET_COLUMN).chain(dataset.columns.iter().map(String::as_str));
    writer.write_record(header).map_err(|e| csv_failure(path, e))?;

    for (row, target) in dataset.features.iter().zip(&dataset.targets) {
        let record = std::iter::once(target).chain(row.iter()).map(|v| format!("{:?}", v));
        writer.write_record(record).map_err(|e| csv_failure(path, e))?;
    }

    writer
        .flush()
        .map_err(|e| failure(&format!("flush {}", path.display()), e))
}

/// Highest `Iteration:N` reported in the training log
fn last_iteration(log: &str) -> Option<usize> {
    ITERATION_RE
        .captures_iter(log)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .max()
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path_value = std::env::var_os("PATH")?;
    std::env::split_paths(&path_value)
        .map(|entry| entry.join(binary))
        .find(|candidate| candidate.is_file())
}

fn failure(action: &str, err: std::io::Error) -> WeightError {
    WeightError::TrainingFailure(format!("failed to {}: {}", action, err))
}

fn csv_failure(path: &Path, err: csv::Error) -> WeightError {
    WeightError::TrainingFailure(format!("failed to write {}: {}", path.display(), err))
}
