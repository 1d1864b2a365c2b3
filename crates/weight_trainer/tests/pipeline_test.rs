//! End-to-end tests for the training pipeline
//!
//! Each test writes a feature source and a CSV into a temp directory and runs
//! the full pipeline against them.

use anyhow::Result;
use smartweight_core::artifact::{read_transforms, split_native_model};
use smartweight_core::model::count_trees;
use smartweight_core::{
    ArtifactLayout, FeatureOrder, OrderSource, ScalerConfig, TrainedModel, WeightError,
    FALLBACK_FEATURE_ORDER,
};
use smartweight_trainer::{
    Booster, Dataset, FitScope, GbdtBooster, GbdtConfig, Pipeline, TrainerConfig,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Write `rows` synthetic rows with the given columns plus `weight`
fn write_dataset(path: &Path, columns: &[&str], rows: usize) -> Result<()> {
    let mut file = fs::File::create(path)?;
    writeln!(file, "{},weight", columns.join(","))?;
    for i in 0..rows {
        let values: Vec<String> = (0..columns.len())
            .map(|j| format!("{}", ((i * 31 + j * 17) % 97) as f64 / 10.0))
            .collect();
        let weight = ((i * 13) % 100 + 1) as f64 / 100.0;
        writeln!(file, "{},{}", values.join(","), weight)?;
    }
    Ok(())
}

/// Go source without an order declaration
fn write_plain_source(path: &Path) -> Result<()> {
    fs::write(
        path,
        "package transform\n\nfunc ApplyTransforms(f []float64) []float64 {\n\treturn f\n}\n",
    )?;
    Ok(())
}

fn small_config(dir: &Path) -> TrainerConfig {
    let mut config = TrainerConfig::default();
    config.paths.feature_source = dir.join("transform.go");
    config.paths.data = dir.join("smart_weight_data.csv");
    config.paths.output = dir.join("out").join("Model.bin");
    config.training.num_rounds = 40;
    config.training.early_stopping_rounds = 10;
    config.training.learning_rate = 0.1;
    config.training.min_data_in_leaf = 5;
    config.training.num_leaves = 8;
    config
}

fn fallback_fixture() -> Result<(TempDir, TrainerConfig)> {
    let dir = TempDir::new()?;
    let config = small_config(dir.path());
    write_plain_source(&config.paths.feature_source)?;
    write_dataset(&config.paths.data, &FALLBACK_FEATURE_ORDER, 100)?;
    Ok((dir, config))
}

fn section<'a>(content: &'a str, name: &str) -> Vec<&'a str> {
    let start = format!("[{}]", name);
    let end = format!("[/{}]", name);
    content
        .lines()
        .skip_while(|l| *l != start)
        .skip(1)
        .take_while(|l| *l != end)
        .collect()
}

#[test]
fn test_end_to_end_with_fallback_order() -> Result<()> {
    let (_dir, config) = fallback_fixture()?;
    let output = config.paths.output.clone();

    let summary = Pipeline::new(config).run()?;
    let content = fs::read_to_string(&output)?;

    assert_eq!(summary.order_source, OrderSource::Fallback);
    assert_eq!(summary.feature_count, 21);
    assert_eq!(summary.rows, 100);
    assert_eq!((summary.train_rows, summary.valid_rows), (80, 20));
    assert_eq!(summary.receipt.bytes, content.len());

    assert!(content.lines().any(|l| l == "end of trees"));
    let order = section(&content, "order");
    assert_eq!(order.len(), 21);
    assert_eq!(order[0], "0=success");
    assert_eq!(order[20], "20=geoip_hash");
    assert!(content.contains("std_features=2,3,4,5,6,7,15\n"));
    assert!(content.contains("robust_features=0,1\n"));
    assert!(content.contains("untransformed_features=8:is_udp,9:is_tcp,"));

    let native = split_native_model(&content).expect("sentinel present");
    assert_eq!(count_trees(native), summary.best_iteration);
    assert!(native.starts_with("tree\nversion=v3\n"));

    let transforms = read_transforms(&output)?;
    assert!(transforms.enabled);
    transforms.validate(21)?;
    Ok(())
}

#[test]
fn test_missing_column_leaves_no_artifact() -> Result<()> {
    let dir = TempDir::new()?;
    let config = small_config(dir.path());
    write_plain_source(&config.paths.feature_source)?;
    let columns: Vec<&str> = FALLBACK_FEATURE_ORDER
        .iter()
        .copied()
        .filter(|c| *c != "latency")
        .collect();
    write_dataset(&config.paths.data, &columns, 50)?;
    let output = config.paths.output.clone();

    let err = Pipeline::new(config).run().unwrap_err();
    match err {
        WeightError::MissingFeatureColumns(cols) => assert_eq!(cols, vec!["latency"]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!output.exists());
    Ok(())
}

#[test]
fn test_repeated_runs_are_identical() -> Result<()> {
    let (dir, config) = fallback_fixture()?;

    let mut first = config.clone();
    first.paths.output = dir.path().join("a").join("Model.bin");
    let mut second = config;
    second.paths.output = dir.path().join("b").join("Model.bin");

    let r1 = Pipeline::new(first.clone()).run()?;
    let r2 = Pipeline::new(second.clone()).run()?;

    assert_eq!(r1.receipt.blake3, r2.receipt.blake3);
    assert_eq!(fs::read(&first.paths.output)?, fs::read(&second.paths.output)?);
    Ok(())
}

#[test]
fn test_declared_order_drives_columns() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = small_config(dir.path());
    fs::write(
        &config.paths.feature_source,
        r#"package transform

func getDefaultFeatureOrder() map[int]string {
	return map[int]string{
		2: "is_udp",
		0: "latency",
		1: "success",
	}
}
"#,
    )?;
    // CSV column order differs from the declaration
    write_dataset(&config.paths.data, &["success", "is_udp", "latency"], 60)?;
    config.scalers = ScalerConfig {
        standard: vec!["latency".into()],
        robust: vec!["success".into()],
    };
    let output = config.paths.output.clone();

    let summary = Pipeline::new(config).run()?;
    let content = fs::read_to_string(&output)?;

    assert_eq!(summary.order_source, OrderSource::Declaration);
    assert_eq!(section(&content, "order"), vec!["0=latency", "1=success", "2=is_udp"]);
    assert!(content.contains("feature_names=latency success is_udp\n"));
    assert!(content.contains("std_features=0\n"));
    assert!(content.contains("robust_features=1\n"));
    assert!(content.contains("untransformed_features=2:is_udp\n"));
    Ok(())
}

#[test]
fn test_training_timeout_is_training_failure() -> Result<()> {
    let (_dir, config) = fallback_fixture()?;
    let output = config.paths.output.clone();

    let booster = GbdtBooster::new(GbdtConfig {
        timeout: Some(Duration::ZERO),
        ..config.training.gbdt_config()
    });
    let err = Pipeline::with_booster(config, Box::new(booster))
        .run()
        .unwrap_err();

    assert!(matches!(err, WeightError::TrainingFailure(_)));
    assert!(!output.exists());
    Ok(())
}

struct FailingBooster;

impl Booster for FailingBooster {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn train(&self, _: &Dataset, _: &Dataset, _: &FeatureOrder) -> smartweight_core::Result<TrainedModel> {
        Err(WeightError::TrainingFailure("backend crashed".into()))
    }
}

#[test]
fn test_backend_failure_leaves_no_artifact() -> Result<()> {
    let (_dir, config) = fallback_fixture()?;
    let output = config.paths.output.clone();

    let err = Pipeline::with_booster(config, Box::new(FailingBooster))
        .run()
        .unwrap_err();

    assert_eq!(err.kind().exit_code(), 30);
    assert!(!output.exists());
    Ok(())
}

#[test]
fn test_legacy_layout_and_full_dataset_fit() -> Result<()> {
    let (_dir, mut config) = fallback_fixture()?;
    config.artifact.layout = ArtifactLayout::Legacy;
    config.training.fit_scope = FitScope::FullDataset;
    let output: PathBuf = config.paths.output.clone();

    Pipeline::new(config).run()?;
    let content = fs::read_to_string(&output)?;

    assert_eq!(content.matches("[order]").count(), 2);
    assert_eq!(content.matches("[definitions]").count(), 2);
    let transforms = read_transforms(&output)?;
    assert_eq!(transforms.order.len(), 21);
    assert_eq!(transforms.transforms.len(), 2);
    Ok(())
}

#[test]
fn test_unreadable_source_is_fatal() -> Result<()> {
    let (dir, mut config) = fallback_fixture()?;
    config.paths.feature_source = dir.path().join("missing.go");

    let err = Pipeline::new(config).run().unwrap_err();
    assert!(matches!(err, WeightError::SourceUnreadable { .. }));
    Ok(())
}

#[test]
fn test_schema_names_outside_artifact_grammar_are_fatal() -> Result<()> {
    let (dir, mut config) = fallback_fixture()?;
    config.paths.feature_source = dir.path().join("features.json");
    fs::write(
        &config.paths.feature_source,
        r#"{"version": 1, "features": [" padded", "a,b", "c:d", "x"]}"#,
    )?;
    let output = config.paths.output.clone();

    let err = Pipeline::new(config).run().unwrap_err();
    assert_eq!(err.kind().exit_code(), 11);
    assert!(!output.exists());
    Ok(())
}
