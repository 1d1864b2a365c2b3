//! CSV dataset loading and preprocessing
//!
//! Reads a headed CSV with one column per resolved feature plus the `weight`
//! target, drops rows without a positive weight, and provides deterministic
//! shuffling and splitting.

use smartweight_core::{FeatureOrder, Result, WeightError};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::deterministic::row_hash;

/// Target column name
pub const TARGET_COLUMN: &str = "weight";

/// Training dataset, features laid out in feature order
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

impl Dataset {
    /// Build a dataset, checking row widths against `columns`.
    pub fn new(columns: Vec<String>, features: Vec<Vec<f64>>, targets: Vec<f64>) -> Result<Self> {
        if features.len() != targets.len() {
            return Err(WeightError::DataUnreadable(format!(
                "{} feature rows but {} targets",
                features.len(),
                targets.len()
            )));
        }
        if let Some(pos) = features.iter().position(|r| r.len() != columns.len()) {
            return Err(WeightError::DataUnreadable(format!(
                "row {} has {} values, expected {}",
                pos,
                features[pos].len(),
                columns.len()
            )));
        }
        Ok(Self {
            columns,
            features,
            targets,
        })
    }

    /// Load the columns named by `order` plus the target from a CSV file.
    ///
    /// Rows whose weight is empty, unparsable, NaN or not positive are
    /// dropped. Every feature column must be present.
    pub fn from_csv<P: AsRef<Path>>(path: P, order: &FeatureOrder) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| {
                WeightError::DataUnreadable(format!("failed to open {}: {}", path.display(), e))
            })?;

        let headers = reader
            .headers()
            .map_err(|e| WeightError::DataUnreadable(format!("failed to read header: {}", e)))?
            .clone();
        let position = |name: &str| headers.iter().position(|h| h == name);

        let mut missing = Vec::new();
        let mut feature_positions = Vec::with_capacity(order.len());
        for (_, name) in order.iter() {
            match position(name) {
                Some(pos) => feature_positions.push(pos),
                None => missing.push(name.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(WeightError::MissingFeatureColumns(missing));
        }
        let target_pos = position(TARGET_COLUMN).ok_or_else(|| {
            WeightError::DataUnreadable(format!("missing target column '{}'", TARGET_COLUMN))
        })?;

        let mut features = Vec::new();
        let mut targets = Vec::new();
        let mut dropped = 0usize;

        for record in reader.records() {
            let record = record
                .map_err(|e| WeightError::DataUnreadable(format!("malformed record: {}", e)))?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();

            let weight = record
                .get(target_pos)
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|w| w.is_finite() && *w > 0.0);
            let Some(weight) = weight else {
                dropped += 1;
                continue;
            };

            let mut row = Vec::with_capacity(feature_positions.len());
            for (col, &pos) in feature_positions.iter().enumerate() {
                let raw = record.get(pos).unwrap_or_default();
                let value = raw.parse::<f64>().ok().filter(|v| v.is_finite()).ok_or_else(|| {
                    WeightError::DataUnreadable(format!(
                        "line {}, column '{}': invalid value '{}'",
                        line,
                        order.names()[col],
                        raw
                    ))
                })?;
                row.push(value);
            }

            features.push(row);
            targets.push(weight);
        }

        info!(
            "Loaded {} rows from {} ({} dropped without positive weight)",
            features.len(),
            path.display(),
            dropped
        );

        if features.is_empty() {
            return Err(WeightError::DataUnreadable(
                "no rows with a positive weight".into(),
            ));
        }

        Self::new(order.names().to_vec(), features, targets)
    }

    /// Columns must equal the order exactly, name for name.
    ///
    /// Absent names are reported first; otherwise every feature not found at
    /// its own index is reported, followed by any trailing extra columns.
    pub fn verify_columns(&self, order: &FeatureOrder) -> Result<()> {
        let missing: Vec<String> = order
            .names()
            .iter()
            .filter(|name| !self.columns.contains(name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(WeightError::MissingFeatureColumns(missing));
        }

        let misplaced: Vec<String> = order
            .iter()
            .filter(|&(idx, name)| self.columns.get(idx).map(String::as_str) != Some(name))
            .map(|(_, name)| name.to_string())
            .chain(self.columns.iter().skip(order.len()).cloned())
            .collect();
        if !misplaced.is_empty() {
            warn!(
                "Dataset columns [{}] do not match feature order [{}]",
                self.columns.join(","),
                order.names().join(",")
            );
            return Err(WeightError::MissingFeatureColumns(misplaced));
        }
        Ok(())
    }

    /// Deterministically shuffle the dataset using seed
    pub fn shuffle(&mut self, seed: u64) {
        let n = self.features.len();

        // Hash-based ordering; the original index breaks ties between
        // identical rows
        let mut keys: Vec<(u64, usize)> = (0..n)
            .map(|i| (row_hash(&self.features[i], self.targets[i], seed), i))
            .collect();
        keys.sort_unstable();

        let mut new_features = Vec::with_capacity(n);
        let mut new_targets = Vec::with_capacity(n);
        for (_, idx) in keys {
            new_features.push(std::mem::take(&mut self.features[idx]));
            new_targets.push(self.targets[idx]);
        }

        self.features = new_features;
        self.targets = new_targets;
    }

    /// Split off the trailing `validation_fraction` of rows.
    ///
    /// The validation split is rounded up and both sides keep at least one row.
    pub fn split(&self, validation_fraction: f64) -> Result<(Dataset, Dataset)> {
        let n = self.len();
        if n < 2 {
            return Err(WeightError::DataUnreadable(format!(
                "need at least 2 rows to split, have {}",
                n
            )));
        }
        let valid_len = ((n as f64 * validation_fraction).ceil() as usize).clamp(1, n - 1);
        let train_len = n - valid_len;
        debug!("Split {} rows into {} train / {} validation", n, train_len, valid_len);

        let part = |range: std::ops::Range<usize>| Dataset {
            columns: self.columns.clone(),
            features: self.features[range.clone()].to_vec(),
            targets: self.targets[range].to_vec(),
        };
        Ok((part(0..train_len), part(train_len..n)))
    }

    /// Same rows and targets with a replaced feature matrix.
    pub fn with_features(&self, features: Vec<Vec<f64>>) -> Result<Dataset> {
        Dataset::new(self.columns.clone(), features, self.targets.clone())
    }

    /// Get number of samples
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Check if dataset is empty
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn feature_count(&self) -> usize {
        self.columns.len()
    }

    /// Per-feature (min, max)
    pub fn feature_stats(&self) -> Vec<(f64, f64)> {
        let mut stats = vec![(f64::INFINITY, f64::NEG_INFINITY); self.feature_count()];

        for row in &self.features {
            for (i, &val) in row.iter().enumerate() {
                stats[i].0 = stats[i].0.min(val);
                stats[i].1 = stats[i].1.max(val);
            }
        }

        stats
    }
}
