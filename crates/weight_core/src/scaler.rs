//! Deterministic feature scalers
//!
//! Two disjoint feature subsets are normalized with different strategies:
//! - `Standard`: `(x - mean) / std`, population standard deviation
//! - `Robust`: `(x - median) / IQR`, quartiles by linear interpolation
//!
//! Parameters are captured at fit time and are the only input to
//! [`FittedScalers::transform`], so the values written into the artifact are
//! exactly the values used to build the training matrix.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::errors::{Result, WeightError};
use crate::feature_order::FeatureOrder;

/// Standard-scaled features of the default configuration
pub const DEFAULT_STANDARD_FEATURES: [&str; 7] = [
    "connect_time",
    "latency",
    "upload_mb",
    "download_mb",
    "duration_minutes",
    "last_used_seconds",
    "traffic_density",
];

/// Robust-scaled features of the default configuration
pub const DEFAULT_ROBUST_FEATURES: [&str; 2] = ["success", "failure"];

/// Scaler strategy and its artifact vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalerKind {
    Standard,
    Robust,
}

impl ScalerKind {
    /// Key prefix inside `[definitions]`
    pub fn prefix(self) -> &'static str {
        match self {
            ScalerKind::Standard => "std",
            ScalerKind::Robust => "robust",
        }
    }

    /// Value of the `<prefix>_type` key
    pub fn type_name(self) -> &'static str {
        match self {
            ScalerKind::Standard => "StandardScaler",
            ScalerKind::Robust => "RobustScaler",
        }
    }

    /// Name of the per-feature offset parameter
    pub fn offset_param(self) -> &'static str {
        match self {
            ScalerKind::Standard => "mean",
            ScalerKind::Robust => "center",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "StandardScaler" => Some(ScalerKind::Standard),
            "RobustScaler" => Some(ScalerKind::Robust),
            _ => None,
        }
    }
}

/// Which features each scaler handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    pub standard: Vec<String>,
    pub robust: Vec<String>,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            standard: DEFAULT_STANDARD_FEATURES.iter().map(|s| s.to_string()).collect(),
            robust: DEFAULT_ROBUST_FEATURES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ScalerConfig {
    /// Check the subsets against the resolved order.
    ///
    /// Every named feature must exist in `order`, no name may repeat within a
    /// subset, and the subsets must be disjoint.
    pub fn validate(&self, order: &FeatureOrder) -> Result<()> {
        let missing: Vec<String> = self
            .standard
            .iter()
            .chain(self.robust.iter())
            .filter(|name| order.index_of(name).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(WeightError::MissingFeatureColumns(missing));
        }

        for (kind, names) in [
            (ScalerKind::Standard, &self.standard),
            (ScalerKind::Robust, &self.robust),
        ] {
            let mut seen = HashSet::new();
            for name in names {
                if !seen.insert(name.as_str()) {
                    return Err(WeightError::InvalidConfig(format!(
                        "feature '{}' listed twice for {}",
                        name,
                        kind.type_name()
                    )));
                }
            }
        }

        let standard: HashSet<&str> = self.standard.iter().map(String::as_str).collect();
        if let Some(shared) = self.robust.iter().find(|name| standard.contains(name.as_str())) {
            return Err(WeightError::InvalidConfig(format!(
                "feature '{}' assigned to both scalers",
                shared
            )));
        }

        Ok(())
    }

    /// Indices of `names` in `order`, ascending.
    fn sorted_indices(names: &[String], order: &FeatureOrder) -> Vec<usize> {
        let mut indices: Vec<usize> = names.iter().filter_map(|n| order.index_of(n)).collect();
        indices.sort_unstable();
        indices
    }
}

/// One fitted scaler: its features in ascending order index and the
/// matching parameter vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalerSpec {
    pub kind: ScalerKind,
    pub indices: Vec<usize>,
    pub names: Vec<String>,
    /// Mean (standard) or median (robust) per feature
    pub offsets: Vec<f64>,
    /// Standard deviation or IQR per feature, never zero
    pub scales: Vec<f64>,
}

impl ScalerSpec {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Apply the scaler in place to one row laid out in feature order.
    ///
    /// A row too short for the highest scaled index is rejected untouched.
    pub fn apply(&self, row: &mut [f64]) -> Result<()> {
        if let Some(&idx) = self.indices.iter().find(|&&i| i >= row.len()) {
            return Err(WeightError::DataUnreadable(format!(
                "row has {} values but {} index {} is scaled",
                row.len(),
                self.kind.type_name(),
                idx
            )));
        }
        for ((&idx, offset), scale) in self.indices.iter().zip(&self.offsets).zip(&self.scales) {
            row[idx] = (row[idx] - offset) / scale;
        }
        Ok(())
    }
}

/// The two scalers captured from a single fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedScalers {
    pub standard: ScalerSpec,
    pub robust: ScalerSpec,
}

impl FittedScalers {
    /// Scalers in artifact order: standard first, then robust.
    pub fn specs(&self) -> [&ScalerSpec; 2] {
        [&self.standard, &self.robust]
    }

    /// Features covered by neither scaler as `(index, name)`, ascending.
    pub fn untransformed(&self, order: &FeatureOrder) -> Vec<(usize, String)> {
        let scaled: HashSet<usize> = self
            .standard
            .indices
            .iter()
            .chain(self.robust.indices.iter())
            .copied()
            .collect();

        order
            .iter()
            .filter(|(idx, _)| !scaled.contains(idx))
            .map(|(idx, name)| (idx, name.to_string()))
            .collect()
    }

    /// Scale a matrix using the captured parameters.
    pub fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        rows.iter()
            .map(|row| {
                let mut out = row.clone();
                self.standard.apply(&mut out)?;
                self.robust.apply(&mut out)?;
                Ok(out)
            })
            .collect()
    }
}

/// Fits [`FittedScalers`] for a given configuration.
#[derive(Debug, Clone)]
pub struct ScalerFitter {
    config: ScalerConfig,
}

impl ScalerFitter {
    pub fn new(config: ScalerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScalerConfig {
        &self.config
    }

    /// Fit both scalers on `rows` (columns in `order` order).
    pub fn fit(&self, order: &FeatureOrder, rows: &[Vec<f64>]) -> Result<FittedScalers> {
        self.config.validate(order)?;

        if rows.is_empty() {
            return Err(WeightError::DataUnreadable("no rows to fit scalers on".into()));
        }
        if let Some(pos) = rows.iter().position(|r| r.len() != order.len()) {
            return Err(WeightError::DataUnreadable(format!(
                "row {} has {} values, expected {}",
                pos,
                rows[pos].len(),
                order.len()
            )));
        }

        let standard = self.fit_one(
            ScalerKind::Standard,
            ScalerConfig::sorted_indices(&self.config.standard, order),
            order,
            rows,
        )?;
        info!("Fitted StandardScaler on {} features", standard.len());

        let robust = self.fit_one(
            ScalerKind::Robust,
            ScalerConfig::sorted_indices(&self.config.robust, order),
            order,
            rows,
        )?;
        info!("Fitted RobustScaler on {} features", robust.len());

        Ok(FittedScalers { standard, robust })
    }

    fn fit_one(
        &self,
        kind: ScalerKind,
        indices: Vec<usize>,
        order: &FeatureOrder,
        rows: &[Vec<f64>],
    ) -> Result<ScalerSpec> {
        let mut names = Vec::with_capacity(indices.len());
        let mut offsets = Vec::with_capacity(indices.len());
        let mut scales = Vec::with_capacity(indices.len());

        for &idx in &indices {
            let name = order.name(idx).unwrap_or_default().to_string();
            let column: Vec<f64> = rows.iter().map(|row| row[idx]).collect();
            if let Some(bad) = column.iter().find(|v| !v.is_finite()) {
                return Err(WeightError::DataUnreadable(format!(
                    "non-finite value {} in column '{}'",
                    bad, name
                )));
            }

            let (offset, scale) = match kind {
                ScalerKind::Standard => standard_params(&column),
                ScalerKind::Robust => robust_params(&column),
            };
            debug!(feature = %name, offset, scale, "{} parameters", kind.type_name());

            names.push(name);
            offsets.push(offset);
            scales.push(scale);
        }

        Ok(ScalerSpec {
            kind,
            indices,
            names,
            offsets,
            scales,
        })
    }
}

/// Mean and population standard deviation; constant columns scale by 1.
pub fn standard_params(column: &[f64]) -> (f64, f64) {
    let n = column.len() as f64;
    let mean = column.iter().sum::<f64>() / n;
    let var = column.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let std = var.sqrt();

    let constant = column.iter().all(|&v| v == column[0]);
    let scale = if constant || std == 0.0 { 1.0 } else { std };
    (mean, scale)
}

/// Median and interquartile range; zero IQR scales by 1.
pub fn robust_params(column: &[f64]) -> (f64, f64) {
    let mut sorted = column.to_vec();
    sorted.sort_by(f64::total_cmp);

    let median = percentile(&sorted, 50.0);
    let iqr = percentile(&sorted, 75.0) - percentile(&sorted, 25.0);
    let scale = if iqr == 0.0 { 1.0 } else { iqr };
    (median, scale)
}

/// Percentile of sorted values using linear interpolation at `q/100 * (n-1)`.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    let last = sorted.len() - 1;
    let pos = q / 100.0 * last as f64;
    let lower = pos.floor() as usize;
    let upper = (lower + 1).min(last);
    let frac = pos - lower as f64;

    if frac == 0.0 {
        sorted[lower]
    } else {
        sorted[lower] + (sorted[upper] - sorted[lower]) * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> FeatureOrder {
        FeatureOrder::from_names(["a", "b", "c", "d"]).unwrap()
    }

    fn config() -> ScalerConfig {
        ScalerConfig {
            standard: vec!["c".into(), "a".into()],
            robust: vec!["b".into()],
        }
    }

    #[test]
    fn test_percentile_interpolation() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 25.0), 1.75);
        assert_eq!(percentile(&sorted, 50.0), 2.5);
        assert_eq!(percentile(&sorted, 75.0), 3.25);
        assert_eq!(percentile(&[7.0], 75.0), 7.0);
    }

    #[test]
    fn test_standard_params_population_std() {
        let (mean, scale) = standard_params(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(mean, 5.0);
        assert_eq!(scale, 2.0);
    }

    #[test]
    fn test_zero_variance_scales_by_one() {
        let rows = vec![vec![0.1, 1.0, 3.0, 0.0]; 5];
        let fitted = ScalerFitter::new(config()).fit(&order(), &rows).unwrap();

        assert_eq!(fitted.standard.scales, vec![1.0, 1.0]);
        let out = fitted.transform(&rows).unwrap();
        for (row, scaled) in rows.iter().zip(&out) {
            assert_eq!(scaled[0], row[0] - fitted.standard.offsets[0]);
            assert_eq!(scaled[2], row[2] - fitted.standard.offsets[1]);
        }
    }

    #[test]
    fn test_zero_iqr_scales_by_one() {
        let rows: Vec<Vec<f64>> = [5.0, 5.0, 5.0, 5.0, 100.0]
            .iter()
            .map(|&b| vec![1.0, b, 2.0, 0.0])
            .collect();
        let fitted = ScalerFitter::new(config()).fit(&order(), &rows).unwrap();

        assert_eq!(fitted.robust.offsets, vec![5.0]);
        assert_eq!(fitted.robust.scales, vec![1.0]);
        let out = fitted.transform(&rows).unwrap();
        assert_eq!(out[4][1], 95.0);
        assert_eq!(out[0][1], 0.0);
    }

    #[test]
    fn test_parameters_follow_order_not_config() {
        let rows = vec![vec![1.0, 0.0, 10.0, 0.0], vec![3.0, 1.0, 30.0, 0.0]];
        let fitted = ScalerFitter::new(config()).fit(&order(), &rows).unwrap();

        assert_eq!(fitted.standard.indices, vec![0, 2]);
        assert_eq!(fitted.standard.names, vec!["a", "c"]);
        assert_eq!(fitted.standard.offsets, vec![2.0, 20.0]);
        assert_eq!(fitted.standard.scales, vec![1.0, 10.0]);
    }

    #[test]
    fn test_untransformed_is_complement() {
        let rows = vec![vec![1.0, 2.0, 3.0, 4.0], vec![2.0, 3.0, 4.0, 5.0]];
        let fitted = ScalerFitter::new(config()).fit(&order(), &rows).unwrap();
        assert_eq!(fitted.untransformed(&order()), vec![(3, "d".to_string())]);

        let out = fitted.transform(&rows).unwrap();
        assert_eq!(out[0][3].to_bits(), rows[0][3].to_bits());
    }

    #[test]
    fn test_short_row_is_rejected_not_indexed() {
        let rows = vec![vec![1.0, 2.0, 3.0, 4.0], vec![2.0, 3.0, 4.0, 5.0]];
        let fitted = ScalerFitter::new(config()).fit(&order(), &rows).unwrap();

        let err = fitted.transform(&[vec![1.0, 2.0]]).unwrap_err();
        assert!(matches!(err, WeightError::DataUnreadable(_)));
        assert!(err.to_string().contains("index 2"));

        let mut row = vec![1.0];
        assert!(fitted.robust.apply(&mut row).is_err());
        assert_eq!(row, vec![1.0]);
    }

    #[test]
    fn test_overlapping_subsets_rejected() {
        let cfg = ScalerConfig {
            standard: vec!["a".into()],
            robust: vec!["a".into()],
        };
        let err = cfg.validate(&order()).unwrap_err();
        assert!(matches!(err, WeightError::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_feature_rejected() {
        let cfg = ScalerConfig {
            standard: vec!["latency".into()],
            robust: vec![],
        };
        let err = cfg.validate(&order()).unwrap_err();
        assert!(matches!(err, WeightError::MissingFeatureColumns(ref m) if m == &["latency"]));
    }

    #[test]
    fn test_empty_matrix_rejected() {
        let err = ScalerFitter::new(config()).fit(&order(), &[]).unwrap_err();
        assert!(matches!(err, WeightError::DataUnreadable(_)));
    }
}
