//! Composite model artifact
//!
//! The artifact is the booster's native text followed by a sentinel and a
//! line-oriented metadata block:
//!
//! ```text
//! <native model text>
//!
//! end of trees
//!
//! [transforms]
//! [order]
//! 0=success
//! ...
//! [/order]
//! [definitions]
//! std_type=StandardScaler
//! std_features=2,3,4,5,6,7,15
//! std_mean=...
//! std_scale=...
//!
//! robust_type=RobustScaler
//! robust_features=0,1
//! robust_center=...
//! robust_scale=...
//! [/definitions]
//! untransformed_features=8:is_udp,9:is_tcp,...
//! transform=true
//! [/transforms]
//! ```
//!
//! The Go runtime only scans the last [`TAIL_WINDOW_BYTES`] of the file for
//! the `[transforms]` section.

pub mod reader;
pub mod writer;

use std::fmt::Write as _;

use crate::errors::{Result, WeightError};
use crate::feature_order::FeatureOrder;
use crate::scaler::{FittedScalers, ScalerSpec};

pub use reader::{
    parse_transforms, read_transforms, split_native_model, FeatureTransforms, TransformParams,
};
pub use writer::{ArtifactReceipt, ArtifactWriter};

/// Line separating native model text from the metadata block
pub const SENTINEL: &str = "end of trees";

/// Bytes at the end of the artifact scanned by the runtime
pub const TAIL_WINDOW_BYTES: usize = 16 * 1024;

pub const TRANSFORMS_START: &str = "[transforms]";
pub const TRANSFORMS_END: &str = "[/transforms]";

/// Placement of the `[order]` and `[definitions]` blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactLayout {
    /// Blocks appear once, nested in `[transforms]`
    #[default]
    Canonical,
    /// Blocks also appear at top level before `[transforms]`
    Legacy,
}

/// Everything appended after the native model text.
#[derive(Debug, Clone)]
pub struct ArtifactMetadata {
    pub order: FeatureOrder,
    pub scalers: Vec<ScalerSpec>,
    pub untransformed: Vec<(usize, String)>,
}

impl ArtifactMetadata {
    pub fn new(order: &FeatureOrder, fitted: &FittedScalers) -> Self {
        Self {
            order: order.clone(),
            scalers: fitted.specs().into_iter().cloned().collect(),
            untransformed: fitted.untransformed(order),
        }
    }

    /// Check internal consistency before anything is rendered.
    pub fn validate(&self) -> Result<()> {
        for spec in &self.scalers {
            let tag = spec.kind.type_name();
            if spec.offsets.len() != spec.indices.len() || spec.scales.len() != spec.indices.len() {
                return Err(WeightError::ArtifactWriteFailure(format!(
                    "{} has {} features but {} offsets and {} scales",
                    tag,
                    spec.indices.len(),
                    spec.offsets.len(),
                    spec.scales.len()
                )));
            }
            if spec.indices.windows(2).any(|w| w[0] >= w[1]) {
                return Err(WeightError::ArtifactWriteFailure(format!(
                    "{} feature indices are not strictly ascending",
                    tag
                )));
            }
            if let Some(&idx) = spec.indices.iter().find(|&&i| i >= self.order.len()) {
                return Err(WeightError::ArtifactWriteFailure(format!(
                    "{} references index {} outside order of {}",
                    tag,
                    idx,
                    self.order.len()
                )));
            }
            if let Some(v) = spec.offsets.iter().chain(&spec.scales).find(|v| !v.is_finite()) {
                return Err(WeightError::ArtifactWriteFailure(format!(
                    "{} parameter {} is not finite",
                    tag, v
                )));
            }
            if spec.scales.iter().any(|&s| s == 0.0) {
                return Err(WeightError::ArtifactWriteFailure(format!(
                    "{} has a zero scale",
                    tag
                )));
            }
        }
        Ok(())
    }

    /// `[order]` block, one `index=name` line per feature.
    pub fn order_block(&self) -> String {
        let mut out = String::from("[order]\n");
        for (idx, name) in self.order.iter() {
            let _ = writeln!(out, "{}={}", idx, name);
        }
        out.push_str("[/order]\n");
        out
    }

    /// `[definitions]` block, one paragraph per non-empty scaler.
    pub fn definitions_block(&self) -> String {
        let paragraphs: Vec<String> = self
            .scalers
            .iter()
            .filter(|spec| !spec.is_empty())
            .map(|spec| {
                let prefix = spec.kind.prefix();
                format!(
                    "{p}_type={}\n{p}_features={}\n{p}_{}={}\n{p}_scale={}\n",
                    spec.kind.type_name(),
                    join_indices(&spec.indices),
                    spec.kind.offset_param(),
                    join_floats(&spec.offsets),
                    join_floats(&spec.scales),
                    p = prefix,
                )
            })
            .collect();

        format!("[definitions]\n{}[/definitions]\n", paragraphs.join("\n"))
    }

    /// `[transforms]` section consumed by the runtime.
    pub fn transforms_block(&self) -> String {
        let untransformed: Vec<String> = self
            .untransformed
            .iter()
            .map(|(idx, name)| format!("{}:{}", idx, name))
            .collect();

        format!(
            "{}\n{}{}untransformed_features={}\ntransform=true\n{}\n",
            TRANSFORMS_START,
            self.order_block(),
            self.definitions_block(),
            untransformed.join(","),
            TRANSFORMS_END,
        )
    }

    /// Everything appended after the native text, sentinel included.
    pub fn render(&self, layout: ArtifactLayout) -> String {
        let mut out = format!("\n\n{}\n\n", SENTINEL);
        if layout == ArtifactLayout::Legacy {
            out.push_str(&self.order_block());
            out.push_str(&self.definitions_block());
        }
        out.push_str(&self.transforms_block());
        out
    }
}

/// Shortest text that parses back to exactly `value`.
///
/// Uses scientific notation for very small and very large magnitudes
/// (`1e-7`, `1.5e20`) and always keeps a fractional part (`1.0`).
pub fn format_float(value: f64) -> String {
    format!("{:?}", value)
}

fn join_floats(values: &[f64]) -> String {
    values.iter().map(|v| format_float(*v)).collect::<Vec<_>>().join(",")
}

fn join_indices(indices: &[usize]) -> String {
    indices.iter().map(usize::to_string).collect::<Vec<_>>().join(",")
}
