//! Read side of the artifact contract
//!
//! Follows the Go runtime's parser: only the tail window is scanned, section
//! headers are `[name]` / `[/name]`, and everything else is `key=value`.
//! Unlike the runtime, malformed entries are reported as errors instead of
//! being logged and skipped.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

use super::{SENTINEL, TAIL_WINDOW_BYTES, TRANSFORMS_END, TRANSFORMS_START};
use crate::errors::{Result, WeightError};
use crate::feature_order::{FeatureOrder, FALLBACK_FEATURE_ORDER};
use crate::scaler::ScalerKind;

/// One `<id>_*` paragraph of `[definitions]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformParams {
    pub id: String,
    pub kind: ScalerKind,
    pub indices: Vec<usize>,
    pub parameters: BTreeMap<String, Vec<f64>>,
}

impl TransformParams {
    pub fn offsets(&self) -> &[f64] {
        self.param(self.kind.offset_param())
    }

    pub fn scales(&self) -> &[f64] {
        self.param("scale")
    }

    fn param(&self, name: &str) -> &[f64] {
        self.parameters.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Parsed `[transforms]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTransforms {
    pub enabled: bool,
    pub order: BTreeMap<usize, String>,
    pub transforms: Vec<TransformParams>,
    /// Raw `idx:name` entries
    pub untransformed: Vec<String>,
}

impl FeatureTransforms {
    /// What the runtime assumes for an artifact without metadata.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            order: FALLBACK_FEATURE_ORDER
                .iter()
                .enumerate()
                .map(|(i, n)| (i, n.to_string()))
                .collect(),
            transforms: Vec::new(),
            untransformed: Vec::new(),
        }
    }

    /// The `[order]` block as a validated [`FeatureOrder`].
    pub fn feature_order(&self) -> Result<FeatureOrder> {
        FeatureOrder::from_indexed_pairs(self.order.iter().map(|(i, n)| (*i, n.clone())))
    }

    pub fn transform(&self, kind: ScalerKind) -> Option<&TransformParams> {
        self.transforms.iter().find(|t| t.kind == kind)
    }

    /// `untransformed_features` entries as `(index, name)`.
    pub fn untransformed_pairs(&self) -> Result<Vec<(usize, String)>> {
        self.untransformed
            .iter()
            .map(|entry| {
                let (idx, name) = entry.split_once(':').ok_or_else(|| {
                    WeightError::ArtifactParse(format!("untransformed entry '{}' lacks ':'", entry))
                })?;
                let idx = idx.trim().parse::<usize>().map_err(|_| {
                    WeightError::ArtifactParse(format!("untransformed entry '{}' has bad index", entry))
                })?;
                Ok((idx, name.trim().to_string()))
            })
            .collect()
    }

    /// Same checks the runtime performs before enabling transforms.
    pub fn validate(&self, expected_features: usize) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.order.is_empty() {
            return Err(WeightError::ArtifactParse("feature order mapping is empty".into()));
        }
        for i in 0..expected_features {
            if !self.order.contains_key(&i) {
                return Err(WeightError::ArtifactParse(format!(
                    "feature index {} missing in feature order mapping",
                    i
                )));
            }
        }

        for t in &self.transforms {
            if t.indices.is_empty() {
                return Err(WeightError::ArtifactParse(format!(
                    "transform {}: feature indices list is empty",
                    t.id
                )));
            }
            if let Some(idx) = t.indices.iter().find(|&&i| i >= expected_features) {
                return Err(WeightError::ArtifactParse(format!(
                    "transform {}: feature index {} out of range [0, {})",
                    t.id, idx, expected_features
                )));
            }
            let type_name = t.kind.type_name();
            if t.offsets().len() != t.indices.len() {
                return Err(WeightError::ArtifactParse(format!(
                    "{} {} parameter count mismatch",
                    type_name,
                    t.kind.offset_param()
                )));
            }
            if t.scales().len() != t.indices.len() {
                return Err(WeightError::ArtifactParse(format!(
                    "{} scale parameter count mismatch",
                    type_name
                )));
            }
            if let Some(pos) = t.scales().iter().position(|&s| s == 0.0) {
                return Err(WeightError::ArtifactParse(format!(
                    "{} scale[{}] is zero",
                    type_name, pos
                )));
            }
        }
        Ok(())
    }

    /// Scale one feature vector the way the runtime does at inference time.
    pub fn apply(&self, features: &[f64]) -> Vec<f64> {
        let mut out = features.to_vec();
        if !self.enabled {
            return out;
        }
        for t in &self.transforms {
            if t.indices.iter().any(|&i| i >= out.len()) {
                continue;
            }
            let (offsets, scales) = (t.offsets(), t.scales());
            for (pos, &idx) in t.indices.iter().enumerate() {
                if let (Some(&o), Some(&s)) = (offsets.get(pos), scales.get(pos)) {
                    if s != 0.0 {
                        out[idx] = (out[idx] - o) / s;
                    }
                }
            }
        }
        out
    }
}

/// Read the transforms section from the tail of an artifact file.
pub fn read_transforms<P: AsRef<Path>>(path: P) -> Result<FeatureTransforms> {
    let path = path.as_ref();
    let io_err =
        |e: std::io::Error| WeightError::ArtifactParse(format!("{}: {}", path.display(), e));

    let mut file = File::open(path).map_err(io_err)?;
    let size = file.metadata().map_err(io_err)?.len();
    let window = size.min(TAIL_WINDOW_BYTES as u64);
    file.seek(SeekFrom::End(-(window as i64))).map_err(io_err)?;

    let mut buffer = Vec::with_capacity(window as usize);
    file.read_to_end(&mut buffer).map_err(io_err)?;
    let content = String::from_utf8_lossy(&buffer);

    let start = match content.find(TRANSFORMS_START) {
        Some(idx) => idx,
        None => {
            debug!("No transforms section in {}", path.display());
            return Ok(FeatureTransforms::disabled());
        }
    };
    let end = content[start..]
        .find(TRANSFORMS_END)
        .map(|rel| start + rel)
        .ok_or_else(|| {
            WeightError::ArtifactParse("found transforms start marker but no end marker".into())
        })?;

    parse_transforms(&content[start + TRANSFORMS_START.len()..end])
}

/// Parse the body between `[transforms]` and `[/transforms]`.
pub fn parse_transforms(content: &str) -> Result<FeatureTransforms> {
    let mut enabled = false;
    let mut order = BTreeMap::new();
    let mut untransformed = Vec::new();
    let mut definitions: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut section = String::new();

    for (line_no, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let name = line.trim_matches(|c| c == '[' || c == ']');
            section = if name.starts_with('/') {
                String::new()
            } else {
                name.to_string()
            };
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());

        match section.as_str() {
            "order" => {
                let idx = key.parse::<usize>().map_err(|_| {
                    WeightError::ArtifactParse(format!(
                        "invalid feature index '{}' at line {}",
                        key,
                        line_no + 1
                    ))
                })?;
                if order.insert(idx, value.to_string()).is_some() {
                    return Err(WeightError::ArtifactParse(format!(
                        "feature index {} repeated at line {}",
                        idx,
                        line_no + 1
                    )));
                }
            }
            "definitions" => {
                if let Some((id, param)) = key.split_once('_') {
                    definitions
                        .entry(id.to_string())
                        .or_default()
                        .insert(param.to_string(), value.to_string());
                }
            }
            _ => match key {
                "transform" => enabled = value == "true",
                "untransformed_features" => untransformed = parse_string_list(value),
                _ => {}
            },
        }
    }

    let transforms = definitions
        .into_iter()
        .map(|(id, params)| build_transform(id, params))
        .collect::<Result<Vec<_>>>()?;

    Ok(FeatureTransforms {
        enabled,
        order,
        transforms,
        untransformed,
    })
}

/// Native model text with the appended metadata block removed.
pub fn split_native_model(content: &str) -> Option<&str> {
    let transforms = content.rfind(TRANSFORMS_START)?;
    let marker = format!("\n\n{}\n\n", SENTINEL);
    content[..transforms].rfind(&marker).map(|idx| &content[..idx])
}

fn build_transform(id: String, mut params: BTreeMap<String, String>) -> Result<TransformParams> {
    let type_name = params
        .remove("type")
        .ok_or_else(|| WeightError::ArtifactParse(format!("transform {}: missing type", id)))?;
    let kind = ScalerKind::from_type_name(&type_name).ok_or_else(|| {
        WeightError::ArtifactParse(format!("transform {}: unsupported type {}", id, type_name))
    })?;
    let features = params.remove("features").ok_or_else(|| {
        WeightError::ArtifactParse(format!("transform {}: missing feature indices", id))
    })?;
    let indices = parse_list(&features, |s| s.parse::<usize>().ok())
        .map_err(|bad| WeightError::ArtifactParse(format!("transform {}: bad index '{}'", id, bad)))?;

    let mut parameters = BTreeMap::new();
    for (name, raw) in params {
        let values = parse_list(&raw, |s| s.parse::<f64>().ok()).map_err(|bad| {
            WeightError::ArtifactParse(format!("transform {}: bad {} value '{}'", id, name, bad))
        })?;
        parameters.insert(name, values);
    }

    Ok(TransformParams {
        id,
        kind,
        indices,
        parameters,
    })
}

/// Comma list; returns the first unparsable element on failure.
fn parse_list<T>(value: &str, parse: impl Fn(&str) -> Option<T>) -> std::result::Result<Vec<T>, String> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    value
        .split(',')
        .map(|part| {
            let part = part.trim();
            parse(part).ok_or_else(|| part.to_string())
        })
        .collect()
}

fn parse_string_list(value: &str) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }
    value.split(',').map(|s| s.trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "
[order]
0=success
1=failure
2=latency
[/order]
[definitions]
std_type=StandardScaler
std_features=2
std_mean=1.5e-7
std_scale=2.0

robust_type=RobustScaler
robust_features=0,1
robust_center=3,4
robust_scale=1.0,0.5
[/definitions]
untransformed_features=
transform=true
";

    #[test]
    fn test_parse_body() {
        let parsed = parse_transforms(BODY).unwrap();
        assert!(parsed.enabled);
        assert_eq!(parsed.order.len(), 3);
        assert_eq!(parsed.order[&2], "latency");

        let std = parsed.transform(ScalerKind::Standard).unwrap();
        assert_eq!(std.indices, vec![2]);
        assert_eq!(std.offsets(), &[1.5e-7]);
        let robust = parsed.transform(ScalerKind::Robust).unwrap();
        assert_eq!(robust.offsets(), &[3.0, 4.0]);
        assert!(parsed.untransformed.is_empty());
        parsed.validate(3).unwrap();
    }

    #[test]
    fn test_apply_matches_runtime() {
        let parsed = parse_transforms(BODY).unwrap();
        let out = parsed.apply(&[5.0, 5.0, 4.0]);
        assert_eq!(out, vec![2.0, 2.0, (4.0 - 1.5e-7) / 2.0]);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let body = "[definitions]\nx_type=MinMaxScaler\nx_features=0\n[/definitions]\n";
        assert!(matches!(parse_transforms(body), Err(WeightError::ArtifactParse(_))));
    }

    #[test]
    fn test_bad_float_rejected() {
        let body = "[definitions]\nstd_type=StandardScaler\nstd_features=0\nstd_mean=abc\n[/definitions]\n";
        let err = parse_transforms(body).unwrap_err();
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_validate_catches_zero_scale() {
        let body = BODY.replace("std_scale=2.0", "std_scale=0");
        let parsed = parse_transforms(&body).unwrap();
        assert!(parsed.validate(3).is_err());
    }

    #[test]
    fn test_split_native_model() {
        let artifact = "tree\nTree=0\n\nend of trees\n\n\n\nend of trees\n\n[transforms]\n[/transforms]\n";
        assert_eq!(split_native_model(artifact), Some("tree\nTree=0\n\nend of trees\n\n"));
        assert_eq!(split_native_model("tree\nend of trees\n"), None);
    }

    #[test]
    fn test_missing_section_is_disabled() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"tree\nversion=v3\n").unwrap();
        let parsed = read_transforms(file.path()).unwrap();
        assert!(!parsed.enabled);
        assert_eq!(parsed.order.len(), 21);
    }

    #[test]
    fn test_unterminated_section_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"tree\n[transforms]\n[order]\n0=a\n").unwrap();
        assert!(read_transforms(file.path()).is_err());
    }
}
