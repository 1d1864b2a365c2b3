//! Artifact serialization
//!
//! The full artifact is assembled in memory, written to a temporary file in
//! the destination directory and renamed over the final path, so a failed
//! run never leaves a truncated artifact behind.

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

use super::{ArtifactLayout, ArtifactMetadata, TAIL_WINDOW_BYTES, TRANSFORMS_START};
use crate::errors::{Result, WeightError};
use crate::model::TrainedModel;

/// Summary of a persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReceipt {
    pub path: PathBuf,
    pub bytes: usize,
    pub metadata_bytes: usize,
    /// BLAKE3 digest of the full artifact, hex encoded
    pub blake3: String,
}

/// Writes model text and metadata as one artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactWriter {
    layout: ArtifactLayout,
}

impl ArtifactWriter {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> ArtifactLayout {
        self.layout
    }

    /// Render the complete artifact text.
    pub fn render(&self, model: &TrainedModel, metadata: &ArtifactMetadata) -> Result<String> {
        metadata.validate()?;

        if model.text.trim().is_empty() {
            return Err(WeightError::ArtifactWriteFailure("model text is empty".into()));
        }

        let block = metadata.render(self.layout);
        if block.len() > TAIL_WINDOW_BYTES {
            return Err(WeightError::ArtifactWriteFailure(format!(
                "metadata is {} bytes, exceeds tail window of {} bytes",
                block.len(),
                TAIL_WINDOW_BYTES
            )));
        }

        // The runtime takes the first marker inside its window; a marker in
        // the model text could shadow ours.
        let marker = TRANSFORMS_START.as_bytes();
        let tail_start = model.text.len().saturating_sub(TAIL_WINDOW_BYTES);
        if model.text.as_bytes()[tail_start..]
            .windows(marker.len())
            .any(|w| w == marker)
        {
            return Err(WeightError::ArtifactWriteFailure(
                "model text already contains a transforms section".into(),
            ));
        }

        let mut out = String::with_capacity(model.text.len() + block.len() + 1);
        out.push_str(&model.text);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&block);
        Ok(out)
    }

    /// Render and atomically persist the artifact at `path`.
    pub fn write<P: AsRef<Path>>(
        &self,
        path: P,
        model: &TrainedModel,
        metadata: &ArtifactMetadata,
    ) -> Result<ArtifactReceipt> {
        let path = path.as_ref();
        let content = self.render(model, metadata)?;
        let metadata_bytes = metadata.render(self.layout).len();

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| io_failure("create output directory", &dir, e))?;

        let mut tmp =
            NamedTempFile::new_in(&dir).map_err(|e| io_failure("create temp file", &dir, e))?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| io_failure("write", tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| io_failure("sync", tmp.path(), e))?;
        tmp.persist(path)
            .map_err(|e| io_failure("rename into", path, e.error))?;

        let digest = hex::encode(blake3::hash(content.as_bytes()).as_bytes());
        info!(
            "Wrote artifact {} ({} bytes, metadata {} bytes, blake3 {})",
            path.display(),
            content.len(),
            metadata_bytes,
            digest
        );

        Ok(ArtifactReceipt {
            path: path.to_path_buf(),
            bytes: content.len(),
            metadata_bytes,
            blake3: digest,
        })
    }
}

fn io_failure(action: &str, path: &Path, err: std::io::Error) -> WeightError {
    WeightError::ArtifactWriteFailure(format!("{} {}: {}", action, path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::SENTINEL;
    use crate::feature_order::FeatureOrder;
    use crate::scaler::{ScalerConfig, ScalerFitter};
    use tempfile::tempdir;

    fn fixture() -> (TrainedModel, ArtifactMetadata) {
        let order = FeatureOrder::fallback();
        let rows: Vec<Vec<f64>> = (0..10)
            .map(|r| (0..order.len()).map(|c| (r * c) as f64 * 0.5).collect())
            .collect();
        let fitted = ScalerFitter::new(ScalerConfig::default())
            .fit(&order, &rows)
            .unwrap();
        let model = TrainedModel::new("tree\nversion=v3\n\nTree=0\nnum_leaves=1\nleaf_value=0.5\n\nend of trees\n".into(), 1, 1);
        (model, ArtifactMetadata::new(&order, &fitted))
    }

    #[test]
    fn test_write_appends_after_model_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Model.bin");
        let (model, meta) = fixture();

        let receipt = ArtifactWriter::default().write(&path, &model, &meta).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();

        assert!(content.starts_with(&model.text));
        assert!(content.lines().filter(|l| *l == SENTINEL).count() >= 2);
        assert!(content.ends_with("transform=true\n[/transforms]\n"));
        assert_eq!(receipt.bytes, content.len());
        assert_eq!(receipt.blake3.len(), 64);
    }

    #[test]
    fn test_write_is_deterministic() {
        let (model, meta) = fixture();
        let writer = ArtifactWriter::new(ArtifactLayout::Legacy);
        assert_eq!(
            writer.render(&model, &meta).unwrap(),
            writer.render(&model, &meta).unwrap()
        );
    }

    #[test]
    fn test_empty_model_text_rejected() {
        let (_, meta) = fixture();
        let model = TrainedModel::new("  \n".into(), 0, 0);
        let err = ArtifactWriter::default().render(&model, &meta).unwrap_err();
        assert!(matches!(err, WeightError::ArtifactWriteFailure(_)));
    }

    #[test]
    fn test_marker_in_model_tail_rejected_on_any_byte_offset() {
        let (_, meta) = fixture();
        // Odd and even padding so the window start lands both on and inside a
        // two-byte character.
        for pad in ["", "x"] {
            let text = format!("tree\n{}{}\n{}\n", pad, "é".repeat(9000), TRANSFORMS_START);
            let model = TrainedModel::new(text, 1, 1);
            let err = ArtifactWriter::default().render(&model, &meta).unwrap_err();
            assert!(err.to_string().contains("already contains"), "pad {:?}", pad);
        }
    }

    #[test]
    fn test_failed_write_leaves_no_artifact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Model.bin");
        let (model, mut meta) = fixture();
        meta.scalers[0].scales[0] = f64::INFINITY;

        assert!(ArtifactWriter::default().write(&path, &model, &meta).is_err());
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_oversized_metadata_rejected() {
        let names: Vec<String> = (0..2000).map(|i| format!("feature_with_long_name_{}", i)).collect();
        let order = FeatureOrder::from_names(names).unwrap();
        let meta = ArtifactMetadata {
            untransformed: order.iter().map(|(i, n)| (i, n.to_string())).collect(),
            order,
            scalers: vec![],
        };
        let model = TrainedModel::new("tree\n".into(), 1, 1);
        let err = ArtifactWriter::default().render(&model, &meta).unwrap_err();
        assert!(err.to_string().contains("tail window"));
    }
}
