//! Error taxonomy for the smart-weight training pipeline

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Why a feature-order declaration could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderDefect {
    /// The declaration function is not present in the source.
    DeclarationMissing,
    /// The declaration exists but yields no `index: "name"` entries.
    NoEntries,
    /// Indices are not a contiguous 0-based range.
    IndexGap { expected: usize, found: usize },
    /// The same index appears more than once.
    DuplicateIndex(usize),
    /// An index does not fit the platform's index type.
    InvalidIndex(String),
    /// The same feature name appears more than once.
    DuplicateName(String),
    /// A feature name the artifact grammar cannot carry.
    InvalidName(String),
    /// A schema file carried an unknown version or an unusable body.
    InvalidSchema(String),
}

impl OrderDefect {
    /// Absent or empty declarations fall back to the default order; every
    /// other defect would desynchronize trainer and runtime indices.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, OrderDefect::DeclarationMissing | OrderDefect::NoEntries)
    }
}

impl fmt::Display for OrderDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderDefect::DeclarationMissing => write!(f, "feature order declaration not found"),
            OrderDefect::NoEntries => write!(f, "feature order declaration has no entries"),
            OrderDefect::IndexGap { expected, found } => {
                write!(f, "expected index {} but found {}", expected, found)
            }
            OrderDefect::DuplicateIndex(idx) => write!(f, "index {} declared more than once", idx),
            OrderDefect::InvalidIndex(raw) => write!(f, "index '{}' is out of range", raw),
            OrderDefect::DuplicateName(name) => {
                write!(f, "feature '{}' declared more than once", name)
            }
            OrderDefect::InvalidName(name) => {
                write!(f, "feature name {:?} must match [A-Za-z0-9_.-]+", name)
            }
            OrderDefect::InvalidSchema(reason) => write!(f, "invalid schema: {}", reason),
        }
    }
}

/// Stable classification of [`WeightError`] for operators and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SourceUnreadable,
    MalformedFeatureOrder,
    DataUnreadable,
    MissingFeatureColumns,
    TrainingFailure,
    ArtifactWriteFailure,
    ArtifactParse,
    InvalidConfig,
}

impl ErrorKind {
    /// Process exit code reported by the CLI for this kind.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::SourceUnreadable => 10,
            ErrorKind::MalformedFeatureOrder => 11,
            ErrorKind::DataUnreadable => 20,
            ErrorKind::MissingFeatureColumns => 21,
            ErrorKind::TrainingFailure => 30,
            ErrorKind::ArtifactWriteFailure => 40,
            ErrorKind::ArtifactParse => 41,
            ErrorKind::InvalidConfig => 50,
        }
    }
}

/// Errors returned by every pipeline stage.
#[derive(Debug, Error)]
pub enum WeightError {
    /// Feature-order source file missing or unreadable
    #[error("feature order source {path} is unreadable: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Declaration inside a readable source is unusable
    #[error("malformed feature order: {0}")]
    MalformedFeatureOrder(OrderDefect),

    /// Training data missing, unreadable or unusable
    #[error("training data unreadable: {0}")]
    DataUnreadable(String),

    /// Resolved feature order references columns absent from the data
    #[error("missing feature columns: {}", .0.join(", "))]
    MissingFeatureColumns(Vec<String>),

    /// Boosting backend failed
    #[error("training failed: {0}")]
    TrainingFailure(String),

    /// Artifact could not be serialized or persisted
    #[error("artifact write failed: {0}")]
    ArtifactWriteFailure(String),

    /// Artifact metadata could not be parsed back
    #[error("artifact parse error: {0}")]
    ArtifactParse(String),

    /// Configuration is inconsistent
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl WeightError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WeightError::SourceUnreadable { .. } => ErrorKind::SourceUnreadable,
            WeightError::MalformedFeatureOrder(_) => ErrorKind::MalformedFeatureOrder,
            WeightError::DataUnreadable(_) => ErrorKind::DataUnreadable,
            WeightError::MissingFeatureColumns(_) => ErrorKind::MissingFeatureColumns,
            WeightError::TrainingFailure(_) => ErrorKind::TrainingFailure,
            WeightError::ArtifactWriteFailure(_) => ErrorKind::ArtifactWriteFailure,
            WeightError::ArtifactParse(_) => ErrorKind::ArtifactParse,
            WeightError::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }
}

/// Result type for smart-weight operations
pub type Result<T> = std::result::Result<T, WeightError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_defects() {
        assert!(OrderDefect::DeclarationMissing.is_recoverable());
        assert!(OrderDefect::NoEntries.is_recoverable());
        assert!(!OrderDefect::DuplicateIndex(3).is_recoverable());
        assert!(!OrderDefect::IndexGap { expected: 2, found: 4 }.is_recoverable());
    }

    #[test]
    fn test_missing_columns_message() {
        let err = WeightError::MissingFeatureColumns(vec!["latency".into(), "is_udp".into()]);
        assert_eq!(err.to_string(), "missing feature columns: latency, is_udp");
        assert_eq!(err.kind(), ErrorKind::MissingFeatureColumns);
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let kinds = [
            ErrorKind::SourceUnreadable,
            ErrorKind::MalformedFeatureOrder,
            ErrorKind::DataUnreadable,
            ErrorKind::MissingFeatureColumns,
            ErrorKind::TrainingFailure,
            ErrorKind::ArtifactWriteFailure,
            ErrorKind::ArtifactParse,
            ErrorKind::InvalidConfig,
        ];
        let codes: std::collections::HashSet<i32> = kinds.iter().map(|k| k.exit_code()).collect();
        assert_eq!(codes.len(), kinds.len());
    }
}
