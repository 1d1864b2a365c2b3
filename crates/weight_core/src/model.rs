//! Trained ensemble as handed over by a boosting backend

/// Native model text plus the boosting round it was truncated at.
///
/// The text is never parsed beyond counting tree headers; it is appended to
/// the artifact verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainedModel {
    pub text: String,
    /// 1-based round with the best validation score
    pub best_iteration: usize,
    /// Rounds actually run before stopping
    pub total_iterations: usize,
}

impl TrainedModel {
    pub fn new(text: String, best_iteration: usize, total_iterations: usize) -> Self {
        Self {
            text,
            best_iteration,
            total_iterations,
        }
    }

    /// Number of `Tree=<n>` headers in the native text.
    pub fn tree_count(&self) -> usize {
        count_trees(&self.text)
    }
}

/// Count `Tree=<n>` header lines in LightGBM model text.
pub fn count_trees(text: &str) -> usize {
    text.lines()
        .filter(|line| {
            line.strip_prefix("Tree=")
                .map(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
                .unwrap_or(false)
        })
        .count()
}
