//! LightGBM v3 text model rendering
//!
//! The built-in booster emits the same text layout `save_model` produces so
//! the scoring runtime loads either backend's output unchanged.

use smartweight_core::artifact::format_float;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::cart::RegressionTree;

/// Everything needed to render one model file
#[derive(Debug, Clone)]
pub struct ModelText<'a> {
    pub feature_names: &'a [String],
    /// `(min, max)` per feature as seen in training data
    pub feature_ranges: &'a [(f64, f64)],
    pub trees: &'a [RegressionTree],
    /// Shrinkage recorded per tree
    pub shrinkage: f64,
    /// Rendered into the `parameters:` section in the given order
    pub parameters: &'a [(&'static str, String)],
}

impl ModelText<'_> {
    pub fn render(&self) -> String {
        let blocks: Vec<String> = self
            .trees
            .iter()
            .enumerate()
            .map(|(idx, tree)| render_tree(idx, tree, if idx == 0 { 1.0 } else { self.shrinkage }))
            .collect();

        let mut out = String::new();
        out.push_str("tree\n");
        out.push_str("version=v3\n");
        out.push_str("num_class=1\n");
        out.push_str("num_tree_per_iteration=1\n");
        out.push_str("label_index=0\n");
        let _ = writeln!(out, "max_feature_idx={}", self.feature_names.len().saturating_sub(1));
        out.push_str("objective=regression\n");
        let _ = writeln!(out, "feature_names={}", self.feature_names.join(" "));
        let _ = writeln!(out, "feature_infos={}", self.feature_infos());
        let _ = writeln!(
            out,
            "tree_sizes={}",
            blocks.iter().map(|b| b.len().to_string()).collect::<Vec<_>>().join(" ")
        );
        out.push('\n');

        for block in &blocks {
            out.push_str(block);
        }

        out.push_str("end of trees\n\n");
        out.push_str("feature_importances:\n");
        for (name, count) in self.feature_importances() {
            let _ = writeln!(out, "{}={}", name, count);
        }
        out.push('\n');

        out.push_str("parameters:\n");
        for (key, value) in self.parameters {
            let _ = writeln!(out, "[{}: {}]", key, value);
        }
        out.push_str("end of parameters\n\n");
        out.push_str("pandas_categorical:null\n");
        out
    }

    fn feature_infos(&self) -> String {
        self.feature_ranges
            .iter()
            .map(|&(min, max)| {
                if min.is_finite() && max.is_finite() && min < max {
                    format!("[{}:{}]", format_float(min), format_float(max))
                } else {
                    "none".to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Split counts per feature, most used first, ties by feature index
    fn feature_importances(&self) -> Vec<(&str, usize)> {
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for tree in self.trees {
            for &feature in &tree.split_feature {
                *counts.entry(feature).or_default() += 1;
            }
        }

        let mut ranked: Vec<(usize, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .filter_map(|(feature, count)| {
                self.feature_names.get(feature).map(|name| (name.as_str(), count))
            })
            .collect()
    }
}

fn render_tree(idx: usize, tree: &RegressionTree, shrinkage: f64) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Tree={}", idx);
    let _ = writeln!(out, "num_leaves={}", tree.num_leaves());
    out.push_str("num_cat=0\n");
    let _ = writeln!(out, "split_feature={}", join(&tree.split_feature, |v| v.to_string()));
    let _ = writeln!(out, "split_gain={}", join(&tree.split_gain, |v| format_float(*v)));
    let _ = writeln!(out, "threshold={}", join(&tree.threshold, |v| format_float(*v)));
    // 2 = numerical split with default_left set (missing values go left)
    let _ = writeln!(out, "decision_type={}", join(&tree.split_feature, |_| "2".to_string()));
    let _ = writeln!(out, "left_child={}", join(&tree.left_child, |v| v.to_string()));
    let _ = writeln!(out, "right_child={}", join(&tree.right_child, |v| v.to_string()));
    let _ = writeln!(out, "leaf_value={}", join(&tree.leaf_value, |v| format_float(*v)));
    let _ = writeln!(out, "leaf_weight={}", join(&tree.leaf_weight, |v| format_float(*v)));
    let _ = writeln!(out, "leaf_count={}", join(&tree.leaf_count, |v| v.to_string()));
    let _ = writeln!(out, "internal_value={}", join(&tree.internal_value, |v| format_float(*v)));
    let _ = writeln!(out, "internal_weight={}", join(&tree.internal_weight, |v| format_float(*v)));
    let _ = writeln!(out, "internal_count={}", join(&tree.internal_count, |v| v.to_string()));
    out.push_str("is_linear=0\n");
    let _ = writeln!(out, "shrinkage={}", format_float(shrinkage));
    out.push_str("\n\n");
    out
}

fn join<T>(values: &[T], fmt: impl Fn(&T) -> String) -> String {
    values.iter().map(fmt).collect::<Vec<_>>().join(" ")
}
