//! Regression tree builder
//!
//! Leaf-wise (best-first) exact-greedy tree growth over least-squares
//! gradients. The tree is stored in the split/leaf array layout of the
//! LightGBM text format: internal nodes are numbered in creation order and a
//! child reference `c < 0` points at leaf `!c`.

use crate::deterministic::SplitTieBreaker;

/// Training parameters for a single tree
#[derive(Clone, Debug)]
pub struct TreeConfig {
    pub num_leaves: usize,
    pub max_depth: Option<usize>,
    pub min_data_in_leaf: usize,
    pub lambda_l2: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            num_leaves: 31,
            max_depth: None,
            min_data_in_leaf: 20,
            lambda_l2: 0.0,
        }
    }
}

/// A fitted regression tree
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegressionTree {
    pub split_feature: Vec<usize>,
    pub split_gain: Vec<f64>,
    pub threshold: Vec<f64>,
    pub left_child: Vec<i32>,
    pub right_child: Vec<i32>,
    pub internal_value: Vec<f64>,
    pub internal_weight: Vec<f64>,
    pub internal_count: Vec<usize>,
    pub leaf_value: Vec<f64>,
    pub leaf_weight: Vec<f64>,
    pub leaf_count: Vec<usize>,
}

impl RegressionTree {
    pub fn num_leaves(&self) -> usize {
        self.leaf_value.len()
    }

    /// Route a feature vector to its leaf index
    pub fn leaf_index(&self, features: &[f64]) -> usize {
        if self.split_feature.is_empty() {
            return 0;
        }

        let mut node = 0i32;
        while node >= 0 {
            let idx = node as usize;
            let value = features.get(self.split_feature[idx]).copied().unwrap_or(0.0);
            node = if value <= self.threshold[idx] {
                self.left_child[idx]
            } else {
                self.right_child[idx]
            };
        }
        !node as usize
    }

    /// Evaluate the tree on a feature vector
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.leaf_value[self.leaf_index(features)]
    }

    /// Multiply every output by `factor`
    pub fn shrink(&mut self, factor: f64) {
        self.leaf_value.iter_mut().for_each(|v| *v *= factor);
        self.internal_value.iter_mut().for_each(|v| *v *= factor);
    }

    /// Add `bias` to every output
    pub fn add_bias(&mut self, bias: f64) {
        self.leaf_value.iter_mut().for_each(|v| *v += bias);
        self.internal_value.iter_mut().for_each(|v| *v += bias);
    }
}

/// Best split found for one leaf
#[derive(Debug, Clone)]
struct SplitCandidate {
    feature_idx: usize,
    threshold: f64,
    gain: f64,
    left_rows: Vec<usize>,
    right_rows: Vec<usize>,
    tie_breaker: SplitTieBreaker,
}

/// Leaf under construction
struct OpenLeaf {
    rows: Vec<usize>,
    depth: usize,
    /// Internal node pointing at this leaf, and whether it is the left child
    parent: Option<(usize, bool)>,
    best: Option<SplitCandidate>,
}

/// Build a regression tree from per-row gradients and hessians
pub struct CartBuilder<'a> {
    config: &'a TreeConfig,
    features: &'a [Vec<f64>],
    gradients: &'a [f64],
    hessians: &'a [f64],
    feature_count: usize,
}

impl<'a> CartBuilder<'a> {
    pub fn new(
        features: &'a [Vec<f64>],
        gradients: &'a [f64],
        hessians: &'a [f64],
        config: &'a TreeConfig,
    ) -> Self {
        debug_assert_eq!(features.len(), gradients.len());
        debug_assert_eq!(features.len(), hessians.len());

        let feature_count = features.first().map(Vec::len).unwrap_or(0);

        Self {
            config,
            features,
            gradients,
            hessians,
            feature_count,
        }
    }

    /// Grow the tree leaf-wise until `num_leaves` is reached or no leaf has
    /// a split with positive gain. Leaf values are the raw Newton step
    /// `-G / (H + lambda_l2)`.
    pub fn build(&self) -> RegressionTree {
        let mut tree = RegressionTree::default();
        let mut leaves = vec![OpenLeaf {
            rows: (0..self.features.len()).collect(),
            depth: 0,
            parent: None,
            best: None,
        }];
        leaves[0].best = self.find_best_split(&leaves[0], 0);

        while leaves.len() < self.config.num_leaves.max(1) {
            // Highest gain wins, lowest leaf index on ties
            let mut chosen: Option<usize> = None;
            for (idx, leaf) in leaves.iter().enumerate() {
                if let Some(candidate) = &leaf.best {
                    let better = match chosen.and_then(|c| leaves[c].best.as_ref()) {
                        None => true,
                        Some(current) => candidate.gain > current.gain,
                    };
                    if better {
                        chosen = Some(idx);
                    }
                }
            }
            let Some(leaf_idx) = chosen else {
                break;
            };
            let Some(split) = leaves[leaf_idx].best.take() else {
                break;
            };

            let node_idx = tree.split_feature.len();
            let (sum_g, sum_h) = self.sums(&leaves[leaf_idx].rows);
            tree.split_feature.push(split.feature_idx);
            tree.split_gain.push(split.gain);
            tree.threshold.push(split.threshold);
            tree.internal_value.push(self.output(sum_g, sum_h));
            tree.internal_weight.push(sum_h);
            tree.internal_count.push(leaves[leaf_idx].rows.len());

            // Left child keeps the leaf index, right child is appended
            let right_idx = leaves.len();
            tree.left_child.push(!(leaf_idx as i32));
            tree.right_child.push(!(right_idx as i32));

            if let Some((parent, is_left)) = leaves[leaf_idx].parent {
                if is_left {
                    tree.left_child[parent] = node_idx as i32;
                } else {
                    tree.right_child[parent] = node_idx as i32;
                }
            }

            let depth = leaves[leaf_idx].depth + 1;
            leaves[leaf_idx] = OpenLeaf {
                rows: split.left_rows,
                depth,
                parent: Some((node_idx, true)),
                best: None,
            };
            leaves.push(OpenLeaf {
                rows: split.right_rows,
                depth,
                parent: Some((node_idx, false)),
                best: None,
            });

            leaves[leaf_idx].best = self.find_best_split(&leaves[leaf_idx], leaf_idx);
            leaves[right_idx].best = self.find_best_split(&leaves[right_idx], right_idx);
        }

        for leaf in &leaves {
            let (sum_g, sum_h) = self.sums(&leaf.rows);
            tree.leaf_value.push(self.output(sum_g, sum_h));
            tree.leaf_weight.push(sum_h);
            tree.leaf_count.push(leaf.rows.len());
        }

        tree
    }

    /// Exact-greedy search over every feature's sorted distinct values
    fn find_best_split(&self, leaf: &OpenLeaf, leaf_idx: usize) -> Option<SplitCandidate> {
        if let Some(max_depth) = self.config.max_depth {
            if leaf.depth >= max_depth {
                return None;
            }
        }
        let min_leaf = self.config.min_data_in_leaf.max(1);
        if leaf.rows.len() < 2 * min_leaf {
            return None;
        }

        let (total_g, total_h) = self.sums(&leaf.rows);
        let parent_score = self.score(total_g, total_h);
        let mut best: Option<SplitCandidate> = None;

        for feature_idx in 0..self.feature_count {
            let mut sorted = leaf.rows.clone();
            sorted.sort_by(|&a, &b| {
                self.features[a][feature_idx]
                    .total_cmp(&self.features[b][feature_idx])
                    .then(a.cmp(&b))
            });

            let mut left_g = 0.0;
            let mut left_h = 0.0;
            let mut rank = 0usize;

            for pos in 0..sorted.len() - 1 {
                let row = sorted[pos];
                left_g += self.gradients[row];
                left_h += self.hessians[row];

                let current = self.features[row][feature_idx];
                let next = self.features[sorted[pos + 1]][feature_idx];
                if current == next {
                    continue;
                }
                rank += 1;

                let left_len = pos + 1;
                if left_len < min_leaf || sorted.len() - left_len < min_leaf {
                    continue;
                }

                let gain = self.score(left_g, left_h)
                    + self.score(total_g - left_g, total_h - left_h)
                    - parent_score;
                if gain.is_nan() || gain <= 0.0 {
                    continue;
                }

                let tie_breaker = SplitTieBreaker::new(feature_idx, rank, leaf_idx);
                let improves = match &best {
                    None => true,
                    Some(current_best) => {
                        gain > current_best.gain
                            || (gain == current_best.gain && tie_breaker < current_best.tie_breaker)
                    }
                };
                if !improves {
                    continue;
                }

                let threshold = midpoint(current, next);
                let (left_rows, right_rows) = self.partition(&leaf.rows, feature_idx, threshold);
                best = Some(SplitCandidate {
                    feature_idx,
                    threshold,
                    gain,
                    left_rows,
                    right_rows,
                    tie_breaker,
                });
            }
        }

        best
    }

    /// Split rows on `value <= threshold`, preserving row order
    fn partition(&self, rows: &[usize], feature_idx: usize, threshold: f64) -> (Vec<usize>, Vec<usize>) {
        rows.iter()
            .copied()
            .partition(|&row| self.features[row][feature_idx] <= threshold)
    }

    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter().fold((0.0, 0.0), |(g, h), &row| {
            (g + self.gradients[row], h + self.hessians[row])
        })
    }

    /// G² / (H + λ)
    fn score(&self, sum_g: f64, sum_h: f64) -> f64 {
        let denom = sum_h + self.config.lambda_l2;
        if denom > 0.0 {
            sum_g * sum_g / denom
        } else {
            0.0
        }
    }

    /// -G / (H + λ)
    fn output(&self, sum_g: f64, sum_h: f64) -> f64 {
        let denom = sum_h + self.config.lambda_l2;
        if denom > 0.0 {
            -sum_g / denom
        } else {
            0.0
        }
    }
}

/// Threshold strictly below `upper` and not below `lower`
fn midpoint(lower: f64, upper: f64) -> f64 {
    let mid = lower + (upper - lower) / 2.0;
    if mid < upper && mid >= lower {
        mid
    } else {
        lower
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(num_leaves: usize, min_data_in_leaf: usize) -> TreeConfig {
        TreeConfig {
            num_leaves,
            max_depth: None,
            min_data_in_leaf,
            lambda_l2: 0.0,
        }
    }

    #[test]
    fn test_simple_tree_separates_targets() {
        let features = vec![vec![1.0, 5.0], vec![2.0, 5.0], vec![3.0, 5.0], vec![4.0, 5.0]];
        // gradient = prediction - target with prediction 0
        let gradients = vec![1.0, 1.0, -1.0, -1.0];
        let hessians = vec![1.0; 4];
        let cfg = config(2, 1);

        let tree = CartBuilder::new(&features, &gradients, &hessians, &cfg).build();

        assert_eq!(tree.num_leaves(), 2);
        assert_eq!(tree.split_feature, vec![0]);
        assert_eq!(tree.threshold, vec![2.5]);
        assert_eq!(tree.left_child, vec![!0]);
        assert_eq!(tree.right_child, vec![!1]);
        assert_eq!(tree.predict(&[1.5, 5.0]), -1.0);
        assert_eq!(tree.predict(&[3.5, 5.0]), 1.0);
        assert_eq!(tree.leaf_count, vec![2, 2]);
    }

    #[test]
    fn test_leaf_only_tree() {
        let features = vec![vec![1.0]];
        let gradients = vec![-2.0];
        let hessians = vec![1.0];
        let cfg = TreeConfig::default();

        let tree = CartBuilder::new(&features, &gradients, &hessians, &cfg).build();

        assert_eq!(tree.num_leaves(), 1);
        assert!(tree.split_feature.is_empty());
        assert_eq!(tree.predict(&[100.0]), 2.0);
    }

    #[test]
    fn test_constant_feature_gives_no_split() {
        let features = vec![vec![3.0]; 8];
        let gradients = vec![1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        let hessians = vec![1.0; 8];
        let cfg = config(8, 1);

        let tree = CartBuilder::new(&features, &gradients, &hessians, &cfg).build();
        assert_eq!(tree.num_leaves(), 1);
    }

    #[test]
    fn test_leaf_wise_growth_links_children() {
        let features: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64]).collect();
        let gradients = vec![4.0, 4.0, 1.0, 1.0, -1.0, -1.0, -4.0, -4.0];
        let hessians = vec![1.0; 8];
        let cfg = config(4, 1);

        let tree = CartBuilder::new(&features, &gradients, &hessians, &cfg).build();

        assert_eq!(tree.num_leaves(), 4);
        assert_eq!(tree.split_feature.len(), 3);
        // Every row lands in a leaf whose value is minus its gradient
        for (row, g) in features.iter().zip(&gradients) {
            assert_eq!(tree.predict(row), -g);
        }
        assert_eq!(tree.leaf_count.iter().sum::<usize>(), 8);
    }

    #[test]
    fn test_min_data_in_leaf_respected() {
        let features: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64]).collect();
        let gradients = vec![10.0, -1.0, -1.0, -1.0, -1.0, -1.0];
        let hessians = vec![1.0; 6];
        let cfg = config(2, 3);

        let tree = CartBuilder::new(&features, &gradients, &hessians, &cfg).build();
        assert_eq!(tree.threshold, vec![2.5]);
    }

    #[test]
    fn test_midpoint_between_adjacent_floats() {
        let lower = 1.0f64;
        let upper = f64::from_bits(lower.to_bits() + 1);
        let t = midpoint(lower, upper);
        assert!(t >= lower && t < upper);
    }
}
