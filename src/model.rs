//! Random forest classifier: bootstrap-sampled CART trees scored by Gini
//! impurity, averaging leaf class frequencies into a churn probability

use crate::error::ChurnError;
use linfa::Dataset;
use ndarray::{Array1, Array2, ArrayView1, Axis, Ix1};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Forest hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForestParams {
    /// Number of trees in the ensemble
    pub n_estimators: usize,
    /// Maximum tree depth; `None` grows until leaves are pure
    pub max_depth: Option<usize>,
    /// Minimum samples a node needs before it may split
    pub min_samples_split: usize,
    /// Base seed; tree `i` samples with `seed + i`
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

impl ForestParams {
    pub fn new(n_estimators: usize, max_depth: Option<usize>, seed: u64) -> Self {
        Self {
            n_estimators,
            max_depth,
            seed,
            ..Self::default()
        }
    }

    pub fn check(&self) -> crate::Result<()> {
        if self.n_estimators == 0 {
            return Err(ChurnError::invalid_config("n_estimators must be at least 1"));
        }
        if self.max_depth == Some(0) {
            return Err(ChurnError::invalid_config("max_depth must be at least 1"));
        }
        if self.min_samples_split < 2 {
            return Err(ChurnError::invalid_config(
                "min_samples_split must be at least 2",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ForestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max_depth {
            Some(depth) => write!(f, "n_estimators={}, max_depth={}", self.n_estimators, depth),
            None => write!(f, "n_estimators={}, max_depth=None", self.n_estimators),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        probability: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Binary classification tree stored as a flat node arena; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

struct PendingNode {
    id: usize,
    samples: Vec<usize>,
    depth: usize,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl DecisionTree {
    /// Grow a tree over `samples` (row indices into `x`, repeats allowed).
    fn grow<R: Rng>(
        x: &Array2<f64>,
        y: &Array1<usize>,
        samples: Vec<usize>,
        params: &ForestParams,
        max_features: usize,
        rng: &mut R,
    ) -> Self {
        let mut nodes = vec![Node::Leaf { probability: 0.0 }];
        let mut pending = vec![PendingNode {
            id: 0,
            samples,
            depth: 0,
        }];

        while let Some(PendingNode { id, samples, depth }) = pending.pop() {
            let positives = samples.iter().filter(|&&i| y[i] == 1).count();
            let probability = positives as f64 / samples.len() as f64;

            let depth_exhausted = params.max_depth.is_some_and(|max| depth >= max);
            let pure = positives == 0 || positives == samples.len();
            if depth_exhausted || pure || samples.len() < params.min_samples_split {
                nodes[id] = Node::Leaf { probability };
                continue;
            }

            let features = sample(rng, x.ncols(), max_features.min(x.ncols())).into_vec();
            let Some(best) = best_split(x, y, &samples, &features) else {
                nodes[id] = Node::Leaf { probability };
                continue;
            };

            let (left, right): (Vec<usize>, Vec<usize>) = samples
                .into_iter()
                .partition(|&i| x[[i, best.feature]] <= best.threshold);

            let left_id = nodes.len();
            let right_id = left_id + 1;
            nodes.push(Node::Leaf { probability: 0.0 });
            nodes.push(Node::Leaf { probability: 0.0 });
            nodes[id] = Node::Split {
                feature: best.feature,
                threshold: best.threshold,
                left: left_id,
                right: right_id,
            };

            pending.push(PendingNode {
                id: right_id,
                samples: right,
                depth: depth + 1,
            });
            pending.push(PendingNode {
                id: left_id,
                samples: left,
                depth: depth + 1,
            });
        }

        Self { nodes }
    }

    /// Positive-class frequency of the leaf `row` lands in
    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { probability } => return *probability,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Longest root-to-leaf path, in edges
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            if let Node::Split { left, right, .. } = &self.nodes[id] {
                stack.push((*left, depth + 1));
                stack.push((*right, depth + 1));
            }
        }
        deepest
    }
}

fn gini(positives: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positives as f64 / total as f64;
    2.0 * p * (1.0 - p)
}

/// Lowest weighted Gini impurity split over the candidate features.
///
/// Thresholds sit midway between consecutive distinct values; `None` when
/// every candidate feature is constant over `samples`.
fn best_split(
    x: &Array2<f64>,
    y: &Array1<usize>,
    samples: &[usize],
    features: &[usize],
) -> Option<BestSplit> {
    let total = samples.len();
    let total_positives = samples.iter().filter(|&&i| y[i] == 1).count();
    let mut best: Option<BestSplit> = None;

    let mut sorted: Vec<(f64, usize)> = Vec::with_capacity(total);
    for &feature in features {
        sorted.clear();
        sorted.extend(samples.iter().map(|&i| (x[[i, feature]], y[i])));
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_positives = 0;
        for split in 1..total {
            left_positives += sorted[split - 1].1;
            let (below, above) = (sorted[split - 1].0, sorted[split].0);
            if below == above {
                continue;
            }

            let right_positives = total_positives - left_positives;
            let impurity = (split as f64 * gini(left_positives, split)
                + (total - split) as f64 * gini(right_positives, total - split))
                / total as f64;

            if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                // adjacent floats can round the midpoint up to `above`
                let midpoint = below + (above - below) / 2.0;
                best = Some(BestSplit {
                    feature,
                    threshold: if midpoint < above { midpoint } else { below },
                    impurity,
                });
            }
        }
    }

    best
}

/// Fitted random forest bound to a fixed number of input features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fit a forest on a dataset with binary (0/1) targets
    ///
    /// Each tree sees a bootstrap sample of the rows and considers
    /// `sqrt(n_features)` randomly chosen features at every split.
    pub fn fit(dataset: &Dataset<f64, usize, Ix1>, params: &ForestParams) -> crate::Result<Self> {
        params.check()?;
        let x = dataset.records();
        let y = dataset.targets();

        if x.nrows() == 0 {
            return Err(ChurnError::invalid_input("cannot fit a forest on zero rows"));
        }
        if x.ncols() == 0 {
            return Err(ChurnError::invalid_input("cannot fit a forest on zero features"));
        }
        if let Some(bad) = y.iter().find(|&&label| label > 1) {
            return Err(ChurnError::invalid_input(format!(
                "targets must be 0 or 1, found {bad}"
            )));
        }

        let n_rows = x.nrows();
        let max_features = ((x.ncols() as f64).sqrt() as usize).max(1);

        let trees = (0..params.n_estimators)
            .map(|t| {
                let mut rng = ChaCha8Rng::seed_from_u64(params.seed.wrapping_add(t as u64));
                let bootstrap: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
                DecisionTree::grow(x, y, bootstrap, params, max_features, &mut rng)
            })
            .collect();

        Ok(Self {
            params: *params,
            n_features: x.ncols(),
            trees,
        })
    }

    /// Churn probability for one feature row
    pub fn predict_proba_row(&self, row: ArrayView1<f64>) -> crate::Result<f64> {
        if row.len() != self.n_features {
            return Err(ChurnError::invalid_input(format!(
                "expected {} features, got {}",
                self.n_features,
                row.len()
            )));
        }
        let sum: f64 = self.trees.iter().map(|tree| tree.predict_row(row)).sum();
        Ok(sum / self.trees.len() as f64)
    }

    /// Churn probability for every row of `x`
    pub fn predict_proba(&self, x: &Array2<f64>) -> crate::Result<Array1<f64>> {
        x.axis_iter(Axis(0))
            .map(|row| self.predict_proba_row(row))
            .collect::<crate::Result<Vec<f64>>>()
            .map(Array1::from)
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// Churn driven by the first feature; the second is noise
    fn create_test_dataset() -> Dataset<f64, usize, Ix1> {
        let records = array![
            [1.0, 5.0],
            [2.0, 3.0],
            [3.0, 9.0],
            [4.0, 1.0],
            [5.0, 7.0],
            [6.0, 2.0],
            [7.0, 8.0],
            [8.0, 4.0],
            [9.0, 6.0],
            [10.0, 0.0],
        ];
        let targets = array![0, 0, 0, 0, 0, 1, 1, 1, 1, 1];
        Dataset::new(records, targets)
    }

    #[test]
    fn test_gini() {
        assert_eq!(gini(0, 10), 0.0);
        assert_eq!(gini(10, 10), 0.0);
        assert!((gini(5, 10) - 0.5).abs() < 1e-12);
        assert_eq!(gini(0, 0), 0.0);
    }

    #[test]
    fn test_best_split_finds_separating_threshold() {
        let dataset = create_test_dataset();
        let samples: Vec<usize> = (0..10).collect();
        let best = best_split(dataset.records(), dataset.targets(), &samples, &[0, 1]).unwrap();

        assert_eq!(best.feature, 0);
        assert!((best.threshold - 5.5).abs() < 1e-12);
        assert_eq!(best.impurity, 0.0);
    }

    #[test]
    fn test_best_split_constant_feature() {
        let x = array![[1.0], [1.0], [1.0]];
        let y = array![0, 1, 0];
        assert!(best_split(&x, &y, &[0, 1, 2], &[0]).is_none());
    }

    #[test]
    fn test_fit_separates_classes() {
        let dataset = create_test_dataset();
        let forest = RandomForest::fit(&dataset, &ForestParams::new(25, None, 7)).unwrap();

        assert_eq!(forest.trees().len(), 25);
        assert_eq!(forest.n_features(), 2);

        let probs = forest.predict_proba(&array![[1.0, 5.0], [10.0, 5.0]]).unwrap();
        assert!(probs[0] < 0.5);
        assert!(probs[1] > 0.5);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_fit_is_deterministic() {
        let dataset = create_test_dataset();
        let params = ForestParams::new(10, Some(3), 42);
        let a = RandomForest::fit(&dataset, &params).unwrap();
        let b = RandomForest::fit(&dataset, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_max_depth_is_respected() {
        let dataset = create_test_dataset();
        let forest = RandomForest::fit(&dataset, &ForestParams::new(10, Some(1), 3)).unwrap();
        assert!(forest.trees().iter().all(|tree| tree.depth() <= 1));
    }

    #[test]
    fn test_predict_rejects_wrong_width() {
        let dataset = create_test_dataset();
        let forest = RandomForest::fit(&dataset, &ForestParams::new(3, None, 1)).unwrap();
        assert!(forest.predict_proba(&array![[1.0, 2.0, 3.0]]).is_err());
    }

    #[test]
    fn test_invalid_params() {
        let dataset = create_test_dataset();
        assert!(RandomForest::fit(&dataset, &ForestParams::new(0, None, 1)).is_err());
        assert!(RandomForest::fit(&dataset, &ForestParams::new(5, Some(0), 1)).is_err());
    }

    #[test]
    fn test_non_binary_targets_rejected() {
        let dataset = Dataset::new(array![[1.0], [2.0]], array![0, 2]);
        assert!(matches!(
            RandomForest::fit(&dataset, &ForestParams::default()),
            Err(ChurnError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_forest_serde_round_trip() {
        let dataset = create_test_dataset();
        let forest = RandomForest::fit(&dataset, &ForestParams::new(4, Some(2), 9)).unwrap();
        let json = serde_json::to_string(&forest).unwrap();
        let restored: RandomForest = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, forest);
    }
}
