//! Bagged decision trees with per-tree seeds.
//!
//! Each tree draws its bootstrap sample and split features from an RNG seeded
//! by `(seed, tree index)`, so trees train independently in parallel and the
//! fitted forest does not depend on the thread count.

use crate::models::tree::{DecisionTree, TreeParams};
use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Sample reweighting against label imbalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassWeight {
    /// `n / (2 * n_class)` for each class
    #[default]
    Balanced,
    Uniform,
}

impl ClassWeight {
    /// `(negative, positive)` weights for the given labels.
    pub fn weights(self, y: &[bool]) -> (f64, f64) {
        match self {
            ClassWeight::Uniform => (1.0, 1.0),
            ClassWeight::Balanced => {
                let n = y.len() as f64;
                let positives = y.iter().filter(|&&l| l).count() as f64;
                let negatives = n - positives;
                let balanced = |count: f64| if count > 0.0 { n / (2.0 * count) } else { 0.0 };
                (balanced(negatives), balanced(positives))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub tree: TreeParams,
    pub class_weight: ClassWeight,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            tree: TreeParams::default(),
            class_weight: ClassWeight::Balanced,
            seed: 100,
        }
    }
}

/// SplitMix64 finalizer; turns `(seed, tree)` into well-spread sub-seeds.
fn tree_seed(seed: u64, tree: usize) -> u64 {
    let mut z = seed.wrapping_add((tree as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
    importances: Vec<f64>,
}

impl RandomForest {
    pub fn fit(x: ArrayView2<'_, f64>, y: &[bool], params: &ForestParams) -> Self {
        let n = x.nrows();
        let n_features = x.ncols();
        let (w_neg, w_pos) = params.class_weight.weights(y);

        let trees: Vec<DecisionTree> = (0..params.n_trees.max(1))
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(tree_seed(params.seed, t));
                let mut weights = vec![0.0; n];
                for _ in 0..n {
                    weights[rng.gen_range(0..n)] += 1.0;
                }
                for (w, &label) in weights.iter_mut().zip(y) {
                    *w *= if label { w_pos } else { w_neg };
                }
                DecisionTree::fit(x, y, &weights, &params.tree, &mut rng)
            })
            .collect();

        let mut importances = vec![0.0; n_features];
        for tree in &trees {
            for (acc, v) in importances.iter_mut().zip(tree.feature_importances()) {
                *acc += v;
            }
        }
        importances
            .iter_mut()
            .for_each(|v| *v /= trees.len() as f64);

        debug!(
            trees = trees.len(),
            rows = n,
            features = n_features,
            mean_leaves = trees.iter().map(|t| t.n_leaves()).sum::<usize>() as f64 / trees.len() as f64,
            "Random forest fitted"
        );

        Self {
            trees,
            n_features,
            importances,
        }
    }

    /// Mean positive-class probability across trees.
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
        (total / self.trees.len() as f64).clamp(0.0, 1.0)
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Vec<f64> {
        (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row = x.row(i);
                match row.as_slice() {
                    Some(slice) => self.predict_row(slice),
                    None => self.predict_row(&row.to_vec()),
                }
            })
            .collect()
    }

    /// Mean decrease in impurity per processed column.
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}
