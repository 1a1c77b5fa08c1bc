//! Weighted binary decision tree used as the forest's base learner.
//!
//! Nodes live in a flat arena; a split sends rows with `x <= threshold` left.

use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Impurity measure, fixed when the forest is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitCriterion {
    #[default]
    Gini,
    Entropy,
}

impl SplitCriterion {
    /// Impurity of a node holding the given class weights.
    pub fn impurity(self, negative: f64, positive: f64) -> f64 {
        let total = negative + positive;
        if total <= 0.0 {
            return 0.0;
        }
        let p = positive / total;
        let q = 1.0 - p;
        match self {
            SplitCriterion::Gini => 1.0 - p * p - q * q,
            SplitCriterion::Entropy => {
                let term = |x: f64| if x > 0.0 { -x * x.log2() } else { 0.0 };
                term(p) + term(q)
            }
        }
    }
}

/// Number of candidate features drawn at each split.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxFeatures {
    #[default]
    Sqrt,
    All,
    Fraction(f64),
}

impl MaxFeatures {
    pub fn resolve(self, n_features: usize) -> usize {
        let k = match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().round() as usize,
            MaxFeatures::All => n_features,
            MaxFeatures::Fraction(f) => ((n_features as f64) * f).round() as usize,
        };
        k.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub criterion: SplitCriterion,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_samples_leaf: 25,
            max_features: MaxFeatures::Sqrt,
            criterion: SplitCriterion::Gini,
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

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    child_impurity: f64,
}

/// A fitted tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

struct Builder<'a> {
    x: ArrayView2<'a, f64>,
    y: &'a [bool],
    weights: &'a [f64],
    params: &'a TreeParams,
    n_candidates: usize,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

impl DecisionTree {
    /// Fit on the rows with positive weight. `weights` carries both the
    /// bootstrap multiplicity and the class weight of each row.
    pub fn fit(
        x: ArrayView2<'_, f64>,
        y: &[bool],
        weights: &[f64],
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let n_features = x.ncols();
        let rows: Vec<usize> = (0..x.nrows()).filter(|&i| weights[i] > 0.0).collect();

        let mut builder = Builder {
            x: x.reborrow(),
            y,
            weights,
            params,
            n_candidates: params.max_features.resolve(n_features),
            nodes: Vec::new(),
            importances: vec![0.0; n_features],
        };
        builder.grow(rows, 0, rng);

        let mut importances = builder.importances;
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        Self {
            nodes: builder.nodes,
            importances,
        }
    }

    /// Probability of the positive class for one processed row.
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { probability } => return *probability,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Impurity decrease per input column, normalized to sum to 1.
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }
}

impl<'a> Builder<'a> {
    fn class_weights(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter().fold((0.0, 0.0), |(neg, pos), &i| {
            if self.y[i] {
                (neg, pos + self.weights[i])
            } else {
                (neg + self.weights[i], pos)
            }
        })
    }

    fn leaf(&mut self, negative: f64, positive: f64) -> usize {
        let total = negative + positive;
        let probability = if total > 0.0 { positive / total } else { 0.0 };
        self.nodes.push(Node::Leaf { probability });
        self.nodes.len() - 1
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let (negative, positive) = self.class_weights(&rows);
        let min_leaf = self.params.min_samples_leaf.max(1);

        if depth >= self.params.max_depth
            || rows.len() < 2 * min_leaf
            || negative == 0.0
            || positive == 0.0
        {
            return self.leaf(negative, positive);
        }

        let parent_impurity = self.params.criterion.impurity(negative, positive) * (negative + positive);
        let best = match self.best_split(&rows, rng) {
            Some(split) if parent_impurity - split.child_impurity > 1e-12 => split,
            _ => return self.leaf(negative, positive),
        };

        self.importances[best.feature] += parent_impurity - best.child_impurity;

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&i| self.x[[i, best.feature]] <= best.threshold);

        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { probability: 0.0 });
        let left = self.grow(left_rows, depth + 1, rng);
        let right = self.grow(right_rows, depth + 1, rng);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        idx
    }

    /// Lowest weighted child impurity over a random subset of features.
    /// Candidates are visited in shuffled order and only a strictly better
    /// split replaces the incumbent, so ties resolve through the seed.
    fn best_split(&self, rows: &[usize], rng: &mut StdRng) -> Option<SplitCandidate> {
        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        features.shuffle(rng);

        let min_leaf = self.params.min_samples_leaf.max(1);
        let criterion = self.params.criterion;
        let (total_neg, total_pos) = self.class_weights(rows);
        let mut best: Option<SplitCandidate> = None;
        let mut sorted = rows.to_vec();

        for &feature in features.iter().take(self.n_candidates) {
            sorted.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let (mut left_neg, mut left_pos) = (0.0, 0.0);
            for i in 0..sorted.len() - 1 {
                let row = sorted[i];
                if self.y[row] {
                    left_pos += self.weights[row];
                } else {
                    left_neg += self.weights[row];
                }

                let here = self.x[[row, feature]];
                let next = self.x[[sorted[i + 1], feature]];
                let left_count = i + 1;
                if here >= next || left_count < min_leaf || sorted.len() - left_count < min_leaf {
                    continue;
                }

                let (right_neg, right_pos) = (total_neg - left_neg, total_pos - left_pos);
                let child_impurity = criterion.impurity(left_neg, left_pos) * (left_neg + left_pos)
                    + criterion.impurity(right_neg, right_pos) * (right_neg + right_pos);

                if best.map_or(true, |b| child_impurity < b.child_impurity) {
                    let mut threshold = here + (next - here) / 2.0;
                    if threshold >= next {
                        threshold = here;
                    }
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        child_impurity,
                    });
                }
            }
        }
        best
    }
}
