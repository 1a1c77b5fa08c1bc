//! Stratified partitioning and the leakage guard.
//!
//! Every statistic that looks at labels or column distributions is fit
//! through a [`LeakageGuard`] holding the ids of the evaluation partition.

use crate::error::LeakageError;
use crate::types::Transaction;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;

/// Ids of rows that must never reach a fit.
#[derive(Debug, Clone, Default)]
pub struct LeakageGuard {
    evaluation_ids: HashSet<String>,
}

impl LeakageGuard {
    pub fn new<I, S>(evaluation_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            evaluation_ids: evaluation_ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Guard for a fit that has no held-out partition.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn for_transactions(evaluation: &[Transaction]) -> Self {
        Self::new(evaluation.iter().map(|tx| tx.transaction_id.clone()))
    }

    pub fn len(&self) -> usize {
        self.evaluation_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluation_ids.is_empty()
    }

    /// Fail if any of `fit_ids` belongs to the evaluation partition.
    pub fn check<'a, I>(&self, stage: &'static str, fit_ids: I) -> Result<(), LeakageError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.evaluation_ids.is_empty() {
            return Ok(());
        }

        let mut overlapping = 0;
        let mut first_id = None;
        for id in fit_ids {
            if self.evaluation_ids.contains(id) {
                overlapping += 1;
                first_id.get_or_insert_with(|| id.to_string());
            }
        }

        match first_id {
            None => Ok(()),
            Some(first_id) => Err(LeakageError {
                stage,
                overlapping,
                first_id,
            }),
        }
    }
}

/// Disjoint train/test positions into some row collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl Split {
    pub fn train_items<T: Clone>(&self, items: &[T]) -> Vec<T> {
        select(items, &self.train)
    }

    pub fn test_items<T: Clone>(&self, items: &[T]) -> Vec<T> {
        select(items, &self.test)
    }
}

/// Clone the items at `positions`, in that order.
pub fn select<T: Clone>(items: &[T], positions: &[usize]) -> Vec<T> {
    positions.iter().map(|&i| items[i].clone()).collect()
}

fn shuffled_classes(labels: &[bool], rng: &mut StdRng) -> [Vec<usize>; 2] {
    let mut negatives = Vec::new();
    let mut positives = Vec::new();
    for (i, &label) in labels.iter().enumerate() {
        if label {
            positives.push(i);
        } else {
            negatives.push(i);
        }
    }
    negatives.shuffle(rng);
    positives.shuffle(rng);
    [negatives, positives]
}

/// Hold out `test_fraction` of each class.
pub fn stratified_split(labels: &[bool], test_fraction: f64, seed: u64) -> Split {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();

    for class in shuffled_classes(labels, &mut rng) {
        let n_test = ((class.len() as f64) * test_fraction.clamp(0.0, 1.0)).round() as usize;
        test.extend_from_slice(&class[..n_test]);
        train.extend_from_slice(&class[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    Split { train, test }
}

/// `k` folds, each class dealt round-robin so every fold keeps the overall
/// positive rate to within one row per class.
pub fn stratified_k_fold(labels: &[bool], k: usize, seed: u64) -> Vec<Split> {
    let k = k.max(2);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut folds: Vec<Vec<usize>> = vec![Vec::new(); k];

    // continue dealing where the previous class stopped so fold sizes stay even
    let mut next = 0;
    for class in shuffled_classes(labels, &mut rng) {
        for i in class {
            folds[next % k].push(i);
            next += 1;
        }
    }

    (0..k)
        .map(|held_out| {
            let mut test = folds[held_out].clone();
            test.sort_unstable();
            let mut train: Vec<usize> = folds
                .iter()
                .enumerate()
                .filter(|(fold, _)| *fold != held_out)
                .flat_map(|(_, rows)| rows.iter().copied())
                .collect();
            train.sort_unstable();
            Split { train, test }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(n: usize, every: usize) -> Vec<bool> {
        (0..n).map(|i| i % every == 0).collect()
    }

    fn positive_rate(labels: &[bool], rows: &[usize]) -> f64 {
        rows.iter().filter(|&&i| labels[i]).count() as f64 / rows.len() as f64
    }

    #[test]
    fn test_guard_detects_overlap() {
        let guard = LeakageGuard::new(["tx_3", "tx_4"]);
        assert!(guard.check("risk_encoder", ["tx_1", "tx_2"]).is_ok());

        let err = guard
            .check("risk_encoder", ["tx_1", "tx_4", "tx_3"])
            .unwrap_err();
        assert_eq!(err.overlapping, 2);
        assert_eq!(err.first_id, "tx_4");
    }

    #[test]
    fn test_unrestricted_guard_accepts_everything() {
        assert!(LeakageGuard::unrestricted().check("scaler", ["a"]).is_ok());
    }

    #[test]
    fn test_stratified_split_is_disjoint_and_balanced() {
        let y = labels(1000, 20);
        let split = stratified_split(&y, 0.2, 100);

        assert_eq!(split.train.len() + split.test.len(), 1000);
        assert_eq!(split.test.len(), 200);
        let train: HashSet<usize> = split.train.iter().copied().collect();
        assert!(split.test.iter().all(|i| !train.contains(i)));
        assert!((positive_rate(&y, &split.test) - 0.05).abs() < 1e-9);
        assert!((positive_rate(&y, &split.train) - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_split_is_reproducible() {
        let y = labels(300, 7);
        assert_eq!(stratified_split(&y, 0.25, 9), stratified_split(&y, 0.25, 9));
        assert_ne!(stratified_split(&y, 0.25, 9), stratified_split(&y, 0.25, 10));
    }

    #[test]
    fn test_k_fold_preserves_label_proportion() {
        let y = labels(503, 10);
        let overall = y.iter().filter(|&&l| l).count() as f64 / y.len() as f64;
        let folds = stratified_k_fold(&y, 5, 100);

        assert_eq!(folds.len(), 5);
        let mut seen = vec![0; y.len()];
        for fold in &folds {
            for &i in &fold.test {
                seen[i] += 1;
            }
            assert_eq!(fold.train.len() + fold.test.len(), y.len());
            // within one positive per fold
            assert!((positive_rate(&y, &fold.test) - overall).abs() <= 1.0 / fold.test.len() as f64 + 1e-9);
        }
        assert!(seen.iter().all(|&count| count == 1));
    }
}
