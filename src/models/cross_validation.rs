//! Stratified k-fold evaluation over the training partition.
//!
//! Every fold refits the risk encoder and the classifier on its own training
//! rows, guarded against its held-out rows. Held-out scores from all folds
//! form the out-of-fold score set used for threshold selection.

use crate::error::{LeakageError, ThresholdError};
use crate::features::{FeatureAssembler, RiskEncoder, TemporalFeatures};
use crate::metrics::{ClassificationReport, Evaluator};
use crate::models::classifier::FraudClassifier;
use crate::models::forest::ForestParams;
use crate::partition::{select, stratified_k_fold, LeakageGuard};
use crate::types::Transaction;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Threshold used for per-fold reports.
pub const FOLD_REPORT_THRESHOLD: f64 = 0.5;

#[derive(Debug, Error)]
pub enum CrossValidationError {
    #[error(transparent)]
    Leakage(#[from] LeakageError),

    #[error("fold {fold}: {source}")]
    Evaluation {
        fold: usize,
        #[source]
        source: ThresholdError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldReport {
    pub fold: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub test_positives: usize,
    pub report: ClassificationReport,
}

/// Held-out scores paired with their labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutOfFoldScores {
    pub transaction_ids: Vec<String>,
    pub labels: Vec<bool>,
    pub scores: Vec<f64>,
}

impl OutOfFoldScores {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossValidation {
    pub folds: Vec<FoldReport>,
    pub out_of_fold: OutOfFoldScores,
    /// Report over all out-of-fold scores at [`FOLD_REPORT_THRESHOLD`]
    pub pooled: ClassificationReport,
}

impl CrossValidation {
    pub fn mean_f1(&self) -> f64 {
        if self.folds.is_empty() {
            return 0.0;
        }
        self.folds.iter().map(|f| f.report.f1).sum::<f64>() / self.folds.len() as f64
    }
}

/// Run `k`-fold stratified cross-validation.
///
/// `temporal[i]` must belong to `transactions[i]`; temporal counts are
/// label-free and computed once over the full history.
pub fn cross_validate(
    transactions: &[Transaction],
    temporal: &[TemporalFeatures],
    k: usize,
    seed: u64,
    params: &ForestParams,
) -> Result<CrossValidation, CrossValidationError> {
    let labels: Vec<bool> = transactions.iter().map(|tx| tx.is_fraud).collect();
    let evaluator = Evaluator::new();

    let mut folds = Vec::new();
    let mut out_of_fold = OutOfFoldScores::default();

    for (fold, split) in stratified_k_fold(&labels, k, seed).into_iter().enumerate() {
        let train_txs = select(transactions, &split.train);
        let test_txs = select(transactions, &split.test);
        let guard = LeakageGuard::for_transactions(&test_txs);

        let encoder = RiskEncoder::fit(&train_txs, &guard)?;
        let assembler = FeatureAssembler::new(&encoder);
        let train = assembler.assemble(&train_txs, &select(temporal, &split.train));
        let test = assembler.assemble(&test_txs, &select(temporal, &split.test));

        let model = FraudClassifier::fit(&train.rows, &guard, params)?;
        let scores = model.predict_proba_batch(&test.vectors());
        let test_labels = test.labels();

        let report = evaluator
            .evaluate(&test_labels, &scores, FOLD_REPORT_THRESHOLD)
            .map_err(|source| CrossValidationError::Evaluation { fold, source })?;

        info!(
            fold = fold,
            train_rows = train.rows.len(),
            test_rows = test.rows.len(),
            precision = report.precision,
            recall = report.recall,
            f1 = report.f1,
            "Cross-validation fold complete"
        );

        folds.push(FoldReport {
            fold,
            train_rows: train.rows.len(),
            test_rows: test.rows.len(),
            test_positives: test_labels.iter().filter(|&&l| l).count(),
            report,
        });

        out_of_fold
            .transaction_ids
            .extend(test.rows.iter().map(|r| r.transaction_id.clone()));
        out_of_fold.labels.extend(test_labels);
        out_of_fold.scores.extend(scores);
    }

    let pooled = evaluator
        .evaluate(&out_of_fold.labels, &out_of_fold.scores, FOLD_REPORT_THRESHOLD)
        .map_err(|source| CrossValidationError::Evaluation {
            fold: folds.len(),
            source,
        })?;

    Ok(CrossValidation {
        folds,
        out_of_fold,
        pooled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::TemporalFeatureBuilder;
    use crate::models::tree::TreeParams;
    use crate::synth::{SyntheticConfig, TransactionGenerator};
    use std::collections::HashSet;

    fn population() -> Vec<Transaction> {
        TransactionGenerator::new(SyntheticConfig {
            accounts: 30,
            transactions_per_account: 25,
            fraud_rate: 0.05,
            ..SyntheticConfig::default()
        })
        .generate()
    }

    fn params() -> ForestParams {
        ForestParams {
            n_trees: 12,
            tree: TreeParams {
                max_depth: 6,
                min_samples_leaf: 3,
                ..TreeParams::default()
            },
            ..ForestParams::default()
        }
    }

    #[test]
    fn test_every_row_scored_once() {
        let txs = population();
        let temporal = TemporalFeatureBuilder::hourly().build(&txs);
        let cv = cross_validate(&txs, &temporal, 4, 100, &params()).unwrap();

        assert_eq!(cv.folds.len(), 4);
        assert_eq!(cv.out_of_fold.len(), txs.len());
        let ids: HashSet<&String> = cv.out_of_fold.transaction_ids.iter().collect();
        assert_eq!(ids.len(), txs.len());

        let positives = txs.iter().filter(|t| t.is_fraud).count();
        assert_eq!(cv.out_of_fold.labels.iter().filter(|&&l| l).count(), positives);
        assert_eq!(cv.folds.iter().map(|f| f.test_positives).sum::<usize>(), positives);
    }

    #[test]
    fn test_learns_synthetic_signal() {
        let txs = population();
        let temporal = TemporalFeatureBuilder::hourly().build(&txs);
        let cv = cross_validate(&txs, &temporal, 3, 7, &params()).unwrap();

        assert!(cv.pooled.recall > 0.8, "recall {}", cv.pooled.recall);
        assert!(cv.pooled.precision > 0.8, "precision {}", cv.pooled.precision);
        assert!(cv.mean_f1() > 0.7);
    }
}
