//! End-to-end training run.
//!
//! Temporal features are computed once over the full history (they use no
//! labels). Everything label-aware is fit on the training partition behind a
//! [`LeakageGuard`] holding the test ids. Thresholds are tuned on
//! out-of-fold scores and only evaluated on the test partition.

use crate::config::AppConfig;
use crate::error::{Rejection, ValidationError};
use crate::features::{FallbackCounts, FeatureAssembler, RiskEncoder, TemporalFeatureBuilder, TemporalFeatures};
use crate::ingest::IngestSummary;
use crate::metrics::{ClassificationReport, CostBaseline, Evaluator};
use crate::models::{cross_validate, FeatureImportance, FoldReport, ForestParams, FraudClassifier};
use crate::partition::{select, stratified_split, LeakageGuard};
use crate::threshold::{CostModel, PolicyOutcome, ThresholdOptimizer, ThresholdPolicy};
use crate::types::Transaction;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Threshold reported alongside the tuned ones.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PartitionCounts {
    pub total: usize,
    pub train: usize,
    pub test: usize,
    pub train_positives: usize,
    pub test_positives: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FallbackReport {
    pub train: FallbackCounts,
    pub test: FallbackCounts,
}

/// Scores the thresholds were tuned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThresholdSource {
    OutOfFold { folds: usize },
    InSample,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossValidationSummary {
    pub folds: Vec<FoldReport>,
    pub pooled: ClassificationReport,
    pub mean_f1: f64,
}

/// Test-partition metrics at one threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdEvaluation {
    /// `None` for [`DEFAULT_THRESHOLD`]
    pub policy: Option<ThresholdPolicy>,
    pub report: ClassificationReport,
}

impl ThresholdEvaluation {
    pub fn label(&self) -> String {
        self.policy
            .map_or_else(|| "default".to_string(), |p| p.name().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest: Option<IngestSummary>,
    pub partitions: PartitionCounts,
    /// Records rejected during feature assembly
    pub rejected: Vec<Rejection>,
    pub fallbacks: FallbackReport,
    pub global_fraud_rate: f64,
    pub cost_model: CostModel,
    pub threshold_source: ThresholdSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_validation: Option<CrossValidationSummary>,
    pub thresholds: Vec<PolicyOutcome>,
    pub evaluations: Vec<ThresholdEvaluation>,
    pub feature_importances: Vec<FeatureImportance>,
    pub column_importances: Vec<FeatureImportance>,
}

impl PipelineReport {
    pub fn evaluation(&self, policy: ThresholdPolicy) -> Option<&ThresholdEvaluation> {
        self.evaluations.iter().find(|e| e.policy == Some(policy))
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json(self, path.as_ref())
    }
}

/// Frozen state needed to score new transactions.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedArtifacts {
    pub encoder: RiskEncoder,
    pub classifier: FraudClassifier,
}

impl FittedArtifacts {
    /// Fraud probability for one transaction with its temporal features.
    pub fn score(&self, tx: &Transaction, temporal: &TemporalFeatures) -> Result<f64, ValidationError> {
        let (features, _) = FeatureAssembler::new(&self.encoder).assemble_one(tx, Some(temporal))?;
        Ok(self.classifier.predict_proba(&features))
    }
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingPipeline {
    temporal: TemporalFeatureBuilder,
    forest: ForestParams,
    test_fraction: f64,
    split_seed: u64,
    cv_folds: usize,
    equal_tolerance: f64,
    grid_resolution: usize,
    false_negative_cost: Option<f64>,
    false_negative_penalty: f64,
    false_positive_cost: f64,
    baseline: CostBaseline,
}

impl TrainingPipeline {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            temporal: TemporalFeatureBuilder::new(chrono::Duration::minutes(
                config.data.temporal_window_minutes,
            )),
            forest: config.model.forest_params(),
            test_fraction: config.validation.test_fraction,
            split_seed: config.validation.split_seed,
            cv_folds: config.validation.cv_folds,
            equal_tolerance: config.validation.equal_tolerance,
            grid_resolution: config.cost.grid_resolution,
            false_negative_cost: config.cost.false_negative_cost,
            false_negative_penalty: config.cost.false_negative_penalty,
            false_positive_cost: config.cost.false_positive_cost,
            baseline: config.cost.baseline,
        }
    }

    pub fn run(&self, transactions: &[Transaction]) -> Result<(PipelineReport, FittedArtifacts)> {
        if transactions.is_empty() {
            bail!("No transactions to train on");
        }

        let temporal = self.temporal.build(transactions);
        let labels: Vec<bool> = transactions.iter().map(|tx| tx.is_fraud).collect();
        let split = stratified_split(&labels, self.test_fraction, self.split_seed);

        let train_txs = select(transactions, &split.train);
        let test_txs = select(transactions, &split.test);
        let train_temporal = select(&temporal, &split.train);
        let test_temporal = select(&temporal, &split.test);
        let guard = LeakageGuard::for_transactions(&test_txs);

        let partitions = PartitionCounts {
            total: transactions.len(),
            train: train_txs.len(),
            test: test_txs.len(),
            train_positives: train_txs.iter().filter(|t| t.is_fraud).count(),
            test_positives: test_txs.iter().filter(|t| t.is_fraud).count(),
        };
        info!(
            train = partitions.train,
            test = partitions.test,
            train_positives = partitions.train_positives,
            test_positives = partitions.test_positives,
            "Stratified split"
        );

        let encoder = RiskEncoder::fit(&train_txs, &guard).context("Risk encoder fit")?;
        let assembler = FeatureAssembler::new(&encoder);
        let train = assembler.assemble(&train_txs, &train_temporal);
        let test = assembler.assemble(&test_txs, &test_temporal);

        let cost_model = self.cost_model(&train_txs);
        info!(
            false_negative_cost = cost_model.false_negative_cost,
            false_positive_cost = cost_model.false_positive_cost,
            "Cost model"
        );

        // rows that cannot be assembled are excluded from cross-validation too
        let rejected_ids: HashSet<&str> = train
            .rejected
            .iter()
            .map(|r| r.transaction_id.as_str())
            .collect();
        let keep: Vec<usize> = (0..train_txs.len())
            .filter(|&i| !rejected_ids.contains(train_txs[i].transaction_id.as_str()))
            .collect();

        let cross_validation = if self.cv_folds >= 2 {
            let cv = cross_validate(
                &select(&train_txs, &keep),
                &select(&train_temporal, &keep),
                self.cv_folds,
                self.split_seed,
                &self.forest,
            )
            .context("Cross-validation")?;
            info!(
                folds = cv.folds.len(),
                mean_f1 = cv.mean_f1(),
                pooled_precision = cv.pooled.precision,
                pooled_recall = cv.pooled.recall,
                "Cross-validation complete"
            );
            Some(cv)
        } else {
            None
        };

        let classifier = FraudClassifier::fit(&train.rows, &guard, &self.forest).context("Classifier fit")?;

        let (threshold_source, tuning_labels, tuning_scores) = match &cross_validation {
            Some(cv) => (
                ThresholdSource::OutOfFold {
                    folds: cv.folds.len(),
                },
                cv.out_of_fold.labels.clone(),
                cv.out_of_fold.scores.clone(),
            ),
            None => (
                ThresholdSource::InSample,
                train.labels(),
                classifier.predict_proba_batch(&train.vectors()),
            ),
        };

        let optimizer = ThresholdOptimizer::new(cost_model)
            .with_equal_tolerance(self.equal_tolerance)
            .with_grid_resolution(self.grid_resolution);
        let thresholds = optimizer.select_all(&tuning_labels, &tuning_scores);

        let evaluator = Evaluator::new().with_cost(cost_model, self.baseline);
        let test_labels = test.labels();
        let test_scores = classifier.predict_proba_batch(&test.vectors());

        let mut evaluations = vec![ThresholdEvaluation {
            policy: None,
            report: evaluator
                .evaluate(&test_labels, &test_scores, DEFAULT_THRESHOLD)
                .context("Test evaluation at default threshold")?,
        }];
        for outcome in &thresholds {
            if let Ok(selection) = &outcome.result {
                let report = evaluator
                    .evaluate(&test_labels, &test_scores, selection.threshold)
                    .with_context(|| format!("Test evaluation for {}", outcome.policy))?;
                info!(
                    policy = %outcome.policy,
                    threshold = selection.threshold,
                    precision = report.precision,
                    recall = report.recall,
                    f1 = report.f1,
                    cost = report.cost.map(|c| c.total_cost),
                    "Test evaluation"
                );
                evaluations.push(ThresholdEvaluation {
                    policy: Some(outcome.policy),
                    report,
                });
            }
        }

        let mut rejected = train.rejected;
        rejected.extend(test.rejected);

        let report = PipelineReport {
            ingest: None,
            partitions,
            rejected,
            fallbacks: FallbackReport {
                train: train.fallbacks,
                test: test.fallbacks,
            },
            global_fraud_rate: encoder.global_rate(),
            cost_model,
            threshold_source,
            cross_validation: cross_validation.map(|cv| CrossValidationSummary {
                mean_f1: cv.mean_f1(),
                folds: cv.folds,
                pooled: cv.pooled,
            }),
            thresholds,
            evaluations,
            feature_importances: classifier.feature_importances(),
            column_importances: classifier.column_importances(),
        };

        Ok((report, FittedArtifacts { encoder, classifier }))
    }

    fn cost_model(&self, train: &[Transaction]) -> CostModel {
        match self.false_negative_cost {
            Some(fn_cost) => CostModel::new(fn_cost, self.false_positive_cost),
            None => CostModel::from_fraud_amounts(
                train.iter().filter(|t| t.is_fraud).map(|t| t.amount),
                self.false_negative_penalty,
                self.false_positive_cost,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{SyntheticConfig, TransactionGenerator};

    fn population() -> Vec<Transaction> {
        TransactionGenerator::new(SyntheticConfig {
            accounts: 40,
            transactions_per_account: 25,
            fraud_rate: 0.04,
            ..SyntheticConfig::default()
        })
        .generate()
    }

    fn config(cv_folds: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.model.n_trees = 15;
        config.model.min_samples_leaf = 3;
        config.validation.cv_folds = cv_folds;
        config.cost.grid_resolution = 101;
        config
    }

    #[test]
    fn test_end_to_end_on_synthetic_data() {
        let txs = population();
        let (report, artifacts) = TrainingPipeline::new(&config(3)).run(&txs).unwrap();

        let p = report.partitions;
        assert_eq!(p.train + p.test, txs.len());
        assert_eq!(p.train_positives + p.test_positives, txs.iter().filter(|t| t.is_fraud).count());
        assert!(report.rejected.is_empty());

        assert_eq!(report.threshold_source, ThresholdSource::OutOfFold { folds: 3 });
        assert_eq!(report.cross_validation.as_ref().map(|cv| cv.folds.len()), Some(3));
        assert_eq!(report.thresholds.len(), 4);
        assert_eq!(report.evaluations[0].policy, None);
        assert_eq!(report.evaluations[0].report.confusion.total(), p.test as u64);

        // fraud amounts are drawn from 250..1400
        assert!(report.cost_model.false_negative_cost > 260.0);
        assert_eq!(report.cost_model.false_positive_cost, 10.0);

        let cost = report
            .evaluation(ThresholdPolicy::CostMinimizing)
            .and_then(|e| e.report.cost)
            .unwrap();
        assert!(cost.savings > 0.0);
        assert!(report.evaluations[0].report.recall > 0.8);

        assert_eq!(report.feature_importances.len(), 12);
        let importance = |names: &[&str]| -> f64 {
            report
                .feature_importances
                .iter()
                .filter(|f| names.contains(&f.name.as_str()))
                .map(|f| f.importance)
                .sum()
        };
        let total = importance(&crate::types::Feature::ALL.map(|f| f.name()));
        assert!((total - 1.0).abs() < 1e-9);
        // amount separates the synthetic classes; population and age are per-account noise
        assert!(importance(&["amount", "amount*category_risk", "amount*job_risk"]) > importance(&["population", "age"]));
        assert!(artifacts.encoder.global_rate() > 0.0);
    }

    #[test]
    fn test_in_sample_thresholds_without_cv() {
        let txs = population();
        let (report, _) = TrainingPipeline::new(&config(1)).run(&txs).unwrap();

        assert_eq!(report.threshold_source, ThresholdSource::InSample);
        assert!(report.cross_validation.is_none());
    }

    #[test]
    fn test_artifacts_score_like_classifier() {
        let txs = population();
        let (_, artifacts) = TrainingPipeline::new(&config(1)).run(&txs).unwrap();
        let temporal = TemporalFeatureBuilder::hourly().build(&txs);

        let fraud = txs.iter().position(|t| t.is_fraud).unwrap();
        let legit = txs.iter().position(|t| !t.is_fraud).unwrap();
        let fraud_score = artifacts.score(&txs[fraud], &temporal[fraud]).unwrap();
        let legit_score = artifacts.score(&txs[legit], &temporal[legit]).unwrap();
        assert!(fraud_score > legit_score);
    }

    #[test]
    fn test_report_serializes() {
        let txs = population();
        let (report, _) = TrainingPipeline::new(&config(2)).run(&txs).unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["threshold_source"]["kind"], "out_of_fold");
        assert!(json["thresholds"].as_array().map_or(false, |t| t.len() == 4));
        assert!(json.get("ingest").is_none());
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert!(TrainingPipeline::new(&config(2)).run(&[]).is_err());
    }
}
