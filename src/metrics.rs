//! Classification metrics and realized cost at a chosen threshold.

use crate::error::ThresholdError;
use crate::threshold::{f1_score, CostModel};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Confusion counts with fraud as the positive class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_positives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    pub false_negatives: u64,
}

impl ConfusionMatrix {
    /// Count outcomes when `score >= threshold` is flagged.
    pub fn at_threshold(labels: &[bool], scores: &[f64], threshold: f64) -> Self {
        let mut cm = Self::default();
        for (&label, &score) in labels.iter().zip(scores) {
            match (label, score >= threshold) {
                (true, true) => cm.true_positives += 1,
                (false, true) => cm.false_positives += 1,
                (false, false) => cm.true_negatives += 1,
                (true, false) => cm.false_negatives += 1,
            }
        }
        cm
    }

    pub fn total(&self) -> u64 {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    pub fn positives(&self) -> u64 {
        self.true_positives + self.false_negatives
    }

    pub fn negatives(&self) -> u64 {
        self.true_negatives + self.false_positives
    }

    /// 0 when nothing is flagged.
    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    /// 0 when there are no positives.
    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.positives())
    }

    pub fn f1(&self) -> f64 {
        f1_score(self.precision(), self.recall())
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// "No model" comparator for cost savings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostBaseline {
    /// Every fraud goes through
    #[default]
    FlagNothing,
    /// Every transaction is investigated
    FlagEverything,
    /// Every fraud missed and every legitimate transaction investigated
    MisclassifyAll,
}

impl CostBaseline {
    pub fn cost(self, cm: &ConfusionMatrix, model: &CostModel) -> f64 {
        match self {
            CostBaseline::FlagNothing => model.total(cm.positives(), 0),
            CostBaseline::FlagEverything => model.total(0, cm.negatives()),
            CostBaseline::MisclassifyAll => model.total(cm.positives(), cm.negatives()),
        }
    }
}

impl fmt::Display for CostBaseline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CostBaseline::FlagNothing => "flag_nothing",
            CostBaseline::FlagEverything => "flag_everything",
            CostBaseline::MisclassifyAll => "misclassify_all",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostReport {
    pub total_cost: f64,
    pub baseline: CostBaseline,
    pub baseline_cost: f64,
    pub savings: f64,
    /// Savings as a percentage of the baseline cost; 0 when the baseline costs nothing
    pub savings_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub threshold: f64,
    pub confusion: ConfusionMatrix,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    /// Scores bucketed into tenths
    pub score_distribution: [u64; 10],
    pub cost: Option<CostReport>,
}

/// Scores classifications at a threshold, optionally pricing them.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Evaluator {
    cost: Option<CostModel>,
    baseline: CostBaseline,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cost(mut self, cost: CostModel, baseline: CostBaseline) -> Self {
        self.cost = Some(cost);
        self.baseline = baseline;
        self
    }

    pub fn evaluate(
        &self,
        labels: &[bool],
        scores: &[f64],
        threshold: f64,
    ) -> Result<ClassificationReport, ThresholdError> {
        if labels.len() != scores.len() {
            return Err(ThresholdError::LengthMismatch {
                labels: labels.len(),
                scores: scores.len(),
            });
        }
        if labels.is_empty() {
            return Err(ThresholdError::EmptyInput);
        }

        let confusion = ConfusionMatrix::at_threshold(labels, scores, threshold);

        let mut score_distribution = [0u64; 10];
        for &score in scores {
            let bucket = (score * 10.0).clamp(0.0, 9.0) as usize;
            score_distribution[bucket] += 1;
        }

        let cost = self.cost.map(|model| {
            let total_cost = model.total(confusion.false_negatives, confusion.false_positives);
            let baseline_cost = self.baseline.cost(&confusion, &model);
            let savings = baseline_cost - total_cost;
            CostReport {
                total_cost,
                baseline: self.baseline,
                baseline_cost,
                savings,
                savings_pct: if baseline_cost > 0.0 { savings / baseline_cost * 100.0 } else { 0.0 },
            }
        });

        Ok(ClassificationReport {
            threshold,
            confusion,
            precision: confusion.precision(),
            recall: confusion.recall(),
            f1: confusion.f1(),
            accuracy: confusion.accuracy(),
            score_distribution,
            cost,
        })
    }
}

impl ClassificationReport {
    /// Print summary statistics
    pub fn print_summary(&self, label: &str) {
        let cm = &self.confusion;

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║ {:<60} ║", format!("EVALUATION - {label} (threshold {:.4})", self.threshold));
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Precision: {:>6.3}  Recall: {:>6.3}  F1: {:>6.3}  Acc: {:>6.3} ║",
            self.precision, self.recall, self.f1, self.accuracy
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ TP: {:>8}  FP: {:>8}  TN: {:>8}  FN: {:>8}     ║",
            cm.true_positives, cm.false_positives, cm.true_negatives, cm.false_negatives
        );
        if let Some(cost) = &self.cost {
            info!("╠══════════════════════════════════════════════════════════════╣");
            info!(
                "║ Cost: {:>12.2}  Baseline ({}): {:>12.2}",
                cost.total_cost, cost.baseline, cost.baseline_cost
            );
            info!(
                "║ Savings: {:>12.2} ({:>6.2}%)                              ║",
                cost.savings, cost.savings_pct
            );
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Score Distribution:                                          ║");
        let total: u64 = self.score_distribution.iter().sum();
        for (i, &count) in self.score_distribution.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "║   {:.1}-{:.1}: {:>8} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}
