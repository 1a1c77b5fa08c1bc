//! Decision threshold selection from `(label, score)` pairs.
//!
//! Four independent policies are computed from the same scores. A transaction
//! is classified as fraud when `score >= threshold`.

use crate::error::ThresholdError;
use crate::metrics::ConfusionMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPolicy {
    /// Maximize precision × recall
    PrecisionRecall,
    /// Maximize F1
    F1,
    /// Smallest threshold where precision and recall agree within tolerance
    Equal,
    /// Minimize FN·C_fn + FP·C_fp over a uniform grid
    CostMinimizing,
}

impl ThresholdPolicy {
    pub const ALL: [ThresholdPolicy; 4] = [
        ThresholdPolicy::PrecisionRecall,
        ThresholdPolicy::F1,
        ThresholdPolicy::Equal,
        ThresholdPolicy::CostMinimizing,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ThresholdPolicy::PrecisionRecall => "precision_recall",
            ThresholdPolicy::F1 => "f1",
            ThresholdPolicy::Equal => "equal",
            ThresholdPolicy::CostMinimizing => "cost_minimizing",
        }
    }
}

impl fmt::Display for ThresholdPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Misclassification costs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Loss for a missed fraud (average fraud amount plus penalty)
    pub false_negative_cost: f64,
    /// Investigation cost for a flagged legitimate transaction
    pub false_positive_cost: f64,
}

impl CostModel {
    pub fn new(false_negative_cost: f64, false_positive_cost: f64) -> Self {
        Self {
            false_negative_cost,
            false_positive_cost,
        }
    }

    /// FN cost derived as mean fraudulent amount plus a fixed penalty.
    pub fn from_fraud_amounts(
        fraud_amounts: impl IntoIterator<Item = f64>,
        penalty: f64,
        false_positive_cost: f64,
    ) -> Self {
        let (sum, count) = fraud_amounts
            .into_iter()
            .fold((0.0, 0usize), |(s, c), a| (s + a, c + 1));
        let mean = if count > 0 { sum / count as f64 } else { 0.0 };
        Self::new(mean + penalty, false_positive_cost)
    }

    pub fn total(&self, false_negatives: u64, false_positives: u64) -> f64 {
        false_negatives as f64 * self.false_negative_cost
            + false_positives as f64 * self.false_positive_cost
    }
}

/// One point of the precision/recall sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurvePoint {
    pub threshold: f64,
    pub precision: f64,
    pub recall: f64,
}

impl CurvePoint {
    pub fn f1(&self) -> f64 {
        f1_score(self.precision, self.recall)
    }
}

/// F1, defined as 0 when precision + recall is 0.
pub fn f1_score(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

fn check_input(labels: &[bool], scores: &[f64]) -> Result<(), ThresholdError> {
    if labels.len() != scores.len() {
        return Err(ThresholdError::LengthMismatch {
            labels: labels.len(),
            scores: scores.len(),
        });
    }
    if labels.is_empty() {
        return Err(ThresholdError::EmptyInput);
    }
    Ok(())
}

/// Precision and recall at every distinct score, thresholds ascending.
pub fn precision_recall_curve(labels: &[bool], scores: &[f64]) -> Result<Vec<CurvePoint>, ThresholdError> {
    check_input(labels, scores)?;

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    let total_positives = labels.iter().filter(|&&l| l).count() as f64;

    let mut points = Vec::new();
    let (mut tp, mut fp) = (0.0, 0.0);
    for (rank, &i) in order.iter().enumerate() {
        if labels[i] {
            tp += 1.0;
        } else {
            fp += 1.0;
        }
        let last_of_group = order
            .get(rank + 1)
            .map_or(true, |&next| scores[next] != scores[i]);
        if last_of_group {
            points.push(CurvePoint {
                threshold: scores[i],
                precision: tp / (tp + fp),
                recall: if total_positives > 0.0 { tp / total_positives } else { 0.0 },
            });
        }
    }
    points.reverse();
    Ok(points)
}

/// Threshold chosen by one policy, with the metrics it achieves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdSelection {
    pub policy: ThresholdPolicy,
    pub threshold: f64,
    /// Value of the policy's objective at `threshold` (product, F1, |P-R| or cost)
    pub objective: f64,
    pub precision: f64,
    pub recall: f64,
}

/// Outcome of one policy; a failed policy does not affect the others.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyOutcome {
    pub policy: ThresholdPolicy,
    pub result: Result<ThresholdSelection, ThresholdError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOptimizer {
    pub cost: CostModel,
    pub equal_tolerance: f64,
    pub grid_resolution: usize,
}

impl ThresholdOptimizer {
    pub fn new(cost: CostModel) -> Self {
        Self {
            cost,
            equal_tolerance: 0.01,
            grid_resolution: 200,
        }
    }

    pub fn with_equal_tolerance(mut self, tolerance: f64) -> Self {
        self.equal_tolerance = tolerance;
        self
    }

    pub fn with_grid_resolution(mut self, resolution: usize) -> Self {
        self.grid_resolution = resolution;
        self
    }

    /// Grid thresholds `i / (resolution - 1)` for `i in 0..resolution`.
    pub fn grid(&self) -> Vec<f64> {
        let n = self.grid_resolution.max(2);
        (0..n).map(|i| i as f64 / (n - 1) as f64).collect()
    }

    /// Run every policy on the same scores.
    pub fn select_all(&self, labels: &[bool], scores: &[f64]) -> Vec<PolicyOutcome> {
        ThresholdPolicy::ALL
            .iter()
            .map(|&policy| {
                let result = self.select(policy, labels, scores);
                match &result {
                    Ok(sel) => debug!(
                        policy = %policy,
                        threshold = sel.threshold,
                        objective = sel.objective,
                        "Threshold selected"
                    ),
                    Err(e) => warn!(policy = %policy, reason = %e, "Threshold policy produced no threshold"),
                }
                PolicyOutcome { policy, result }
            })
            .collect()
    }

    pub fn select(
        &self,
        policy: ThresholdPolicy,
        labels: &[bool],
        scores: &[f64],
    ) -> Result<ThresholdSelection, ThresholdError> {
        match policy {
            ThresholdPolicy::CostMinimizing => self.cost_minimizing(labels, scores),
            _ => {
                let curve = precision_recall_curve(labels, scores)?;
                self.from_curve(policy, &curve)
            }
        }
    }

    fn from_curve(&self, policy: ThresholdPolicy, curve: &[CurvePoint]) -> Result<ThresholdSelection, ThresholdError> {
        let selection = |point: &CurvePoint, objective: f64| ThresholdSelection {
            policy,
            threshold: point.threshold,
            objective,
            precision: point.precision,
            recall: point.recall,
        };

        match policy {
            ThresholdPolicy::Equal => curve
                .iter()
                .find(|p| (p.precision - p.recall).abs() <= self.equal_tolerance)
                .map(|p| selection(p, (p.precision - p.recall).abs()))
                .ok_or(ThresholdError::NoEqualPoint {
                    tolerance: self.equal_tolerance,
                }),
            _ => {
                let objective = |p: &CurvePoint| match policy {
                    ThresholdPolicy::F1 => p.f1(),
                    _ => p.precision * p.recall,
                };
                // first maximum wins, i.e. the smallest threshold among ties
                let mut best: Option<(&CurvePoint, f64)> = None;
                for point in curve {
                    let value = objective(point);
                    if best.map_or(true, |(_, b)| value > b) {
                        best = Some((point, value));
                    }
                }
                best.map(|(p, v)| selection(p, v))
                    .ok_or(ThresholdError::EmptyInput)
            }
        }
    }

    /// Total cost at every grid threshold, ascending.
    pub fn cost_curve(&self, labels: &[bool], scores: &[f64]) -> Result<Vec<(f64, f64)>, ThresholdError> {
        check_input(labels, scores)?;

        let mut positives: Vec<f64> = Vec::new();
        let mut negatives: Vec<f64> = Vec::new();
        for (&label, &score) in labels.iter().zip(scores) {
            if label {
                positives.push(score);
            } else {
                negatives.push(score);
            }
        }
        positives.sort_by(f64::total_cmp);
        negatives.sort_by(f64::total_cmp);

        Ok(self
            .grid()
            .into_iter()
            .map(|t| {
                let false_negatives = positives.partition_point(|&s| s < t) as u64;
                let false_positives = (negatives.len() - negatives.partition_point(|&s| s < t)) as u64;
                (t, self.cost.total(false_negatives, false_positives))
            })
            .collect())
    }

    fn cost_minimizing(&self, labels: &[bool], scores: &[f64]) -> Result<ThresholdSelection, ThresholdError> {
        let curve = self.cost_curve(labels, scores)?;

        let mut best: Option<(f64, f64)> = None;
        for (t, cost) in curve {
            if best.map_or(true, |(_, b)| cost < b) {
                best = Some((t, cost));
            }
        }
        let (threshold, objective) = best.ok_or(ThresholdError::EmptyInput)?;
        let confusion = ConfusionMatrix::at_threshold(labels, scores, threshold);

        Ok(ThresholdSelection {
            policy: ThresholdPolicy::CostMinimizing,
            threshold,
            objective,
            precision: confusion.precision(),
            recall: confusion.recall(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (Vec<bool>, Vec<f64>) {
        (
            vec![false, false, false, true, true, true],
            vec![0.1, 0.2, 0.3, 0.7, 0.8, 0.9],
        )
    }

    fn optimizer() -> ThresholdOptimizer {
        ThresholdOptimizer::new(CostModel::new(540.0, 10.0)).with_grid_resolution(101)
    }

    #[test]
    fn test_curve_points_ascending() {
        let (y, s) = separable();
        let curve = precision_recall_curve(&y, &s).unwrap();

        assert_eq!(curve.len(), 6);
        assert_eq!(curve[0].threshold, 0.1);
        assert_eq!((curve[0].precision, curve[0].recall), (0.5, 1.0));
        assert_eq!((curve[3].precision, curve[3].recall), (1.0, 1.0));
        assert!((curve[5].recall - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_tied_scores_form_one_point() {
        let y = vec![true, false, true, false];
        let s = vec![0.5, 0.5, 0.9, 0.1];
        let curve = precision_recall_curve(&y, &s).unwrap();

        let thresholds: Vec<f64> = curve.iter().map(|p| p.threshold).collect();
        assert_eq!(thresholds, vec![0.1, 0.5, 0.9]);
        assert!((curve[1].precision - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_separable_scores_give_exact_optimum() {
        let (y, s) = separable();
        let opt = optimizer();

        let pr = opt.select(ThresholdPolicy::PrecisionRecall, &y, &s).unwrap();
        assert_eq!((pr.threshold, pr.objective), (0.7, 1.0));

        let f1 = opt.select(ThresholdPolicy::F1, &y, &s).unwrap();
        assert_eq!((f1.threshold, f1.objective), (0.7, 1.0));

        let eq = opt.select(ThresholdPolicy::Equal, &y, &s).unwrap();
        assert_eq!(eq.threshold, 0.7);

        // zero cost for any grid point in (0.3, 0.7]; smallest is 31/100
        let cost = opt.select(ThresholdPolicy::CostMinimizing, &y, &s).unwrap();
        assert_eq!(cost.threshold, 31.0 / 100.0);
        assert_eq!(cost.objective, 0.0);
        assert_eq!((cost.precision, cost.recall), (1.0, 1.0));
    }

    #[test]
    fn test_cost_curve_has_single_minimum() {
        // 50 negatives at 0.05, 5 at 0.45; 3 positives at 0.55
        let mut y = vec![false; 55];
        let mut s = vec![0.05; 50];
        s.extend(vec![0.45; 5]);
        y.extend([true, true, true]);
        s.extend([0.55, 0.55, 0.55]);

        let opt = ThresholdOptimizer::new(CostModel::new(100.0, 10.0)).with_grid_resolution(11);
        let costs: Vec<f64> = opt.cost_curve(&y, &s).unwrap().iter().map(|(_, c)| *c).collect();
        assert_eq!(
            costs,
            vec![550.0, 50.0, 50.0, 50.0, 50.0, 0.0, 300.0, 300.0, 300.0, 300.0, 300.0]
        );
        assert_eq!(costs.iter().filter(|&&c| c == 0.0).count(), 1);

        let best = opt.select(ThresholdPolicy::CostMinimizing, &y, &s).unwrap();
        assert_eq!(best.threshold, 0.5);
        assert_eq!(best.objective, 0.0);
        assert_eq!((best.precision, best.recall), (1.0, 1.0));
    }

    #[test]
    fn test_cost_ties_resolve_to_lowest_threshold() {
        // 100 negatives at 0.2, 60 at 0.5; positives: one at 0.45, three at 0.8
        let mut y = vec![false; 160];
        let mut s = vec![0.2; 100];
        s.extend(vec![0.5; 60]);
        y.extend([true, true, true, true]);
        s.extend([0.45, 0.8, 0.8, 0.8]);

        let opt = ThresholdOptimizer::new(CostModel::new(540.0, 10.0)).with_grid_resolution(11);
        let curve = opt.cost_curve(&y, &s).unwrap();
        let costs: Vec<f64> = curve.iter().map(|(_, c)| *c).collect();
        assert_eq!(
            costs,
            vec![1600.0, 1600.0, 1600.0, 600.0, 600.0, 1140.0, 540.0, 540.0, 540.0, 2160.0, 2160.0]
        );

        let best = opt.select(ThresholdPolicy::CostMinimizing, &y, &s).unwrap();
        assert_eq!(best.threshold, 0.6);
        assert_eq!(best.objective, 540.0);
    }

    #[test]
    fn test_equal_policy_can_fail_alone() {
        // tied block jumps past the crossing: (1/3, 1/2) then (1/2, 1)
        let y = vec![true, false, false, true];
        let s = vec![0.9, 0.9, 0.9, 0.1];
        let outcomes = optimizer().select_all(&y, &s);

        assert_eq!(outcomes.len(), 4);
        let equal = outcomes.iter().find(|o| o.policy == ThresholdPolicy::Equal).unwrap();
        assert_eq!(
            equal.result,
            Err(ThresholdError::NoEqualPoint { tolerance: 0.01 })
        );
        assert!(outcomes
            .iter()
            .filter(|o| o.policy != ThresholdPolicy::Equal)
            .all(|o| o.result.is_ok()));
    }

    #[test]
    fn test_f1_zero_when_nothing_right() {
        assert_eq!(f1_score(0.0, 0.0), 0.0);
        assert!((f1_score(0.5, 1.0) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_inputs() {
        let opt = optimizer();
        assert_eq!(
            opt.select(ThresholdPolicy::F1, &[], &[]),
            Err(ThresholdError::EmptyInput)
        );
        assert_eq!(
            opt.select(ThresholdPolicy::CostMinimizing, &[true], &[0.1, 0.2]),
            Err(ThresholdError::LengthMismatch { labels: 1, scores: 2 })
        );
    }

    #[test]
    fn test_cost_model_from_fraud_amounts() {
        let model = CostModel::from_fraud_amounts([500.0, 560.0], 10.0, 10.0);
        assert_eq!(model.false_negative_cost, 540.0);
        assert_eq!(model.total(2, 3), 1110.0);
    }
}
