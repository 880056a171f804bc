//! Performance of a prediction matrix against the reference label.
//!
//! Binary labels yield ROC and precision-recall curves with their areas,
//! for the composite (row-mean) prediction and, when the matrix has more
//! than one column, for every column. Continuous labels yield R², MAE and
//! MSE. Every computation is a deterministic function of its inputs.

use std::collections::HashMap;

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::Measure;
use crate::data_handling::{Label, LabelValues};
use crate::error::{PipelineError, Result};
use crate::predictor::PredictionMatrix;
use crate::stats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocCurve {
    /// Descending; the first point (threshold +∞) predicts nothing positive.
    pub thresholds: Vec<f64>,
    pub sensitivity: Vec<f64>,
    pub specificity: Vec<f64>,
    pub auc: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrCurve {
    pub thresholds: Vec<f64>,
    pub recall: Vec<f64>,
    pub precision: Vec<f64>,
    pub auc: f64,
}

/// Cumulative (true positive, false positive) counts at each distinct score,
/// sweeping the threshold from the highest score down.
fn sweep(scores: &[f64], is_case: &[bool]) -> Vec<(f64, usize, usize)> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    let mut points = Vec::new();
    let (mut tp, mut fp) = (0, 0);
    for (k, &i) in order.iter().enumerate() {
        if is_case[i] {
            tp += 1;
        } else {
            fp += 1;
        }
        let last_of_tie = k + 1 == order.len() || scores[order[k + 1]] != scores[i];
        if last_of_tie {
            points.push((scores[i], tp, fp));
        }
    }
    points
}

fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]) * (ys[0] + ys[1]) / 2.0)
        .sum()
}

fn class_counts(is_case: &[bool]) -> Result<(usize, usize)> {
    let n_case = is_case.iter().filter(|&&c| c).count();
    let n_control = is_case.len() - n_case;
    if n_case == 0 || n_control == 0 {
        return Err(PipelineError::data(
            "ROC and precision-recall curves need both case and control samples",
        ));
    }
    Ok((n_case, n_control))
}

pub fn roc_curve(scores: &[f64], is_case: &[bool]) -> Result<RocCurve> {
    let (n_case, n_control) = class_counts(is_case)?;
    let mut thresholds = vec![f64::INFINITY];
    let mut sensitivity = vec![0.0];
    let mut specificity = vec![1.0];
    for (t, tp, fp) in sweep(scores, is_case) {
        thresholds.push(t);
        sensitivity.push(tp as f64 / n_case as f64);
        specificity.push(1.0 - fp as f64 / n_control as f64);
    }
    let fpr: Vec<f64> = specificity.iter().map(|s| 1.0 - s).collect();
    let auc = trapezoid(&fpr, &sensitivity);
    Ok(RocCurve {
        thresholds,
        sensitivity,
        specificity,
        auc,
    })
}

pub fn pr_curve(scores: &[f64], is_case: &[bool]) -> Result<PrCurve> {
    let (n_case, _) = class_counts(is_case)?;
    let mut thresholds = Vec::new();
    let mut recall = Vec::new();
    let mut precision = Vec::new();
    for (t, tp, fp) in sweep(scores, is_case) {
        thresholds.push(t);
        recall.push(tp as f64 / n_case as f64);
        precision.push(tp as f64 / (tp + fp) as f64);
    }
    // Anchor the curve at recall 0 with the precision of the first threshold.
    thresholds.insert(0, f64::INFINITY);
    recall.insert(0, 0.0);
    precision.insert(0, precision[0]);
    let auc = trapezoid(&recall, &precision);
    Ok(PrCurve {
        thresholds,
        recall,
        precision,
        auc,
    })
}

/// Scalar performance of `predictions` against `truth` (1.0 / 0.0 for
/// classification). Undefined values come back as NaN.
pub fn compute_measure(measure: Measure, predictions: &[f64], truth: &[f64]) -> f64 {
    let n = predictions.len() as f64;
    if predictions.is_empty() || predictions.len() != truth.len() {
        return f64::NAN;
    }
    let is_case = || truth.iter().map(|&t| t == 1.0).collect::<Vec<bool>>();
    match measure {
        Measure::Accuracy => {
            predictions
                .iter()
                .zip(truth)
                .filter(|(&p, &t)| (p >= 0.5) == (t == 1.0))
                .count() as f64
                / n
        }
        Measure::Auroc => stats::auc(predictions, &is_case()),
        Measure::Auprc => pr_curve(predictions, &is_case()).map_or(f64::NAN, |c| c.auc),
        Measure::Mse => predictions.iter().zip(truth).map(|(p, t)| (p - t).powi(2)).sum::<f64>() / n,
        Measure::Mae => predictions.iter().zip(truth).map(|(p, t)| (p - t).abs()).sum::<f64>() / n,
        Measure::R2 => stats::pearson(predictions, truth).powi(2),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePair {
    pub roc: RocCurve,
    pub pr: PrCurve,
}

impl CurvePair {
    fn compute(scores: &[f64], is_case: &[bool]) -> Result<Self> {
        Ok(CurvePair {
            roc: roc_curve(scores, is_case)?,
            pr: pr_curve(scores, is_case)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryEvaluation {
    /// Curves of the row-mean prediction.
    pub composite: CurvePair,
    pub auroc: f64,
    pub auprc: f64,
    /// One entry per column; empty for a single-column matrix.
    pub per_repeat: Vec<CurvePair>,
}

impl BinaryEvaluation {
    pub fn repeat_auroc(&self) -> Vec<f64> {
        self.per_repeat.iter().map(|c| c.roc.auc).collect()
    }

    pub fn repeat_auprc(&self) -> Vec<f64> {
        self.per_repeat.iter().map(|c| c.pr.auc).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub r2: f64,
    pub mae: f64,
    pub mse: f64,
}

impl RegressionMetrics {
    fn compute(predictions: &[f64], truth: &[f64]) -> Self {
        RegressionMetrics {
            r2: compute_measure(Measure::R2, predictions, truth),
            mae: compute_measure(Measure::Mae, predictions, truth),
            mse: compute_measure(Measure::Mse, predictions, truth),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousEvaluation {
    /// Means over columns.
    pub r2: f64,
    pub mae: f64,
    pub mse: f64,
    /// One entry per column; empty for a single-column matrix.
    pub per_column: Vec<RegressionMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvaluationResult {
    Binary(BinaryEvaluation),
    Continuous(ContinuousEvaluation),
}

impl EvaluationResult {
    /// Headline numbers for logging.
    pub fn log_summary(&self) {
        match self {
            EvaluationResult::Binary(b) => log::info!("AUROC: {:.4}, AUPRC: {:.4}", b.auroc, b.auprc),
            EvaluationResult::Continuous(c) => {
                log::info!("R2: {:.4}, MAE: {:.4}, MSE: {:.4}", c.r2, c.mae, c.mse)
            }
        }
    }
}

/// Prediction rows reordered into label order.
fn align_rows(predictions: &PredictionMatrix, label: &Label) -> Result<Array2<f64>> {
    if predictions.n_columns() == 0 {
        return Err(PipelineError::data("prediction matrix has no columns"));
    }
    let rows: HashMap<&str, usize> = predictions
        .sample_ids()
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();
    if rows.len() != label.len() {
        let labelled = label.sample_index();
        if let Some(extra) = predictions.sample_ids().iter().find(|s| !labelled.contains_key(s.as_str())) {
            return Err(PipelineError::data(format!(
                "predicted sample '{}' has no label",
                extra
            )));
        }
    }
    let order = label
        .sample_ids()
        .iter()
        .map(|s| {
            rows.get(s.as_str())
                .copied()
                .ok_or_else(|| PipelineError::data(format!("labelled sample '{}' has no prediction", s)))
        })
        .collect::<Result<Vec<usize>>>()?;
    let aligned = predictions.values().select(Axis(0), &order);
    if let Some(((r, c), _)) = aligned.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(PipelineError::data(format!(
            "missing prediction for sample '{}' in column '{}'",
            label.sample_ids()[r],
            predictions.column_names()[c]
        )));
    }
    Ok(aligned)
}

/// Evaluate a prediction matrix against `label`.
pub fn evaluate_predictions(predictions: &PredictionMatrix, label: &Label) -> Result<EvaluationResult> {
    let aligned = align_rows(predictions, label)?;
    let n_columns = aligned.ncols();
    let composite = aligned.mean_axis(Axis(1)).ok_or_else(|| PipelineError::internal("empty prediction matrix"))?;

    let result = match label.values() {
        LabelValues::Binary { is_case, .. } => {
            let composite = CurvePair::compute(&composite.to_vec(), is_case)?;
            let per_repeat = if n_columns > 1 {
                aligned
                    .axis_iter(Axis(1))
                    .map(|col| CurvePair::compute(&col.to_vec(), is_case))
                    .collect::<Result<Vec<_>>>()?
            } else {
                Vec::new()
            };
            EvaluationResult::Binary(BinaryEvaluation {
                auroc: composite.roc.auc,
                auprc: composite.pr.auc,
                composite,
                per_repeat,
            })
        }
        LabelValues::Continuous(truth) => {
            let columns: Vec<RegressionMetrics> = aligned
                .axis_iter(Axis(1))
                .map(|col| RegressionMetrics::compute(&col.to_vec(), truth))
                .collect();
            let mean = |f: fn(&RegressionMetrics) -> f64| {
                columns.iter().map(f).sum::<f64>() / columns.len() as f64
            };
            EvaluationResult::Continuous(ContinuousEvaluation {
                r2: mean(|m| m.r2),
                mae: mean(|m| m.mae),
                mse: mean(|m| m.mse),
                per_column: if n_columns > 1 { columns } else { Vec::new() },
            })
        }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn roc_auc_matches_rank_statistic_with_ties() {
        let scores = [0.9, 0.7, 0.7, 0.4, 0.3, 0.7];
        let is_case = [true, true, false, false, false, true];
        let roc = roc_curve(&scores, &is_case).unwrap();
        assert_abs_diff_eq!(roc.auc, stats::auc(&scores, &is_case), epsilon = 1e-12);
        assert_eq!(roc.thresholds.len(), 5);
        assert_eq!(*roc.sensitivity.last().unwrap(), 1.0);
        assert_eq!(*roc.specificity.last().unwrap(), 0.0);
    }

    #[test]
    fn perfect_ranking_has_unit_areas() {
        let scores = [0.9, 0.8, 0.2, 0.1];
        let is_case = [true, true, false, false];
        assert_abs_diff_eq!(roc_curve(&scores, &is_case).unwrap().auc, 1.0);
        let pr = pr_curve(&scores, &is_case).unwrap();
        assert_abs_diff_eq!(pr.auc, 1.0);
        assert_eq!(pr.recall[0], 0.0);
        assert_eq!(pr.precision[0], 1.0);
    }

    #[test]
    fn pr_area_of_reversed_ranking() {
        // recall 0, 0, 0.5, 1 with precision 0, 0, 1/3, 1/2
        let scores = [0.1, 0.2, 0.8, 0.9];
        let is_case = [true, true, false, false];
        let pr = pr_curve(&scores, &is_case).unwrap();
        let expected = 0.5 * (0.0 + 1.0 / 3.0) / 2.0 + 0.5 * (1.0 / 3.0 + 0.5) / 2.0;
        assert_abs_diff_eq!(pr.auc, expected, epsilon = 1e-12);
    }

    #[test]
    fn single_class_has_no_curve() {
        assert!(roc_curve(&[0.1, 0.2], &[true, true]).is_err());
    }

    #[test]
    fn measures() {
        let truth = [1.0, 0.0, 1.0, 0.0];
        let pred = [0.8, 0.6, 0.4, 0.1];
        assert_abs_diff_eq!(compute_measure(Measure::Accuracy, &pred, &truth), 0.5);
        assert_abs_diff_eq!(compute_measure(Measure::Auroc, &pred, &truth), 0.75);
        assert_abs_diff_eq!(compute_measure(Measure::Mae, &[1.0, 2.0], &[2.0, 4.0]), 1.5);
        assert_abs_diff_eq!(compute_measure(Measure::Mse, &[1.0, 2.0], &[2.0, 4.0]), 2.5);
    }
}
