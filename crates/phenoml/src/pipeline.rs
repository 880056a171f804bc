//! End-to-end orchestration. Each stage returns a new artifact that is
//! threaded into the next; a failure is reported with the stage it came from.

use crate::config::PipelineConfig;
use crate::data_handling::{align_samples, FeatureMatrix, Label, Metadata};
use crate::error::{PipelineError, Result, Stage};
use crate::evaluation::{evaluate_predictions, EvaluationResult};
use crate::partition::{create_data_split, DataSplit};
use crate::predictor::{predict_holdout, predict_internal, PredictionMatrix};
use crate::preprocessing::{filter_features, normalize_features};
use crate::trainer::{train_models, validate_training_config, TrainedModels};

/// Every artifact of one cross-validation run.
#[derive(Debug)]
pub struct CrossValidationRun {
    /// Features the models were trained on (after filtering/normalization).
    pub features: FeatureMatrix,
    pub label: Label,
    pub split: DataSplit,
    pub models: TrainedModels,
    pub predictions: PredictionMatrix,
    pub evaluation: EvaluationResult,
}

#[derive(Debug)]
pub struct HoldoutRun {
    pub predictions: PredictionMatrix,
    /// Present when a holdout label was supplied.
    pub evaluation: Option<EvaluationResult>,
}

trait StageExt<T> {
    fn stage(self, stage: Stage) -> Result<T>;
}

impl<T> StageExt<T> for Result<T> {
    fn stage(self, stage: Stage) -> Result<T> {
        self.map_err(|e| e.in_stage(stage))
    }
}

/// Optional filtering, then optional normalization.
pub fn prepare_features(features: &FeatureMatrix, config: &PipelineConfig) -> Result<FeatureMatrix> {
    let filtered = match &config.filter {
        Some(method) => filter_features(features, method).stage(Stage::Filtering)?,
        None => features.clone(),
    };
    match &config.normalization {
        Some(method) => normalize_features(&filtered, method).stage(Stage::Normalization),
        None => Ok(filtered),
    }
}

/// Filter, normalize, split, train, predict and evaluate.
///
/// `metadata` is required when the split names an inseparable column.
pub fn run_cross_validation(
    features: &FeatureMatrix,
    label: &Label,
    metadata: Option<&Metadata>,
    config: &PipelineConfig,
) -> Result<CrossValidationRun> {
    label.log_summary();
    // Reject bad model settings before any expensive stage runs.
    validate_training_config(&config.training, label.task()).stage(Stage::Training)?;
    align_samples(features, label).stage(Stage::Partition)?;

    let groups = match &config.split.inseparable {
        Some(column) => {
            let metadata = metadata.ok_or_else(|| {
                PipelineError::config(format!(
                    "inseparable column '{}' requested but no metadata was supplied",
                    column
                ))
                .in_stage(Stage::Partition)
            })?;
            Some(metadata.groups(column, label).stage(Stage::Partition)?)
        }
        None => None,
    };
    let split = create_data_split(label, &config.split, groups.as_deref()).stage(Stage::Partition)?;
    run_with_split(features, label, split, config)
}

/// Same as `run_cross_validation` but on a given split, e.g. one reused from
/// an earlier run through `DataSplit::copy_compatible`.
pub fn run_with_split(
    features: &FeatureMatrix,
    label: &Label,
    split: DataSplit,
    config: &PipelineConfig,
) -> Result<CrossValidationRun> {
    let features = prepare_features(features, config)?;
    let models = train_models(&split, &features, label, &config.training).stage(Stage::Training)?;
    let predictions = predict_internal(&models, &split, &features).stage(Stage::Prediction)?;
    let evaluation = evaluate_predictions(&predictions, label).stage(Stage::Evaluation)?;
    evaluation.log_summary();
    Ok(CrossValidationRun {
        features,
        label: label.clone(),
        split,
        models,
        predictions,
        evaluation,
    })
}

/// Apply the models of `run` to external data, evaluating when a label is given.
pub fn run_holdout(
    run: &CrossValidationRun,
    holdout: &FeatureMatrix,
    holdout_label: Option<&Label>,
    apply_frozen: bool,
) -> Result<HoldoutRun> {
    let predictions = predict_holdout(&run.models, holdout, apply_frozen).stage(Stage::Prediction)?;
    let evaluation = match holdout_label {
        Some(label) => {
            if label.task() != run.models.task() {
                return Err(PipelineError::data(format!(
                    "holdout label is for {} but the models were trained for {}",
                    label.task(),
                    run.models.task()
                ))
                .in_stage(Stage::Evaluation));
            }
            let evaluation = evaluate_predictions(&predictions, label).stage(Stage::Evaluation)?;
            evaluation.log_summary();
            Some(evaluation)
        }
        None => None,
    };
    Ok(HoldoutRun {
        predictions,
        evaluation,
    })
}
