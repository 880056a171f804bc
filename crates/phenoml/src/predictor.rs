//! Apply trained models to the test folds they were held out from, or to an
//! external holdout data set.

use std::collections::HashMap;

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data_handling::{FeatureMatrix, FeatureVariant};
use crate::error::{PipelineError, Result};
use crate::partition::DataSplit;
use crate::preprocessing::apply_frozen_normalization;
use crate::trainer::{TrainedModel, TrainedModels};

/// Samples × columns matrix of case probabilities or fitted values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionMatrix {
    sample_ids: Vec<String>,
    column_names: Vec<String>,
    values: Array2<f64>,
}

impl PredictionMatrix {
    pub fn new(sample_ids: Vec<String>, column_names: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if values.dim() != (sample_ids.len(), column_names.len()) {
            return Err(PipelineError::data(format!(
                "prediction matrix is {:?} but has {} sample ids and {} column names",
                values.dim(),
                sample_ids.len(),
                column_names.len()
            )));
        }
        Ok(Self {
            sample_ids,
            column_names,
            values,
        })
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_samples(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.values.ncols()
    }
}

/// Feature-matrix row of every feature the model was trained on.
fn model_rows(model: &TrainedModel, index: &HashMap<&str, usize>) -> Result<Vec<usize>> {
    model
        .feature_names()
        .iter()
        .map(|n| {
            index.get(n.as_str()).copied().ok_or_else(|| {
                PipelineError::data(format!("feature '{}' used by the model is missing", n))
            })
        })
        .collect()
}

/// Predict every sample from the model of the fold it was held out in.
///
/// `features` must be the matrix the models were trained on. The output has
/// one column per resample and rows in the split's sample order; every cell is
/// written exactly once.
pub fn predict_internal(models: &TrainedModels, split: &DataSplit, features: &FeatureMatrix) -> Result<PredictionMatrix> {
    if features.variant() != models.variant() {
        return Err(PipelineError::data(format!(
            "models were trained on {:?} features but {:?} features were supplied",
            models.variant(),
            features.variant()
        )));
    }
    if models.len() != split.num_instances() || models.num_resample() != split.num_resample() {
        return Err(PipelineError::internal(format!(
            "{} trained models for a split with {} instances",
            models.len(),
            split.num_instances()
        )));
    }
    let columns: HashMap<&str, usize> = features
        .sample_ids()
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();
    let sample_columns = split
        .sample_ids()
        .iter()
        .map(|s| {
            columns
                .get(s.as_str())
                .copied()
                .ok_or_else(|| PipelineError::data(format!("sample '{}' has no feature column", s)))
        })
        .collect::<Result<Vec<usize>>>()?;
    let feature_index = features.feature_index();

    let results: Vec<Result<Vec<f64>>> = models
        .models()
        .par_iter()
        .map(|m| {
            let test = split.test(m.fold(), m.resample());
            let test_columns: Vec<usize> = test.iter().map(|&s| sample_columns[s]).collect();
            let rows = model_rows(m, &feature_index)?;
            let x = features.design(&test_columns, &rows);
            let predictions = m.model().predict(&x)?;
            Ok(predictions.to_vec())
        })
        .collect();

    let n = split.sample_ids().len();
    let mut values = Array2::from_elem((n, split.num_resample()), f64::NAN);
    let mut filled = Array2::from_elem((n, split.num_resample()), false);
    for (m, result) in models.models().iter().zip(results) {
        let predictions = result.map_err(|e| e.in_instance(m.fold(), m.resample()))?;
        let test = split.test(m.fold(), m.resample());
        if predictions.len() != test.len() {
            return Err(PipelineError::internal(format!(
                "model returned {} predictions for {} test samples",
                predictions.len(),
                test.len()
            ))
            .in_instance(m.fold(), m.resample()));
        }
        for (&s, p) in test.iter().zip(predictions) {
            if std::mem::replace(&mut filled[(s, m.resample())], true) {
                return Err(PipelineError::internal(format!(
                    "sample '{}' predicted twice in resample {}",
                    split.sample_ids()[s],
                    m.resample() + 1
                )));
            }
            values[(s, m.resample())] = p;
        }
    }
    if let Some(((s, r), _)) = filled.indexed_iter().find(|(_, &f)| !f) {
        return Err(PipelineError::internal(format!(
            "no prediction for sample '{}' in resample {}",
            split.sample_ids()[s],
            r + 1
        )));
    }

    let column_names = (1..=split.num_resample()).map(|r| format!("resample_{}", r)).collect();
    log::info!(
        "Predicted {} samples across {} resamples",
        n,
        split.num_resample()
    );
    PredictionMatrix::new(split.sample_ids().to_vec(), column_names, values)
}

/// Apply every trained model to all samples of an external data set.
///
/// The holdout must contain every reference feature. When the models were
/// trained on normalized features and `holdout` is not normalized yet, the
/// frozen training parameters are applied if `apply_frozen` is set; otherwise
/// this is a Data error. No label is needed.
pub fn predict_holdout(models: &TrainedModels, holdout: &FeatureMatrix, apply_frozen: bool) -> Result<PredictionMatrix> {
    let prepared;
    let holdout = match models.normalization() {
        Some(frozen) if holdout.variant() != FeatureVariant::Normalized => {
            if !apply_frozen {
                return Err(PipelineError::data(
                    "models were trained on normalized features but the holdout data is not normalized; \
                     normalize it or request the frozen training normalization",
                ));
            }
            prepared = apply_frozen_normalization(holdout, frozen)?;
            &prepared
        }
        Some(frozen) => {
            if holdout.normalization() != Some(frozen) {
                log::warn!("Holdout data was normalized with parameters different from the training data");
            }
            holdout
        }
        None => holdout,
    };

    let feature_index = holdout.feature_index();
    if let Some(missing) = models
        .feature_names()
        .iter()
        .find(|n| !feature_index.contains_key(n.as_str()))
    {
        return Err(PipelineError::data(format!(
            "holdout data lacks training feature '{}'",
            missing
        )));
    }

    let all_samples: Vec<usize> = (0..holdout.n_samples()).collect();
    let columns = models
        .models()
        .par_iter()
        .map(|m| {
            let rows = model_rows(m, &feature_index)?;
            let x = holdout.design(&all_samples, &rows);
            m.model()
                .predict(&x)
                .map_err(|e| e.in_instance(m.fold(), m.resample()))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let mut values = Array2::zeros((holdout.n_samples(), columns.len()));
    for (j, col) in columns.iter().enumerate() {
        values.column_mut(j).assign(col);
    }
    let column_names = models
        .models()
        .iter()
        .map(|m| format!("fold_{}_resample_{}", m.fold() + 1, m.resample() + 1))
        .collect();
    log::info!(
        "Applied {} models to {} holdout samples",
        models.len(),
        holdout.n_samples()
    );
    PredictionMatrix::new(holdout.sample_ids().to_vec(), column_names, values)
}
