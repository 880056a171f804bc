//! One model per (fold, resample), trained on that instance's training rows.
//!
//! Instances run in parallel on the rayon pool. Each job reads the shared
//! feature matrix and label and returns its own `TrainedModel`; results are
//! gathered in linear-index order.

use ndarray::{Array1, Axis};
use rayon::prelude::*;

use crate::config::{ModelType, Task, TrainingConfig};
use crate::data_handling::{align_samples, FeatureMatrix, FeatureVariant, Label};
use crate::error::{PipelineError, Result};
use crate::feature_selection::select_features;
use crate::models::{build_model, candidate_grid, Model};
use crate::partition::DataSplit;
use crate::preprocessing::FrozenNormalization;
use crate::tuning::select_hyperparameters;

/// A fitted model together with the features it was trained on.
#[derive(Debug)]
pub struct TrainedModel {
    fold: usize,
    resample: usize,
    index: usize,
    feature_names: Vec<String>,
    feature_weights: Array1<f64>,
    hyperparameters: ModelType,
    model: Box<dyn Model>,
}

impl TrainedModel {
    /// 0-based fold.
    pub fn fold(&self) -> usize {
        self.fold
    }

    /// 0-based resample.
    pub fn resample(&self) -> usize {
        self.resample
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Features after nested selection, in the order the model expects.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn feature_weights(&self) -> &Array1<f64> {
        &self.feature_weights
    }

    /// Resolved hyper-parameters, after tuning.
    pub fn hyperparameters(&self) -> &ModelType {
        &self.hyperparameters
    }

    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    pub fn summary(&self) -> String {
        self.model.summary()
    }
}

/// Every trained model of a cross-validation run, in linear-index order.
#[derive(Debug)]
pub struct TrainedModels {
    models: Vec<TrainedModel>,
    task: Task,
    feature_names: Vec<String>,
    variant: FeatureVariant,
    normalization: Option<FrozenNormalization>,
    num_folds: usize,
    num_resample: usize,
}

impl TrainedModels {
    pub fn models(&self) -> &[TrainedModel] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn get(&self, fold: usize, resample: usize) -> Option<&TrainedModel> {
        self.models.get(fold * self.num_resample + resample)
    }

    pub fn task(&self) -> Task {
        self.task
    }

    /// Reference feature set the models were trained from, before selection.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn variant(&self) -> FeatureVariant {
        self.variant
    }

    pub fn normalization(&self) -> Option<&FrozenNormalization> {
        self.normalization.as_ref()
    }

    pub fn num_folds(&self) -> usize {
        self.num_folds
    }

    pub fn num_resample(&self) -> usize {
        self.num_resample
    }

    /// Weight of every reference feature in every model (features × models);
    /// features a model did not use get 0.
    pub fn weight_matrix(&self) -> ndarray::Array2<f64> {
        let index: std::collections::HashMap<&str, usize> = self
            .feature_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        let mut weights = ndarray::Array2::zeros((self.feature_names.len(), self.models.len()));
        for (m, model) in self.models.iter().enumerate() {
            for (name, &w) in model.feature_names.iter().zip(model.feature_weights.iter()) {
                if let Some(&f) = index.get(name.as_str()) {
                    weights[(f, m)] = w;
                }
            }
        }
        weights
    }
}

/// Validate the training configuration against the label's task.
pub fn validate_training_config(config: &TrainingConfig, task: Task) -> Result<()> {
    config.model.validate(task)?;
    if let Some(fs) = &config.feature_selection {
        fs.validate(task)?;
    }
    Ok(())
}

struct TrainingContext<'a> {
    split: &'a DataSplit,
    features: &'a FeatureMatrix,
    /// Feature-matrix column of every label sample.
    columns: Vec<usize>,
    response: Array1<f64>,
    task: Task,
    config: &'a TrainingConfig,
}

impl TrainingContext<'_> {
    fn train_instance(&self, fold: usize, resample: usize) -> Result<TrainedModel> {
        let index = self.split.linear_index(fold, resample);
        let seed = self.config.seed.wrapping_add(index as u64);
        let rows: Vec<usize> = self.split.train(fold, resample).iter().map(|&s| self.columns[s]).collect();
        let y = self.response.select(Axis(0), self.split.train(fold, resample));
        if self.task == Task::Classification {
            let n_case = y.iter().filter(|&&v| v == 1.0).count();
            if n_case == 0 || n_case == y.len() {
                return Err(PipelineError::data("training rows contain a single class"));
            }
        }

        let all_features: Vec<usize> = (0..self.features.n_features()).collect();
        let x_all = self.features.design(&rows, &all_features);

        // Nested selection sees the training rows only.
        let (x, kept) = match &self.config.feature_selection {
            Some(fs) => {
                let keep = select_features(&x_all, &y, fs)?;
                (x_all.select(Axis(1), &keep), keep)
            }
            None => (x_all, all_features),
        };
        let feature_names: Vec<String> = kept
            .iter()
            .map(|&f| self.features.feature_names()[f].clone())
            .collect();

        let model_type = &self.config.model.model_type;
        let hyperparameters = if model_type.is_resolved() {
            model_type.clone()
        } else {
            let grid = candidate_grid(model_type, self.task, x.ncols(), self.config.model.tuning.grid_size);
            select_hyperparameters(&x, &y, self.task, &grid, &self.config.model, seed)?
        };

        let mut model = build_model(&hyperparameters, self.task, &self.config.model.path_measures(self.task), seed)?;
        model.fit(&x, &y)?;
        let feature_weights = model.feature_weights()?;
        if feature_weights.len() != feature_names.len() {
            return Err(PipelineError::internal(format!(
                "{} returned {} weights for {} features",
                model.name(),
                feature_weights.len(),
                feature_names.len()
            )));
        }
        log::debug!(
            "Trained fold {}, resample {} on {} samples x {} features: {}",
            fold + 1,
            resample + 1,
            rows.len(),
            feature_names.len(),
            model.summary()
        );

        Ok(TrainedModel {
            fold,
            resample,
            index,
            feature_names,
            feature_weights,
            hyperparameters,
            model,
        })
    }
}

/// Train one model per (fold, resample) of `split`.
///
/// The case class is encoded as 1.0 in the response, which fixes the
/// orientation of probabilities and linear weights without reordering rows.
/// On failure the error names the first failing instance in linear-index
/// order.
pub fn train_models(
    split: &DataSplit,
    features: &FeatureMatrix,
    label: &Label,
    config: &TrainingConfig,
) -> Result<TrainedModels> {
    let task = label.task();
    validate_training_config(config, task)?;
    if split.sample_ids() != label.sample_ids() {
        return Err(PipelineError::data(
            "data split and label do not cover the same samples in the same order",
        ));
    }
    let columns = align_samples(features, label)?;

    let ctx = TrainingContext {
        split,
        features,
        columns,
        response: label.response(),
        task,
        config,
    };

    log::info!(
        "Training {} {} models ({} folds x {} resamples) on {} features",
        split.num_instances(),
        config.model.model_type,
        split.num_folds(),
        split.num_resample(),
        features.n_features()
    );

    let results: Vec<Result<TrainedModel>> = (0..split.num_instances())
        .into_par_iter()
        .map(|i| {
            let (fold, resample) = split.instance(i);
            ctx.train_instance(fold, resample)
                .map_err(|e| e.in_instance(fold, resample))
        })
        .collect();
    let models = results.into_iter().collect::<Result<Vec<TrainedModel>>>()?;

    Ok(TrainedModels {
        models,
        task,
        feature_names: features.feature_names().to_vec(),
        variant: features.variant(),
        normalization: features.normalization().cloned(),
        num_folds: split.num_folds(),
        num_resample: split.num_resample(),
    })
}
