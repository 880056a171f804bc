//! Inner cross-validated hyper-parameter search.
//!
//! `select_hyperparameters` only sees the rows it is handed, so calling it
//! with a fold's training rows keeps the fold's test rows out of the search.

use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::{Measure, ModelConfig, ModelType, Task};
use crate::error::{PipelineError, Result};
use crate::evaluation::compute_measure;
use crate::models::build_model;
use crate::partition::assign_folds;

/// Inner folds over the rows handed to the search.
struct InnerCv<'a> {
    x: &'a Array2<f64>,
    y: &'a Array1<f64>,
    task: Task,
    folds: Vec<usize>,
    k: usize,
    model_config: &'a ModelConfig,
    seed: u64,
}

impl InnerCv<'_> {
    /// Mean inner-fold score of one candidate. Folds where the measure is
    /// undefined are left out of the mean.
    fn score(&self, candidate: &ModelType) -> Result<f64> {
        let measure = self.model_config.tuning_measure(self.task);
        let path_measures = self.model_config.path_measures(self.task);
        let mut scores = Vec::with_capacity(self.k);
        for f in 0..self.k {
            let train: Vec<usize> = (0..self.folds.len()).filter(|&i| self.folds[i] != f).collect();
            let test: Vec<usize> = (0..self.folds.len()).filter(|&i| self.folds[i] == f).collect();
            let mut model = build_model(candidate, self.task, &path_measures, self.seed)?;
            model.fit(&self.x.select(Axis(0), &train), &self.y.select(Axis(0), &train))?;
            let predictions = model.predict(&self.x.select(Axis(0), &test))?;
            let truth = self.y.select(Axis(0), &test);
            let score = compute_measure(measure, &predictions.to_vec(), &truth.to_vec());
            if score.is_finite() {
                scores.push(score);
            }
        }
        if scores.is_empty() {
            return Err(PipelineError::data(format!(
                "{:?} is undefined on every inner fold",
                measure
            )));
        }
        Ok(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

/// Pick the candidate with the best mean inner-fold score.
///
/// Candidates that fail are skipped; ties go to the earlier candidate. When
/// every candidate fails the result is a Data error.
pub fn select_hyperparameters(
    x: &Array2<f64>,
    y: &Array1<f64>,
    task: Task,
    candidates: &[ModelType],
    model_config: &ModelConfig,
    seed: u64,
) -> Result<ModelType> {
    match candidates {
        [] => return Err(PipelineError::internal("empty hyper-parameter grid")),
        [only] => return Ok(only.clone()),
        _ => {}
    }

    let is_case: Option<Vec<bool>> = match task {
        Task::Classification => Some(y.iter().map(|&v| v == 1.0).collect()),
        Task::Regression => None,
    };
    let smallest = is_case.as_ref().map_or(y.len(), |c| {
        let n_case = c.iter().filter(|&&v| v).count();
        n_case.min(c.len() - n_case)
    });
    let k = model_config.tuning.inner_folds.min(smallest);
    if k < 2 {
        return Err(PipelineError::data(format!(
            "too few training samples per class ({}) for inner cross-validation",
            smallest
        )));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let inner = InnerCv {
        x,
        y,
        task,
        folds: assign_folds(y.len(), k, is_case.as_deref(), &mut rng),
        k,
        model_config,
        seed,
    };

    let measure: Measure = model_config.tuning_measure(task);
    let mut best: Option<(usize, f64)> = None;
    for (c, candidate) in candidates.iter().enumerate() {
        match inner.score(candidate) {
            Ok(score) => {
                log::debug!("Tuning candidate {:?}: {:?} = {:.4}", candidate, measure, score);
                if best.map_or(true, |(_, b)| measure.is_better(score, b)) {
                    best = Some((c, score));
                }
            }
            Err(e) => log::warn!("Skipping tuning candidate {:?}: {}", candidate, e),
        }
    }

    let (c, score) = best.ok_or_else(|| {
        PipelineError::data(format!(
            "all {} hyper-parameter candidates failed during inner cross-validation",
            candidates.len()
        ))
    })?;
    log::debug!("Selected {:?} ({:?} = {:.4})", candidates[c], measure, score);
    Ok(candidates[c].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TuningConfig;

    #[test]
    fn single_candidate_is_returned_untouched() {
        let x = Array2::zeros((4, 1));
        let y = Array1::from_vec(vec![0.0, 1.0, 0.0, 1.0]);
        let only = ModelType::RidgeLl { cost: Some(2.0) };
        let cfg = ModelConfig::new(only.clone());
        let chosen = select_hyperparameters(&x, &y, Task::Classification, &[only.clone()], &cfg, 0).unwrap();
        assert_eq!(chosen, only);
    }

    #[test]
    fn tuning_picks_a_working_cost() {
        let n = 40;
        let mut x = Array2::zeros((n, 2));
        let mut y = Array1::zeros(n);
        for i in 0..n {
            let case = i % 2 == 0;
            y[i] = if case { 1.0 } else { 0.0 };
            x[(i, 0)] = if case { 1.0 } else { -1.0 } + ((i * 7) % 5) as f64 / 5.0;
            x[(i, 1)] = ((i * 3) % 4) as f64;
        }
        let mut cfg = ModelConfig::new(ModelType::LassoLl { cost: None });
        cfg.tuning = TuningConfig {
            inner_folds: 3,
            measure: Some(Measure::Auroc),
            grid_size: 3,
        };
        let grid = crate::models::candidate_grid(&cfg.model_type, Task::Classification, 2, 3);
        let chosen = select_hyperparameters(&x, &y, Task::Classification, &grid, &cfg, 11).unwrap();
        assert!(grid.contains(&chosen));
    }

    #[test]
    fn all_failing_candidates_is_a_data_error() {
        // ridge_ll cannot fit a regression task, so every candidate fails
        let x = Array2::from_shape_fn((12, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(12, |i| i as f64);
        let grid = vec![ModelType::RidgeLl { cost: Some(1.0) }, ModelType::RidgeLl { cost: Some(2.0) }];
        let cfg = ModelConfig::new(grid[0].clone());
        let err = select_hyperparameters(&x, &y, Task::Regression, &grid, &cfg, 0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Data);
    }
}
