use crate::config::{Measure, ModelType, Task};
use crate::error::{PipelineError, Result};
use crate::models::gbdt::GBDTModel;
use crate::models::glmnet::{Family, PenalizedGlm, Penalty};
use crate::models::model_trait::Model;
use crate::models::random_forest::RandomForest;

/// Build a boxed model from a fully resolved `ModelType`.
///
/// `selection_measures` drive λ selection for path-fitted families; `seed`
/// feeds every random draw the model makes.
pub fn build_model(
    model_type: &ModelType,
    task: Task,
    selection_measures: &[Measure],
    seed: u64,
) -> Result<Box<dyn Model>> {
    if !model_type.supports(task) {
        return Err(PipelineError::config(format!(
            "model family '{}' does not support {}",
            model_type, task
        )));
    }
    let family = Family::for_task(task);
    let path = |num_lambda: usize, min_nonzero: usize| Penalty::Path {
        num_lambda,
        min_nonzero,
        measures: selection_measures.to_vec(),
    };
    let unresolved = || {
        PipelineError::internal(format!(
            "{} hyper-parameters must be resolved before building the model",
            model_type
        ))
    };

    let model: Box<dyn Model> = match model_type {
        ModelType::Lasso {
            min_nonzero,
            num_lambda,
        } => Box::new(PenalizedGlm::new("lasso", family, 1.0, true, path(*num_lambda, *min_nonzero))),
        ModelType::Ridge { num_lambda } => {
            Box::new(PenalizedGlm::new("ridge", family, 0.0, true, path(*num_lambda, 0)))
        }
        ModelType::ElasticNet {
            alpha,
            min_nonzero,
            num_lambda,
        } => {
            let alpha = alpha.ok_or_else(unresolved)?;
            Box::new(PenalizedGlm::new("enet", family, alpha, true, path(*num_lambda, *min_nonzero)))
        }
        ModelType::LassoLl { cost } => {
            let c = cost.ok_or_else(unresolved)?;
            Box::new(PenalizedGlm::new("lasso_ll", family, 1.0, false, Penalty::Cost(c)))
        }
        ModelType::RidgeLl { cost } => {
            let c = cost.ok_or_else(unresolved)?;
            Box::new(PenalizedGlm::new("ridge_ll", family, 0.0, false, Penalty::Cost(c)))
        }
        ModelType::RandomForest {
            num_trees,
            mtry,
            min_node_size,
        } => Box::new(RandomForest::new(
            task,
            num_trees.ok_or_else(unresolved)?,
            mtry.ok_or_else(unresolved)?,
            min_node_size.unwrap_or_else(|| RandomForest::default_min_node_size(task)),
            seed,
        )),
        ModelType::Gbdt {
            max_depth,
            num_boost_round,
            learning_rate,
        } => Box::new(GBDTModel::new(task, *max_depth, *num_boost_round, *learning_rate, seed)),
    };
    Ok(model)
}

/// `grid_size` log-spaced values between 10^lo and 10^hi.
fn log_grid(lo: f64, hi: f64, grid_size: usize) -> Vec<f64> {
    if grid_size <= 1 {
        return vec![10f64.powf((lo + hi) / 2.0)];
    }
    (0..grid_size)
        .map(|k| 10f64.powf(lo + (hi - lo) * k as f64 / (grid_size - 1) as f64))
        .collect()
}

/// Resolved candidates for every open hyper-parameter of `model_type`.
///
/// A resolved `model_type` yields itself as the only candidate.
pub fn candidate_grid(model_type: &ModelType, task: Task, n_features: usize, grid_size: usize) -> Vec<ModelType> {
    let grid_size = grid_size.max(1);
    match model_type {
        ModelType::ElasticNet {
            alpha: None,
            min_nonzero,
            num_lambda,
        } => (1..=grid_size)
            .map(|k| ModelType::ElasticNet {
                alpha: Some(k as f64 / grid_size as f64),
                min_nonzero: *min_nonzero,
                num_lambda: *num_lambda,
            })
            .collect(),
        ModelType::LassoLl { cost: None } => log_grid(-2.0, 3.0, grid_size)
            .into_iter()
            .map(|c| ModelType::LassoLl { cost: Some(c) })
            .collect(),
        ModelType::RidgeLl { cost: None } => log_grid(-2.0, 3.0, grid_size)
            .into_iter()
            .map(|c| ModelType::RidgeLl { cost: Some(c) })
            .collect(),
        ModelType::RandomForest {
            num_trees,
            mtry,
            min_node_size,
        } if !model_type.is_resolved() => {
            let trees: Vec<usize> = match num_trees {
                Some(t) => vec![*t],
                None => [100, 250, 500, 750, 1000].into_iter().take(grid_size).collect(),
            };
            let mtrys: Vec<usize> = match mtry {
                Some(m) => vec![*m],
                None => {
                    let m = RandomForest::default_mtry(task, n_features);
                    let mut v: Vec<usize> = [m, m / 2, m * 2, m / 4, m * 4]
                        .into_iter()
                        .map(|c| c.clamp(1, n_features.max(1)))
                        .take(grid_size)
                        .collect();
                    v.sort_unstable();
                    v.dedup();
                    v
                }
            };
            trees
                .iter()
                .flat_map(|&t| {
                    mtrys.iter().map(move |&m| ModelType::RandomForest {
                        num_trees: Some(t),
                        mtry: Some(m),
                        min_node_size: *min_node_size,
                    })
                })
                .collect()
        }
        resolved => vec![resolved.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_types_build() {
        for name in crate::config::VALID_MODEL_NAMES {
            let mt: ModelType = name.parse().unwrap();
            for candidate in candidate_grid(&mt, Task::Classification, 20, 3) {
                assert!(candidate.is_resolved(), "{:?}", candidate);
                let model = build_model(&candidate, Task::Classification, &[Measure::Accuracy], 1).unwrap();
                assert_eq!(model.name(), *name);
            }
        }
    }

    #[test]
    fn unresolved_type_is_rejected() {
        let mt = ModelType::LassoLl { cost: None };
        assert!(build_model(&mt, Task::Classification, &[], 1).is_err());
        let mt = ModelType::RidgeLl { cost: Some(1.0) };
        assert!(build_model(&mt, Task::Regression, &[], 1).is_err());
    }

    #[test]
    fn cost_grid_is_log_spaced() {
        let grid = candidate_grid(&ModelType::LassoLl { cost: None }, Task::Classification, 5, 6);
        let costs: Vec<f64> = grid
            .iter()
            .map(|m| match m {
                ModelType::LassoLl { cost: Some(c) } => *c,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(costs.len(), 6);
        assert!((costs[0] - 0.01).abs() < 1e-12);
        assert!((costs[5] - 1000.0).abs() < 1e-9);
    }
}
