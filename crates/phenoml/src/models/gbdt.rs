use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::Task;
use crate::error::{PipelineError, Result};
use crate::models::model_trait::Model;
use crate::models::utils::{check_prediction_width, check_training_data, check_two_classes};

/// Gradient Boosting Decision Tree (GBDT) classifier / regressor
pub struct GBDTModel {
    task: Task,
    max_depth: u32,
    num_boost_round: u32,
    learning_rate: f32,
    seed: u64,
    model: Option<GBDT>,
    importance: Option<Array1<f64>>,
}

fn to_data_vec(x: &Array2<f64>, y: Option<&Array1<f64>>) -> DataVec {
    let mut data = DataVec::with_capacity(x.nrows());
    for (i, row) in x.rows().into_iter().enumerate() {
        let features: Vec<f32> = row.iter().map(|&v| v as f32).collect();
        let label = y.map_or(0.0, |y| y[i] as f32);
        data.push(Data::new_training_data(features, 1.0, label, None));
    }
    data
}

impl GBDTModel {
    pub fn new(task: Task, max_depth: u32, num_boost_round: u32, learning_rate: f32, seed: u64) -> Self {
        GBDTModel {
            task,
            max_depth,
            num_boost_round,
            learning_rate,
            seed,
            model: None,
            importance: None,
        }
    }

    fn raw_predict(&self, gbdt: &GBDT, x: &Array2<f64>) -> Array1<f64> {
        let predictions = gbdt.predict(&to_data_vec(x, None));
        predictions
            .into_iter()
            .map(|p| {
                let p = p as f64;
                match self.task {
                    Task::Classification => p.clamp(0.0, 1.0),
                    Task::Regression => p,
                }
            })
            .collect()
    }

    /// Mean squared error increase when one column is permuted, per feature.
    fn permutation_importance(&self, gbdt: &GBDT, x: &Array2<f64>, y: &Array1<f64>) -> Array1<f64> {
        let mse = |pred: &Array1<f64>| {
            pred.iter().zip(y.iter()).map(|(p, t)| (p - t).powi(2)).sum::<f64>() / y.len() as f64
        };
        let baseline = mse(&self.raw_predict(gbdt, x));
        (0..x.ncols())
            .map(|j| {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(j as u64));
                let mut order: Vec<usize> = (0..x.nrows()).collect();
                order.shuffle(&mut rng);
                let mut permuted = x.clone();
                for (i, &src) in order.iter().enumerate() {
                    permuted[(i, j)] = x[(src, j)];
                }
                (mse(&self.raw_predict(gbdt, &permuted)) - baseline).max(0.0)
            })
            .collect()
    }
}

impl Model for GBDTModel {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_training_data(x, y)?;

        let mut config = Config::new();
        config.set_feature_size(x.ncols());
        config.set_shrinkage(self.learning_rate);
        config.set_max_depth(self.max_depth);
        config.set_iterations(self.num_boost_round as usize);
        config.set_debug(false);

        let labels: Array1<f64> = match self.task {
            Task::Classification => {
                check_two_classes(y)?;
                config.set_loss("LogLikelyhood");
                // LogLikelyhood expects labels in {-1, 1}
                y.mapv(|v| if v == 1.0 { 1.0 } else { -1.0 })
            }
            Task::Regression => {
                config.set_loss("SquaredError");
                y.clone()
            }
        };

        let mut gbdt = GBDT::new(&config);
        let mut train_x = to_data_vec(x, Some(&labels));
        gbdt.fit(&mut train_x);

        let importance = self.permutation_importance(&gbdt, x, y);
        self.model = Some(gbdt);
        self.importance = Some(importance);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let gbdt = self
            .model
            .as_ref()
            .ok_or_else(|| PipelineError::internal("gbdt used before fitting"))?;
        let width = self.importance.as_ref().map_or(0, |i| i.len());
        check_prediction_width(x, width)?;
        Ok(self.raw_predict(gbdt, x))
    }

    fn feature_weights(&self) -> Result<Array1<f64>> {
        self.importance
            .clone()
            .ok_or_else(|| PipelineError::internal("gbdt used before fitting"))
    }

    fn name(&self) -> &str {
        "gbdt"
    }

    fn summary(&self) -> String {
        format!(
            "gbdt (max depth {}, {} rounds, learning rate {})",
            self.max_depth, self.num_boost_round, self.learning_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_gbdt_classifier() {
        // Second feature carries the class, the others are constant or noise
        let x = Array2::from_shape_vec(
            (10, 3),
            vec![
                0.1, 1.0, 5.0, 0.4, -1.0, 5.0, 0.6, 1.0, 5.0, 0.9, -1.0, 5.0, 1.2, 1.0, 5.0, 1.5,
                -1.0, 5.0, 1.8, 1.0, 5.0, 2.1, -1.0, 5.0, 2.4, 1.0, 5.0, 2.7, -1.0, 5.0,
            ],
        )
        .unwrap();
        let y = Array1::from_vec(vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);

        let mut model = GBDTModel::new(Task::Classification, 3, 20, 0.3, 1);
        model.fit(&x, &y).unwrap();
        let predictions = model.predict(&x).unwrap();

        assert_eq!(predictions.len(), y.len());
        assert!(predictions.iter().all(|&p| (0.0..=1.0).contains(&p)));
        assert!(predictions[0] > predictions[1]);
        let w = model.feature_weights().unwrap();
        assert!(w[1] >= w[2]);
    }
}
