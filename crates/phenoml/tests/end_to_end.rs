mod common;

use phenoml::config::{ModelConfig, ModelType, PipelineConfig, SplitConfig, TrainingConfig};
use phenoml::error::{ErrorKind, Stage};
use phenoml::evaluation::EvaluationResult;
use phenoml::pipeline::{run_cross_validation, run_holdout, run_with_split};
use phenoml::preprocessing::NormalizationMethod;

fn pipeline(model_type: ModelType, num_folds: usize, num_resample: usize) -> PipelineConfig {
    PipelineConfig {
        split: SplitConfig {
            num_folds,
            num_resample,
            ..Default::default()
        },
        training: TrainingConfig {
            model: ModelConfig::new(model_type),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn lasso(min_nonzero: usize) -> ModelType {
    ModelType::Lasso {
        min_nonzero,
        num_lambda: 100,
    }
}

fn auroc(evaluation: &EvaluationResult) -> f64 {
    match evaluation {
        EvaluationResult::Binary(b) => b.auroc,
        EvaluationResult::Continuous(_) => panic!("expected a binary evaluation"),
    }
}

#[test]
fn lasso_separates_a_strong_signal_and_weights_informative_features() {
    let (features, label) = common::binary_data(100, 10, 90, 1.5, 17);
    // min_nonzero is set to the informative count: with the default of 5 the
    // first in-sample optimum often stops before all ten features enter.
    let run = run_cross_validation(&features, &label, None, &pipeline(lasso(10), 5, 2)).unwrap();

    assert_eq!(run.models.len(), 10);
    assert_eq!(run.predictions.values().dim(), (100, 2));
    assert!(run.predictions.values().iter().all(|p| (0.0..=1.0).contains(p)));
    assert!(auroc(&run.evaluation) > 0.9, "AUROC {}", auroc(&run.evaluation));

    let weights = run.models.weight_matrix();
    assert_eq!(weights.dim(), (100, 10));
    let nonzero_fraction = |rows: std::ops::Range<usize>| {
        let cells = rows.len() * weights.ncols();
        let nonzero = rows
            .flat_map(|f| weights.row(f).to_vec())
            .filter(|&w| w != 0.0)
            .count();
        nonzero as f64 / cells as f64
    };
    let informative = nonzero_fraction(0..10);
    let noise = nonzero_fraction(10..100);
    assert!(informative >= 0.8, "informative features non-zero in {} of cells", informative);
    assert!(informative > noise, "informative {} vs noise {}", informative, noise);
    // lasso weights of informative features point towards the case class
    let positive = (0..10)
        .flat_map(|f| weights.row(f).to_vec())
        .filter(|&w| w > 0.0)
        .count();
    let negative = (0..10)
        .flat_map(|f| weights.row(f).to_vec())
        .filter(|&w| w < 0.0)
        .count();
    assert!(positive > negative);
}

#[test]
fn holdout_performance_tracks_cross_validation() {
    let (features, label) = common::binary_data(100, 10, 40, 1.5, 23);
    let train: Vec<usize> = (0..80).collect();
    let test: Vec<usize> = (80..100).collect();
    let (train_features, train_label) = common::subset(&features, &label, &train);
    let (test_features, test_label) = common::subset(&features, &label, &test);

    let run = run_cross_validation(&train_features, &train_label, None, &pipeline(lasso(5), 5, 2)).unwrap();
    let holdout = run_holdout(&run, &test_features, Some(&test_label), false).unwrap();

    assert_eq!(holdout.predictions.values().dim(), (20, 10));
    assert_eq!(holdout.predictions.column_names()[0], "fold_1_resample_1");
    assert!(holdout.predictions.values().iter().all(|p| (0.0..=1.0).contains(p)));
    let cv = auroc(&run.evaluation);
    let external = auroc(holdout.evaluation.as_ref().unwrap());
    assert!((cv - external).abs() <= 0.15, "cv {} vs holdout {}", cv, external);

    // no label, no evaluation
    let unlabelled = run_holdout(&run, &test_features, None, false).unwrap();
    assert!(unlabelled.evaluation.is_none());
    assert_eq!(unlabelled.predictions, holdout.predictions);
}

#[test]
fn normalized_models_need_a_normalized_holdout() {
    let (features, label) = common::binary_data(60, 3, 5, 1.5, 29);
    let train: Vec<usize> = (0..40).collect();
    let test: Vec<usize> = (40..60).collect();
    let (train_features, train_label) = common::subset(&features, &label, &train);
    let (test_features, _) = common::subset(&features, &label, &test);

    let mut config = pipeline(ModelType::RidgeLl { cost: Some(1.0) }, 4, 1);
    config.normalization = Some(NormalizationMethod::Std);
    let run = run_cross_validation(&train_features, &train_label, None, &config).unwrap();

    let err = run_holdout(&run, &test_features, None, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
    assert_eq!(err.stage(), Some(Stage::Prediction));

    let holdout = run_holdout(&run, &test_features, None, true).unwrap();
    assert_eq!(holdout.predictions.values().dim(), (20, 4));

    // a holdout lacking a training feature is rejected
    let missing = test_features.select_features(&[0, 1, 2]);
    let err = run_holdout(&run, &missing, None, true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
}

#[test]
fn regression_recovers_a_linear_signal() {
    let (features, label) = common::linear_data(100, 5, 0.5, 31);
    let run = run_cross_validation(&features, &label, None, &pipeline(lasso(1), 5, 1)).unwrap();
    let EvaluationResult::Continuous(c) = &run.evaluation else {
        panic!("expected a continuous evaluation");
    };
    assert!(c.r2 > 0.8, "R2 {}", c.r2);
}

#[test]
fn regression_error_grows_with_noise() {
    let mae = |sigma: f64| {
        let (features, label) = common::linear_data(100, 5, sigma, 37);
        let run = run_cross_validation(&features, &label, None, &pipeline(lasso(1), 5, 1)).unwrap();
        match run.evaluation {
            EvaluationResult::Continuous(c) => c.mae,
            EvaluationResult::Binary(_) => panic!("expected a continuous evaluation"),
        }
    };
    let quiet = mae(0.25);
    let noisy = mae(1.0);
    assert!(noisy > 2.0 * quiet, "MAE {} at sigma 1 vs {} at sigma 0.25", noisy, quiet);
}

#[test]
fn leave_one_out_predicts_every_sample_once() {
    let (features, label) = common::binary_data(20, 2, 3, 2.0, 41);
    let run = run_cross_validation(
        &features,
        &label,
        None,
        &pipeline(ModelType::RidgeLl { cost: Some(1.0) }, 20, 3),
    )
    .unwrap();
    assert_eq!(run.split.num_resample(), 1);
    assert_eq!(run.models.len(), 20);
    assert_eq!(run.predictions.values().dim(), (20, 1));
    assert!(run.predictions.values().iter().all(|p| p.is_finite()));
}

#[test]
fn reusing_a_split_gives_identical_results() {
    let (features, label) = common::binary_data(40, 3, 5, 1.5, 43);
    let config = pipeline(ModelType::RidgeLl { cost: Some(1.0) }, 4, 2);
    let first = run_cross_validation(&features, &label, None, &config).unwrap();
    let split = first.split.copy_compatible(&label).unwrap();
    let second = run_with_split(&features, &label, split, &config).unwrap();
    assert_eq!(first.predictions, second.predictions);
    assert_eq!(first.evaluation, second.evaluation);

    let debug = format!("{:?}", second.models.get(1, 1).unwrap());
    assert!(debug.contains("ridge_ll"), "{}", debug);
}

#[test]
fn tuned_random_forest_runs_end_to_end() {
    let (features, label) = common::binary_data(40, 3, 5, 2.0, 47);
    let mut config = pipeline(
        ModelType::RandomForest {
            num_trees: None,
            mtry: Some(2),
            min_node_size: None,
        },
        4,
        1,
    );
    config.training.model.tuning.grid_size = 2;
    let run = run_cross_validation(&features, &label, None, &config).unwrap();
    for model in run.models.models() {
        assert!(model.hyperparameters().is_resolved());
    }
    assert!(auroc(&run.evaluation) > 0.7);
}

#[test]
fn too_many_folds_is_a_partition_configuration_error() {
    let (features, label) = common::binary_data(10, 2, 2, 1.0, 1);
    let err = run_cross_validation(&features, &label, None, &pipeline(lasso(1), 11, 1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(err.stage(), Some(Stage::Partition));
}

#[test]
fn model_that_cannot_handle_the_task_is_rejected_before_training() {
    let (features, label) = common::linear_data(30, 2, 1.0, 2);
    let err = run_cross_validation(&features, &label, None, &pipeline(ModelType::RidgeLl { cost: Some(1.0) }, 3, 1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(err.stage(), Some(Stage::Training));
}

#[test]
fn inseparable_column_without_metadata_is_a_configuration_error() {
    let (features, label) = common::binary_data(20, 2, 2, 1.0, 3);
    let mut config = pipeline(lasso(1), 4, 1);
    config.split.inseparable = Some("subject".to_string());
    let err = run_cross_validation(&features, &label, None, &config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn unreachable_min_nonzero_names_the_first_instance() {
    let (features, label) = common::binary_data(30, 2, 3, 1.0, 5);
    let err = run_cross_validation(&features, &label, None, &pipeline(lasso(50), 3, 1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(err.stage(), Some(Stage::Training));
    assert_eq!(err.instance(), Some((1, 1)));
}
