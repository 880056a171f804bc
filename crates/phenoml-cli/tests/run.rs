use std::fs;
use std::path::Path;

use phenoml::config::{ModelType, SplitConfig};
use phenoml::evaluation::EvaluationResult;
use phenoml_cli::commands::run::{run, RunConfig};
use phenoml_cli::load_data::{load_feature_matrix, load_label, load_metadata};

const N: usize = 30;

fn is_case(s: usize) -> bool {
    s % 2 == 0
}

/// Features x samples TSV; f0 carries the class, the rest is deterministic noise.
fn write_features(path: &Path, prefix: &str, n: usize) {
    let mut text = String::from("feature");
    for s in 0..n {
        text.push_str(&format!("\t{}{}", prefix, s));
    }
    text.push('\n');
    for f in 0..4 {
        text.push_str(&format!("f{}", f));
        for s in 0..n {
            let v = if f == 0 {
                (if is_case(s) { 2.0 } else { 0.5 }) + 0.05 * (s % 4) as f64
            } else {
                ((s * 5 + f * 3) % 7) as f64 / 7.0
            };
            text.push_str(&format!("\t{}", v));
        }
        text.push('\n');
    }
    fs::write(path, text).unwrap();
}

fn write_label(path: &Path, prefix: &str, n: usize) {
    let mut text = String::from("sample\tdisease\n");
    for s in 0..n {
        let class = if is_case(s) { "CRC" } else { "healthy" };
        text.push_str(&format!("{}{}\t{}\n", prefix, s, class));
    }
    fs::write(path, text).unwrap();
}

fn config(dir: &Path) -> RunConfig {
    let features = dir.join("features.tsv");
    let label = dir.join("label.tsv");
    write_features(&features, "s", N);
    write_label(&label, "s", N);
    let mut config = RunConfig {
        features: features.to_string_lossy().into_owned(),
        label: label.to_string_lossy().into_owned(),
        case: Some("CRC".to_string()),
        output_dir: dir.join("out").to_string_lossy().into_owned(),
        ..Default::default()
    };
    config.pipeline.split = SplitConfig {
        num_folds: 3,
        num_resample: 2,
        ..Default::default()
    };
    config.pipeline.training.model.model_type = ModelType::RidgeLl { cost: Some(1.0) };
    config
}

#[test]
fn tables_are_loaded_in_file_order() {
    let dir = tempfile::tempdir().unwrap();
    let features_path = dir.path().join("features.tsv");
    let label_path = dir.path().join("label.tsv");
    write_features(&features_path, "s", 6);
    write_label(&label_path, "s", 6);

    let features = load_feature_matrix(&features_path).unwrap();
    assert_eq!(features.n_features(), 4);
    assert_eq!(features.sample_ids()[5], "s5");
    assert_eq!(features.data()[(0, 0)], 2.0);

    let label = load_label(&label_path, None, Some("CRC")).unwrap();
    assert_eq!(label.n_case(), 3);
    assert!(load_label(&label_path, None, None).is_err());
    assert!(load_label(&label_path, Some("age"), Some("CRC")).is_err());
}

#[test]
fn csv_metadata_is_read_by_column() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meta.csv");
    fs::write(&path, "sample,subject,site\na,p1,x\nb,p1,y\nc,p2,x\n").unwrap();
    let metadata = load_metadata(&path).unwrap();
    assert_eq!(metadata.sample_ids().len(), 3);
    assert_eq!(metadata.column("subject").unwrap(), &["p1", "p1", "p2"]);
    assert_eq!(metadata.column("site").unwrap()[1], "y");
}

#[test]
fn run_writes_every_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    let holdout_features = dir.path().join("holdout.tsv");
    let holdout_label = dir.path().join("holdout_label.tsv");
    write_features(&holdout_features, "h", 10);
    write_label(&holdout_label, "h", 10);
    config.holdout_features = Some(holdout_features.to_string_lossy().into_owned());
    config.holdout_label = Some(holdout_label.to_string_lossy().into_owned());
    config.validate().unwrap();

    let output = run(&config).unwrap();
    let EvaluationResult::Binary(b) = &output.cross_validation.evaluation else {
        panic!("expected a binary evaluation");
    };
    assert!(b.auroc > 0.9);
    assert!(output.holdout.as_ref().unwrap().evaluation.is_some());

    let out = dir.path().join("out");
    for file in [
        "data_split.tsv",
        "predictions.tsv",
        "feature_weights.tsv",
        "models.tsv",
        "evaluation.json",
        "run_config.json",
        "holdout_predictions.tsv",
        "holdout_evaluation.json",
    ] {
        assert!(out.join(file).exists(), "{} missing", file);
    }

    let predictions = fs::read_to_string(out.join("predictions.tsv")).unwrap();
    let mut lines = predictions.lines();
    assert_eq!(lines.next().unwrap(), "sample_id\tresample_1\tresample_2");
    assert_eq!(lines.count(), N);

    let split = fs::read_to_string(out.join("data_split.tsv")).unwrap();
    for line in split.lines().skip(1) {
        let folds: Vec<usize> = line.split('\t').skip(1).map(|f| f.parse().unwrap()).collect();
        assert!(folds.iter().all(|f| (1..=3).contains(f)));
    }

    let holdout = fs::read_to_string(out.join("holdout_predictions.tsv")).unwrap();
    let header: Vec<&str> = holdout.lines().next().unwrap().split('\t').collect();
    assert_eq!(header.len(), 1 + 6);
    assert_eq!(header[1], "fold_1_resample_1");

    let evaluation: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("evaluation.json")).unwrap()).unwrap();
    assert_eq!(evaluation["type"], "binary");
    assert_eq!(evaluation["auroc"].as_f64().unwrap(), b.auroc);

    let saved: RunConfig = serde_json::from_str(&fs::read_to_string(out.join("run_config.json")).unwrap()).unwrap();
    assert_eq!(saved.pipeline, config.pipeline);
}

#[test]
fn missing_input_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.features = dir.path().join("absent.tsv").to_string_lossy().into_owned();
    assert!(config.validate().is_err());
}

#[test]
fn run_config_reads_partial_json() {
    let json = r#"{
        "features": "f.tsv",
        "label": "l.tsv",
        "case": "CRC",
        "pipeline": {
            "normalization": {"method": "log_std"},
            "split": {"num_folds": 10, "num_resample": 5},
            "training": {
                "model": {"family": "lasso_ll", "tuning": {"inner_folds": 4}},
                "feature_selection": {"method": "auc", "cutoff": {"top_n": 50}}
            }
        }
    }"#;
    let config: RunConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.pipeline.split.num_folds, 10);
    assert!(config.pipeline.split.stratify);
    assert_eq!(config.pipeline.training.model.model_type, ModelType::LassoLl { cost: None });
    assert_eq!(config.pipeline.training.model.tuning.inner_folds, 4);
    assert!(config.apply_frozen_normalization);
    assert_eq!(config.output_dir, "phenoml_output");
}
