//! `phenoml run`: cross-validate a model on one data set and optionally
//! apply it to a holdout set.
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};

use phenoml::config::{ModelType, PipelineConfig};
use phenoml::pipeline::{run_cross_validation, run_holdout, CrossValidationRun, HoldoutRun};

use crate::load_data::{load_feature_matrix, load_label, load_metadata};
use crate::output::{write_data_split, write_feature_weights, write_json, write_model_summaries, write_predictions};

/// Inputs, outputs and pipeline settings of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Features × samples table.
    pub features: String,
    /// Sample id / label table.
    pub label: String,
    /// Label column; the second column when unset.
    pub label_column: Option<String>,
    /// Case class of a binary label. Unset means a continuous label.
    pub case: Option<String>,
    pub metadata: Option<String>,
    pub holdout_features: Option<String>,
    #[serde(alias = "holdout_labels")]
    pub holdout_label: Option<String>,
    /// Apply the training normalization to raw holdout features.
    pub apply_frozen_normalization: bool,
    pub output_dir: String,
    pub pipeline: PipelineConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            features: String::new(),
            label: String::new(),
            label_column: None,
            case: None,
            metadata: None,
            holdout_features: None,
            holdout_label: None,
            apply_frozen_normalization: true,
            output_dir: "phenoml_output".to_string(),
            pipeline: PipelineConfig::default(),
        }
    }
}

pub fn load_run_config<P: AsRef<Path>>(path: P) -> Result<RunConfig> {
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
    let config: RunConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;
    Ok(config)
}

fn validate_table_file(path: &str, what: &str) -> Result<()> {
    if path.is_empty() {
        anyhow::bail!("No {} file given", what);
    }
    let pb = PathBuf::from(path);
    let ext = pb.extension().and_then(|s| s.to_str()).map(|s| s.to_lowercase());
    match ext.as_deref() {
        Some("tsv") | Some("csv") | Some("txt") => {}
        _ => anyhow::bail!("{} file must have a .tsv, .txt or .csv extension: {}", what, path),
    }
    if !pb.exists() {
        anyhow::bail!("{} file does not exist: {}", what, path);
    }
    Ok(())
}

impl RunConfig {
    /// Config file (or defaults) with command-line overrides applied.
    pub fn from_arguments(config_path: Option<&PathBuf>, matches: &ArgMatches) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => load_run_config(path)?,
            None => RunConfig::default(),
        };

        if let Some(features) = matches.get_one::<String>("features") {
            config.features = features.clone();
        }
        if let Some(label) = matches.get_one::<String>("label") {
            config.label = label.clone();
        }
        if let Some(case) = matches.get_one::<String>("case") {
            config.case = Some(case.clone());
        }
        if let Some(metadata) = matches.get_one::<String>("metadata") {
            config.metadata = Some(metadata.clone());
        }
        if let Some(output_dir) = matches.get_one::<String>("output_dir") {
            config.output_dir = output_dir.clone();
        }
        if let Some(holdout) = matches.get_one::<String>("holdout_features") {
            config.holdout_features = Some(holdout.clone());
        }
        if let Some(holdout_label) = matches.get_one::<String>("holdout_label") {
            config.holdout_label = Some(holdout_label.clone());
        }
        if let Some(model) = matches.get_one::<String>("model") {
            config.pipeline.training.model.model_type = ModelType::from_str(model)?;
        }
        if let Some(&folds) = matches.get_one::<usize>("num_folds") {
            config.pipeline.split.num_folds = folds;
        }
        if let Some(&resamples) = matches.get_one::<usize>("num_resample") {
            config.pipeline.split.num_resample = resamples;
        }
        if let Some(&seed) = matches.get_one::<u64>("seed") {
            config.pipeline.split.seed = seed;
            config.pipeline.training.seed = seed;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_table_file(&self.features, "features")?;
        validate_table_file(&self.label, "label")?;
        if let Some(metadata) = &self.metadata {
            validate_table_file(metadata, "metadata")?;
        }
        if let Some(holdout) = &self.holdout_features {
            validate_table_file(holdout, "holdout features")?;
        }
        match (&self.holdout_features, &self.holdout_label) {
            (None, Some(_)) => anyhow::bail!("A holdout label was given without holdout features"),
            (_, Some(label)) => validate_table_file(label, "holdout label")?,
            _ => {}
        }
        Ok(())
    }
}

/// Everything a run produced.
pub struct RunOutput {
    pub cross_validation: CrossValidationRun,
    pub holdout: Option<HoldoutRun>,
}

/// Load the inputs, run the pipeline and write every artifact to the output directory.
pub fn run(config: &RunConfig) -> Result<RunOutput> {
    let features = load_feature_matrix(&config.features)?;
    let label = load_label(&config.label, config.label_column.as_deref(), config.case.as_deref())?;
    let metadata = config.metadata.as_ref().map(load_metadata).transpose()?;

    let cross_validation = run_cross_validation(&features, &label, metadata.as_ref(), &config.pipeline)?;

    let holdout = match &config.holdout_features {
        Some(path) => {
            let holdout_features = load_feature_matrix(path)?;
            let holdout_label = config
                .holdout_label
                .as_ref()
                .map(|p| load_label(p, config.label_column.as_deref(), config.case.as_deref()))
                .transpose()?;
            Some(run_holdout(
                &cross_validation,
                &holdout_features,
                holdout_label.as_ref(),
                config.apply_frozen_normalization,
            )?)
        }
        None => None,
    };

    let output = RunOutput {
        cross_validation,
        holdout,
    };
    write_outputs(config, &output)?;
    Ok(output)
}

pub fn write_outputs(config: &RunConfig, output: &RunOutput) -> Result<()> {
    let dir = Path::new(&config.output_dir);
    fs::create_dir_all(dir).with_context(|| format!("Failed to create output directory: {:?}", dir))?;

    let cv = &output.cross_validation;
    write_data_split(&cv.split, dir.join("data_split.tsv"))?;
    write_predictions(&cv.predictions, dir.join("predictions.tsv"))?;
    write_feature_weights(&cv.models, dir.join("feature_weights.tsv"))?;
    write_model_summaries(&cv.models, dir.join("models.tsv"))?;
    write_json(&cv.evaluation, dir.join("evaluation.json"))?;
    write_json(&config, dir.join("run_config.json"))?;

    if let Some(holdout) = &output.holdout {
        write_predictions(&holdout.predictions, dir.join("holdout_predictions.tsv"))?;
        if let Some(evaluation) = &holdout.evaluation {
            write_json(evaluation, dir.join("holdout_evaluation.json"))?;
        }
    }
    log::info!("Wrote results to {:?}", dir);
    Ok(())
}
