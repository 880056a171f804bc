use anyhow::Result;
use log::LevelFilter;
use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, LogNormal};

use phenoml::config::{AssociationMethod, Cutoff, Direction, FeatureSelectionConfig, ModelConfig, ModelType, PipelineConfig};
use phenoml::data_handling::{FeatureMatrix, Label};
use phenoml::evaluation::EvaluationResult;
use phenoml::pipeline::run_cross_validation;
use phenoml::preprocessing::{FilterMethod, NormalizationMethod};

/// Relative-abundance profiles where the first `informative` taxa are
/// enriched in cases.
fn abundance_profiles(n_samples: usize, n_taxa: usize, informative: usize, seed: u64) -> Result<(FeatureMatrix, Label)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let background = LogNormal::new(0.0, 1.0)?;
    let is_case: Vec<bool> = (0..n_samples).map(|s| s % 3 == 0).collect();
    let mut counts = Array2::from_shape_fn((n_taxa, n_samples), |_| background.sample(&mut rng));
    for s in 0..n_samples {
        if is_case[s] {
            for t in 0..informative {
                counts[(t, s)] *= 4.0;
            }
        }
        let total: f64 = counts.column(s).sum();
        counts.column_mut(s).mapv_inplace(|c| c / total);
    }

    let samples: Vec<String> = (0..n_samples).map(|s| format!("sample_{}", s)).collect();
    let taxa: Vec<String> = (0..n_taxa).map(|t| format!("taxon_{}", t)).collect();
    let classes: Vec<&str> = is_case.iter().map(|&c| if c { "CRC" } else { "healthy" }).collect();
    Ok((
        FeatureMatrix::new(counts, taxa, samples.clone())?,
        Label::binary(samples, &classes, "CRC")?,
    ))
}

fn main() -> Result<()> {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Info)
        .parse_env(env_logger::Env::default().filter_or("PHENOML_LOG", "info"))
        .init();

    let (features, label) = abundance_profiles(120, 200, 15, 7)?;

    let mut config = PipelineConfig {
        filter: Some(FilterMethod::Abundance { cutoff: 1e-3 }),
        normalization: Some(NormalizationMethod::LogStd {
            log_n0: 1e-6,
            sd_min_quantile: 0.1,
        }),
        ..Default::default()
    };
    config.split.num_folds = 5;
    config.split.num_resample = 3;

    let models = [
        ModelType::Lasso {
            min_nonzero: 5,
            num_lambda: 100,
        },
        ModelType::ElasticNet {
            alpha: None,
            min_nonzero: 5,
            num_lambda: 50,
        },
        ModelType::RandomForest {
            num_trees: Some(250),
            mtry: None,
            min_node_size: None,
        },
    ];

    for model_type in models {
        config.training.model = ModelConfig::new(model_type.clone());
        config.training.feature_selection = Some(FeatureSelectionConfig {
            method: AssociationMethod::Auc,
            direction: Direction::Absolute,
            cutoff: Cutoff::TopN(50),
        });
        let run = run_cross_validation(&features, &label, None, &config)?;
        if let EvaluationResult::Binary(b) = &run.evaluation {
            println!(
                "{:<14} AUROC {:.3}  AUPRC {:.3}  per-resample AUROC {:?}",
                model_type.to_string(),
                b.auroc,
                b.auprc,
                b.repeat_auroc().iter().map(|a| format!("{:.3}", a)).collect::<Vec<_>>()
            );
        }
    }
    Ok(())
}
