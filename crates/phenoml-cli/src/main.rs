use anyhow::Result;
use clap::{Arg, ArgMatches, Command, ValueHint};
use log::LevelFilter;
use std::path::PathBuf;

use phenoml::config::VALID_MODEL_NAMES;
use phenoml::evaluation::EvaluationResult;
use phenoml_cli::commands::run::{run, RunConfig};

fn main() -> Result<()> {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("PHENOML_LOG", "error,phenoml=info,phenoml_cli=info"))
        .init();

    let matches = Command::new("phenoml")
        .version(clap::crate_version!())
        .author("Justin Sing <justincsing@gmail.com>")
        .about("Cross-validated phenotype prediction from microbiome profiles")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run")
                .about("Cross-validate a model and optionally apply it to holdout data")
                .arg(
                    Arg::new("config")
                        .help("Path to the JSON run configuration. Defaults are used when omitted.")
                        .required(false)
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("features")
                        .short('f')
                        .long("features")
                        .value_parser(clap::builder::NonEmptyStringValueParser::new())
                        .help("Features x samples table (TSV or CSV). Overrides the config file.")
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("label")
                        .short('l')
                        .long("label")
                        .value_parser(clap::builder::NonEmptyStringValueParser::new())
                        .help("Sample id / label table. Overrides the config file.")
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("case")
                        .short('c')
                        .long("case")
                        .value_parser(clap::builder::NonEmptyStringValueParser::new())
                        .help("Case class of a binary label. Without it the label is read as continuous.")
                        .value_hint(ValueHint::Other),
                )
                .arg(
                    Arg::new("metadata")
                        .short('m')
                        .long("metadata")
                        .value_parser(clap::builder::NonEmptyStringValueParser::new())
                        .help("Sample metadata table, needed for an inseparable split.")
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("output_dir")
                        .short('o')
                        .long("output_dir")
                        .value_parser(clap::builder::NonEmptyStringValueParser::new())
                        .help("Directory the results are written to. Overrides the config file.")
                        .value_hint(ValueHint::DirPath),
                )
                .arg(
                    Arg::new("model")
                        .long("model")
                        .help("Model family to train, with default hyper-parameters. Overrides the config file.")
                        .value_parser(VALID_MODEL_NAMES.to_vec())
                        .value_hint(ValueHint::Other),
                )
                .arg(
                    Arg::new("num_folds")
                        .short('k')
                        .long("folds")
                        .help("Number of cross-validation folds")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("num_resample")
                        .short('r')
                        .long("resamples")
                        .help("Number of repeated fold assignments")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .help("Seed for the split and for model training")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("holdout_features")
                        .long("holdout_features")
                        .value_parser(clap::builder::NonEmptyStringValueParser::new())
                        .help("External features table the trained models are applied to")
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("holdout_label")
                        .long("holdout_label")
                        .value_parser(clap::builder::NonEmptyStringValueParser::new())
                        .help("Label table of the holdout samples, for evaluation")
                        .value_hint(ValueHint::FilePath),
                ),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Written by {author-with-newline}Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    match matches.subcommand() {
        Some(("run", run_matches)) => handle_run(run_matches),
        _ => unreachable!("Subcommand is required by CLI configuration"),
    }
}

fn handle_run(matches: &ArgMatches) -> Result<()> {
    let config_path = matches.get_one::<PathBuf>("config");
    match config_path {
        Some(path) => log::info!("[phenoml] Running with config: {:?}", path),
        None => {
            let default_json = serde_json::to_string_pretty(&RunConfig::default()).unwrap_or_default();
            eprintln!("[phenoml] No config given, starting from defaults:\n{}", default_json);
        }
    }

    let config = match RunConfig::from_arguments(config_path, matches) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid run configuration: {:#}", e);
            std::process::exit(1)
        }
    };

    match run(&config) {
        Ok(output) => {
            match &output.cross_validation.evaluation {
                EvaluationResult::Binary(b) => {
                    eprintln!("[phenoml] Cross-validation AUROC {:.3}, AUPRC {:.3}", b.auroc, b.auprc)
                }
                EvaluationResult::Continuous(c) => {
                    eprintln!("[phenoml] Cross-validation R2 {:.3}, MAE {:.3}", c.r2, c.mae)
                }
            }
            eprintln!("[phenoml] Results written to {}", config.output_dir);
            Ok(())
        }
        Err(e) => {
            log::error!("Run failed: {:#}", e);
            std::process::exit(1)
        }
    }
}
