//! phenoml: cross-validated phenotype prediction from microbiome profiles.
//!
//! The crate splits samples into folds and resamples, trains one model per
//! (fold, resample) with optional nested feature selection and hyper-parameter
//! tuning, predicts the held-out samples and scores the predictions. Trained
//! models can also be applied to an external holdout set.
//!
//! Stages are plain functions that take immutable inputs and return new
//! artifacts, so a run can be resumed from any intermediate result.
pub mod config;
pub mod data_handling;
pub mod error;
pub mod evaluation;
pub mod feature_selection;
pub mod models;
pub mod partition;
pub mod pipeline;
pub mod predictor;
pub mod preprocessing;
pub mod stats;
pub mod trainer;
pub mod tuning;
