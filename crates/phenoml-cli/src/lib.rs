//! Command-line front end for phenoml: table loading, run configuration and
//! result writers.
pub mod commands;
pub mod load_data;
pub mod output;
