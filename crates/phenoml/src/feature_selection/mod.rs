//! Feature selection utilities.
//!
//! Univariate association scores between each feature and the label, and a
//! selector that keeps the strongest features. Selection inside
//! cross-validation only ever sees the training rows of a fold.
pub mod univariate_selection;

pub use univariate_selection::{association_scores, select_features, UnivariateSelector};
