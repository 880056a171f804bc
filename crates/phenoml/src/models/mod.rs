pub mod gbdt;
pub mod glmnet;
pub mod random_forest;
pub mod utils;

pub mod factory;
pub mod model_trait;

pub use factory::{build_model, candidate_grid};
pub use model_trait::Model;
