use std::fmt;

use ndarray::{Array1, Array2};

use crate::error::Result;

/// Capability shared by every model family.
///
/// `x` is a samples × features design matrix. For classification `y` holds
/// 1.0 for the case class and 0.0 for control, and `predict` returns the
/// estimated case probability; for regression it returns fitted values.
pub trait Model: Send + Sync {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()>;

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// One weight per training feature. Linear models return their
    /// coefficients without the intercept (positive = case-associated), tree
    /// ensembles an unsigned importance.
    fn feature_weights(&self) -> Result<Array1<f64>>;

    fn name(&self) -> &str {
        "model"
    }

    /// Short description of the fitted state, e.g. the chosen penalty.
    fn summary(&self) -> String {
        self.name().to_string()
    }
}

impl fmt::Debug for dyn Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name())
            .field("summary", &self.summary())
            .finish()
    }
}
