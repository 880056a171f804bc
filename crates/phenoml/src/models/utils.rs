use ndarray::{Array1, Array2, Axis};

use crate::error::{PipelineError, Result};

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Shape checks shared by every `fit` implementation.
pub fn check_training_data(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(PipelineError::internal(format!(
            "design matrix has {} rows but the response has {} values",
            x.nrows(),
            y.len()
        )));
    }
    if x.nrows() < 2 || x.ncols() == 0 {
        return Err(PipelineError::data(format!(
            "cannot fit a model on {} samples and {} features",
            x.nrows(),
            x.ncols()
        )));
    }
    Ok(())
}

/// Classification responses must contain both 0.0 and 1.0.
pub fn check_two_classes(y: &Array1<f64>) -> Result<()> {
    let n_case = y.iter().filter(|&&v| v == 1.0).count();
    if y.iter().any(|&v| v != 0.0 && v != 1.0) {
        return Err(PipelineError::internal("classification response must be 0/1"));
    }
    if n_case == 0 || n_case == y.len() {
        return Err(PipelineError::data("training rows contain a single class"));
    }
    Ok(())
}

pub fn check_prediction_width(x: &Array2<f64>, n_features: usize) -> Result<()> {
    if x.ncols() != n_features {
        return Err(PipelineError::data(format!(
            "model was trained on {} features but got {}",
            n_features,
            x.ncols()
        )));
    }
    Ok(())
}

/// Column means and population standard deviations of a samples × features matrix.
pub fn column_moments(x: &Array2<f64>) -> (Array1<f64>, Array1<f64>) {
    let n = x.nrows() as f64;
    let means = x.sum_axis(Axis(0)) / n;
    let sds = x
        .axis_iter(Axis(1))
        .zip(means.iter())
        .map(|(col, &m)| (col.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n).sqrt())
        .collect();
    (means, sds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn moments_use_population_sd() {
        let x = array![[1.0, 5.0], [3.0, 5.0]];
        let (m, s) = column_moments(&x);
        assert_abs_diff_eq!(m[0], 2.0);
        assert_abs_diff_eq!(s[0], 1.0);
        assert_abs_diff_eq!(s[1], 0.0);
    }

    #[test]
    fn single_class_is_rejected() {
        assert!(check_two_classes(&array![1.0, 1.0, 1.0]).is_err());
        assert!(check_two_classes(&array![1.0, 0.0, 1.0]).is_ok());
    }
}
