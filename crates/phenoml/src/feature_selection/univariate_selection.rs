//! Univariate feature scoring and selection.

use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2};

use crate::config::{AssociationMethod, Cutoff, Direction, FeatureSelectionConfig};
use crate::error::{PipelineError, Result};
use crate::stats;

/// Compute row-wise (squared) Euclidean norms of a 2D array.
///
/// Called on a transposed samples × features matrix this yields the
/// per-feature sums of squares used by `r_regression`.
///
/// # Parameters
///
/// * `x` - A 2D array of shape (n_rows, n_cols). Any `ndarray` storage works,
///   so views such as `matrix.t()` can be passed without copying.
/// * `squared` - Return squared norms instead of the norms themselves.
///
/// # Returns
///
/// An array of shape (n_rows,) with the (squared) Euclidean norm of each row.
///
/// # Examples
///
/// ```rust
/// use ndarray::array;
/// use phenoml::feature_selection::univariate_selection::row_norms;
///
/// let x = array![[3.0, 4.0], [1.0, 0.0]];
/// assert_eq!(row_norms(&x, false).to_vec(), vec![5.0, 1.0]);
/// assert_eq!(row_norms(&x, true).to_vec(), vec![25.0, 1.0]);
/// ```
pub fn row_norms<S>(x: &ArrayBase<S, Ix2>, squared: bool) -> Array1<f64>
where
    S: Data<Elem = f64>,
{
    x.axis_iter(Axis(0))
        .map(|row| {
            let sum_of_squares: f64 = row.iter().map(|&val| val.powi(2)).sum();
            if squared {
                sum_of_squares
            } else {
                sum_of_squares.sqrt()
            }
        })
        .collect()
}

/// Compute Pearson's r between each feature and the response.
///
/// Both `x` and `y` are centered internally. This is the score behind the
/// `pearson` association method for continuous labels.
///
/// # Parameters
///
/// * `x` - A 2D array of shape (n_samples, n_features), one column per
///   feature.
/// * `y` - A 1D array of shape (n_samples,) holding the response.
/// * `force_finite` - Replace non-finite coefficients by 0.0. A constant
///   feature (or a constant response) has no defined correlation.
///
/// # Returns
///
/// An array of shape (n_features,) with the correlation coefficient of each
/// feature, in [-1, 1].
///
/// # Examples
///
/// ```rust
/// use ndarray::array;
/// use phenoml::feature_selection::univariate_selection::r_regression;
///
/// let x = array![[1.0, 3.0, 5.0], [2.0, 2.0, 5.0], [3.0, 1.0, 5.0]];
/// let y = array![2.0, 4.0, 6.0];
/// let r = r_regression(&x, &y, true);
/// assert!((r[0] - 1.0).abs() < 1e-12);
/// assert!((r[1] + 1.0).abs() < 1e-12);
/// assert_eq!(r[2], 0.0);
/// ```
pub fn r_regression(x: &Array2<f64>, y: &Array1<f64>, force_finite: bool) -> Array1<f64> {
    let n_samples = x.nrows() as f64;
    let y_mean = y.sum() / n_samples;
    let y_centered = y.mapv(|v| v - y_mean);

    let x_means = x.sum_axis(Axis(0)) / n_samples;
    let x_squared_norms = row_norms(&x.t(), true);
    let x_norms = (&x_squared_norms - &(x_means.mapv(|m| m.powi(2)) * n_samples)).mapv(|v| v.max(0.0).sqrt());

    let mut correlation_coefficient = Array1::zeros(x.ncols());
    for (i, col) in x.columns().into_iter().enumerate() {
        correlation_coefficient[i] = col.mapv(|v| v - x_means[i]).dot(&y_centered);
    }
    let y_norm = y_centered.dot(&y_centered).sqrt();

    correlation_coefficient /= &x_norms;
    correlation_coefficient /= y_norm;

    if force_finite {
        correlation_coefficient.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
    }
    correlation_coefficient
}

/// Association score of every feature (columns of `x`) with the response.
///
/// Classification methods read `y` as 1.0 for case and 0.0 for control. The
/// score is AUC, gFC or the Wilcoxon p-value for classification, and the
/// correlation coefficient for regression.
pub fn association_scores(x: &Array2<f64>, y: &Array1<f64>, method: AssociationMethod) -> Array1<f64> {
    let is_case: Vec<bool> = y.iter().map(|&v| v > 0.5).collect();
    let y_vec = y.to_vec();
    match method {
        AssociationMethod::Pearson => r_regression(x, y, true),
        _ => x
            .columns()
            .into_iter()
            .map(|col| {
                let col = col.to_vec();
                match method {
                    AssociationMethod::Auc => stats::auc(&col, &is_case),
                    AssociationMethod::Gfc => stats::gfc(&col, &is_case),
                    AssociationMethod::Wilcoxon => stats::wilcoxon_p_value(&col, &is_case),
                    AssociationMethod::Spearman => stats::spearman(&col, &y_vec),
                    AssociationMethod::Pearson => stats::pearson(&col, &y_vec),
                }
            })
            .collect(),
    }
}

/// Selects the strongest features by a univariate association score.
pub struct UnivariateSelector {
    config: FeatureSelectionConfig,
}

impl UnivariateSelector {
    pub fn new(config: FeatureSelectionConfig) -> Self {
        UnivariateSelector { config }
    }

    /// Larger is stronger. Non-finite scores rank last.
    fn strength(&self, score: f64) -> f64 {
        if !score.is_finite() {
            return f64::NEG_INFINITY;
        }
        let centred = match self.config.method {
            AssociationMethod::Wilcoxon => return -score,
            AssociationMethod::Auc => score - 0.5,
            _ => score,
        };
        match self.config.direction {
            Direction::Absolute => centred.abs(),
            Direction::Positive => centred,
            Direction::Negative => -centred,
        }
    }

    fn passes(&self, score: f64, threshold: f64) -> bool {
        if !score.is_finite() {
            return false;
        }
        match self.config.method {
            AssociationMethod::Wilcoxon => score <= threshold,
            AssociationMethod::Auc => self.strength(score) >= threshold - 0.5,
            _ => self.strength(score) >= threshold,
        }
    }

    /// Indices of the kept columns of `x`, in ascending order.
    pub fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Vec<usize>> {
        if x.nrows() != y.len() {
            return Err(PipelineError::internal(format!(
                "feature selection got {} rows but {} responses",
                x.nrows(),
                y.len()
            )));
        }
        let scores = association_scores(x, y, self.config.method);

        let mut keep: Vec<usize> = match self.config.cutoff {
            Cutoff::TopN(n) => {
                let mut indices: Vec<usize> = (0..scores.len()).collect();
                // Stable sort keeps the original order among ties.
                indices.sort_by(|&i, &j| self.strength(scores[j]).total_cmp(&self.strength(scores[i])));
                if n > indices.len() {
                    log::warn!(
                        "Feature selection asked for {} features but only {} exist; keeping all",
                        n,
                        indices.len()
                    );
                }
                indices.into_iter().take(n).collect()
            }
            Cutoff::Threshold(t) => (0..scores.len()).filter(|&i| self.passes(scores[i], t)).collect(),
        };
        if keep.is_empty() {
            return Err(PipelineError::data(format!(
                "no feature passes the {:?} selection cutoff {:?}",
                self.config.method, self.config.cutoff
            )));
        }
        keep.sort_unstable();
        log::trace!(
            "Feature selection ({:?}, {:?}) kept {} of {} features",
            self.config.method,
            self.config.direction,
            keep.len(),
            scores.len()
        );
        Ok(keep)
    }
}

/// Rank the columns of `x` by their association with `y` and keep the
/// strongest ones.
///
/// # Parameters
///
/// * `x` - Training rows only, shape (n_samples, n_features).
/// * `y` - Response of those rows (1.0 case / 0.0 control, or continuous).
/// * `config` - Association method, direction and cutoff.
///
/// # Returns
///
/// The indices of the kept columns in ascending order, or a Data error when
/// no feature passes the cutoff.
pub fn select_features(x: &Array2<f64>, y: &Array1<f64>, config: &FeatureSelectionConfig) -> Result<Vec<usize>> {
    UnivariateSelector::new(config.clone()).fit(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};

    // Features: [trend, collinear with target, constant, reversed target, noise]
    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_vec(
            (10, 5),
            vec![
                0.1, 1.0, 5.0, 0.0, -0.3, //
                0.4, 0.0, 5.0, 1.0, 0.1, //
                0.6, 1.0, 5.0, 0.0, 0.2, //
                0.9, 0.0, 5.0, 1.0, -0.1, //
                1.2, 1.0, 5.0, 0.0, 0.3, //
                1.5, 0.0, 5.0, 1.0, 0.0, //
                1.8, 1.0, 5.0, 0.0, -0.2, //
                2.1, 0.0, 5.0, 1.0, 0.4, //
                2.4, 1.0, 5.0, 0.0, -0.1, //
                2.7, 0.0, 5.0, 1.0, 0.2, //
            ],
        )
        .unwrap();
        let y = Array1::from_vec(vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
        (x, y)
    }

    #[test]
    fn r_regression_handles_constant_columns() {
        let (x, y) = data();
        let r = r_regression(&x, &y, true);
        assert_abs_diff_eq!(r[1], 1.0, epsilon = 1e-12);
        assert_eq!(r[2], 0.0);
        assert_abs_diff_eq!(r[3], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn top_n_respects_direction() {
        let (x, y) = data();
        let mut config = FeatureSelectionConfig {
            method: AssociationMethod::Auc,
            direction: Direction::Absolute,
            cutoff: Cutoff::TopN(2),
        };
        assert_eq!(select_features(&x, &y, &config).unwrap(), vec![1, 3]);

        config.direction = Direction::Positive;
        config.cutoff = Cutoff::TopN(1);
        assert_eq!(select_features(&x, &y, &config).unwrap(), vec![1]);

        config.direction = Direction::Negative;
        assert_eq!(select_features(&x, &y, &config).unwrap(), vec![3]);
    }

    #[test]
    fn threshold_with_no_survivor_is_an_error() {
        let (x, y) = data();
        let config = FeatureSelectionConfig {
            method: AssociationMethod::Wilcoxon,
            direction: Direction::Absolute,
            cutoff: Cutoff::Threshold(1e-12),
        };
        assert!(select_features(&x, &y, &config).is_err());
    }
}
