//! Unsupervised feature filtering and normalization.
//!
//! Normalization is fitted once and returns the transform parameters as a
//! `FrozenNormalization`, which can be re-applied to new samples without
//! looking at any cross-sample statistic of the new data.

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::data_handling::{FeatureMatrix, FeatureVariant};
use crate::error::{PipelineError, Result};
use crate::stats::{mid_ranks, quantile};

/// Unsupervised removal of uninformative features.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum FilterMethod {
    Pass,
    /// Keep features whose maximum value reaches `cutoff`.
    Abundance { cutoff: f64 },
    /// Keep features non-zero in at least `cutoff` (fraction) of samples.
    Prevalence { cutoff: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitNorm {
    L1,
    L2,
    Max,
}

fn default_log_n0() -> f64 {
    1e-6
}

fn default_sd_min_quantile() -> f64 {
    0.1
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum NormalizationMethod {
    Pass,
    Std,
    LogStd {
        #[serde(default = "default_log_n0")]
        log_n0: f64,
        #[serde(default = "default_sd_min_quantile")]
        sd_min_quantile: f64,
    },
    LogUnit {
        #[serde(default = "default_log_n0")]
        log_n0: f64,
        norm: UnitNorm,
    },
    LogClr {
        #[serde(default = "default_log_n0")]
        log_n0: f64,
    },
    RankUnit,
    RankStd {
        #[serde(default = "default_sd_min_quantile")]
        sd_min_quantile: f64,
    },
}

/// Per-feature centering and scaling (mean / (sd + offset)).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub sd: Vec<f64>,
    /// Added to every sd; a low quantile of all sds, or 0.
    pub sd_offset: f64,
}

impl Scaler {
    /// Minimum denominator to avoid division by zero for constant features.
    const MIN_SD: f64 = 1e-12;

    /// Transform rows of a features × samples matrix in place.
    pub fn transform(&self, x: &mut Array2<f64>) {
        for (f, mut row) in x.axis_iter_mut(Axis(0)).enumerate() {
            let denom = (self.sd[f] + self.sd_offset).max(Self::MIN_SD);
            row.mapv_inplace(|v| (v - self.mean[f]) / denom);
        }
    }
}

/// Fit a `Scaler` on a features × samples matrix (sample sd, n - 1).
pub fn fit_scaler(x: &Array2<f64>, sd_min_quantile: Option<f64>) -> Scaler {
    let n = x.ncols() as f64;
    let mut mean = Vec::with_capacity(x.nrows());
    let mut sd = Vec::with_capacity(x.nrows());
    for row in x.axis_iter(Axis(0)) {
        let m = row.sum() / n;
        let var = if n > 1.0 {
            row.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1.0)
        } else {
            0.0
        };
        mean.push(m);
        sd.push(var.sqrt());
    }
    let sd_offset = match sd_min_quantile {
        Some(q) => quantile(&sd, q),
        None => 0.0,
    };
    Scaler {
        mean,
        sd,
        sd_offset,
    }
}

/// Transform parameters recorded by `normalize_features`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum FrozenNormalization {
    Pass {
        feature_names: Vec<String>,
    },
    Std {
        feature_names: Vec<String>,
        scaler: Scaler,
    },
    LogStd {
        log_n0: f64,
        feature_names: Vec<String>,
        scaler: Scaler,
    },
    LogUnit {
        log_n0: f64,
        norm: UnitNorm,
        feature_names: Vec<String>,
        norms: Vec<f64>,
    },
    LogClr {
        log_n0: f64,
        feature_names: Vec<String>,
    },
    RankUnit {
        feature_names: Vec<String>,
    },
    RankStd {
        feature_names: Vec<String>,
        scaler: Scaler,
    },
}

impl FrozenNormalization {
    pub fn feature_names(&self) -> &[String] {
        match self {
            FrozenNormalization::Pass { feature_names }
            | FrozenNormalization::Std { feature_names, .. }
            | FrozenNormalization::LogStd { feature_names, .. }
            | FrozenNormalization::LogUnit { feature_names, .. }
            | FrozenNormalization::LogClr { feature_names, .. }
            | FrozenNormalization::RankUnit { feature_names }
            | FrozenNormalization::RankStd { feature_names, .. } => feature_names,
        }
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            FrozenNormalization::Pass { .. } => "pass",
            FrozenNormalization::Std { .. } => "std",
            FrozenNormalization::LogStd { .. } => "log_std",
            FrozenNormalization::LogUnit { .. } => "log_unit",
            FrozenNormalization::LogClr { .. } => "log_clr",
            FrozenNormalization::RankUnit { .. } => "rank_unit",
            FrozenNormalization::RankStd { .. } => "rank_std",
        }
    }
}

pub fn filter_features(matrix: &FeatureMatrix, method: &FilterMethod) -> Result<FeatureMatrix> {
    let data = matrix.data();
    let keep: Vec<usize> = match *method {
        FilterMethod::Pass => (0..matrix.n_features()).collect(),
        FilterMethod::Abundance { cutoff } => data
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(_, row)| row.iter().cloned().fold(f64::NEG_INFINITY, f64::max) >= cutoff)
            .map(|(i, _)| i)
            .collect(),
        FilterMethod::Prevalence { cutoff } => {
            if !(0.0..=1.0).contains(&cutoff) {
                return Err(PipelineError::config(format!(
                    "prevalence cutoff must lie in [0, 1], got {}",
                    cutoff
                )));
            }
            let n = matrix.n_samples() as f64;
            data.axis_iter(Axis(0))
                .enumerate()
                .filter(|(_, row)| row.iter().filter(|&&v| v > 0.0).count() as f64 / n >= cutoff)
                .map(|(i, _)| i)
                .collect()
        }
    };
    if keep.is_empty() {
        return Err(PipelineError::data(format!(
            "feature filter {:?} removed every feature",
            method
        )));
    }
    log::info!(
        "Feature filtering ({:?}) kept {} of {} features",
        method,
        keep.len(),
        matrix.n_features()
    );
    Ok(matrix
        .select_features(&keep)
        .with_variant(FeatureVariant::Filtered))
}

fn log_transform(x: &mut Array2<f64>, log_n0: f64, base10: bool) -> Result<()> {
    if !(log_n0 >= 0.0) {
        return Err(PipelineError::config(format!(
            "log pseudocount must be non-negative, got {}",
            log_n0
        )));
    }
    if x.iter().any(|&v| v + log_n0 <= 0.0) {
        return Err(PipelineError::data(
            "log normalization needs non-negative abundances (value + pseudocount must be positive)",
        ));
    }
    if base10 {
        x.mapv_inplace(|v| (v + log_n0).log10());
    } else {
        x.mapv_inplace(|v| (v + log_n0).ln());
    }
    Ok(())
}

fn feature_norms(x: &Array2<f64>, norm: UnitNorm) -> Vec<f64> {
    x.axis_iter(Axis(0))
        .map(|row| match norm {
            UnitNorm::L1 => row.iter().map(|v| v.abs()).sum(),
            UnitNorm::L2 => row.iter().map(|v| v * v).sum::<f64>().sqrt(),
            UnitNorm::Max => row.iter().fold(0.0, |m: f64, v| m.max(v.abs())),
        })
        .collect()
}

fn divide_rows(x: &mut Array2<f64>, norms: &[f64]) {
    for (f, mut row) in x.axis_iter_mut(Axis(0)).enumerate() {
        let d = if norms[f] > 0.0 { norms[f] } else { 1.0 };
        row.mapv_inplace(|v| v / d);
    }
}

/// Subtract each sample's mean (centred log-ratio on already-logged data).
fn center_columns(x: &mut Array2<f64>) {
    let n = x.nrows() as f64;
    for mut col in x.axis_iter_mut(Axis(1)) {
        let m = col.sum() / n;
        col.mapv_inplace(|v| v - m);
    }
}

/// Replace each sample's values by their within-sample mid-ranks.
fn rank_columns(x: &mut Array2<f64>) {
    for mut col in x.axis_iter_mut(Axis(1)) {
        let ranks = mid_ranks(&col.to_vec());
        col.iter_mut().zip(ranks).for_each(|(v, r)| *v = r);
    }
}

fn unit_columns(x: &mut Array2<f64>) {
    for mut col in x.axis_iter_mut(Axis(1)) {
        let norm = col.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            col.mapv_inplace(|v| v / norm);
        }
    }
}

/// Fit and apply a normalization; the result carries the frozen parameters.
pub fn normalize_features(matrix: &FeatureMatrix, method: &NormalizationMethod) -> Result<FeatureMatrix> {
    let names = matrix.feature_names().to_vec();
    let mut x = matrix.data().clone();

    let frozen = match *method {
        NormalizationMethod::Pass => FrozenNormalization::Pass {
            feature_names: names.clone(),
        },
        NormalizationMethod::Std => {
            let scaler = fit_scaler(&x, None);
            scaler.transform(&mut x);
            FrozenNormalization::Std {
                feature_names: names.clone(),
                scaler,
            }
        }
        NormalizationMethod::LogStd {
            log_n0,
            sd_min_quantile,
        } => {
            check_quantile(sd_min_quantile)?;
            log_transform(&mut x, log_n0, true)?;
            let scaler = fit_scaler(&x, Some(sd_min_quantile));
            scaler.transform(&mut x);
            FrozenNormalization::LogStd {
                log_n0,
                feature_names: names.clone(),
                scaler,
            }
        }
        NormalizationMethod::LogUnit { log_n0, norm } => {
            log_transform(&mut x, log_n0, true)?;
            let norms = feature_norms(&x, norm);
            divide_rows(&mut x, &norms);
            FrozenNormalization::LogUnit {
                log_n0,
                norm,
                feature_names: names.clone(),
                norms,
            }
        }
        NormalizationMethod::LogClr { log_n0 } => {
            log_transform(&mut x, log_n0, false)?;
            center_columns(&mut x);
            FrozenNormalization::LogClr {
                log_n0,
                feature_names: names.clone(),
            }
        }
        NormalizationMethod::RankUnit => {
            rank_columns(&mut x);
            unit_columns(&mut x);
            FrozenNormalization::RankUnit {
                feature_names: names.clone(),
            }
        }
        NormalizationMethod::RankStd { sd_min_quantile } => {
            check_quantile(sd_min_quantile)?;
            rank_columns(&mut x);
            let scaler = fit_scaler(&x, Some(sd_min_quantile));
            scaler.transform(&mut x);
            FrozenNormalization::RankStd {
                feature_names: names.clone(),
                scaler,
            }
        }
    };

    log::info!(
        "Normalized {} features x {} samples with {}",
        matrix.n_features(),
        matrix.n_samples(),
        frozen.method_name()
    );
    Ok(matrix.replace_data(x, names).with_normalization(frozen))
}

fn check_quantile(q: f64) -> Result<()> {
    if (0.0..=1.0).contains(&q) {
        Ok(())
    } else {
        Err(PipelineError::config(format!(
            "sd_min_quantile must lie in [0, 1], got {}",
            q
        )))
    }
}

/// Re-apply frozen parameters to new data.
///
/// The new matrix must contain every frozen feature; extra features are
/// dropped and the output rows follow the frozen feature order.
pub fn apply_frozen_normalization(matrix: &FeatureMatrix, frozen: &FrozenNormalization) -> Result<FeatureMatrix> {
    let names = frozen.feature_names().to_vec();
    let rows = matrix.feature_positions(&names)?;
    let mut x = matrix.data().select(Axis(0), &rows);

    match frozen {
        FrozenNormalization::Pass { .. } => {}
        FrozenNormalization::Std { scaler, .. } => scaler.transform(&mut x),
        FrozenNormalization::LogStd { log_n0, scaler, .. } => {
            log_transform(&mut x, *log_n0, true)?;
            scaler.transform(&mut x);
        }
        FrozenNormalization::LogUnit { log_n0, norms, .. } => {
            log_transform(&mut x, *log_n0, true)?;
            divide_rows(&mut x, norms);
        }
        FrozenNormalization::LogClr { log_n0, .. } => {
            log_transform(&mut x, *log_n0, false)?;
            center_columns(&mut x);
        }
        FrozenNormalization::RankUnit { .. } => {
            rank_columns(&mut x);
            unit_columns(&mut x);
        }
        FrozenNormalization::RankStd { scaler, .. } => {
            rank_columns(&mut x);
            scaler.transform(&mut x);
        }
    }

    log::debug!(
        "Applied frozen {} normalization to {} samples",
        frozen.method_name(),
        matrix.n_samples()
    );
    Ok(matrix.replace_data(x, names).with_normalization(frozen.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn matrix(x: Array2<f64>) -> FeatureMatrix {
        let f = (0..x.nrows()).map(|i| format!("f{}", i)).collect();
        let s = (0..x.ncols()).map(|i| format!("s{}", i)).collect();
        FeatureMatrix::new(x, f, s).unwrap()
    }

    #[test]
    fn fit_scaler_computes_mean_and_sd() {
        let x = array![[1.0, 2.0, 3.0, 4.0], [10.0, 20.0, 30.0, 40.0]];
        let sc = fit_scaler(&x, None);
        assert_abs_diff_eq!(sc.mean[0], 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(sc.mean[1], 25.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sc.sd[0], (5.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_eq!(sc.sd_offset, 0.0);
    }

    #[test]
    fn log_std_uses_frozen_parameters_on_new_data() {
        let train = matrix(array![[0.1, 0.2, 0.3, 0.4], [0.0, 0.5, 0.25, 0.125]]);
        let method = NormalizationMethod::LogStd {
            log_n0: 1e-6,
            sd_min_quantile: 0.1,
        };
        let norm = normalize_features(&train, &method).unwrap();
        let frozen = norm.normalization().unwrap().clone();

        // Re-applying to the training data reproduces the fitted output exactly.
        let again = apply_frozen_normalization(&train, &frozen).unwrap();
        assert_eq!(again.data(), norm.data());

        // A single new sample is transformed with the training statistics.
        let new = FeatureMatrix::new(array![[0.1], [0.0]], vec!["f0".into(), "f1".into()], vec!["n0".into()]).unwrap();
        let applied = apply_frozen_normalization(&new, &frozen).unwrap();
        assert_abs_diff_eq!(applied.data()[(0, 0)], norm.data()[(0, 0)], epsilon = 1e-12);
    }

    #[test]
    fn frozen_application_requires_all_features() {
        let train = matrix(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let norm = normalize_features(&train, &NormalizationMethod::Std).unwrap();
        let frozen = norm.normalization().unwrap();
        let partial = FeatureMatrix::new(array![[1.0, 2.0]], vec!["f1".into()], vec!["a".into(), "b".into()]).unwrap();
        assert!(apply_frozen_normalization(&partial, frozen).is_err());
    }

    #[test]
    fn clr_centres_every_sample() {
        let m = matrix(array![[0.2, 0.5], [0.3, 0.25], [0.5, 0.25]]);
        let norm = normalize_features(&m, &NormalizationMethod::LogClr { log_n0: 0.0 }).unwrap();
        for col in norm.data().axis_iter(Axis(1)) {
            assert_abs_diff_eq!(col.sum(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn prevalence_filter_drops_rare_features() {
        let m = matrix(array![[0.0, 0.0, 0.1], [0.2, 0.3, 0.1]]);
        let f = filter_features(&m, &FilterMethod::Prevalence { cutoff: 0.5 }).unwrap();
        assert_eq!(f.feature_names(), &["f1".to_string()]);
        assert_eq!(f.variant(), FeatureVariant::Filtered);
        assert!(filter_features(&m, &FilterMethod::Abundance { cutoff: 1.0 }).is_err());
    }
}
