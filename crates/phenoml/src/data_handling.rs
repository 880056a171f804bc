//! Data structures for feature matrices, labels and sample metadata.
//!
//! This module defines `FeatureMatrix`, `Label` and `Metadata`, and the
//! alignment helpers that map label order onto feature-matrix columns. The
//! label's sample order is the canonical sample order for data splits,
//! trained models and prediction matrices.
use std::collections::{BTreeMap, HashMap, HashSet};

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::Task;
use crate::error::{PipelineError, Result};
use crate::preprocessing::FrozenNormalization;

/// Smallest number of samples a class may have in a binary label.
pub const MIN_CLASS_SIZE: usize = 2;

/// Which processing state a feature matrix is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureVariant {
    Original,
    Filtered,
    Normalized,
}

/// Numeric features × samples matrix with named rows and columns.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    data: Array2<f64>,
    feature_names: Vec<String>,
    sample_ids: Vec<String>,
    variant: FeatureVariant,
    normalization: Option<FrozenNormalization>,
}

fn check_unique(ids: &[String], what: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(PipelineError::data(format!("duplicate {} '{}'", what, id)));
        }
    }
    Ok(())
}

impl FeatureMatrix {
    /// Build an `Original` matrix. `data` is features × samples.
    pub fn new(data: Array2<f64>, feature_names: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_features, n_samples) = data.dim();
        if n_features != feature_names.len() {
            return Err(PipelineError::data(format!(
                "feature matrix has {} rows but {} feature names",
                n_features,
                feature_names.len()
            )));
        }
        if n_samples != sample_ids.len() {
            return Err(PipelineError::data(format!(
                "feature matrix has {} columns but {} sample ids",
                n_samples,
                sample_ids.len()
            )));
        }
        if n_features == 0 || n_samples == 0 {
            return Err(PipelineError::data("feature matrix is empty"));
        }
        check_unique(&feature_names, "feature name")?;
        check_unique(&sample_ids, "sample id")?;
        if let Some(((f, s), v)) = data.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(PipelineError::data(format!(
                "non-finite value {} for feature '{}' in sample '{}'",
                v, feature_names[f], sample_ids[s]
            )));
        }
        Ok(Self {
            data,
            feature_names,
            sample_ids,
            variant: FeatureVariant::Original,
            normalization: None,
        })
    }

    pub fn with_variant(mut self, variant: FeatureVariant) -> Self {
        self.variant = variant;
        if variant != FeatureVariant::Normalized {
            self.normalization = None;
        }
        self
    }

    pub(crate) fn with_normalization(mut self, params: FrozenNormalization) -> Self {
        self.variant = FeatureVariant::Normalized;
        self.normalization = Some(params);
        self
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn variant(&self) -> FeatureVariant {
        self.variant
    }

    pub fn normalization(&self) -> Option<&FrozenNormalization> {
        self.normalization.as_ref()
    }

    pub fn n_features(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    pub fn feature_index(&self) -> HashMap<&str, usize> {
        self.feature_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect()
    }

    /// Row positions of `names`, or a Data error naming the first missing feature.
    pub fn feature_positions(&self, names: &[String]) -> Result<Vec<usize>> {
        let index = self.feature_index();
        names
            .iter()
            .map(|n| {
                index.get(n.as_str()).copied().ok_or_else(|| {
                    PipelineError::data(format!("feature '{}' is missing from the feature matrix", n))
                })
            })
            .collect()
    }

    /// Samples × features design matrix for the given sample columns and feature rows.
    pub fn design(&self, samples: &[usize], features: &[usize]) -> Array2<f64> {
        let mut x = Array2::zeros((samples.len(), features.len()));
        for (r, &s) in samples.iter().enumerate() {
            for (c, &f) in features.iter().enumerate() {
                x[(r, c)] = self.data[(f, s)];
            }
        }
        x
    }

    /// Keep only the listed feature rows, in the given order.
    pub fn select_features(&self, rows: &[usize]) -> FeatureMatrix {
        FeatureMatrix {
            data: self.data.select(Axis(0), rows),
            feature_names: rows.iter().map(|&r| self.feature_names[r].clone()).collect(),
            sample_ids: self.sample_ids.clone(),
            variant: self.variant,
            normalization: self.normalization.clone(),
        }
    }

    /// Keep only the listed sample columns, in the given order.
    pub fn select_samples(&self, columns: &[usize]) -> FeatureMatrix {
        FeatureMatrix {
            data: self.data.select(Axis(1), columns),
            feature_names: self.feature_names.clone(),
            sample_ids: columns.iter().map(|&c| self.sample_ids[c].clone()).collect(),
            variant: self.variant,
            normalization: self.normalization.clone(),
        }
    }

    pub(crate) fn replace_data(&self, data: Array2<f64>, feature_names: Vec<String>) -> FeatureMatrix {
        FeatureMatrix {
            data,
            feature_names,
            sample_ids: self.sample_ids.clone(),
            variant: self.variant,
            normalization: self.normalization.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LabelValues {
    /// `true` marks a case sample.
    Binary {
        case: String,
        control: String,
        is_case: Vec<bool>,
    },
    Continuous(Vec<f64>),
}

/// Per-sample ground truth. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    sample_ids: Vec<String>,
    values: LabelValues,
}

impl Label {
    /// Two-class label from raw class names; `case` must be one of the two.
    pub fn binary<S: AsRef<str>>(sample_ids: Vec<String>, values: &[S], case: &str) -> Result<Self> {
        if sample_ids.len() != values.len() {
            return Err(PipelineError::data(format!(
                "{} sample ids but {} label values",
                sample_ids.len(),
                values.len()
            )));
        }
        check_unique(&sample_ids, "sample id in label")?;

        let mut classes: Vec<&str> = values.iter().map(|v| v.as_ref()).collect();
        classes.sort_unstable();
        classes.dedup();
        if classes.len() != 2 {
            return Err(PipelineError::data(format!(
                "a binary label needs exactly two classes, found {}: {:?}",
                classes.len(),
                classes
            )));
        }
        let control = match classes.iter().position(|&c| c == case) {
            Some(0) => classes[1],
            Some(_) => classes[0],
            None => {
                return Err(PipelineError::config(format!(
                    "case class '{}' is not one of the label classes {:?}",
                    case, classes
                )))
            }
        };

        let is_case: Vec<bool> = values.iter().map(|v| v.as_ref() == case).collect();
        let n_case = is_case.iter().filter(|&&c| c).count();
        let n_control = is_case.len() - n_case;
        if n_case.min(n_control) < MIN_CLASS_SIZE {
            return Err(PipelineError::data(format!(
                "each class needs at least {} samples (case: {}, control: {})",
                MIN_CLASS_SIZE, n_case, n_control
            )));
        }

        Ok(Self {
            sample_ids,
            values: LabelValues::Binary {
                case: case.to_string(),
                control: control.to_string(),
                is_case,
            },
        })
    }

    pub fn continuous(sample_ids: Vec<String>, values: Vec<f64>) -> Result<Self> {
        if sample_ids.len() != values.len() {
            return Err(PipelineError::data(format!(
                "{} sample ids but {} label values",
                sample_ids.len(),
                values.len()
            )));
        }
        if sample_ids.is_empty() {
            return Err(PipelineError::data("label is empty"));
        }
        check_unique(&sample_ids, "sample id in label")?;
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(PipelineError::data(format!(
                "non-finite label value for sample '{}'",
                sample_ids[i]
            )));
        }
        Ok(Self {
            sample_ids,
            values: LabelValues::Continuous(values),
        })
    }

    pub fn len(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn values(&self) -> &LabelValues {
        &self.values
    }

    pub fn task(&self) -> Task {
        match self.values {
            LabelValues::Binary { .. } => Task::Classification,
            LabelValues::Continuous(_) => Task::Regression,
        }
    }

    pub fn is_binary(&self) -> bool {
        self.task() == Task::Classification
    }

    /// Case flags, or `None` for a continuous label.
    pub fn is_case(&self) -> Option<&[bool]> {
        match &self.values {
            LabelValues::Binary { is_case, .. } => Some(is_case),
            LabelValues::Continuous(_) => None,
        }
    }

    pub fn n_case(&self) -> usize {
        self.is_case().map_or(0, |c| c.iter().filter(|&&v| v).count())
    }

    pub fn n_control(&self) -> usize {
        self.is_case().map_or(0, |c| c.iter().filter(|&&v| !v).count())
    }

    /// Numeric response: 1.0 for case, 0.0 for control, or the continuous value.
    pub fn response(&self) -> Array1<f64> {
        match &self.values {
            LabelValues::Binary { is_case, .. } => {
                is_case.iter().map(|&c| if c { 1.0 } else { 0.0 }).collect()
            }
            LabelValues::Continuous(v) => Array1::from_vec(v.clone()),
        }
    }

    pub fn index_of(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|s| s == sample_id)
    }

    pub fn sample_index(&self) -> HashMap<&str, usize> {
        self.sample_ids
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect()
    }

    pub fn log_summary(&self) {
        match &self.values {
            LabelValues::Binary { case, control, .. } => log::info!(
                "Label: {} case ('{}') and {} control ('{}') samples",
                self.n_case(),
                case,
                self.n_control(),
                control
            ),
            LabelValues::Continuous(v) => {
                let mean = v.iter().sum::<f64>() / v.len() as f64;
                log::info!("Label: {} continuous values (mean {:.4})", v.len(), mean)
            }
        }
    }
}

/// Map each label sample to its column in `features`.
///
/// The two sample sets must be identical; any sample present on one side only
/// is a Data error.
pub fn align_samples(features: &FeatureMatrix, label: &Label) -> Result<Vec<usize>> {
    let columns: HashMap<&str, usize> = features
        .sample_ids()
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();
    let mapping = label
        .sample_ids()
        .iter()
        .map(|s| {
            columns.get(s.as_str()).copied().ok_or_else(|| {
                PipelineError::data(format!("labelled sample '{}' has no feature column", s))
            })
        })
        .collect::<Result<Vec<usize>>>()?;

    if features.n_samples() != label.len() {
        let labelled: HashSet<&str> = label.sample_ids().iter().map(|s| s.as_str()).collect();
        let missing = features
            .sample_ids()
            .iter()
            .find(|s| !labelled.contains(s.as_str()))
            .map(|s| s.as_str())
            .unwrap_or("?");
        return Err(PipelineError::data(format!(
            "sample '{}' in the feature matrix has no label",
            missing
        )));
    }
    Ok(mapping)
}

/// Sample × covariate table of string values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    sample_ids: Vec<String>,
    columns: BTreeMap<String, Vec<String>>,
}

impl Metadata {
    pub fn new(sample_ids: Vec<String>) -> Result<Self> {
        check_unique(&sample_ids, "sample id in metadata")?;
        Ok(Self {
            sample_ids,
            columns: BTreeMap::new(),
        })
    }

    pub fn with_column<S: Into<String>>(mut self, name: S, values: Vec<String>) -> Result<Self> {
        let name = name.into();
        if values.len() != self.sample_ids.len() {
            return Err(PipelineError::data(format!(
                "metadata column '{}' has {} values for {} samples",
                name,
                values.len(),
                self.sample_ids.len()
            )));
        }
        self.columns.insert(name, values);
        Ok(self)
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn column_names(&self) -> impl Iterator<Item = &String> {
        self.columns.keys()
    }

    pub fn column(&self, name: &str) -> Option<&[String]> {
        self.columns.get(name).map(|v| v.as_slice())
    }

    /// Values of `column` for every labelled sample, in label order.
    pub fn groups(&self, column: &str, label: &Label) -> Result<Vec<String>> {
        let values = self.column(column).ok_or_else(|| {
            PipelineError::data(format!("metadata has no column '{}'", column))
        })?;
        let rows: HashMap<&str, usize> = self
            .sample_ids
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();
        label
            .sample_ids()
            .iter()
            .map(|s| {
                rows.get(s.as_str())
                    .map(|&r| values[r].clone())
                    .ok_or_else(|| {
                        PipelineError::data(format!("labelled sample '{}' has no metadata row", s))
                    })
            })
            .collect()
    }
}
