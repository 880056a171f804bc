use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;
use crate::preprocessing::{FilterMethod, NormalizationMethod};

/// Learning task implied by the label type.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Classification,
    Regression,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Task::Classification => write!(f, "classification"),
            Task::Regression => write!(f, "regression"),
        }
    }
}

/// Performance measures usable for regularization-path selection and tuning.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    Accuracy,
    Auroc,
    Auprc,
    Mse,
    Mae,
    R2,
}

impl Measure {
    pub fn higher_is_better(&self) -> bool {
        !matches!(self, Measure::Mse | Measure::Mae)
    }

    pub fn task(&self) -> Task {
        match self {
            Measure::Accuracy | Measure::Auroc | Measure::Auprc => Task::Classification,
            Measure::Mse | Measure::Mae | Measure::R2 => Task::Regression,
        }
    }

    /// Measure used when none is configured.
    pub fn default_for(task: Task) -> Measure {
        match task {
            Task::Classification => Measure::Auprc,
            Task::Regression => Measure::Mse,
        }
    }

    /// True if `a` is strictly better than `b` under this measure.
    pub fn is_better(&self, a: f64, b: f64) -> bool {
        if self.higher_is_better() {
            a > b
        } else {
            a < b
        }
    }
}

impl FromStr for Measure {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "acc" | "accuracy" => Ok(Measure::Accuracy),
            "auc" | "auroc" => Ok(Measure::Auroc),
            "auprc" => Ok(Measure::Auprc),
            "mse" => Ok(Measure::Mse),
            "mae" => Ok(Measure::Mae),
            "r2" | "rsq" => Ok(Measure::R2),
            _ => Err(PipelineError::config(format!(
                "Unknown performance measure: {}. Valid options are: accuracy, auroc, auprc, mse, mae, r2",
                s
            ))),
        }
    }
}

fn default_min_nonzero() -> usize {
    5
}

fn default_num_lambda() -> usize {
    100
}

/// Supported model families and their hyper-parameters.
///
/// `None` marks a hyper-parameter that is searched by inner cross-validation
/// on the training rows of each fold.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ModelType {
    Lasso {
        #[serde(default = "default_min_nonzero")]
        min_nonzero: usize,
        #[serde(default = "default_num_lambda")]
        num_lambda: usize,
    },
    Ridge {
        #[serde(default = "default_num_lambda")]
        num_lambda: usize,
    },
    #[serde(rename = "enet")]
    ElasticNet {
        alpha: Option<f64>,
        #[serde(default = "default_min_nonzero")]
        min_nonzero: usize,
        #[serde(default = "default_num_lambda")]
        num_lambda: usize,
    },
    LassoLl {
        cost: Option<f64>,
    },
    RidgeLl {
        cost: Option<f64>,
    },
    RandomForest {
        num_trees: Option<usize>,
        mtry: Option<usize>,
        min_node_size: Option<usize>,
    },
    Gbdt {
        max_depth: u32,
        num_boost_round: u32,
        learning_rate: f32,
    },
}

impl Default for ModelType {
    fn default() -> Self {
        ModelType::Lasso {
            min_nonzero: default_min_nonzero(),
            num_lambda: default_num_lambda(),
        }
    }
}

pub const VALID_MODEL_NAMES: &[&str] = &[
    "lasso",
    "enet",
    "ridge",
    "lasso_ll",
    "ridge_ll",
    "random_forest",
    "gbdt",
];

impl ModelType {
    pub fn name(&self) -> &'static str {
        match self {
            ModelType::Lasso { .. } => "lasso",
            ModelType::Ridge { .. } => "ridge",
            ModelType::ElasticNet { .. } => "enet",
            ModelType::LassoLl { .. } => "lasso_ll",
            ModelType::RidgeLl { .. } => "ridge_ll",
            ModelType::RandomForest { .. } => "random_forest",
            ModelType::Gbdt { .. } => "gbdt",
        }
    }

    pub fn supports(&self, task: Task) -> bool {
        match self {
            ModelType::LassoLl { .. } | ModelType::RidgeLl { .. } => {
                task == Task::Classification
            }
            _ => true,
        }
    }

    /// True when every tunable hyper-parameter has a fixed value.
    pub fn is_resolved(&self) -> bool {
        match self {
            ModelType::ElasticNet { alpha, .. } => alpha.is_some(),
            ModelType::LassoLl { cost } | ModelType::RidgeLl { cost } => cost.is_some(),
            ModelType::RandomForest {
                num_trees, mtry, ..
            } => num_trees.is_some() && mtry.is_some(),
            _ => true,
        }
    }

    /// Check fixed hyper-parameter values for plausibility.
    pub fn validate(&self) -> Result<(), PipelineError> {
        match self {
            ModelType::Lasso { num_lambda, .. }
            | ModelType::Ridge { num_lambda }
            | ModelType::ElasticNet { num_lambda, .. }
                if *num_lambda == 0 =>
            {
                Err(PipelineError::config("num_lambda must be at least 1"))
            }
            ModelType::ElasticNet {
                alpha: Some(alpha), ..
            } if !(0.0..=1.0).contains(alpha) => Err(PipelineError::config(format!(
                "enet mixing ratio alpha must lie in [0, 1], got {}",
                alpha
            ))),
            ModelType::LassoLl { cost: Some(c) } | ModelType::RidgeLl { cost: Some(c) }
                if !(*c > 0.0) =>
            {
                Err(PipelineError::config(format!("cost must be positive, got {}", c)))
            }
            ModelType::RandomForest {
                num_trees: Some(0), ..
            } => Err(PipelineError::config("num_trees must be at least 1")),
            ModelType::RandomForest { mtry: Some(0), .. } => {
                Err(PipelineError::config("mtry must be at least 1"))
            }
            ModelType::Gbdt {
                num_boost_round: 0,
                ..
            } => Err(PipelineError::config("num_boost_round must be at least 1")),
            ModelType::Gbdt { max_depth: 0, .. } => {
                Err(PipelineError::config("max_depth must be at least 1"))
            }
            ModelType::Gbdt { learning_rate, .. } if !(*learning_rate > 0.0) => Err(PipelineError::config(format!(
                "learning_rate must be positive, got {}",
                learning_rate
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ModelType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "lasso" => Ok(ModelType::default()),
            "ridge" => Ok(ModelType::Ridge {
                num_lambda: default_num_lambda(),
            }),
            "enet" | "elastic_net" => Ok(ModelType::ElasticNet {
                alpha: None,
                min_nonzero: default_min_nonzero(),
                num_lambda: default_num_lambda(),
            }),
            "lasso_ll" => Ok(ModelType::LassoLl { cost: None }),
            "ridge_ll" => Ok(ModelType::RidgeLl { cost: None }),
            "random_forest" | "randomforest" => Ok(ModelType::RandomForest {
                num_trees: None,
                mtry: None,
                min_node_size: None,
            }),
            "gbdt" => Ok(ModelType::Gbdt {
                max_depth: 6,
                num_boost_round: 50,
                learning_rate: 0.1,
            }),
            _ => Err(PipelineError::config(format!(
                "Unknown model type: {}. Valid options are: {}",
                s,
                VALID_MODEL_NAMES.join(", ")
            ))),
        }
    }
}

/// Inner cross-validation used to fix hyper-parameters left open in `ModelType`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TuningConfig {
    pub inner_folds: usize,
    /// Measure optimized by the search; defaults per task when unset.
    pub measure: Option<Measure>,
    /// Number of values per searched hyper-parameter.
    pub grid_size: usize,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            inner_folds: 3,
            measure: None,
            grid_size: 5,
        }
    }
}

/// Central configuration for models in the crate.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct ModelConfig {
    #[serde(flatten)]
    pub model_type: ModelType,

    /// Measures used to pick λ along a regularization path. Empty means
    /// accuracy for classification and MSE for regression.
    pub selection_measures: Vec<Measure>,

    pub tuning: TuningConfig,
}

impl ModelConfig {
    pub fn new(model_type: ModelType) -> Self {
        Self {
            model_type,
            ..Default::default()
        }
    }

    pub fn with_selection_measures(mut self, measures: Vec<Measure>) -> Self {
        self.selection_measures = measures;
        self
    }

    pub fn path_measures(&self, task: Task) -> Vec<Measure> {
        if self.selection_measures.is_empty() {
            match task {
                Task::Classification => vec![Measure::Accuracy],
                Task::Regression => vec![Measure::Mse],
            }
        } else {
            self.selection_measures.clone()
        }
    }

    pub fn tuning_measure(&self, task: Task) -> Measure {
        self.tuning.measure.unwrap_or_else(|| Measure::default_for(task))
    }

    /// Reject combinations that cannot work for the given task.
    pub fn validate(&self, task: Task) -> Result<(), PipelineError> {
        self.model_type.validate()?;
        if !self.model_type.supports(task) {
            return Err(PipelineError::config(format!(
                "model family '{}' does not support {}",
                self.model_type, task
            )));
        }
        for m in self.path_measures(task) {
            if m.task() != task {
                return Err(PipelineError::config(format!(
                    "selection measure {:?} is not defined for {}",
                    m, task
                )));
            }
        }
        let tuning = self.tuning_measure(task);
        if tuning.task() != task {
            return Err(PipelineError::config(format!(
                "tuning measure {:?} is not defined for {}",
                tuning, task
            )));
        }
        if !self.model_type.is_resolved() {
            if self.tuning.inner_folds < 2 {
                return Err(PipelineError::config(
                    "inner cross-validation needs at least 2 folds",
                ));
            }
            if self.tuning.grid_size == 0 {
                return Err(PipelineError::config("grid_size must be at least 1"));
            }
        }
        Ok(())
    }
}

/// Univariate statistic used to rank features for nested selection.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssociationMethod {
    Auc,
    Gfc,
    Wilcoxon,
    Pearson,
    Spearman,
}

impl AssociationMethod {
    pub fn task(&self) -> Task {
        match self {
            AssociationMethod::Auc | AssociationMethod::Gfc | AssociationMethod::Wilcoxon => {
                Task::Classification
            }
            AssociationMethod::Pearson | AssociationMethod::Spearman => Task::Regression,
        }
    }
}

impl FromStr for AssociationMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auc" => Ok(AssociationMethod::Auc),
            "gfc" => Ok(AssociationMethod::Gfc),
            "wilcoxon" => Ok(AssociationMethod::Wilcoxon),
            "pearson" => Ok(AssociationMethod::Pearson),
            "spearman" => Ok(AssociationMethod::Spearman),
            _ => Err(PipelineError::config(format!(
                "Unknown feature selection method: {}. Valid options are: auc, gfc, wilcoxon, pearson, spearman",
                s
            ))),
        }
    }
}

/// Which sign of association counts as strong.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Absolute,
    Positive,
    Negative,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Cutoff {
    /// Keep the `n` best-ranked features.
    TopN(usize),
    /// Keep features whose score passes the threshold (p-value ≤ t for Wilcoxon).
    Threshold(f64),
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct FeatureSelectionConfig {
    pub method: AssociationMethod,
    #[serde(default)]
    pub direction: Direction,
    pub cutoff: Cutoff,
}

impl FeatureSelectionConfig {
    pub fn validate(&self, task: Task) -> Result<(), PipelineError> {
        if self.method.task() != task {
            return Err(PipelineError::config(format!(
                "feature selection method {:?} is not defined for {}",
                self.method, task
            )));
        }
        if self.method == AssociationMethod::Wilcoxon && self.direction != Direction::Absolute {
            return Err(PipelineError::config(
                "wilcoxon feature selection only supports the absolute direction",
            ));
        }
        match self.cutoff {
            Cutoff::TopN(0) => Err(PipelineError::config(
                "feature selection must keep at least one feature",
            )),
            Cutoff::Threshold(t) if !t.is_finite() => Err(PipelineError::config(
                "feature selection threshold must be finite",
            )),
            _ => Ok(()),
        }
    }
}

/// Cross-validation layout.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SplitConfig {
    pub num_folds: usize,
    pub num_resample: usize,
    pub stratify: bool,
    /// Metadata column whose values must never be separated across folds.
    pub inseparable: Option<String>,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            num_folds: 5,
            num_resample: 1,
            stratify: true,
            inseparable: None,
            seed: 42,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub feature_selection: Option<FeatureSelectionConfig>,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            feature_selection: None,
            seed: 42,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub filter: Option<FilterMethod>,
    pub normalization: Option<NormalizationMethod>,
    pub split: SplitConfig,
    pub training: TrainingConfig,
}
