use std::fmt;

use thiserror::Error;

/// Pipeline stage a failure was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Filtering,
    Normalization,
    Partition,
    Training,
    Prediction,
    Evaluation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Stage::Filtering => "feature filtering",
            Stage::Normalization => "normalization",
            Stage::Partition => "data split",
            Stage::Training => "model training",
            Stage::Prediction => "prediction",
            Stage::Evaluation => "evaluation",
        };
        write!(f, "{}", name)
    }
}

/// Coarse classification of a failure, independent of where it was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid parameter combination supplied by the caller.
    Configuration,
    /// Inputs that do not line up (sample ids, feature sets, variants).
    Data,
    /// A structural invariant was violated; indicates a bug.
    Internal,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("internal consistency error: {0}")]
    Internal(String),

    /// Failure of a single training/prediction instance. Fold and resample are 1-based.
    #[error("fold {fold}, resample {resample}: {source}")]
    Instance {
        fold: usize,
        resample: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        PipelineError::Configuration(msg.into())
    }

    pub fn data<S: Into<String>>(msg: S) -> Self {
        PipelineError::Data(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        PipelineError::Internal(msg.into())
    }

    /// Tag an error with the (0-based) fold and resample it came from.
    pub fn in_instance(self, fold: usize, resample: usize) -> Self {
        PipelineError::Instance {
            fold: fold + 1,
            resample: resample + 1,
            source: Box::new(self),
        }
    }

    pub fn in_stage(self, stage: Stage) -> Self {
        PipelineError::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Taxonomy class of the innermost error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Configuration(_) => ErrorKind::Configuration,
            PipelineError::Data(_) => ErrorKind::Data,
            PipelineError::Internal(_) => ErrorKind::Internal,
            PipelineError::Instance { source, .. } | PipelineError::Stage { source, .. } => {
                source.kind()
            }
        }
    }

    /// 1-based (fold, resample) of the failing instance, if any.
    pub fn instance(&self) -> Option<(usize, usize)> {
        match self {
            PipelineError::Instance { fold, resample, .. } => Some((*fold, *resample)),
            PipelineError::Stage { source, .. } => source.instance(),
            _ => None,
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
