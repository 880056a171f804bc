//! Reproducible K-fold × R-resample partitioning of labelled samples.
//!
//! Folds and resamples are 0-based internally and addressed in nested
//! fold-then-resample order through the linear index
//! `fold * num_resample + resample`. Messages report them 1-based.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::SplitConfig;
use crate::data_handling::Label;
use crate::error::{PipelineError, Result};

/// Train/test sample index sets (label order) for every (fold, resample).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSplit {
    num_folds: usize,
    num_resample: usize,
    stratified: bool,
    grouped: bool,
    sample_ids: Vec<String>,
    /// `assignments[r][s]` is the test fold of sample `s` in resample `r`.
    assignments: Vec<Vec<usize>>,
    /// `test[r][f]`, ascending.
    test: Vec<Vec<Vec<usize>>>,
    /// `train[r][f]`, ascending.
    train: Vec<Vec<Vec<usize>>>,
}

impl DataSplit {
    /// Build a split from explicit per-resample fold assignments.
    pub fn from_assignments(
        sample_ids: Vec<String>,
        num_folds: usize,
        assignments: Vec<Vec<usize>>,
    ) -> Result<Self> {
        if num_folds < 2 {
            return Err(PipelineError::config(format!(
                "number of folds must be at least 2, got {}",
                num_folds
            )));
        }
        if assignments.is_empty() {
            return Err(PipelineError::config("number of resamples must be at least 1"));
        }
        let n = sample_ids.len();
        let mut test = Vec::with_capacity(assignments.len());
        let mut train = Vec::with_capacity(assignments.len());
        for (r, folds) in assignments.iter().enumerate() {
            if folds.len() != n {
                return Err(PipelineError::data(format!(
                    "resample {} assigns {} samples but the split has {}",
                    r + 1,
                    folds.len(),
                    n
                )));
            }
            let mut test_r = vec![Vec::new(); num_folds];
            for (s, &f) in folds.iter().enumerate() {
                let slot = test_r.get_mut(f).ok_or_else(|| {
                    PipelineError::data(format!(
                        "sample '{}' assigned to fold {} of {} in resample {}",
                        sample_ids[s],
                        f + 1,
                        num_folds,
                        r + 1
                    ))
                })?;
                slot.push(s);
            }
            if let Some(f) = test_r.iter().position(|t| t.is_empty()) {
                return Err(PipelineError::config(format!(
                    "fold {} of resample {} has no test samples",
                    f + 1,
                    r + 1
                )));
            }
            let train_r = (0..num_folds)
                .map(|f| (0..n).filter(|&s| folds[s] != f).collect())
                .collect();
            test.push(test_r);
            train.push(train_r);
        }
        Ok(Self {
            num_folds,
            num_resample: assignments.len(),
            stratified: false,
            grouped: false,
            sample_ids,
            assignments,
            test,
            train,
        })
    }

    pub fn num_folds(&self) -> usize {
        self.num_folds
    }

    pub fn num_resample(&self) -> usize {
        self.num_resample
    }

    pub fn num_instances(&self) -> usize {
        self.num_folds * self.num_resample
    }

    pub fn is_stratified(&self) -> bool {
        self.stratified
    }

    pub fn is_grouped(&self) -> bool {
        self.grouped
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn train(&self, fold: usize, resample: usize) -> &[usize] {
        &self.train[resample][fold]
    }

    pub fn test(&self, fold: usize, resample: usize) -> &[usize] {
        &self.test[resample][fold]
    }

    /// 0-based test fold of every sample in `resample`.
    pub fn fold_assignment(&self, resample: usize) -> &[usize] {
        &self.assignments[resample]
    }

    pub fn linear_index(&self, fold: usize, resample: usize) -> usize {
        fold * self.num_resample + resample
    }

    /// Inverse of `linear_index`.
    pub fn instance(&self, index: usize) -> (usize, usize) {
        (index / self.num_resample, index % self.num_resample)
    }

    /// All (fold, resample) pairs in linear-index order.
    pub fn instances(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.num_instances()).map(move |i| self.instance(i))
    }

    /// Re-express this split over `label`'s sample order, for reusing
    /// identical folds in a comparison run. The sample sets must match.
    pub fn copy_compatible(&self, label: &Label) -> Result<DataSplit> {
        if label.len() != self.sample_ids.len() {
            return Err(PipelineError::data(format!(
                "cannot reuse a split over {} samples for a label with {} samples",
                self.sample_ids.len(),
                label.len()
            )));
        }
        let old: HashMap<&str, usize> = self
            .sample_ids
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();
        let mapping = label
            .sample_ids()
            .iter()
            .map(|s| {
                old.get(s.as_str()).copied().ok_or_else(|| {
                    PipelineError::data(format!("sample '{}' is not part of the reused split", s))
                })
            })
            .collect::<Result<Vec<usize>>>()?;
        let assignments = self
            .assignments
            .iter()
            .map(|folds| mapping.iter().map(|&o| folds[o]).collect())
            .collect();
        let mut split = DataSplit::from_assignments(label.sample_ids().to_vec(), self.num_folds, assignments)?;
        split.stratified = self.stratified;
        split.grouped = self.grouped;
        check_train_classes(&split, label)?;
        Ok(split)
    }

    /// Verify the partition invariants; a failure indicates a bug.
    pub fn check_invariants(&self) -> Result<()> {
        let n = self.sample_ids.len();
        for r in 0..self.num_resample {
            let mut seen = vec![false; n];
            for f in 0..self.num_folds {
                for &s in self.test(f, r) {
                    if std::mem::replace(&mut seen[s], true) {
                        return Err(PipelineError::internal(format!(
                            "sample '{}' is in more than one test fold of resample {}",
                            self.sample_ids[s],
                            r + 1
                        )));
                    }
                }
                if self.train(f, r).len() + self.test(f, r).len() != n
                    || self.train(f, r).iter().any(|&s| self.assignments[r][s] == f)
                {
                    return Err(PipelineError::internal(format!(
                        "train and test sets of fold {}, resample {} do not partition the samples",
                        f + 1,
                        r + 1
                    )));
                }
            }
            if let Some(s) = seen.iter().position(|&x| !x) {
                return Err(PipelineError::internal(format!(
                    "sample '{}' is in no test fold of resample {}",
                    self.sample_ids[s],
                    r + 1
                )));
            }
        }
        Ok(())
    }
}

/// Every train set must contain both classes of a binary label.
fn check_train_classes(split: &DataSplit, label: &Label) -> Result<()> {
    let Some(is_case) = label.is_case() else {
        return Ok(());
    };
    for (f, r) in split.instances() {
        let train = split.train(f, r);
        let n_case = train.iter().filter(|&&s| is_case[s]).count();
        if n_case == 0 || n_case == train.len() {
            return Err(PipelineError::config(format!(
                "training set of fold {}, resample {} contains only one class",
                f + 1,
                r + 1
            )));
        }
    }
    Ok(())
}

/// Partitioning units: single samples, or inseparable groups in order of
/// first appearance.
struct Units {
    members: Vec<Vec<usize>>,
}

impl Units {
    fn from_samples(n: usize) -> Self {
        Units {
            members: (0..n).map(|s| vec![s]).collect(),
        }
    }

    fn from_groups(groups: &[String]) -> Self {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut members: Vec<Vec<usize>> = Vec::new();
        for (s, g) in groups.iter().enumerate() {
            let u = *index.entry(g.as_str()).or_insert_with(|| {
                members.push(Vec::new());
                members.len() - 1
            });
            members[u].push(s);
        }
        Units { members }
    }

    fn len(&self) -> usize {
        self.members.len()
    }
}

/// Random fold (0..k) for each of `n` units. With `strata`, each class is
/// shuffled and dealt round-robin, continuing where the previous class
/// stopped so fold sizes stay balanced overall.
pub(crate) fn assign_folds(n: usize, k: usize, strata: Option<&[bool]>, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let mut fold = vec![0usize; n];
    match strata {
        Some(is_case) => {
            let mut offset = 0;
            for class in [false, true] {
                let mut members: Vec<usize> = (0..n).filter(|&u| is_case[u] == class).collect();
                members.shuffle(rng);
                for (j, &u) in members.iter().enumerate() {
                    fold[u] = (offset + j) % k;
                }
                offset = (offset + members.len()) % k;
            }
        }
        None => {
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(rng);
            for (j, &u) in order.iter().enumerate() {
                fold[u] = j % k;
            }
        }
    }
    fold
}

/// Create a K-fold × R-resample split over the samples of `label`.
///
/// `groups` holds the inseparable key of every labelled sample, in label
/// order. In grouped mode each group is stratified by the class of its first
/// member, which only approximates the class balance when groups are mixed.
pub fn create_data_split(label: &Label, config: &SplitConfig, groups: Option<&[String]>) -> Result<DataSplit> {
    let k = config.num_folds;
    if k < 2 {
        return Err(PipelineError::config(format!(
            "number of folds must be at least 2, got {}",
            k
        )));
    }
    if config.num_resample < 1 {
        return Err(PipelineError::config("number of resamples must be at least 1"));
    }

    let units = match groups {
        Some(g) => {
            if g.len() != label.len() {
                return Err(PipelineError::data(format!(
                    "{} group keys for {} labelled samples",
                    g.len(),
                    label.len()
                )));
            }
            let units = Units::from_groups(g);
            if units.len() < k {
                return Err(PipelineError::config(format!(
                    "{} inseparable groups cannot fill {} folds",
                    units.len(),
                    k
                )));
            }
            units
        }
        None => Units::from_samples(label.len()),
    };

    if k > units.len() {
        return Err(PipelineError::config(format!(
            "number of folds ({}) exceeds the number of samples ({})",
            k,
            units.len()
        )));
    }

    let leave_one_out = k == units.len();
    let mut num_resample = config.num_resample;
    let mut stratify = config.stratify && label.is_binary();
    if leave_one_out {
        if num_resample > 1 {
            log::warn!(
                "Leave-one-out split: every resample would be identical, using 1 resample instead of {}",
                num_resample
            );
            num_resample = 1;
        }
        stratify = false;
    }

    // Class of each unit: its first member's class.
    let unit_case: Option<Vec<bool>> = label
        .is_case()
        .map(|is_case| units.members.iter().map(|m| is_case[m[0]]).collect());

    if stratify {
        if let Some(unit_case) = &unit_case {
            let n_case = unit_case.iter().filter(|&&c| c).count();
            let smallest = n_case.min(unit_case.len() - n_case);
            if smallest < k {
                return Err(PipelineError::config(format!(
                    "cannot stratify {} folds: the smallest class has only {} {}",
                    k,
                    smallest,
                    if groups.is_some() { "groups" } else { "samples" }
                )));
            }
        }
    }

    let mut assignments = Vec::with_capacity(num_resample);
    for r in 0..num_resample {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(r as u64));
        let strata = if stratify { unit_case.as_deref() } else { None };
        let unit_fold = assign_folds(units.len(), k, strata, &mut rng);

        let mut folds = vec![0usize; label.len()];
        for (u, members) in units.members.iter().enumerate() {
            for &s in members {
                folds[s] = unit_fold[u];
            }
        }
        assignments.push(folds);
    }

    let mut split = DataSplit::from_assignments(label.sample_ids().to_vec(), k, assignments)?;
    split.stratified = stratify;
    split.grouped = groups.is_some();
    check_train_classes(&split, label)?;
    split.check_invariants()?;

    log::info!(
        "Created data split: {} folds x {} resamples over {} samples (stratified: {}, grouped: {})",
        k,
        num_resample,
        label.len(),
        stratify,
        split.grouped
    );
    Ok(split)
}
