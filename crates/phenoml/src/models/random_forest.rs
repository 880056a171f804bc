//! Bagged CART ensemble for classification (Gini) and regression (variance).

use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::config::Task;
use crate::error::{PipelineError, Result};
use crate::models::model_trait::Model;
use crate::models::utils::{check_prediction_width, check_training_data, check_two_classes};

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict_row(&self, row: &[f64]) -> f64 {
        let mut k = 0;
        loop {
            match self.nodes[k] {
                Node::Leaf(v) => return v,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => k = if row[feature] <= threshold { left } else { right },
            }
        }
    }
}

/// Parameters for growing one tree.
#[derive(Debug, Clone, Copy)]
struct Growth {
    task: Task,
    mtry: usize,
    min_node_size: usize,
}

/// Node impurity times node size: Gini for 0/1 responses, sum of squares
/// around the mean otherwise. Both are functions of (count, sum, sum of squares).
fn weighted_impurity(task: Task, n: f64, sum: f64, sum_sq: f64) -> f64 {
    if n == 0.0 {
        return 0.0;
    }
    match task {
        Task::Classification => {
            let p = sum / n;
            n * 2.0 * p * (1.0 - p)
        }
        Task::Regression => sum_sq - sum * sum / n,
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    decrease: f64,
    n_left: usize,
}

fn find_split(
    x: &Array2<f64>,
    y: &Array1<f64>,
    rows: &mut [usize],
    features: &[usize],
    growth: &Growth,
) -> Option<BestSplit> {
    let n = rows.len() as f64;
    let total_sum: f64 = rows.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = rows.iter().map(|&i| y[i] * y[i]).sum();
    let parent = weighted_impurity(growth.task, n, total_sum, total_sq);

    let mut best: Option<BestSplit> = None;
    for &f in features {
        rows.sort_by(|&a, &b| x[(a, f)].total_cmp(&x[(b, f)]));
        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for k in 0..rows.len() - 1 {
            let yi = y[rows[k]];
            left_sum += yi;
            left_sq += yi * yi;
            let n_left = k + 1;
            let (v, v_next) = (x[(rows[k], f)], x[(rows[k + 1], f)]);
            if v == v_next || n_left < growth.min_node_size || rows.len() - n_left < growth.min_node_size {
                continue;
            }
            let nl = n_left as f64;
            let children = weighted_impurity(growth.task, nl, left_sum, left_sq)
                + weighted_impurity(growth.task, n - nl, total_sum - left_sum, total_sq - left_sq);
            let decrease = parent - children;
            if decrease > 1e-12 && best.as_ref().map_or(true, |b| decrease > b.decrease) {
                best = Some(BestSplit {
                    feature: f,
                    threshold: (v + v_next) / 2.0,
                    decrease,
                    n_left,
                });
            }
        }
    }
    best
}

/// Grow one tree on a bootstrap sample; returns the tree and its impurity
/// decrease per feature.
fn grow_tree(x: &Array2<f64>, y: &Array1<f64>, growth: Growth, seed: u64) -> (Tree, Vec<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let n = x.nrows();
    let p = x.ncols();
    let mut rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
    let mut importance = vec![0.0; p];
    let mut all_features: Vec<usize> = (0..p).collect();

    let mut nodes: Vec<Node> = vec![Node::Leaf(0.0)];
    // (node slot, start, end) ranges into `rows`
    let mut stack = vec![(0usize, 0usize, n)];
    while let Some((slot, start, end)) = stack.pop() {
        let node_rows = &mut rows[start..end];
        let mean = node_rows.iter().map(|&i| y[i]).sum::<f64>() / node_rows.len() as f64;
        let pure = node_rows.iter().all(|&i| y[i] == y[node_rows[0]]);
        if pure || node_rows.len() < 2 * growth.min_node_size.max(1) {
            nodes[slot] = Node::Leaf(mean);
            continue;
        }

        let (candidates, _) = all_features.partial_shuffle(&mut rng, growth.mtry.min(p));
        let candidates = candidates.to_vec();
        match find_split(x, y, node_rows, &candidates, &growth) {
            Some(split) => {
                node_rows.sort_by(|&a, &b| x[(a, split.feature)].total_cmp(&x[(b, split.feature)]));
                importance[split.feature] += split.decrease;
                let left = nodes.len();
                nodes.push(Node::Leaf(0.0));
                nodes.push(Node::Leaf(0.0));
                nodes[slot] = Node::Split {
                    feature: split.feature,
                    threshold: split.threshold,
                    left,
                    right: left + 1,
                };
                let mid = start + split.n_left;
                stack.push((left, start, mid));
                stack.push((left + 1, mid, end));
            }
            None => nodes[slot] = Node::Leaf(mean),
        }
    }
    (Tree { nodes }, importance)
}

/// Random forest with mean-decrease-in-impurity importances.
pub struct RandomForest {
    task: Task,
    num_trees: usize,
    mtry: usize,
    min_node_size: usize,
    seed: u64,
    trees: Vec<Tree>,
    importance: Option<Array1<f64>>,
}

impl RandomForest {
    pub fn new(task: Task, num_trees: usize, mtry: usize, min_node_size: usize, seed: u64) -> Self {
        RandomForest {
            task,
            num_trees,
            mtry,
            min_node_size,
            seed,
            trees: Vec::new(),
            importance: None,
        }
    }

    /// Conventional `mtry`: √p for classification, p/3 for regression.
    pub fn default_mtry(task: Task, n_features: usize) -> usize {
        let m = match task {
            Task::Classification => (n_features as f64).sqrt().floor() as usize,
            Task::Regression => n_features / 3,
        };
        m.clamp(1, n_features.max(1))
    }

    pub fn default_min_node_size(task: Task) -> usize {
        match task {
            Task::Classification => 1,
            Task::Regression => 5,
        }
    }
}

impl Model for RandomForest {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_training_data(x, y)?;
        if self.task == Task::Classification {
            check_two_classes(y)?;
        }
        if self.num_trees == 0 || self.mtry == 0 {
            return Err(PipelineError::config("random forest needs at least one tree and mtry >= 1"));
        }
        let growth = Growth {
            task: self.task,
            mtry: self.mtry.min(x.ncols()),
            min_node_size: self.min_node_size.max(1),
        };
        let grown: Vec<(Tree, Vec<f64>)> = (0..self.num_trees)
            .into_par_iter()
            .map(|t| grow_tree(x, y, growth, self.seed.wrapping_add(t as u64)))
            .collect();

        let mut importance = Array1::zeros(x.ncols());
        let mut trees = Vec::with_capacity(grown.len());
        for (tree, imp) in grown {
            importance
                .iter_mut()
                .zip(imp)
                .for_each(|(total, v): (&mut f64, f64)| *total += v);
            trees.push(tree);
        }
        importance /= self.num_trees as f64 * x.nrows() as f64;
        log::trace!(
            "Grew {} trees (mtry {}, min node size {})",
            trees.len(),
            growth.mtry,
            growth.min_node_size
        );
        self.trees = trees;
        self.importance = Some(importance);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let importance = self
            .importance
            .as_ref()
            .ok_or_else(|| PipelineError::internal("random forest used before fitting"))?;
        check_prediction_width(x, importance.len())?;
        let n_trees = self.trees.len() as f64;
        Ok(x.rows()
            .into_iter()
            .map(|row| {
                let row = row.to_vec();
                self.trees.iter().map(|t| t.predict_row(&row)).sum::<f64>() / n_trees
            })
            .collect())
    }

    fn feature_weights(&self) -> Result<Array1<f64>> {
        self.importance
            .clone()
            .ok_or_else(|| PipelineError::internal("random forest used before fitting"))
    }

    fn name(&self) -> &str {
        "random_forest"
    }

    fn summary(&self) -> String {
        format!(
            "random_forest ({} trees, mtry {}, min node size {})",
            self.num_trees, self.mtry, self.min_node_size
        )
    }
}
