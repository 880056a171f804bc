//! Penalized generalized linear models fitted by cyclic coordinate descent.
//!
//! Objective, for the gaussian and binomial families:
//!
//! ```text
//! (1/n) * loss(b0, b) + λ * ((1 - α)/2 * ||b||² + α * ||b||₁)
//! ```
//!
//! where loss is half the residual sum of squares (gaussian) or the negative
//! log-likelihood (binomial, solved by iteratively reweighted least squares).
//! The intercept is never penalized. Features are centred internally and, when
//! `standardize` is set, scaled to unit variance; coefficients are reported
//! on the original scale.

use ndarray::{Array1, Array2, Axis};

use crate::config::{Measure, Task};
use crate::error::{PipelineError, Result};
use crate::evaluation::compute_measure;
use crate::models::model_trait::Model;
use crate::models::utils::{check_prediction_width, check_training_data, check_two_classes, column_moments, sigmoid};

const MAX_PASSES: usize = 1000;
const MAX_IRLS: usize = 50;
const TOLERANCE: f64 = 1e-7;
const MIN_WEIGHT: f64 = 1e-5;
/// Path fitting stops once this fraction of the null deviance is explained.
const MAX_DEV_RATIO: f64 = 0.999;
/// Floor on α when deriving λ_max, so ridge paths start at a finite value.
const MIN_ALPHA_FOR_LAMBDA_MAX: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Gaussian,
    Binomial,
}

impl Family {
    pub fn for_task(task: Task) -> Self {
        match task {
            Task::Classification => Family::Binomial,
            Task::Regression => Family::Gaussian,
        }
    }
}

/// How the penalty strength is chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum Penalty {
    /// Fit a decreasing λ path and pick one value by in-sample performance.
    Path {
        num_lambda: usize,
        /// λ values giving fewer non-zero coefficients are discarded.
        min_nonzero: usize,
        measures: Vec<Measure>,
    },
    /// Cost-parameterized fit: λ = 1 / (C · n).
    Cost(f64),
}

#[derive(Debug, Clone)]
struct FittedGlm {
    intercept: f64,
    coefficients: Array1<f64>,
    lambda: f64,
    path_len: usize,
}

/// Lasso / ridge / elastic-net GLM.
#[derive(Debug, Clone)]
pub struct PenalizedGlm {
    name: &'static str,
    family: Family,
    alpha: f64,
    standardize: bool,
    penalty: Penalty,
    fitted: Option<FittedGlm>,
}

/// Centred (and optionally scaled) training design, stored feature-major so
/// each coordinate update reads a contiguous row.
struct Design {
    xt: Array2<f64>,
    means: Array1<f64>,
    scales: Array1<f64>,
}

impl Design {
    fn new(x: &Array2<f64>, standardize: bool) -> Self {
        let (means, sds) = column_moments(x);
        let scales = if standardize {
            sds.mapv(|s| if s > 1e-12 { s } else { 0.0 })
        } else {
            Array1::ones(x.ncols())
        };
        let mut xt = x.t().to_owned();
        for (j, mut row) in xt.axis_iter_mut(Axis(0)).enumerate() {
            let (m, s) = (means[j], scales[j]);
            if s > 0.0 {
                row.mapv_inplace(|v| (v - m) / s);
            } else {
                row.fill(0.0);
            }
        }
        Design { xt, means, scales }
    }

    fn n(&self) -> usize {
        self.xt.ncols()
    }

    fn p(&self) -> usize {
        self.xt.nrows()
    }

    fn linear_predictor(&self, b0: f64, beta: &Array1<f64>) -> Array1<f64> {
        self.xt.t().dot(beta) + b0
    }

    /// Map internal coefficients back to the original feature scale.
    fn unscale(&self, b0: f64, beta: &Array1<f64>) -> (f64, Array1<f64>) {
        let coef: Array1<f64> = beta
            .iter()
            .zip(self.scales.iter())
            .map(|(&b, &s)| if s > 0.0 { b / s } else { 0.0 })
            .collect();
        let intercept = b0 - coef.dot(&self.means);
        (intercept, coef)
    }
}

fn soft_threshold(z: f64, gamma: f64) -> f64 {
    if z > gamma {
        z - gamma
    } else if z < -gamma {
        z + gamma
    } else {
        0.0
    }
}

/// Weighted least-squares coordinate descent at one λ, warm-started from
/// (`b0`, `beta`). `r` holds the working residual `z - b0 - X b` and is kept
/// in sync.
fn wls_coordinate_descent(
    design: &Design,
    w: &Array1<f64>,
    r: &mut Array1<f64>,
    b0: &mut f64,
    beta: &mut Array1<f64>,
    alpha: f64,
    lambda: f64,
) {
    let n = design.n() as f64;
    let w_sum = w.sum() / n;
    let v: Vec<f64> = design
        .xt
        .axis_iter(Axis(0))
        .map(|xj| xj.iter().zip(w.iter()).map(|(x, wi)| wi * x * x).sum::<f64>() / n)
        .collect();
    let l1 = lambda * alpha;
    let l2 = lambda * (1.0 - alpha);

    let pass = |coords: &mut dyn Iterator<Item = usize>, beta: &mut Array1<f64>, r: &mut Array1<f64>| -> f64 {
        let mut max_change: f64 = 0.0;
        for j in coords {
            if v[j] == 0.0 {
                continue;
            }
            let xj = design.xt.row(j);
            let old = beta[j];
            let g = xj.iter().zip(w.iter()).zip(r.iter()).map(|((x, wi), ri)| x * wi * ri).sum::<f64>() / n
                + v[j] * old;
            let new = soft_threshold(g, l1) / (v[j] + l2);
            if new != old {
                let delta = new - old;
                r.iter_mut().zip(xj.iter()).for_each(|(ri, x)| *ri -= delta * x);
                beta[j] = new;
                max_change = max_change.max(v[j] * delta * delta);
            }
        }
        max_change
    };

    let update_intercept = |b0: &mut f64, r: &mut Array1<f64>| -> f64 {
        let delta = w.iter().zip(r.iter()).map(|(wi, ri)| wi * ri).sum::<f64>() / n / w_sum;
        if delta != 0.0 {
            *b0 += delta;
            r.mapv_inplace(|ri| ri - delta);
        }
        w_sum * delta * delta
    };

    let p = design.p();
    for _ in 0..MAX_PASSES {
        let full = pass(&mut (0..p), beta, r).max(update_intercept(b0, r));
        if full < TOLERANCE {
            return;
        }
        // Iterate on the active set until it settles, then re-check all coordinates.
        for _ in 0..MAX_PASSES {
            let active: Vec<usize> = (0..p).filter(|&j| beta[j] != 0.0).collect();
            let change = pass(&mut active.into_iter(), beta, r).max(update_intercept(b0, r));
            if change < TOLERANCE {
                break;
            }
        }
    }
    log::trace!("Coordinate descent reached {} passes at lambda {:.3e}", MAX_PASSES, lambda);
}

fn binomial_deviance(y: &Array1<f64>, eta: &Array1<f64>) -> f64 {
    -2.0 * y
        .iter()
        .zip(eta.iter())
        .map(|(&yi, &e)| {
            let p = sigmoid(e).clamp(MIN_WEIGHT, 1.0 - MIN_WEIGHT);
            yi * p.ln() + (1.0 - yi) * (1.0 - p).ln()
        })
        .sum::<f64>()
}

fn gaussian_deviance(y: &Array1<f64>, eta: &Array1<f64>) -> f64 {
    y.iter().zip(eta.iter()).map(|(a, b)| (a - b).powi(2)).sum()
}

impl PenalizedGlm {
    pub fn new(name: &'static str, family: Family, alpha: f64, standardize: bool, penalty: Penalty) -> Self {
        PenalizedGlm {
            name,
            family,
            alpha,
            standardize,
            penalty,
            fitted: None,
        }
    }

    /// Fit at a single λ, updating (`b0`, `beta`) in place.
    fn fit_lambda(&self, design: &Design, y: &Array1<f64>, lambda: f64, b0: &mut f64, beta: &mut Array1<f64>) {
        match self.family {
            Family::Gaussian => {
                let w = Array1::ones(design.n());
                let mut r = y - &design.linear_predictor(*b0, beta);
                wls_coordinate_descent(design, &w, &mut r, b0, beta, self.alpha, lambda);
            }
            Family::Binomial => {
                let mut dev_old = f64::INFINITY;
                for _ in 0..MAX_IRLS {
                    let eta = design.linear_predictor(*b0, beta);
                    let p = eta.mapv(|e| sigmoid(e).clamp(MIN_WEIGHT, 1.0 - MIN_WEIGHT));
                    let w = p.mapv(|pi| pi * (1.0 - pi));
                    // working residual z - eta = (y - p) / w
                    let mut r: Array1<f64> = y
                        .iter()
                        .zip(p.iter())
                        .zip(w.iter())
                        .map(|((yi, pi), wi)| (yi - pi) / wi)
                        .collect();
                    wls_coordinate_descent(design, &w, &mut r, b0, beta, self.alpha, lambda);
                    let dev = binomial_deviance(y, &design.linear_predictor(*b0, beta));
                    if (dev_old - dev).abs() < TOLERANCE * (dev.abs() + 0.1) {
                        break;
                    }
                    dev_old = dev;
                }
            }
        }
    }

    fn deviance(&self, y: &Array1<f64>, eta: &Array1<f64>) -> f64 {
        match self.family {
            Family::Gaussian => gaussian_deviance(y, eta),
            Family::Binomial => binomial_deviance(y, eta),
        }
    }

    fn response(&self, eta: &Array1<f64>) -> Array1<f64> {
        match self.family {
            Family::Gaussian => eta.clone(),
            Family::Binomial => eta.mapv(sigmoid),
        }
    }

    fn lambda_max(&self, design: &Design, y: &Array1<f64>) -> f64 {
        let n = design.n() as f64;
        let y_mean = y.mean().unwrap_or(0.0);
        let centred = y.mapv(|v| v - y_mean);
        let max_grad = design
            .xt
            .axis_iter(Axis(0))
            .map(|xj| (xj.dot(&centred) / n).abs())
            .fold(0.0, f64::max);
        max_grad / self.alpha.max(MIN_ALPHA_FOR_LAMBDA_MAX)
    }

    /// Null model starting point: intercept only.
    fn null_intercept(&self, y: &Array1<f64>) -> f64 {
        let y_mean = y.mean().unwrap_or(0.0);
        match self.family {
            Family::Gaussian => y_mean,
            Family::Binomial => {
                let p = y_mean.clamp(MIN_WEIGHT, 1.0 - MIN_WEIGHT);
                (p / (1.0 - p)).ln()
            }
        }
    }

    fn fit_path(
        &self,
        design: &Design,
        y: &Array1<f64>,
        num_lambda: usize,
        min_nonzero: usize,
        measures: &[Measure],
    ) -> Result<FittedGlm> {
        let n = design.n();
        let p = design.p();
        let lambda_max = self.lambda_max(design, y);
        let ratio: f64 = if n < p { 0.01 } else { 1e-4 };
        let lambdas: Vec<f64> = if num_lambda == 1 {
            vec![lambda_max]
        } else {
            (0..num_lambda)
                .map(|k| lambda_max * ratio.powf(k as f64 / (num_lambda - 1) as f64))
                .collect()
        };

        let mut b0 = self.null_intercept(y);
        let mut beta = Array1::zeros(p);
        let null_dev = self.deviance(y, &Array1::from_elem(n, b0));
        let y_vec = y.to_vec();

        // (λ, intercept, coefficients, in-sample response)
        let mut path = Vec::with_capacity(lambdas.len());
        for &lambda in &lambdas {
            self.fit_lambda(design, y, lambda, &mut b0, &mut beta);
            let eta = design.linear_predictor(b0, &beta);
            let dev_ratio = if null_dev > 0.0 {
                1.0 - self.deviance(y, &eta) / null_dev
            } else {
                1.0
            };
            path.push((lambda, b0, beta.clone(), self.response(&eta)));
            if dev_ratio > MAX_DEV_RATIO {
                log::trace!("Regularization path stopped at lambda {:.3e} (deviance ratio {:.4})", lambda, dev_ratio);
                break;
            }
        }

        let admissible: Vec<usize> = (0..path.len())
            .filter(|&k| path[k].2.iter().filter(|&&b| b != 0.0).count() >= min_nonzero)
            .collect();
        if admissible.is_empty() {
            return Err(PipelineError::config(format!(
                "no penalty on the regularization path gives at least {} non-zero coefficients ({} features available)",
                min_nonzero, p
            )));
        }

        let positions: Vec<usize> = measures
            .iter()
            .map(|&m| {
                let scores: Vec<f64> = admissible
                    .iter()
                    .map(|&k| compute_measure(m, &path[k].3.to_vec(), &y_vec))
                    .collect();
                path_optimum(&scores, m)
            })
            .collect();
        let chosen = admissible[compromise_position(&positions)];

        let (lambda, b0, beta, _) = &path[chosen];
        let (intercept, coefficients) = design.unscale(*b0, beta);
        Ok(FittedGlm {
            intercept,
            coefficients,
            lambda: *lambda,
            path_len: path.len(),
        })
    }
}

/// Position of the best score; the first occurrence wins ties. NaN scores
/// never win.
pub fn path_optimum(scores: &[f64], measure: Measure) -> usize {
    let mut best: Option<usize> = None;
    for (k, &s) in scores.iter().enumerate() {
        if !s.is_finite() {
            continue;
        }
        match best {
            Some(b) if !measure.is_better(s, scores[b]) => {}
            _ => best = Some(k),
        }
    }
    best.unwrap_or(0)
}

/// Compromise between per-measure optima: the floor of their mean position.
pub fn compromise_position(positions: &[usize]) -> usize {
    if positions.is_empty() {
        return 0;
    }
    positions.iter().sum::<usize>() / positions.len()
}

impl Model for PenalizedGlm {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_training_data(x, y)?;
        if self.family == Family::Binomial {
            check_two_classes(y)?;
        }
        let design = Design::new(x, self.standardize);

        let fitted = match &self.penalty {
            Penalty::Path {
                num_lambda,
                min_nonzero,
                measures,
            } => self.fit_path(&design, y, *num_lambda, *min_nonzero, measures)?,
            Penalty::Cost(c) => {
                let lambda = 1.0 / (c * design.n() as f64);
                let mut b0 = self.null_intercept(y);
                let mut beta = Array1::zeros(design.p());
                self.fit_lambda(&design, y, lambda, &mut b0, &mut beta);
                let (intercept, coefficients) = design.unscale(b0, &beta);
                FittedGlm {
                    intercept,
                    coefficients,
                    lambda,
                    path_len: 1,
                }
            }
        };
        if !fitted.intercept.is_finite() || fitted.coefficients.iter().any(|b| !b.is_finite()) {
            return Err(PipelineError::data(format!("{} fit diverged", self.name)));
        }
        log::trace!(
            "{}: lambda {:.4e}, {} non-zero coefficients",
            self.name,
            fitted.lambda,
            fitted.coefficients.iter().filter(|&&b| b != 0.0).count()
        );
        self.fitted = Some(fitted);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| PipelineError::internal(format!("{} used before fitting", self.name)))?;
        check_prediction_width(x, fitted.coefficients.len())?;
        let eta = x.dot(&fitted.coefficients) + fitted.intercept;
        Ok(self.response(&eta))
    }

    fn feature_weights(&self) -> Result<Array1<f64>> {
        self.fitted
            .as_ref()
            .map(|f| f.coefficients.clone())
            .ok_or_else(|| PipelineError::internal(format!("{} used before fitting", self.name)))
    }

    fn name(&self) -> &str {
        self.name
    }

    fn summary(&self) -> String {
        match &self.fitted {
            Some(f) => format!(
                "{} (alpha {}, lambda {:.4e}, {} path steps)",
                self.name, self.alpha, f.lambda, f.path_len
            ),
            None => self.name.to_string(),
        }
    }
}
