use statrs::distribution::{ContinuousCDF, Normal};

/// Quantiles used for the generalized fold change.
const GFC_PROBS: [f64; 19] = [
    0.05, 0.1, 0.15, 0.2, 0.25, 0.3, 0.35, 0.4, 0.45, 0.5, 0.55, 0.6, 0.65, 0.7, 0.75, 0.8, 0.85,
    0.9, 0.95,
];

/// Pseudocount added before taking log10 in `gfc`.
pub const GFC_LOG_N0: f64 = 1e-5;

/// 1-based ranks with ties replaced by their average rank.
pub fn mid_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // positions i..=j share the average of ranks i+1..=j+1
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = avg;
        }
        i = j + 1;
    }
    ranks
}

/// Linear-interpolation quantile (R type 7). Returns 0 for empty input.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let h = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Area under the ROC curve of `scores` against `is_case`, ties counted half.
///
/// Returns NaN if either class is empty.
pub fn auc(scores: &[f64], is_case: &[bool]) -> f64 {
    let n_case = is_case.iter().filter(|&&c| c).count();
    let n_control = is_case.len() - n_case;
    if n_case == 0 || n_control == 0 {
        return f64::NAN;
    }
    let ranks = mid_ranks(scores);
    let rank_sum: f64 = ranks
        .iter()
        .zip(is_case)
        .filter(|(_, c)| **c)
        .map(|(r, _)| r)
        .sum();
    let u = rank_sum - (n_case * (n_case + 1)) as f64 / 2.0;
    u / (n_case * n_control) as f64
}

/// Two-sided Wilcoxon rank-sum p-value, normal approximation with tie and
/// continuity correction.
pub fn wilcoxon_p_value(scores: &[f64], is_case: &[bool]) -> f64 {
    let n1 = is_case.iter().filter(|&&c| c).count() as f64;
    let n2 = is_case.len() as f64 - n1;
    if n1 == 0.0 || n2 == 0.0 {
        return f64::NAN;
    }
    let ranks = mid_ranks(scores);
    let r1: f64 = ranks
        .iter()
        .zip(is_case)
        .filter(|(_, c)| **c)
        .map(|(r, _)| r)
        .sum();
    let u = r1 - n1 * (n1 + 1.0) / 2.0;
    let mu = n1 * n2 / 2.0;

    let n = n1 + n2;
    let tie_term: f64 = tie_sizes(scores)
        .into_iter()
        .map(|t| {
            let t = t as f64;
            t * t * t - t
        })
        .sum();
    let var = n1 * n2 / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)));
    if var <= 0.0 {
        return 1.0;
    }
    let diff = u - mu;
    let z = (diff.abs() - 0.5).max(0.0) / var.sqrt();
    let Ok(normal) = Normal::new(0.0, 1.0) else {
        return f64::NAN;
    };
    (2.0 * (1.0 - normal.cdf(z))).min(1.0)
}

fn tie_sizes(values: &[f64]) -> Vec<usize> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut sizes = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i + 1;
        while j < sorted.len() && sorted[j] == sorted[i] {
            j += 1;
        }
        if j - i > 1 {
            sizes.push(j - i);
        }
        i = j;
    }
    sizes
}

/// Generalized fold change: mean difference of log10 quantiles, case minus control.
pub fn gfc(values: &[f64], is_case: &[bool]) -> f64 {
    let (case, control): (Vec<f64>, Vec<f64>) = {
        let mut case = Vec::new();
        let mut control = Vec::new();
        for (&v, &c) in values.iter().zip(is_case) {
            if c {
                case.push(v);
            } else {
                control.push(v);
            }
        }
        (case, control)
    };
    if case.is_empty() || control.is_empty() {
        return f64::NAN;
    }
    let log_q = |xs: &[f64], p: f64| (quantile(xs, p).max(0.0) + GFC_LOG_N0).log10();
    GFC_PROBS
        .iter()
        .map(|&p| log_q(&case, p) - log_q(&control, p))
        .sum::<f64>()
        / GFC_PROBS.len() as f64
}

/// Pearson correlation; 0 when either vector is constant.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let mx = mean(x);
    let my = mean(y);
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return 0.0;
    }
    sxy / (sxx * syy).sqrt()
}

pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    pearson(&mid_ranks(x), &mid_ranks(y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn ties_share_average_rank() {
        assert_eq!(mid_ranks(&[3.0, 1.0, 3.0, 2.0]), vec![3.5, 1.0, 3.5, 2.0]);
    }

    #[test]
    fn quantile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_abs_diff_eq!(quantile(&v, 0.5), 3.0);
        assert_abs_diff_eq!(quantile(&v, 0.1), 1.4, epsilon = 1e-12);
        assert_abs_diff_eq!(quantile(&v, 1.0), 5.0);
    }

    #[test]
    fn auc_of_perfect_and_reversed_scores() {
        let y = [true, true, false, false];
        assert_abs_diff_eq!(auc(&[0.9, 0.8, 0.2, 0.1], &y), 1.0);
        assert_abs_diff_eq!(auc(&[0.1, 0.2, 0.8, 0.9], &y), 0.0);
        assert_abs_diff_eq!(auc(&[0.5, 0.5, 0.5, 0.5], &y), 0.5);
    }

    #[test]
    fn wilcoxon_separates_shifted_groups() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<bool> = (0..20).map(|i| i >= 10).collect();
        let p = wilcoxon_p_value(&x, &y);
        assert!(p < 0.001, "p = {}", p);
        let mixed: Vec<bool> = (0..20).map(|i| i % 2 == 0).collect();
        assert!(wilcoxon_p_value(&x, &mixed) > 0.5);
    }

    #[test]
    fn gfc_sign_follows_enrichment() {
        let x = [1.0, 1.2, 0.9, 0.01, 0.02, 0.015];
        let y = [true, true, true, false, false, false];
        assert!(gfc(&x, &y) > 1.0);
    }

    #[test]
    fn correlations() {
        let x = [1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(pearson(&x, &[2.0, 4.0, 6.0, 8.0]), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(spearman(&x, &[1.0, 10.0, 100.0, 1000.0]), 1.0, epsilon = 1e-12);
        assert_eq!(pearson(&x, &[1.0, 1.0, 1.0, 1.0]), 0.0);
    }
}
