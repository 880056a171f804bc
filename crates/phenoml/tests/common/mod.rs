#![allow(dead_code)]

use ndarray::Array2;
use phenoml::data_handling::{FeatureMatrix, Label};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

pub fn ids(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{}{}", prefix, i)).collect()
}

/// Binary data set: the first `informative` features are shifted by `shift`
/// in cases, the rest are pure N(0, 1) noise. Cases and controls alternate.
pub fn binary_data(
    n_samples: usize,
    informative: usize,
    noise: usize,
    shift: f64,
    seed: u64,
) -> (FeatureMatrix, Label) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let n_features = informative + noise;
    let is_case: Vec<bool> = (0..n_samples).map(|s| s % 2 == 0).collect();
    let data = Array2::from_shape_fn((n_features, n_samples), |(f, s)| {
        let base = normal.sample(&mut rng);
        if f < informative && is_case[s] {
            base + shift
        } else {
            base
        }
    });
    let samples = ids("s", n_samples);
    let classes: Vec<&str> = is_case.iter().map(|&c| if c { "case" } else { "control" }).collect();
    let features = FeatureMatrix::new(data, ids("f", n_features), samples.clone()).unwrap();
    let label = Label::binary(samples, &classes, "case").unwrap();
    (features, label)
}

/// Continuous data set with y = 2 * f0 + N(0, sigma).
pub fn linear_data(n_samples: usize, noise_features: usize, sigma: f64, seed: u64) -> (FeatureMatrix, Label) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let n_features = noise_features + 1;
    let data = Array2::from_shape_fn((n_features, n_samples), |_| normal.sample(&mut rng));
    let y: Vec<f64> = (0..n_samples)
        .map(|s| 2.0 * data[(0, s)] + sigma * normal.sample(&mut rng))
        .collect();
    let samples = ids("s", n_samples);
    let features = FeatureMatrix::new(data, ids("f", n_features), samples.clone()).unwrap();
    let label = Label::continuous(samples, y).unwrap();
    (features, label)
}

/// Keep the given samples (by position) of both matrix and label.
pub fn subset(features: &FeatureMatrix, label: &Label, samples: &[usize]) -> (FeatureMatrix, Label) {
    let sub_features = features.select_samples(samples);
    let sample_ids: Vec<String> = samples.iter().map(|&s| label.sample_ids()[s].clone()).collect();
    let sub_label = match label.is_case() {
        Some(is_case) => {
            let classes: Vec<&str> = samples
                .iter()
                .map(|&s| if is_case[s] { "case" } else { "control" })
                .collect();
            Label::binary(sample_ids, &classes, "case").unwrap()
        }
        None => {
            let y = label.response();
            Label::continuous(sample_ids, samples.iter().map(|&s| y[s]).collect()).unwrap()
        }
    };
    (sub_features, sub_label)
}
