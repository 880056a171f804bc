mod common;

use std::collections::HashMap;

use phenoml::config::SplitConfig;
use phenoml::data_handling::{Label, Metadata};
use phenoml::error::ErrorKind;
use phenoml::partition::create_data_split;

fn split_config(num_folds: usize, num_resample: usize) -> SplitConfig {
    SplitConfig {
        num_folds,
        num_resample,
        ..Default::default()
    }
}

#[test]
fn every_sample_is_tested_exactly_once_per_resample() {
    let (_, label) = common::binary_data(53, 1, 0, 1.0, 3);
    let split = create_data_split(&label, &split_config(5, 3), None).unwrap();
    assert_eq!(split.num_instances(), 15);
    for r in 0..3 {
        let mut seen = vec![0usize; label.len()];
        for f in 0..5 {
            let test = split.test(f, r);
            let train = split.train(f, r);
            assert_eq!(test.len() + train.len(), label.len());
            assert!(test.iter().all(|s| !train.contains(s)));
            for &s in test {
                seen[s] += 1;
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
    }
}

#[test]
fn stratified_folds_keep_the_class_balance() {
    let samples = common::ids("s", 60);
    let classes: Vec<&str> = (0..60).map(|i| if i < 20 { "case" } else { "control" }).collect();
    let label = Label::binary(samples, &classes, "case").unwrap();
    let split = create_data_split(&label, &split_config(5, 2), None).unwrap();
    assert!(split.is_stratified());
    let is_case = label.is_case().unwrap();
    for (f, r) in split.instances() {
        let n_case = split.test(f, r).iter().filter(|&&s| is_case[s]).count();
        // 20 cases over 5 folds
        assert!((3..=5).contains(&n_case), "fold {} resample {} has {} cases", f, r, n_case);
    }
}

#[test]
fn resamples_differ_but_are_reproducible() {
    let (_, label) = common::binary_data(40, 1, 0, 1.0, 1);
    let a = create_data_split(&label, &split_config(4, 2), None).unwrap();
    let b = create_data_split(&label, &split_config(4, 2), None).unwrap();
    assert_eq!(a, b);
    assert_ne!(a.fold_assignment(0), a.fold_assignment(1));
}

#[test]
fn inseparable_groups_stay_in_one_fold() {
    let n = 48;
    let (_, label) = common::binary_data(n, 1, 0, 1.0, 2);
    // 12 subjects with 4 samples each, two of each class
    let subjects: Vec<String> = (0..n).map(|s| format!("subject{}", s / 4)).collect();
    let metadata = Metadata::new(label.sample_ids().to_vec())
        .unwrap()
        .with_column("subject", subjects.clone())
        .unwrap();
    let groups = metadata.groups("subject", &label).unwrap();
    let config = SplitConfig {
        num_folds: 4,
        num_resample: 2,
        stratify: false,
        inseparable: Some("subject".to_string()),
        seed: 9,
    };
    let split = create_data_split(&label, &config, Some(&groups)).unwrap();
    assert!(split.is_grouped());
    for r in 0..2 {
        let folds = split.fold_assignment(r);
        let mut fold_of: HashMap<&str, usize> = HashMap::new();
        for (s, subject) in subjects.iter().enumerate() {
            let f = *fold_of.entry(subject.as_str()).or_insert(folds[s]);
            assert_eq!(f, folds[s], "subject {} split across folds", subject);
        }
    }
}

fn grouped_label(n: usize, group_size: usize, is_case: impl Fn(usize) -> bool) -> (Label, Vec<String>) {
    let samples = common::ids("s", n);
    let classes: Vec<&str> = (0..n).map(|s| if is_case(s) { "case" } else { "control" }).collect();
    let label = Label::binary(samples.clone(), &classes, "case").unwrap();
    let subjects: Vec<String> = (0..n).map(|s| format!("subject{}", s / group_size)).collect();
    let metadata = Metadata::new(samples).unwrap().with_column("subject", subjects).unwrap();
    let groups = metadata.groups("subject", &label).unwrap();
    (label, groups)
}

fn grouped_stratified(num_folds: usize, num_resample: usize) -> SplitConfig {
    SplitConfig {
        num_folds,
        num_resample,
        stratify: true,
        inseparable: Some("subject".to_string()),
        seed: 5,
    }
}

#[test]
fn grouped_stratification_balances_groups_by_their_first_member() {
    // 24 subjects of 3 samples with mixed classes; every third subject starts
    // with a case, so 8 groups count as case groups and 16 as control groups.
    let (label, groups) = grouped_label(72, 3, |s| {
        let (g, p) = (s / 3, s % 3);
        match p {
            0 => g % 3 == 0,
            1 => g % 3 != 0,
            _ => g % 2 == 0,
        }
    });
    let split = create_data_split(&label, &grouped_stratified(4, 3), Some(&groups)).unwrap();
    assert!(split.is_stratified());
    assert!(split.is_grouped());

    let is_case = label.is_case().unwrap();
    for r in 0..3 {
        let folds = split.fold_assignment(r);
        for g in 0..24 {
            let members = [3 * g, 3 * g + 1, 3 * g + 2];
            assert!(
                members.iter().all(|&s| folds[s] == folds[3 * g]),
                "subject{} split across folds in resample {}",
                g,
                r
            );
        }
        let mut case_groups = vec![0usize; 4];
        let mut control_groups = vec![0usize; 4];
        for g in 0..24 {
            if is_case[3 * g] {
                case_groups[folds[3 * g]] += 1;
            } else {
                control_groups[folds[3 * g]] += 1;
            }
        }
        assert!(case_groups.iter().all(|&c| c == 2), "case groups per fold {:?}", case_groups);
        assert!(control_groups.iter().all(|&c| c == 4), "control groups per fold {:?}", control_groups);
    }
}

#[test]
fn grouped_stratification_needs_k_groups_of_each_first_member_class() {
    // every subject starts with a case, so no group represents the controls
    let (label, groups) = grouped_label(48, 4, |s| s % 4 == 0);
    let err = create_data_split(&label, &grouped_stratified(4, 1), Some(&groups)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("groups"), "{}", err);

    // the same groups split fine without strata
    let mut config = grouped_stratified(4, 1);
    config.stratify = false;
    let split = create_data_split(&label, &config, Some(&groups)).unwrap();
    assert!(!split.is_stratified());
}

#[test]
fn too_few_groups_for_the_folds_is_a_configuration_error() {
    let (_, label) = common::binary_data(20, 1, 0, 1.0, 2);
    let groups: Vec<String> = (0..20).map(|s| format!("g{}", s % 3)).collect();
    let err = create_data_split(&label, &split_config(5, 1), Some(&groups)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn leave_one_out_forces_a_single_resample() {
    let (_, label) = common::binary_data(12, 1, 0, 1.0, 5);
    let split = create_data_split(&label, &split_config(12, 3), None).unwrap();
    assert_eq!(split.num_resample(), 1);
    assert!(!split.is_stratified());
    for f in 0..12 {
        assert_eq!(split.test(f, 0).len(), 1);
    }
}

#[test]
fn continuous_labels_are_split_without_strata() {
    let (_, label) = common::linear_data(30, 2, 1.0, 4);
    let split = create_data_split(&label, &split_config(3, 1), None).unwrap();
    assert!(!split.is_stratified());
    let sizes: Vec<usize> = (0..3).map(|f| split.test(f, 0).len()).collect();
    assert_eq!(sizes, vec![10, 10, 10]);
}

#[test]
fn a_split_can_be_reused_for_the_same_samples() {
    let (_, label) = common::binary_data(30, 1, 0, 1.0, 6);
    let split = create_data_split(&label, &split_config(3, 2), None).unwrap();
    let copy = split.copy_compatible(&label).unwrap();
    assert_eq!(copy, split);

    let (_, other) = common::binary_data(31, 1, 0, 1.0, 6);
    assert_eq!(split.copy_compatible(&other).unwrap_err().kind(), ErrorKind::Data);
}

#[test]
fn a_split_survives_a_json_round_trip() {
    let (_, label) = common::binary_data(20, 1, 0, 1.0, 7);
    let split = create_data_split(&label, &split_config(4, 2), None).unwrap();
    let json = serde_json::to_string(&split).unwrap();
    let restored: phenoml::partition::DataSplit = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, split);
    restored.check_invariants().unwrap();
}
