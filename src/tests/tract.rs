use proptest::collection::vec;
use proptest::prelude::*;

use crate::tract::{ByteTract, Tract};
use crate::Error;

/// A float tract ready for the metric: thresholded at `threshold` with its
/// norm materialised.
fn metric_tract(data: &[f32], threshold: f32) -> Tract {
    let mut tract = Tract::new(data.to_vec());
    tract.threshold(threshold).unwrap();
    tract.compute_norm().unwrap();
    tract
}

fn metric_bytes(data: &[u8], threshold: f32) -> ByteTract {
    let mut tract = ByteTract::new(data.to_vec());
    tract.threshold(threshold).unwrap();
    tract.compute_norm().unwrap();
    tract
}

#[test]
fn threshold_cuts_below_only() {
    let mut tract = Tract::new(vec![0.1, 0.5, 0.49, 0.0]);
    tract.threshold(0.5).unwrap();
    assert_eq!(tract.data(), &[0.0, 0.5, 0.0, 0.0]);
    assert!(tract.thresholded());
}

#[test]
fn threshold_is_one_shot() {
    let mut tract = Tract::new(vec![0.1, 0.5]);
    tract.threshold(0.3).unwrap();
    assert!(matches!(tract.threshold(0.3), Err(Error::TractPrecondition { .. })));
}

#[test]
fn thresholding_already_cut_data_changes_nothing() {
    let mut once = Tract::new(vec![0.1, 0.5, 0.49, 0.0]);
    once.threshold(0.5).unwrap();
    // a second pass over the surviving values finds nothing below the cut
    let mut again = Tract::new(once.data().to_vec());
    again.threshold(0.5).unwrap();
    assert_eq!(once.data(), again.data());
}

#[test]
fn log_round_trip() {
    let data = vec![1e-10f32, 1e-7, 0.003, 0.5, 1.0];
    let mut tract = Tract::new(data.clone());
    tract.un_log(0.0).unwrap(); // natural units, values untouched
    tract.do_log(3.0).unwrap();
    tract.un_log(3.0).unwrap();
    for (&got, &expected) in tract.data().iter().zip(&data) {
        assert!((got - expected).abs() < 1e-4, "{got} vs {expected}");
    }
    assert!(!tract.in_log_units());
}

#[test]
fn zero_log_factor_only_toggles_the_flag() {
    let mut tract = Tract::new(vec![0.25, 0.5]);
    tract.un_log(0.0).unwrap();
    assert_eq!(tract.data(), &[0.25, 0.5]);
    assert!(!tract.in_log_units());
    tract.do_log(0.0).unwrap();
    assert_eq!(tract.data(), &[0.25, 0.5]);
    assert!(tract.in_log_units());
}

#[test]
fn join_average_is_a_weighted_barycentre() {
    let mut a = Tract::new(vec![1.0, 4.0, 0.0]);
    let mut b = Tract::new(vec![7.0, 1.0, 3.0]);
    a.un_log(0.0).unwrap();
    b.un_log(0.0).unwrap();
    let joined = Tract::join_average(&a, &b, 3, 1).unwrap();
    assert_eq!(joined.data(), &[(3.0 + 7.0) / 4.0, (12.0 + 1.0) / 4.0, 0.75]);
    assert!(!joined.in_log_units());
    assert!(!joined.thresholded());
}

#[test]
fn join_average_rejects_processed_tracts() {
    let a = Tract::new(vec![1.0]);
    let b = Tract::new(vec![2.0]);
    // still in log units
    assert!(matches!(
        Tract::join_average(&a, &b, 1, 1),
        Err(Error::TractPrecondition { .. })
    ));
    let mut thresholded = Tract::new(vec![1.0]);
    thresholded.threshold(0.0).unwrap();
    let mut natural = Tract::new(vec![2.0]);
    natural.un_log(0.0).unwrap();
    assert!(Tract::join_average(&thresholded, &natural, 1, 1).is_err());
}

#[test]
fn mutations_clear_the_cached_norm() {
    let mut tract = Tract::new(vec![3.0, 4.0]);
    tract.set_norm(5.0);
    assert!(tract.norm_ready());
    tract.scale(2.0);
    assert!(!tract.norm_ready());

    let mut tract = Tract::new(vec![3.0, 4.0]);
    tract.un_log(0.0).unwrap();
    tract.set_norm(5.0);
    let mut other = Tract::new(vec![1.0, 1.0]);
    other.un_log(0.0).unwrap();
    tract.add(&other).unwrap();
    assert!(!tract.norm_ready());
}

#[test]
fn distance_matches_the_normalised_dot_product() {
    // byte values as in the two-seed end-to-end scenario
    let a = metric_bytes(&[200, 50, 0, 0], 0.0);
    let b = metric_bytes(&[0, 50, 200, 0], 0.0);
    let expected = 1.0 - 2500.0 / 42500.0;
    assert!((a.distance(&b).unwrap() - expected).abs() < 1e-9);
}

#[test]
fn mixed_precision_agrees_with_pure_byte() {
    let bytes_a = metric_bytes(&[200, 50, 0, 0], 0.0);
    let bytes_b = metric_bytes(&[0, 50, 200, 0], 0.0);
    let mut float_a = Tract::from(&ByteTract::new(vec![200, 50, 0, 0]));
    float_a.threshold(0.0).unwrap();
    float_a.compute_norm().unwrap();
    let byte_byte = bytes_a.distance(&bytes_b).unwrap();
    let float_byte = float_a.distance_to_bytes(&bytes_b).unwrap();
    assert!((byte_byte - float_byte).abs() < 1e-6);
}

#[test]
fn zero_norm_means_distance_one() {
    let zero = metric_tract(&[0.0, 0.0, 0.0], 0.0);
    let other = metric_tract(&[0.5, 0.1, 0.0], 0.0);
    assert_eq!(zero.distance(&other).unwrap(), 1.0);
    assert_eq!(other.distance(&zero).unwrap(), 1.0);
}

#[test]
fn distance_preconditions_are_fatal() {
    let ready = metric_tract(&[0.5, 0.1], 0.0);

    let mut no_norm = Tract::new(vec![0.5, 0.1]);
    no_norm.threshold(0.0).unwrap();
    assert!(matches!(
        ready.distance(&no_norm),
        Err(Error::TractPrecondition { .. })
    ));

    let mut unthresholded = Tract::new(vec![0.5, 0.1]);
    unthresholded.set_norm(1.0);
    assert!(ready.distance(&unthresholded).is_err());

    let short = metric_tract(&[0.5], 0.0);
    assert!(matches!(
        ready.distance(&short),
        Err(Error::TractLenMismatch { left: 2, right: 1 })
    ));
}

proptest! {
    #[test]
    fn metric_is_symmetric_and_bounded(
        data_a in vec(0.0f32..1.0, 16),
        data_b in vec(0.0f32..1.0, 16),
    ) {
        let a = metric_tract(&data_a, 0.0);
        let b = metric_tract(&data_b, 0.0);
        let ab = a.distance(&b).unwrap();
        let ba = b.distance(&a).unwrap();
        prop_assert!((ab - ba).abs() < 1e-6);
        prop_assert!((0.0..=1.0).contains(&ab));
    }
}
