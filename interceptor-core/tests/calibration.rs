use core::time::Duration;

use interceptor_core::calibration::{
    Annotation, CalibrationError, CalibrationPhase, CalibrationPolicy, CalibrationSession,
    RangePolicy, SampleInstant, Sensitivity, Stats, ThresholdBasis, ThresholdPolicy,
    TransitionError, WindowStatus, percentile, recommend_calibration_ranges, recommend_threshold,
    summarize_in_place,
};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
struct MockInstant(u64);

impl MockInstant {
    fn millis(value: u64) -> Self {
        Self(value)
    }
}

impl SampleInstant for MockInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

fn stats_of(samples: &[u64]) -> Stats {
    let mut samples = samples.to_vec();
    summarize_in_place(&mut samples).expect("non-empty sample set")
}

/// `1..=100` has p99 == 100.
fn normal_stats() -> Stats {
    stats_of(&(1..=100).collect::<Vec<_>>())
}

#[test]
fn percentiles_use_truncated_rank() {
    let sorted = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
    assert_eq!(percentile(&sorted, 0.95), Some(10));

    let stats = stats_of(&sorted);
    assert_eq!(stats.p95, 10);
    assert_eq!(stats.p2_5, 1, "small percentiles land on index 0 for small sets");
    assert_eq!(stats.p97_5, 10);
    assert_eq!(stats.median, 6);
}

#[test]
fn single_sample_fills_every_statistic() {
    let stats = stats_of(&[42]);
    assert_eq!(
        [stats.min, stats.max, stats.median, stats.p2_5, stats.p99],
        [42; 5]
    );
    assert!(stats.std_dev.abs() < f64::EPSILON);
}

#[test]
fn separated_distributions_give_safe_midpoint() {
    let normal = normal_stats();
    assert_eq!(normal.p99, 100);
    let intervention = stats_of(&[300, 420, 390, 510]);

    let recommendation = recommend_threshold(&normal, Some(&intervention));
    assert_eq!(recommendation.threshold, 200);
    assert_eq!(
        recommendation.basis,
        ThresholdBasis::Midpoint {
            margin_below: 100,
            margin_above: 100
        }
    );
    assert!(!recommendation.is_unsafe());
    assert_eq!(recommendation.intervention_min, Some(300));
}

#[test]
fn overlapping_distributions_are_flagged_unsafe() {
    let recommendation = ThresholdPolicy::DEFAULT.recommend(250, Some(200));
    assert_eq!(recommendation.threshold, 225);
    assert_eq!(
        recommendation.basis,
        ThresholdBasis::Midpoint {
            margin_below: -25,
            margin_above: -25
        }
    );
    assert!(recommendation.is_unsafe());
    assert_eq!(
        recommendation.annotations(),
        &[Annotation::OverlappingDistributions]
    );
}

#[test]
fn missing_intervention_data_falls_back_to_conservative_estimate() {
    let recommendation = ThresholdPolicy::DEFAULT.recommend(200, None);
    assert_eq!(recommendation.threshold, 300);
    assert_eq!(recommendation.basis, ThresholdBasis::ConservativeEstimate);
    assert_eq!(
        recommendation.annotations(),
        &[Annotation::ConservativeEstimate]
    );
    assert_eq!(recommendation.sensitivity(), Sensitivity::MoreSensitive);
}

#[test]
fn calibration_range_applies_floor_and_margin() {
    let quiet = stats_of(&[1598, 1600, 1600, 1602]);
    let range = recommend_calibration_ranges(&quiet);
    assert_eq!(range.center, 1600);
    assert_eq!(range.tolerance, 100, "tolerance never drops below 100");

    // Population std dev of [1000, 2000] is 500: 3 * 500 + 50.
    let noisy = stats_of(&[1000, 2000]);
    let range = recommend_calibration_ranges(&noisy);
    assert_eq!(range.center, 2000);
    assert_eq!(range.tolerance, 1550);
    assert_eq!(range.valid_range(), (450, 3550));
}

#[test]
fn range_policy_constants_are_configurable() {
    let policy = RangePolicy {
        std_dev_multiplier: 2,
        fixed_margin: 0,
        minimum_tolerance: 10,
    };
    let range = policy.recommend(&stats_of(&[1000, 2000]));
    assert_eq!(range.tolerance, 1000);
}

fn collect(
    session: &mut CalibrationSession<MockInstant, 256>,
    start: u64,
    samples: &[u64],
) {
    for (offset, sample) in samples.iter().enumerate() {
        let now = MockInstant::millis(start + offset as u64);
        assert_eq!(session.record(now, *sample), Ok(WindowStatus::Open));
    }
}

#[test]
fn session_with_intervention_reaches_recommended() {
    let mut session =
        CalibrationSession::<MockInstant, 256>::new(CalibrationPolicy::DEFAULT, Duration::from_secs(1));

    session
        .start_normal(MockInstant::millis(0))
        .expect("idle session starts");
    collect(&mut session, 0, &(1..=100).collect::<Vec<_>>());
    assert_eq!(
        session.record(MockInstant::millis(1_000), 7),
        Ok(WindowStatus::Elapsed)
    );
    let normal = *session.finish_normal().expect("normal window analyzed");
    assert_eq!(normal.p99, 100);
    assert_eq!(session.phase(), CalibrationPhase::AnalyzedNormal);

    session
        .start_intervention(MockInstant::millis(2_000))
        .expect("intervention after normal");
    collect(&mut session, 2_000, &[300, 350, 400]);
    session
        .finish_intervention()
        .expect("intervention window analyzed");

    let recommendation = session.recommend().expect("analyzed").clone();
    assert_eq!(recommendation.threshold, 200);
    assert_eq!(session.phase(), CalibrationPhase::Recommended);
    assert_eq!(session.recommendation(), Some(&recommendation));

    assert_eq!(
        session.start_normal(MockInstant::millis(5_000)),
        Err(CalibrationError::Transition(TransitionError::new(
            CalibrationPhase::Recommended,
            CalibrationPhase::CollectingNormal
        )))
    );
    session.reset();
    assert_eq!(session.phase(), CalibrationPhase::Idle);
}

#[test]
fn skipping_intervention_uses_conservative_branch() {
    let mut session =
        CalibrationSession::<MockInstant, 256>::new(CalibrationPolicy::DEFAULT, Duration::from_secs(1));
    session.start_normal(MockInstant::millis(0)).expect("idle");
    collect(&mut session, 0, &[200; 10]);
    session.finish_normal().expect("analyzed");

    let recommendation = session.skip_intervention().expect("skip allowed");
    assert_eq!(recommendation.threshold, 300);
    assert_eq!(recommendation.basis, ThresholdBasis::ConservativeEstimate);
    assert_eq!(session.phase(), CalibrationPhase::Recommended);
}

#[test]
fn empty_intervention_window_can_be_skipped_afterwards() {
    let mut session =
        CalibrationSession::<MockInstant, 256>::new(CalibrationPolicy::DEFAULT, Duration::from_secs(1));
    session.start_normal(MockInstant::millis(0)).expect("idle");
    collect(&mut session, 0, &[120, 130]);
    session.finish_normal().expect("analyzed");

    session
        .start_intervention(MockInstant::millis(10))
        .expect("intervention");
    assert_eq!(
        session.finish_intervention().map(|stats| stats.count),
        Err(CalibrationError::InsufficientSamples {
            required: 1,
            collected: 0
        })
    );
    assert_eq!(session.phase(), CalibrationPhase::AnalyzedNormal);
    assert!(session.skip_intervention().is_ok());
}

#[test]
fn minimum_sample_policy_is_enforced() {
    let policy = CalibrationPolicy {
        minimum_samples: 5,
        ..CalibrationPolicy::DEFAULT
    };
    let mut session = CalibrationSession::<MockInstant, 256>::new(policy, Duration::from_secs(1));
    session.start_normal(MockInstant::millis(0)).expect("idle");
    collect(&mut session, 0, &[1, 2, 3]);
    assert_eq!(
        session.finish_normal().map(|stats| stats.count),
        Err(CalibrationError::InsufficientSamples {
            required: 5,
            collected: 3
        })
    );
    assert_eq!(session.phase(), CalibrationPhase::Idle);
}

#[test]
fn full_buffer_reports_overflow() {
    let mut session =
        CalibrationSession::<MockInstant, 2>::new(CalibrationPolicy::DEFAULT, Duration::from_secs(1));
    session.start_normal(MockInstant::millis(0)).expect("idle");
    assert!(session.record(MockInstant::millis(1), 1).is_ok());
    assert!(session.record(MockInstant::millis(2), 2).is_ok());
    assert_eq!(
        session.record(MockInstant::millis(3), 3),
        Err(CalibrationError::SampleOverflow { capacity: 2 })
    );
}

#[cfg(feature = "alloc")]
#[test]
fn summarize_leaves_input_untouched() {
    let samples = [5, 1, 4];
    let stats = interceptor_core::calibration::summarize(&samples).expect("non-empty");
    assert_eq!(stats.median, 4);
    assert_eq!(samples, [5, 1, 4]);
}
