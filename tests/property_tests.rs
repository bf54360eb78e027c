//! Property-based tests for the error-trend tracker and metric readouts.
//!
//! - A sustained error rate trips exactly when the grace period has elapsed
//! - A single healthy sample restarts the trend
//! - Duration readouts track the arithmetic mean and nearest-rank percentiles
//! - Merging per-node readouts matches recording everything on one node

use proptest::prelude::*;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use uuid::Uuid;

use stresslab::metrics::{DurationMetrics, IterationMetrics, ResponseCodeMetrics};
use stresslab::monitor::GracePeriodState;

/// Histogram precision is 3 significant figures, plus one for rounding.
fn within_resolution(actual: f64, expected: f64) -> bool {
    actual >= expected - 1.0 && actual <= expected * 1.001 + 1.0
}

fn record_all(values: &[u64]) -> DurationMetrics {
    let metrics = IterationMetrics::new(Uuid::new_v4());
    for v in values {
        metrics.update_duration(*v as f64);
    }
    metrics.snapshot().duration
}

/// Bounds on the nearest-rank percentile, tolerant of rank rounding.
fn rank_bounds(sorted: &[u64], quantile: f64) -> (f64, f64) {
    let n = sorted.len();
    let rank = quantile * n as f64;
    let lo = (rank.floor() as usize).saturating_sub(1).min(n - 1);
    let hi = (rank.ceil() as usize).min(n - 1);
    (sorted[lo] as f64, sorted[hi] as f64)
}

proptest! {
    /// Feeding a breaching sample every `step_ms` trips exactly once the
    /// time since the first breach reaches the grace period.
    #[test]
    fn prop_sustained_breach_trips_at_grace(
        grace_ms in 1u64..=5000,
        step_ms in 1u64..=500,
        samples in 1usize..=60,
        total in 1u64..=1000,
        threshold in 0.01f64..=1.0,
    ) {
        let grace = Duration::from_millis(grace_ms);
        let t0 = Instant::now();
        let mut state = GracePeriodState::new();

        for i in 0..samples {
            let offset = Duration::from_millis(step_ms * i as u64);
            let tripped = state.update_and_check_at(t0 + offset, total, total, threshold, grace);
            prop_assert_eq!(tripped, offset >= grace, "sample {} at {:?}", i, offset);
            prop_assert_eq!(state.error_trend_start(), Some(t0));
        }
    }

    /// One sample under the threshold clears the trend, so the next breach
    /// starts a fresh grace period instead of tripping.
    #[test]
    fn prop_healthy_sample_restarts_trend(
        grace_ms in 1u64..=2000,
        breaches_before in 1usize..=20,
        total in 1u64..=1000,
        threshold in 0.01f64..=1.0,
    ) {
        let grace = Duration::from_millis(grace_ms);
        let t0 = Instant::now();
        let mut state = GracePeriodState::new();

        for i in 0..breaches_before {
            let at = t0 + Duration::from_millis(grace_ms * i as u64);
            state.update_and_check_at(at, total, total, threshold, grace);
        }

        let dip_at = t0 + Duration::from_millis(grace_ms * breaches_before as u64);
        prop_assert!(!state.update_and_check_at(dip_at, total, 0, threshold, grace));
        prop_assert_eq!(state.error_trend_start(), None);

        let resumed_at = dip_at + grace;
        prop_assert!(!state.update_and_check_at(resumed_at, total, total, threshold, grace));
        prop_assert_eq!(state.error_trend_start(), Some(resumed_at));
        prop_assert!(state.update_and_check_at(resumed_at + grace, total, total, threshold, grace));
    }

    /// With no responses there is no error rate, whatever the error count.
    #[test]
    fn prop_empty_window_never_trips(
        errors in 0u64..=100,
        threshold in 0.0f64..=1.0,
        elapsed_ms in 0u64..=10_000,
    ) {
        let t0 = Instant::now();
        let mut state = GracePeriodState::new();
        state.update_and_check_at(t0, 10, 10, threshold, Duration::ZERO);
        let tripped = state.update_and_check_at(
            t0 + Duration::from_millis(elapsed_ms),
            0,
            errors,
            threshold,
            Duration::ZERO,
        );
        prop_assert!(!tripped);
        prop_assert_eq!(state.error_trend_start(), None);
    }

    /// Running totals are exact; percentiles land on the nearest-rank sample
    /// within histogram resolution.
    #[test]
    fn prop_duration_readout_matches_samples(
        values in proptest::collection::vec(1u64..=100_000, 1..=300),
    ) {
        let d = record_all(&values);
        let mut sorted = values.clone();
        sorted.sort_unstable();
        let mean = values.iter().sum::<u64>() as f64 / values.len() as f64;

        prop_assert_eq!(d.count, values.len() as u64);
        prop_assert!((d.average - mean).abs() < 1e-6, "average {} vs {}", d.average, mean);
        prop_assert_eq!(d.min, sorted[0] as f64);
        prop_assert_eq!(d.max, sorted[sorted.len() - 1] as f64);

        for (quantile, actual) in [(0.5, d.p50), (0.9, d.p90)] {
            let (lo, hi) = rank_bounds(&sorted, quantile);
            prop_assert!(
                actual >= lo - 1.0 && actual <= hi * 1.001 + 1.0,
                "q{} = {} outside [{}, {}]",
                quantile,
                actual,
                lo,
                hi
            );
        }
    }

    /// Splitting samples across nodes and merging the readouts gives the
    /// same answer as recording them all in one place.
    #[test]
    fn prop_merge_matches_single_node(
        values in proptest::collection::vec(1u64..=50_000, 2..=200),
        split in any::<prop::sample::Index>(),
    ) {
        let at = split.index(values.len());
        let (left, right) = values.split_at(at);
        let merged = DurationMetrics::merge([&record_all(left), &record_all(right)]);
        let whole = record_all(&values);

        prop_assert_eq!(merged.count, whole.count);
        prop_assert_eq!(merged.sum, whole.sum);
        prop_assert_eq!(merged.min, whole.min);
        prop_assert_eq!(merged.max, whole.max);
        prop_assert_eq!(merged.p50, whole.p50);
        prop_assert_eq!(merged.p90, whole.p90);
        prop_assert_eq!(merged.p10, whole.p10);
    }

    /// Response-code merging preserves every count.
    #[test]
    fn prop_response_code_merge_is_additive(
        nodes in proptest::collection::vec(
            proptest::collection::vec((prop::sample::select(vec![200u16, 201, 404, 500, 503]), 1u32..=20), 0..=8),
            1..=5,
        ),
    ) {
        let errors: BTreeSet<u16> = [500, 503].into_iter().collect();
        let parts: Vec<ResponseCodeMetrics> = nodes
            .iter()
            .map(|responses| {
                let metrics = IterationMetrics::new(Uuid::new_v4());
                for (code, n) in responses {
                    for _ in 0..*n {
                        metrics.update_response_code(*code, "");
                    }
                }
                metrics.snapshot().response_codes
            })
            .collect();

        let merged = ResponseCodeMetrics::merge(&parts);
        prop_assert_eq!(merged.total(), parts.iter().map(ResponseCodeMetrics::total).sum::<u64>());
        prop_assert_eq!(
            merged.count_matching(&errors),
            parts.iter().map(|p| p.count_matching(&errors)).sum::<u64>()
        );
        let codes: Vec<u16> = merged.summaries.iter().map(|s| s.status_code).collect();
        let mut deduped = codes.clone();
        deduped.dedup();
        prop_assert_eq!(codes, deduped);
    }
}

#[test]
fn test_linear_samples_percentiles() {
    let values: Vec<u64> = (1..=100).map(|i| i * 10).collect();
    let d = record_all(&values);
    assert!((d.average - 505.0).abs() < 1e-9);
    assert!(within_resolution(d.p50, 500.0), "p50 was {}", d.p50);
    assert!(within_resolution(d.p90, 900.0), "p90 was {}", d.p90);
}
