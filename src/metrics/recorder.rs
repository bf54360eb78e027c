//! Per-iteration metric collectors.
//!
//! [`IterationMetrics`] owns every collector for one iteration: a duration
//! histogram with running totals, the response-code tally, connection and
//! throughput counters, and data-transmission counters.
//!
//! # Design
//!
//! - **Single writer**: every mutation takes one `parking_lot::Mutex`, so
//!   updates for one iteration are serialized.
//! - **Copy-out reads**: [`IterationMetrics::snapshot`] holds the lock only
//!   long enough to copy the state into an [`IterationSnapshot`].
//! - **O(1) updates**: sum/min/max/average are maintained incrementally;
//!   percentiles are read from the histogram on demand.
//! - **Millisecond resolution** inside a fixed 1ms..1h range with 3
//!   significant figures.

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::snapshot::{
    DataTransmissionMetrics, DurationMetrics, IterationSnapshot, MetricKind, MetricSnapshot,
    ResponseCodeMetrics, ThroughputMetrics,
};

/// Lowest discernible response time (milliseconds).
const HISTOGRAM_LOWEST_MS: u64 = 1;

/// Highest trackable response time (milliseconds). Larger samples are clamped.
const HISTOGRAM_HIGHEST_MS: u64 = 3_600_000;

const HISTOGRAM_SIGFIGS: u8 = 3;

pub(crate) fn new_duration_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(HISTOGRAM_LOWEST_MS, HISTOGRAM_HIGHEST_MS, HISTOGRAM_SIGFIGS)
        .expect("constant histogram bounds are always valid")
}

struct MetricsState {
    histogram: Histogram<u64>,
    duration_count: u64,
    duration_sum: f64,
    duration_min: f64,
    duration_max: f64,
    response_codes: BTreeMap<(u16, String), u64>,
    active_connections: u64,
    total_connections: u64,
    successful_connections: u64,
    failed_connections: u64,
    bytes_sent: u64,
    bytes_received: u64,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
}

impl MetricsState {
    fn new() -> Self {
        Self {
            histogram: new_duration_histogram(),
            duration_count: 0,
            duration_sum: 0.0,
            duration_min: f64::MAX,
            duration_max: 0.0,
            response_codes: BTreeMap::new(),
            active_connections: 0,
            total_connections: 0,
            successful_connections: 0,
            failed_connections: 0,
            bytes_sent: 0,
            bytes_received: 0,
            started_at: None,
            stopped_at: None,
        }
    }

    fn elapsed(&self) -> Duration {
        match (self.started_at, self.stopped_at) {
            (Some(start), Some(stop)) => stop.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    fn duration(&self) -> DurationMetrics {
        DurationMetrics::from_parts(
            self.duration_count,
            self.duration_sum,
            self.duration_min,
            self.duration_max,
            &self.histogram,
        )
    }

    fn throughput(&self) -> ThroughputMetrics {
        let elapsed = self.elapsed();
        ThroughputMetrics {
            active_connections: self.active_connections,
            total_connections: self.total_connections,
            successful_connections: self.successful_connections,
            failed_connections: self.failed_connections,
            requests_per_second: per_second(self.total_connections, elapsed),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    fn data_transmission(&self) -> DataTransmissionMetrics {
        let elapsed = self.elapsed();
        DataTransmissionMetrics {
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            sent_per_second: per_second(self.bytes_sent, elapsed),
            received_per_second: per_second(self.bytes_received, elapsed),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

fn per_second(value: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        0.0
    } else {
        value as f64 / secs
    }
}

/// All collectors for one iteration.
///
/// Shared as `Arc<IterationMetrics>` between the registry, the HTTP client
/// recording samples, and readers taking snapshots.
///
/// # Example
///
/// ```
/// use stresslab::metrics::IterationMetrics;
/// use uuid::Uuid;
///
/// let metrics = IterationMetrics::new(Uuid::new_v4());
/// metrics.update_duration(42.0);
/// metrics.update_response_code(200, "OK");
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.duration.count, 1);
/// assert_eq!(snapshot.response_codes.total(), 1);
/// ```
pub struct IterationMetrics {
    iteration_id: Uuid,
    state: Mutex<MetricsState>,
    active_executions: AtomicU32,
}

impl std::fmt::Debug for IterationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationMetrics")
            .field("iteration_id", &self.iteration_id)
            .field("active_executions", &self.active_executions())
            .finish()
    }
}

impl IterationMetrics {
    pub fn new(iteration_id: Uuid) -> Self {
        Self {
            iteration_id,
            state: Mutex::new(MetricsState::new()),
            active_executions: AtomicU32::new(0),
        }
    }

    pub fn iteration_id(&self) -> Uuid {
        self.iteration_id
    }

    /// Records one response time in milliseconds.
    pub fn update_duration(&self, response_time_ms: f64) {
        let ms = response_time_ms.max(0.0);
        let recorded = (ms.round() as u64).min(HISTOGRAM_HIGHEST_MS);
        let mut state = self.state.lock();
        let _ = state.histogram.record(recorded);
        state.duration_count += 1;
        state.duration_sum += ms;
        state.duration_min = state.duration_min.min(ms);
        state.duration_max = state.duration_max.max(ms);
    }

    /// Counts one response, creating the `(code, reason)` bucket on first sight.
    pub fn update_response_code(&self, status_code: u16, reason: &str) {
        let mut state = self.state.lock();
        *state
            .response_codes
            .entry((status_code, reason.to_string()))
            .or_insert(0) += 1;
    }

    pub fn increase_connections(&self) {
        let mut state = self.state.lock();
        state.active_connections += 1;
        state.total_connections += 1;
    }

    /// Closes one connection; `success` is whether a response arrived.
    pub fn decrease_connections(&self, success: bool) {
        let mut state = self.state.lock();
        state.active_connections = state.active_connections.saturating_sub(1);
        if success {
            state.successful_connections += 1;
        } else {
            state.failed_connections += 1;
        }
    }

    pub fn update_data_sent(&self, bytes: u64) {
        self.state.lock().bytes_sent += bytes;
    }

    pub fn update_data_received(&self, bytes: u64) {
        self.state.lock().bytes_received += bytes;
    }

    /// Copies every collector into an immutable snapshot.
    pub fn snapshot(&self) -> IterationSnapshot {
        let state = self.state.lock();
        IterationSnapshot {
            iteration_id: self.iteration_id,
            duration: state.duration(),
            response_codes: ResponseCodeMetrics::from_tally(&state.response_codes),
            throughput: state.throughput(),
            data_transmission: state.data_transmission(),
        }
    }

    /// Copies a single collector.
    pub fn metric(&self, kind: MetricKind) -> MetricSnapshot {
        let state = self.state.lock();
        match kind {
            MetricKind::Duration => MetricSnapshot::Duration(state.duration()),
            MetricKind::ResponseCode => {
                MetricSnapshot::ResponseCode(ResponseCodeMetrics::from_tally(&state.response_codes))
            }
            MetricKind::Throughput => MetricSnapshot::Throughput(state.throughput()),
            MetricKind::DataTransmission => {
                MetricSnapshot::DataTransmission(state.data_transmission())
            }
        }
    }

    pub fn duration(&self) -> DurationMetrics {
        self.state.lock().duration()
    }

    pub fn response_codes(&self) -> ResponseCodeMetrics {
        ResponseCodeMetrics::from_tally(&self.state.lock().response_codes)
    }

    pub fn throughput(&self) -> ThroughputMetrics {
        self.state.lock().throughput()
    }

    pub fn data_transmission(&self) -> DataTransmissionMetrics {
        self.state.lock().data_transmission()
    }

    pub fn active_executions(&self) -> u32 {
        self.active_executions.load(Ordering::Acquire)
    }

    /// Marks one more execution as being monitored. Starts the throughput
    /// clock on first use.
    pub(crate) fn begin_execution(&self) {
        if self.active_executions.fetch_add(1, Ordering::AcqRel) == 0 {
            let mut state = self.state.lock();
            if state.started_at.is_none() {
                state.started_at = Some(Instant::now());
            }
            state.stopped_at = None;
        }
    }

    /// Releases one execution. Returns `true` when it was the last one, in
    /// which case the throughput clock is frozen.
    pub(crate) fn end_execution(&self) -> bool {
        let previous = self
            .active_executions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        let last = previous == 1;
        if last {
            self.state.lock().stopped_at = Some(Instant::now());
        }
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let metrics = IterationMetrics::new(Uuid::new_v4());
        let snap = metrics.snapshot();
        assert_eq!(snap.duration, DurationMetrics::default());
        assert_eq!(snap.response_codes.total(), 0);
        assert_eq!(snap.throughput.requests_per_second, 0.0);
    }

    #[test]
    fn test_running_totals() {
        let metrics = IterationMetrics::new(Uuid::new_v4());
        for ms in [10.0, 20.0, 60.0] {
            metrics.update_duration(ms);
        }
        let d = metrics.duration();
        assert_eq!(d.count, 3);
        assert_eq!(d.sum, 90.0);
        assert_eq!(d.average, 30.0);
        assert_eq!(d.min, 10.0);
        assert_eq!(d.max, 60.0);
    }

    #[test]
    fn test_percentiles_over_uniform_series() {
        let metrics = IterationMetrics::new(Uuid::new_v4());
        for ms in (10..=1000).step_by(10) {
            metrics.update_duration(ms as f64);
        }
        let d = metrics.duration();
        assert_eq!(d.count, 100);
        assert!((d.average - 505.0).abs() < 1e-9);
        // Samples are 10ms apart; a percentile may land on a neighbouring sample.
        assert!((d.p50 - 500.0).abs() <= 10.0, "p50 was {}", d.p50);
        assert!((d.p90 - 900.0).abs() <= 10.0, "p90 was {}", d.p90);
        assert!((d.p10 - 100.0).abs() <= 10.0, "p10 was {}", d.p10);
    }

    #[test]
    fn test_oversized_sample_is_clamped_not_dropped() {
        let metrics = IterationMetrics::new(Uuid::new_v4());
        metrics.update_duration(10_000_000.0);
        let d = metrics.duration();
        assert_eq!(d.count, 1);
        assert_eq!(d.max, 10_000_000.0);
        assert!(d.p50 >= 3_500_000.0);
    }

    #[test]
    fn test_response_code_buckets_by_code_and_reason() {
        let metrics = IterationMetrics::new(Uuid::new_v4());
        metrics.update_response_code(200, "OK");
        metrics.update_response_code(200, "OK");
        metrics.update_response_code(500, "Internal Server Error");
        let codes = metrics.response_codes();
        assert_eq!(codes.summaries.len(), 2);
        assert_eq!(codes.total(), 3);
    }

    #[test]
    fn test_connection_counters() {
        let metrics = IterationMetrics::new(Uuid::new_v4());
        metrics.increase_connections();
        metrics.increase_connections();
        assert_eq!(metrics.throughput().active_connections, 2);
        metrics.decrease_connections(true);
        metrics.decrease_connections(false);
        let t = metrics.throughput();
        assert_eq!(t.active_connections, 0);
        assert_eq!(t.total_connections, 2);
        assert_eq!(t.successful_connections, 1);
        assert_eq!(t.failed_connections, 1);
    }

    #[test]
    fn test_data_counters() {
        let metrics = IterationMetrics::new(Uuid::new_v4());
        metrics.update_data_sent(100);
        metrics.update_data_received(250);
        metrics.update_data_received(50);
        let d = metrics.data_transmission();
        assert_eq!(d.bytes_sent, 100);
        assert_eq!(d.bytes_received, 300);
    }

    #[test]
    fn test_execution_counting() {
        let metrics = IterationMetrics::new(Uuid::new_v4());
        metrics.begin_execution();
        metrics.begin_execution();
        assert!(!metrics.end_execution());
        assert!(metrics.end_execution());
        assert!(!metrics.end_execution(), "extra release must not underflow");
        assert_eq!(metrics.active_executions(), 0);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let metrics = std::sync::Arc::new(IterationMetrics::new(Uuid::new_v4()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        m.update_duration(5.0);
                        m.update_response_code(200, "OK");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.duration.count, 8000);
        assert_eq!(snap.response_codes.total(), 8000);
    }
}
