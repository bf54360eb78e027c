//! Immutable metric snapshots.
//!
//! Snapshots are plain values: they are what readers get from an
//! [`IterationMetrics`](super::IterationMetrics), what crosses the wire
//! between nodes, and what the master merges into cluster-wide views.
//! Each metric kind has its own type; [`MetricSnapshot`] is the tagged
//! union used where the kind is chosen at runtime.

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use super::recorder::new_duration_histogram;

/// One populated histogram bucket: `count` samples at `value` milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub value: u64,
    pub count: u64,
}

/// Response-time readout in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DurationMetrics {
    pub count: u64,
    pub sum: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub p90: f64,
    pub p50: f64,
    pub p10: f64,
    /// Recorded histogram buckets, carried so remote readouts can be
    /// merged exactly within histogram resolution.
    #[serde(default)]
    pub buckets: Vec<HistogramBucket>,
}

impl DurationMetrics {
    /// Builds a readout from running totals and a histogram.
    pub(crate) fn from_parts(count: u64, sum: f64, min: f64, max: f64, histogram: &Histogram<u64>) -> Self {
        if count == 0 {
            return Self::default();
        }
        let buckets = histogram
            .iter_recorded()
            .map(|v| HistogramBucket {
                value: v.value_iterated_to(),
                count: v.count_at_value(),
            })
            .collect();
        Self {
            count,
            sum,
            average: sum / count as f64,
            min,
            max,
            p90: histogram.value_at_quantile(0.90) as f64,
            p50: histogram.value_at_quantile(0.50) as f64,
            p10: histogram.value_at_quantile(0.10) as f64,
            buckets,
        }
    }

    /// Merges readouts from several nodes into one.
    pub fn merge<'a>(parts: impl IntoIterator<Item = &'a DurationMetrics>) -> Self {
        let mut histogram = new_duration_histogram();
        let mut count = 0u64;
        let mut sum = 0.0;
        let mut min = f64::MAX;
        let mut max = 0.0f64;
        for part in parts.into_iter().filter(|p| p.count > 0) {
            count += part.count;
            sum += part.sum;
            min = min.min(part.min);
            max = max.max(part.max);
            for bucket in &part.buckets {
                let _ = histogram.record_n(bucket.value, bucket.count);
            }
        }
        Self::from_parts(count, sum, min, max, &histogram)
    }
}

/// Tally for one `(status code, reason phrase)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCodeSummary {
    pub status_code: u16,
    pub reason: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCodeMetrics {
    pub summaries: Vec<ResponseCodeSummary>,
}

impl ResponseCodeMetrics {
    /// Total responses across all codes.
    pub fn total(&self) -> u64 {
        self.summaries.iter().map(|s| s.count).sum()
    }

    /// Responses whose status code is in `codes`.
    pub fn count_matching(&self, codes: &BTreeSet<u16>) -> u64 {
        self.summaries
            .iter()
            .filter(|s| codes.contains(&s.status_code))
            .map(|s| s.count)
            .sum()
    }

    pub fn merge<'a>(parts: impl IntoIterator<Item = &'a ResponseCodeMetrics>) -> Self {
        let mut tally: BTreeMap<(u16, String), u64> = BTreeMap::new();
        for part in parts {
            for s in &part.summaries {
                *tally.entry((s.status_code, s.reason.clone())).or_insert(0) += s.count;
            }
        }
        Self::from_tally(&tally)
    }

    pub(crate) fn from_tally(tally: &BTreeMap<(u16, String), u64>) -> Self {
        Self {
            summaries: tally
                .iter()
                .map(|((status_code, reason), count)| ResponseCodeSummary {
                    status_code: *status_code,
                    reason: reason.clone(),
                    count: *count,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThroughputMetrics {
    pub active_connections: u64,
    pub total_connections: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub requests_per_second: f64,
    pub elapsed_ms: u64,
}

impl ThroughputMetrics {
    pub fn merge<'a>(parts: impl IntoIterator<Item = &'a ThroughputMetrics>) -> Self {
        parts.into_iter().fold(Self::default(), |mut acc, p| {
            acc.active_connections += p.active_connections;
            acc.total_connections += p.total_connections;
            acc.successful_connections += p.successful_connections;
            acc.failed_connections += p.failed_connections;
            acc.requests_per_second += p.requests_per_second;
            acc.elapsed_ms = acc.elapsed_ms.max(p.elapsed_ms);
            acc
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataTransmissionMetrics {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub sent_per_second: f64,
    pub received_per_second: f64,
    pub elapsed_ms: u64,
}

impl DataTransmissionMetrics {
    pub fn merge<'a>(parts: impl IntoIterator<Item = &'a DataTransmissionMetrics>) -> Self {
        parts.into_iter().fold(Self::default(), |mut acc, p| {
            acc.bytes_sent += p.bytes_sent;
            acc.bytes_received += p.bytes_received;
            acc.sent_per_second += p.sent_per_second;
            acc.received_per_second += p.received_per_second;
            acc.elapsed_ms = acc.elapsed_ms.max(p.elapsed_ms);
            acc
        })
    }
}

/// Discriminator for [`MetricSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Duration,
    ResponseCode,
    Throughput,
    DataTransmission,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Duration => "duration",
            Self::ResponseCode => "response_code",
            Self::Throughput => "throughput",
            Self::DataTransmission => "data_transmission",
        };
        f.write_str(s)
    }
}

/// A single metric readout of a runtime-selected kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricSnapshot {
    Duration(DurationMetrics),
    ResponseCode(ResponseCodeMetrics),
    Throughput(ThroughputMetrics),
    DataTransmission(DataTransmissionMetrics),
}

impl MetricSnapshot {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Duration(_) => MetricKind::Duration,
            Self::ResponseCode(_) => MetricKind::ResponseCode,
            Self::Throughput(_) => MetricKind::Throughput,
            Self::DataTransmission(_) => MetricKind::DataTransmission,
        }
    }
}

/// Every metric of one iteration, captured under a single lock acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSnapshot {
    pub iteration_id: Uuid,
    pub duration: DurationMetrics,
    pub response_codes: ResponseCodeMetrics,
    pub throughput: ThroughputMetrics,
    pub data_transmission: DataTransmissionMetrics,
}

impl IterationSnapshot {
    /// Extracts one metric kind.
    pub fn metric(&self, kind: MetricKind) -> MetricSnapshot {
        match kind {
            MetricKind::Duration => MetricSnapshot::Duration(self.duration.clone()),
            MetricKind::ResponseCode => MetricSnapshot::ResponseCode(self.response_codes.clone()),
            MetricKind::Throughput => MetricSnapshot::Throughput(self.throughput.clone()),
            MetricKind::DataTransmission => {
                MetricSnapshot::DataTransmission(self.data_transmission.clone())
            }
        }
    }
}
