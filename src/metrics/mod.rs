//! HdrHistogram-based metrics aggregation.
//!
//! Provides [`IterationMetrics`] (the per-iteration collectors),
//! [`MetricsRegistry`] (the process-wide table of them), and the immutable
//! snapshot types that readers and remote nodes consume.

pub mod recorder;
pub mod registry;
pub mod snapshot;

pub use recorder::IterationMetrics;
pub use registry::MetricsRegistry;
pub use snapshot::{
    DataTransmissionMetrics, DurationMetrics, HistogramBucket, IterationSnapshot, MetricKind,
    MetricSnapshot, ResponseCodeMetrics, ResponseCodeSummary, ThroughputMetrics,
};
