//! Pooled HTTP client handles.
//!
//! [`ClientManager`] owns the queue of reusable [`HttpClient`]s that round
//! executors check out per client wave. [`HttpClient::send`] performs one
//! request and records it into an iteration's metrics.

pub mod http;
pub mod pool;

pub use http::{HttpClient, RequestOutcome, ResolvedRequest};
pub use pool::{ClientConfiguration, ClientFactory, ClientManager};
