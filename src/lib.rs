//! Distributed HTTP load testing engine.
//!
//! A test is described as a [`Plan`](domain::Plan) of
//! [`Round`](domain::Round)s, each owning a list of
//! [`HttpIteration`](domain::HttpIteration)s. The engine schedules those
//! iterations against their targets with per-round concurrency policies,
//! records metrics per iteration, and decides a terminal status for each
//! iteration by combining cancellation, termination rules, failure criteria
//! and the status of every scheduled command across a master/worker cluster.
//!
//! # Module Organization
//!
//! - [`domain`] - Plan/Round/Iteration model, commands and status enums
//! - [`client`] - Pooled HTTP client handles
//! - [`metrics`] - HdrHistogram-backed per-iteration collectors and snapshots
//! - [`monitor`] - Command status tracking, termination and failure decisions
//! - [`execution`] - Scheduler, iteration runner, round and plan executors
//! - [`cluster`] - Node registry, entity discovery and the RPC layer
//! - [`http_api`] - Operator-facing JSON endpoints
//! - [`config`] - TOML configuration with environment overrides

pub mod client;
pub mod cluster;
pub mod config;
pub mod domain;
pub mod error;
pub mod execution;
pub mod http_api;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod report;
pub mod runtime;
pub mod template;

pub use error::{ConfigError, ExecutionError, RpcError, StressError};
