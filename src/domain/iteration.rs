//! HTTP iterations: the unit of work every scheduler and monitor keys on.
//!
//! [`IterationSetup`] is the serde-facing setup command read from the plan
//! file. [`HttpIteration::from_setup`] never fails: a setup that does not
//! validate produces an iteration marked invalid, which executors skip.
//!
//! # Example TOML
//!
//! ```toml
//! [[plan.round.iteration]]
//! name = "checkout"
//! startup_delay_ms = 500
//! mode = { type = "request_count_batched", count = 100, batch_size = 10, cool_down_ms = 250 }
//! request = { method = "POST", url = "${base_url}/checkout", body = '{"cart":"${uuid}"}' }
//! failure_criteria = { max_error_rate = 0.1, error_status_codes = [500, 503], max_p90 = 800.0 }
//!
//! [[plan.round.iteration.termination_rule]]
//! max_error_rate = 0.5
//! grace_period_ms = 10000
//! error_status_codes = [500, 502, 503]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use uuid::Uuid;

/// How long and how hard an iteration drives its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IterationMode {
    /// Send `count` requests.
    RequestCount { count: u64 },
    /// Keep sending until `duration_ms` elapses.
    Duration { duration_ms: u64 },
    /// Send batches of `batch_size`, pausing `cool_down_ms` between them,
    /// until `duration_ms` elapses.
    DurationBatched {
        duration_ms: u64,
        batch_size: u32,
        cool_down_ms: u64,
    },
    /// Send `count` requests in batches of `batch_size` with a cool-down.
    RequestCountBatched {
        count: u64,
        batch_size: u32,
        cool_down_ms: u64,
    },
    /// Send batches until cancelled or terminated.
    Batched { batch_size: u32, cool_down_ms: u64 },
}

impl IterationMode {
    /// Maximum number of requests, if the mode is count-bound.
    pub fn request_limit(&self) -> Option<u64> {
        match self {
            Self::RequestCount { count } | Self::RequestCountBatched { count, .. } => Some(*count),
            _ => None,
        }
    }

    /// Time limit, if the mode is duration-bound.
    pub fn time_limit(&self) -> Option<Duration> {
        match self {
            Self::Duration { duration_ms } | Self::DurationBatched { duration_ms, .. } => {
                Some(Duration::from_millis(*duration_ms))
            }
            _ => None,
        }
    }

    /// Requests per batch; unbatched modes send one request at a time.
    pub fn batch_size(&self) -> u32 {
        match self {
            Self::DurationBatched { batch_size, .. }
            | Self::RequestCountBatched { batch_size, .. }
            | Self::Batched { batch_size, .. } => *batch_size,
            Self::RequestCount { .. } | Self::Duration { .. } => 1,
        }
    }

    /// Pause between batches.
    pub fn cool_down(&self) -> Duration {
        match self {
            Self::DurationBatched { cool_down_ms, .. }
            | Self::RequestCountBatched { cool_down_ms, .. }
            | Self::Batched { cool_down_ms, .. } => Duration::from_millis(*cool_down_ms),
            Self::RequestCount { .. } | Self::Duration { .. } => Duration::ZERO,
        }
    }

    fn validate(&self, errors: &mut Vec<String>) {
        match self {
            Self::RequestCount { count } => {
                if *count == 0 {
                    errors.push("request count must be greater than 0".to_string());
                }
            }
            Self::Duration { duration_ms } => {
                if *duration_ms == 0 {
                    errors.push("duration must be greater than 0".to_string());
                }
            }
            Self::DurationBatched {
                duration_ms,
                batch_size,
                ..
            } => {
                if *duration_ms == 0 {
                    errors.push("duration must be greater than 0".to_string());
                }
                if *batch_size == 0 {
                    errors.push("batch size must be greater than 0".to_string());
                }
            }
            Self::RequestCountBatched {
                count, batch_size, ..
            } => {
                if *count == 0 {
                    errors.push("request count must be greater than 0".to_string());
                }
                if *batch_size == 0 {
                    errors.push("batch size must be greater than 0".to_string());
                } else if u64::from(*batch_size) > *count {
                    errors.push(format!(
                        "batch size {batch_size} exceeds request count {count}"
                    ));
                }
            }
            Self::Batched { batch_size, .. } => {
                if *batch_size == 0 {
                    errors.push("batch size must be greater than 0".to_string());
                }
            }
        }
    }
}

/// The request an iteration sends. Strings may contain `${name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequestSpec {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl HttpRequestSpec {
    fn validate(&self, errors: &mut Vec<String>) {
        if reqwest::Method::from_bytes(self.method.as_bytes()).is_err() {
            errors.push(format!("invalid HTTP method '{}'", self.method));
        }
        // Placeholders make the URL unparsable until resolution time.
        if self.url.contains("${") {
            return;
        }
        match url::Url::parse(&self.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(format!("unsupported URL scheme '{}'", url.scheme())),
            Err(e) => errors.push(format!("invalid URL '{}': {e}", self.url)),
        }
    }
}

/// Thresholds that mark a finished iteration as failed.
///
/// Latency ceilings are in milliseconds. Any configured sub-criterion
/// failing is enough.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureCriteria {
    #[serde(default)]
    pub max_error_rate: Option<f64>,
    #[serde(default)]
    pub error_status_codes: BTreeSet<u16>,
    #[serde(default)]
    pub max_p90: Option<f64>,
    #[serde(default)]
    pub max_p50: Option<f64>,
    #[serde(default)]
    pub max_p10: Option<f64>,
    #[serde(default)]
    pub max_avg: Option<f64>,
}

impl FailureCriteria {
    /// Rate criteria need both a positive ceiling and a set of error codes.
    pub fn has_rate_criteria(&self) -> bool {
        self.max_error_rate.is_some_and(|rate| rate > 0.0) && !self.error_status_codes.is_empty()
    }

    pub fn has_duration_criteria(&self) -> bool {
        self.max_p90.is_some()
            || self.max_p50.is_some()
            || self.max_p10.is_some()
            || self.max_avg.is_some()
    }

    fn validate(&self, errors: &mut Vec<String>) {
        if let Some(rate) = self.max_error_rate {
            if !(0.0..=1.0).contains(&rate) {
                errors.push(format!("failure max_error_rate {rate} must be within 0..=1"));
            }
        }
        for (label, value) in [
            ("max_p90", self.max_p90),
            ("max_p50", self.max_p50),
            ("max_p10", self.max_p10),
            ("max_avg", self.max_avg),
        ] {
            if value.is_some_and(|v| v <= 0.0) {
                errors.push(format!("failure {label} must be greater than 0"));
            }
        }
    }
}

/// Terminates an iteration early once its error rate stays at or above
/// `max_error_rate` for a full grace period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminationRule {
    #[serde(default)]
    pub max_error_rate: Option<f64>,
    #[serde(default)]
    pub grace_period_ms: Option<u64>,
    #[serde(default)]
    pub error_status_codes: BTreeSet<u16>,
}

impl TerminationRule {
    pub fn grace_period(&self) -> Option<Duration> {
        self.grace_period_ms.map(Duration::from_millis)
    }

    /// A rule only participates when both the rate and the grace period are set.
    pub fn is_active(&self) -> bool {
        self.max_error_rate.is_some() && self.grace_period_ms.is_some()
    }

    fn validate(&self, index: usize, errors: &mut Vec<String>) {
        if let Some(rate) = self.max_error_rate {
            if !(rate > 0.0 && rate <= 1.0) {
                errors.push(format!(
                    "termination rule {} max_error_rate {rate} must be within (0, 1]",
                    index + 1
                ));
            }
        }
        if self.grace_period_ms == Some(0) {
            errors.push(format!(
                "termination rule {} grace_period_ms must be greater than 0",
                index + 1
            ));
        }
    }
}

/// Setup command for an [`HttpIteration`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationSetup {
    pub name: String,
    #[serde(default)]
    pub startup_delay_ms: u64,
    pub mode: IterationMode,
    #[serde(default)]
    pub maximize_throughput: bool,
    pub request: HttpRequestSpec,
    #[serde(default)]
    pub failure_criteria: FailureCriteria,
    #[serde(default, rename = "termination_rule")]
    pub termination_rules: Vec<TerminationRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpIteration {
    id: Uuid,
    name: String,
    startup_delay: Duration,
    mode: IterationMode,
    maximize_throughput: bool,
    request: HttpRequestSpec,
    failure_criteria: FailureCriteria,
    termination_rules: Vec<TerminationRule>,
    validation_errors: Vec<String>,
}

impl HttpIteration {
    /// Builds an iteration from its setup command, recording any validation
    /// errors instead of failing.
    pub fn from_setup(setup: IterationSetup) -> Self {
        let mut errors = Vec::new();
        if setup.name.trim().is_empty() {
            errors.push("iteration name must not be empty".to_string());
        }
        setup.mode.validate(&mut errors);
        setup.request.validate(&mut errors);
        setup.failure_criteria.validate(&mut errors);
        for (i, rule) in setup.termination_rules.iter().enumerate() {
            rule.validate(i, &mut errors);
        }

        Self {
            id: Uuid::new_v4(),
            name: setup.name,
            startup_delay: Duration::from_millis(setup.startup_delay_ms),
            mode: setup.mode,
            maximize_throughput: setup.maximize_throughput,
            request: setup.request,
            failure_criteria: setup.failure_criteria,
            termination_rules: setup.termination_rules,
            validation_errors: errors,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn startup_delay(&self) -> Duration {
        self.startup_delay
    }

    pub fn mode(&self) -> &IterationMode {
        &self.mode
    }

    pub fn maximize_throughput(&self) -> bool {
        self.maximize_throughput
    }

    pub fn request(&self) -> &HttpRequestSpec {
        &self.request
    }

    pub fn failure_criteria(&self) -> &FailureCriteria {
        &self.failure_criteria
    }

    pub fn termination_rules(&self) -> &[TerminationRule] {
        &self.termination_rules
    }

    pub fn is_valid(&self) -> bool {
        self.validation_errors.is_empty()
    }

    pub fn validation_errors(&self) -> &[String] {
        &self.validation_errors
    }
}
