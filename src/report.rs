//! Run reports: the JSON file written after a plan and the terminal summary.
//!
//! A [`RunReport`] lists every iteration of the plan with its terminal
//! status and cluster-wide metrics. It is self-contained: the file alone
//! says what ran, where, and how it ended.

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::domain::EntityExecutionStatus;
use crate::metrics::IterationSnapshot;

/// Report format version. External tools key on this field.
const SCHEMA_VERSION: &str = "1.0";

/// Directory, relative to the working directory, reports are written to.
pub const REPORTS_DIR: &str = "stresslab-reports";

/// Width for dotted metric row padding.
const PAD_WIDTH: usize = 36;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationReport {
    pub iteration_id: Uuid,
    pub fully_qualified_name: String,
    pub status: EntityExecutionStatus,
    pub metrics: IterationSnapshot,
}

impl IterationReport {
    /// Responses with a 4xx or 5xx status over all responses.
    pub fn error_rate(&self) -> f64 {
        let total = self.metrics.response_codes.total();
        if total == 0 {
            return 0.0;
        }
        let errors: u64 = self
            .metrics
            .response_codes
            .summaries
            .iter()
            .filter(|s| s.status_code >= 400)
            .map(|s| s.count)
            .sum();
        errors as f64 / total as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    pub round_id: Uuid,
    pub name: String,
    pub iterations: Vec<IterationReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub schema_version: String,
    /// RFC 3339 time the report was generated.
    pub timestamp: String,
    pub plan_id: Uuid,
    pub plan: String,
    /// Node that produced the report.
    pub node_id: String,
    pub elapsed_secs: f64,
    /// Whether the run was interrupted before every round started.
    pub cancelled: bool,
    pub rounds: Vec<RoundReport>,
}

impl RunReport {
    pub fn new(
        plan_id: Uuid,
        plan: impl Into<String>,
        node_id: impl Into<String>,
        elapsed_secs: f64,
        cancelled: bool,
        rounds: Vec<RoundReport>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            plan_id,
            plan: plan.into(),
            node_id: node_id.into(),
            elapsed_secs,
            cancelled,
            rounds,
        }
    }

    pub fn iterations(&self) -> impl Iterator<Item = &IterationReport> {
        self.rounds.iter().flat_map(|r| r.iterations.iter())
    }

    /// Number of iterations per terminal status.
    pub fn status_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for it in self.iterations() {
            *counts.entry(it.status.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// `true` when every iteration ended in [`EntityExecutionStatus::Success`].
    pub fn all_succeeded(&self) -> bool {
        self.iterations()
            .all(|it| it.status == EntityExecutionStatus::Success)
    }
}

/// Generate the report filename for a plan and timestamp.
///
/// Hyphens instead of colons keep the name valid on every platform.
pub fn report_filename(plan: &str, timestamp: &chrono::DateTime<chrono::Utc>) -> String {
    let plan: String = plan
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{plan}-{}.json", timestamp.format("%Y-%m-%dT%H-%M-%S"))
}

/// Write `report` under `base_dir/stresslab-reports/`, creating the
/// directory if needed. Returns the path written.
pub fn write_report(report: &RunReport, base_dir: &Path) -> Result<PathBuf, std::io::Error> {
    let reports_dir = base_dir.join(REPORTS_DIR);
    std::fs::create_dir_all(&reports_dir)?;

    let path = reports_dir.join(report_filename(&report.plan, &chrono::Utc::now()));
    let json = serde_json::to_string_pretty(report).map_err(std::io::Error::other)?;
    std::fs::write(&path, json)?;
    Ok(path)
}

/// Render a terminal summary of `report`.
///
/// ```text
///   stresslab  plan: checkout  node: master  elapsed: 12.4s
///
///   checkout.warmup.list-orders ........: success
///     duration ..........................: avg=12.1ms  p50=11ms  p90=19ms
///     requests ..........................: 600 (0.0% errors)
///     data ..............................: sent=48.1KB  received=1.2MB
/// ```
pub fn render_summary(report: &RunReport) -> String {
    let mut lines = vec![format!(
        "  {}  plan: {}  node: {}  elapsed: {:.1}s{}",
        "stresslab".bold(),
        report.plan,
        report.node_id,
        report.elapsed_secs,
        if report.cancelled {
            format!("  {}", "(cancelled)".yellow())
        } else {
            String::new()
        }
    )];
    lines.push(String::new());

    for it in report.iterations() {
        lines.push(metric_row(
            &it.fully_qualified_name,
            &colored_status(it.status),
            2,
        ));
        let d = &it.metrics.duration;
        lines.push(metric_row(
            "duration",
            &format!(
                "avg={:.1}ms  p50={}ms  p90={}ms  max={}ms",
                d.average, d.p50, d.p90, d.max
            ),
            4,
        ));
        let total = it.metrics.response_codes.total();
        let rate = format!("{:.1}% errors", it.error_rate() * 100.0);
        let rate = if it.error_rate() > 0.05 {
            rate.red().to_string()
        } else {
            rate
        };
        lines.push(metric_row("requests", &format!("{total} ({rate})"), 4));
        let t = &it.metrics.data_transmission;
        lines.push(metric_row(
            "data",
            &format!(
                "sent={}  received={}",
                format_bytes(t.bytes_sent),
                format_bytes(t.bytes_received)
            ),
            4,
        ));
    }

    lines.push(String::new());
    let counts = report
        .status_counts()
        .iter()
        .map(|(status, n)| format!("{status}={n}"))
        .collect::<Vec<_>>()
        .join("  ");
    lines.push(metric_row("iterations", &counts, 2));
    lines.join("\n")
}

fn colored_status(status: EntityExecutionStatus) -> String {
    let s = status.to_string();
    match status {
        EntityExecutionStatus::Success => s.green().to_string(),
        EntityExecutionStatus::Failed | EntityExecutionStatus::Terminated => s.red().to_string(),
        EntityExecutionStatus::Cancelled => s.yellow().to_string(),
        EntityExecutionStatus::Scheduled | EntityExecutionStatus::Ongoing => s,
    }
}

fn metric_row(name: &str, value: &str, indent: usize) -> String {
    let label = format!("{name} ");
    let dots = PAD_WIDTH.saturating_sub(label.len() + indent).max(2);
    format!("{}{label}{}: {value}", " ".repeat(indent), ".".repeat(dots))
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}
