//! Test pass reports.
//!
//! A [`TestReport`] restates the verdict of one pass with per-role
//! classification, artifact locations and promoted events. Reports are
//! handed to a [`ReportSink`]; [`JsonReportWriter`] persists them and
//! [`LogReportSink`] writes the same summary through `tracing` when
//! persisting fails.

pub mod writer;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::result::{
    EventSeverity, RoleResult, RoleResultKind, StopReason, TestEvent, TestResult,
};
use crate::models::role::{BuildConfiguration, Platform, RoleType};
use crate::Result;

pub use writer::JsonReportWriter;

/// Run-level metadata attached to every report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportMetadata {
    /// Platform of the primary role.
    pub platform: Option<Platform>,
    /// Build configuration of the primary role.
    pub configuration: Option<BuildConfiguration>,
    /// Project under test.
    pub project: Option<String>,
    /// Build target under test.
    pub build_target: Option<String>,
}

/// Outcome of one role as reported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleReport {
    /// Unique role name.
    pub role_name: String,
    /// Kind of role.
    pub role_type: RoleType,
    /// Device the role ran on.
    pub device_name: String,
    /// Classification.
    pub kind: RoleResultKind,
    /// Whether the role takes part in the verdict.
    pub evaluated: bool,
    /// Exit code, if known.
    pub exit_code: Option<i32>,
    /// Reason for the classification.
    pub reason: String,
    /// Saved working directory.
    pub artifact_dir: PathBuf,
    /// Captured output log.
    pub log_path: PathBuf,
    /// Screenshot summary, if produced.
    pub screenshot_summary: Option<PathBuf>,
    /// Promoted events.
    pub events: Vec<TestEvent>,
}

impl RoleReport {
    fn from_result(result: &RoleResult) -> Self {
        Self {
            role_name: result.artifacts.role_name.clone(),
            role_type: result.artifacts.role.role_type,
            device_name: result.artifacts.device_name.clone(),
            kind: result.kind,
            evaluated: result.is_evaluated(),
            exit_code: result.exit_code,
            reason: result.reason.clone(),
            artifact_dir: result.artifacts.artifact_dir.clone(),
            log_path: result.artifacts.log_path.clone(),
            screenshot_summary: result.artifacts.screenshot_summary.clone(),
            events: result.events.clone(),
        }
    }
}

/// Report of one finished test pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestReport {
    /// Registered test name.
    pub test_name: String,
    /// One-based pass number.
    pub pass: u32,
    /// Total passes requested.
    pub total_passes: u32,
    /// Retries used so far in this pass.
    pub retry: u32,
    /// Verdict.
    pub result: TestResult,
    /// Why the pass ended.
    pub stop_reason: StopReason,
    /// When the pass started.
    pub started_at: DateTime<Utc>,
    /// When the pass was evaluated.
    pub finished_at: DateTime<Utc>,
    /// Pass artifact directory.
    pub artifact_dir: PathBuf,
    /// Run metadata.
    pub metadata: ReportMetadata,
    /// Per-role outcomes, problem roles last.
    pub roles: Vec<RoleReport>,
}

impl TestReport {
    /// Build a report from sorted role results.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        test_name: &str,
        pass: u32,
        total_passes: u32,
        retry: u32,
        result: TestResult,
        stop_reason: StopReason,
        started_at: DateTime<Utc>,
        artifact_dir: PathBuf,
        metadata: ReportMetadata,
        results: &[RoleResult],
    ) -> Self {
        Self {
            test_name: test_name.to_owned(),
            pass,
            total_passes,
            retry,
            result,
            stop_reason,
            started_at,
            finished_at: Utc::now(),
            artifact_dir,
            metadata,
            roles: results.iter().map(RoleReport::from_result).collect(),
        }
    }

    /// Promoted events of the given severity, prefixed with their role.
    #[must_use]
    pub fn events_with_severity(&self, severity: EventSeverity) -> Vec<String> {
        self.roles
            .iter()
            .flat_map(|role| {
                role.events
                    .iter()
                    .filter(move |event| event.severity() == severity)
                    .map(move |event| format!("{}: {}", role.role_name, event.summary()))
            })
            .collect()
    }

    /// Promoted errors.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.events_with_severity(EventSeverity::Error)
    }

    /// Promoted warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.events_with_severity(EventSeverity::Warning)
    }

    /// Human-readable summary, one line per role.
    #[must_use]
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "{} pass {}/{}: {} ({})",
            self.test_name, self.pass, self.total_passes, self.result, self.stop_reason
        )];
        for role in &self.roles {
            let code = role
                .exit_code
                .map_or_else(|| "-".to_owned(), |c| c.to_string());
            let evaluated = if role.evaluated { "" } else { " [not evaluated]" };
            lines.push(format!(
                "  {} on {}: {} (exit {code}) {}{evaluated}",
                role.role_name, role.device_name, role.kind, role.reason
            ));
            for event in &role.events {
                lines.push(format!("    {}", event.summary()));
            }
        }
        lines
    }
}

/// Destination for finished test reports.
pub trait ReportSink: Send + Sync {
    /// Submit one report.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Report` if the report cannot be delivered.
    fn submit(&self, report: &TestReport) -> Result<()>;
}

/// Sink that writes the report summary through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn submit(&self, report: &TestReport) -> Result<()> {
        for line in report.summary_lines() {
            if report.result == TestResult::Passed {
                info!("{line}");
            } else {
                warn!("{line}");
            }
        }
        Ok(())
    }
}
