//! Per-role and per-test verdicts.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use super::artifacts::RoleArtifacts;
use crate::log_summary::{LogSeverity, LogSummary};

/// Coarse post-mortem classification of one role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoleResultKind {
    /// The role finished without evidence of failure.
    ExitOk,
    /// The process never completed startup.
    InitializationFailure,
    /// The process failed to log in during startup.
    LoginFailed,
    /// A fatal error was logged.
    EncounteredFatalError,
    /// An ensure fired and the test treats ensures as fatal.
    EncounteredEnsure,
    /// The test reported failure or broke its controller protocol.
    TestFailure,
    /// The orchestrator stopped the role because the test timed out.
    TimeOut,
    /// No diagnosable evidence either way.
    Unknown,
}

impl RoleResultKind {
    /// Ordering weight for summaries; higher is worse.
    #[must_use]
    pub fn severity_rank(self) -> u8 {
        match self {
            Self::ExitOk => 0,
            Self::Unknown => 1,
            Self::TimeOut => 2,
            Self::TestFailure => 3,
            Self::EncounteredEnsure => 4,
            Self::LoginFailed => 5,
            Self::InitializationFailure => 6,
            Self::EncounteredFatalError => 7,
        }
    }
}

impl Display for RoleResultKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ExitOk => "ExitOk",
            Self::InitializationFailure => "InitializationFailure",
            Self::LoginFailed => "LoginFailed",
            Self::EncounteredFatalError => "EncounteredFatalError",
            Self::EncounteredEnsure => "EncounteredEnsure",
            Self::TestFailure => "TestFailure",
            Self::TimeOut => "TimeOut",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Terminal (or pending) verdict of a test pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TestResult {
    /// No verdict yet.
    Invalid,
    /// Every evaluated role exited cleanly.
    Passed,
    /// At least one role failed or the run was cancelled.
    Failed,
    /// The test ran out of time or lost its heartbeat.
    TimedOut,
    /// The test asked to be re-run.
    WantRetry,
    /// The run was cancelled before a verdict.
    Cancelled,
}

impl Display for TestResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Invalid => "Invalid",
            Self::Passed => "Passed",
            Self::Failed => "Failed",
            Self::TimedOut => "TimedOut",
            Self::WantRetry => "WantRetry",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Severity of a promoted test event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    /// Informational.
    Info,
    /// Warning.
    Warning,
    /// Error.
    Error,
}

/// Event promoted from a role's log into the test report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestEvent {
    /// Fatal error with its callstack.
    FatalError {
        /// Error message.
        message: String,
        /// Callstack frames.
        callstack: Vec<String>,
    },
    /// Ensure with its callstack.
    Ensure {
        /// Failed condition.
        message: String,
        /// Callstack frames.
        callstack: Vec<String>,
    },
    /// Categorized log line.
    LogEntry {
        /// Log category.
        category: String,
        /// Line severity.
        severity: LogSeverity,
        /// Message text.
        message: String,
    },
}

impl TestEvent {
    /// Severity the event is reported with.
    #[must_use]
    pub fn severity(&self) -> EventSeverity {
        match self {
            Self::FatalError { .. } => EventSeverity::Error,
            Self::Ensure { .. } => EventSeverity::Warning,
            Self::LogEntry { severity, .. } => match severity {
                LogSeverity::Error | LogSeverity::Fatal => EventSeverity::Error,
                LogSeverity::Warning => EventSeverity::Warning,
                _ => EventSeverity::Info,
            },
        }
    }

    /// One-line summary for reports.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::FatalError { message, .. } => format!("Fatal error: {message}"),
            Self::Ensure { message, .. } => format!("Ensure: {message}"),
            Self::LogEntry {
                category, message, ..
            } => format!("{category}: {message}"),
        }
    }
}

/// Post-mortem verdict for one role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleResult {
    /// Classification.
    pub kind: RoleResultKind,
    /// Process exit code, if known.
    pub exit_code: Option<i32>,
    /// Human-readable reason for the classification.
    pub reason: String,
    /// Structured summary of the role's output.
    pub summary: LogSummary,
    /// Saved artifacts.
    pub artifacts: RoleArtifacts,
    /// Events promoted to the test report.
    pub events: Vec<TestEvent>,
}

impl RoleResult {
    /// Whether the role counts as a pass.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.kind == RoleResultKind::ExitOk
    }

    /// Whether the role's result takes part in the test verdict.
    #[must_use]
    pub fn is_evaluated(&self) -> bool {
        !self.artifacts.role.is_dummy()
    }
}

/// Why the orchestrator ended a test pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The roles finished on their own.
    Completed,
    /// The pass ran past its maximum duration.
    MaxDurationReached,
    /// A heartbeat threshold was breached.
    HeartbeatLost,
    /// The run was cancelled.
    Cancelled,
    /// The caller stopped the pass.
    Requested,
}

impl StopReason {
    /// Whether the pass ended because it ran out of time.
    #[must_use]
    pub fn is_timeout(self) -> bool {
        matches!(self, Self::MaxDurationReached | Self::HeartbeatLost)
    }
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Completed => "completed",
            Self::MaxDurationReached => "max duration reached",
            Self::HeartbeatLost => "heartbeat lost",
            Self::Cancelled => "cancelled",
            Self::Requested => "requested",
        };
        f.write_str(name)
    }
}
