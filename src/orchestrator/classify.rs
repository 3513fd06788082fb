//! Post-mortem classification of role output into verdicts.
//!
//! Each role is classified by an ordered list of checks, first match wins:
//!
//! 1. a fatal error was logged
//! 2. startup never completed (login failure distinguished)
//! 3. an ensure fired while ensures are treated as fatal
//! 4. the orchestrator stopped the process (timeout or requested stop)
//! 5. an explicit test exit code was logged
//! 6. the process requested its own exit
//! 7. a test-controller role never logged an exit code
//! 8. nothing conclusive
//!
//! The test verdict is derived from the role results and the cancellation
//! flag alone.

use tracing::info;

use crate::config::EventVerbosity;
use crate::log_summary::{LogSummarizer, LogSummary};
use crate::models::artifacts::RoleArtifacts;
use crate::models::result::{
    EventSeverity, RoleResult, RoleResultKind, StopReason, TestEvent, TestResult,
};

/// Log category every test controller writes to.
pub const GAUNTLET_CATEGORY: &str = "Gauntlet";

/// Inputs to role classification that come from the test, not the role.
#[derive(Debug, Clone)]
pub struct ClassifyOptions {
    /// Treat any ensure as a failure.
    pub treat_ensures_as_fatal: bool,
    /// Which monitored entries are promoted.
    pub event_verbosity: EventVerbosity,
    /// Monitored log categories.
    pub monitored_categories: Vec<String>,
    /// Why the pass ended.
    pub stop_reason: StopReason,
}

/// Classify one role from its saved artifacts.
#[must_use]
pub fn classify_role(
    artifacts: RoleArtifacts,
    summarizer: &dyn LogSummarizer,
    options: &ClassifyOptions,
) -> RoleResult {
    let summary = summarizer.summarize(&artifacts.log_text);

    let (kind, reason) = if artifacts.role.is_dummy() {
        (RoleResultKind::ExitOk, "dummy role, not evaluated".to_owned())
    } else if artifacts.role.install_only {
        (RoleResultKind::ExitOk, "install-only role".to_owned())
    } else {
        determine_kind(&artifacts, &summary, options)
    };

    let mut categories = options.monitored_categories.clone();
    categories.extend(artifacts.role.log_categories.iter().cloned());
    let events = promote_events(&summary, options.event_verbosity, &categories);

    info!(
        role = artifacts.role_name,
        device = artifacts.device_name,
        kind = %kind,
        exit_code = ?artifacts.exit_code,
        reason,
        "role classified"
    );

    RoleResult {
        kind,
        exit_code: artifacts.exit_code,
        reason,
        summary,
        artifacts,
        events,
    }
}

fn determine_kind(
    artifacts: &RoleArtifacts,
    summary: &LogSummary,
    options: &ClassifyOptions,
) -> (RoleResultKind, String) {
    if let Some(fatal) = &summary.fatal_error {
        return (
            RoleResultKind::EncounteredFatalError,
            format!("fatal error: {}", fatal.message),
        );
    }

    if !summary.engine_initialized {
        if summary.login_failed {
            return (
                RoleResultKind::LoginFailed,
                "login failed before startup completed".into(),
            );
        }
        return (
            RoleResultKind::InitializationFailure,
            "process never completed startup".into(),
        );
    }

    if options.treat_ensures_as_fatal && !summary.ensures.is_empty() {
        return (
            RoleResultKind::EncounteredEnsure,
            format!("{} ensure(s) encountered", summary.ensures.len()),
        );
    }

    if artifacts.stopped_by_orchestrator {
        if options.stop_reason.is_timeout() {
            return (
                RoleResultKind::TimeOut,
                format!("stopped by orchestrator: {}", options.stop_reason),
            );
        }
        return (
            RoleResultKind::ExitOk,
            format!("stopped by orchestrator: {}", options.stop_reason),
        );
    }

    if let Some(code) = summary.test_exit_code {
        if code == 0 {
            return (RoleResultKind::ExitOk, "test reported exit code 0".into());
        }
        return (
            RoleResultKind::TestFailure,
            format!("test reported exit code {code}"),
        );
    }

    if summary.requested_exit {
        return (RoleResultKind::ExitOk, "process requested exit".into());
    }

    if artifacts.role.uses_test_controller() {
        return (
            RoleResultKind::TestFailure,
            "test controller exited without reporting an exit code".into(),
        );
    }

    (
        RoleResultKind::Unknown,
        match artifacts.exit_code {
            Some(code) => format!("process exited with code {code} without a verdict"),
            None => "process ended without a verdict".into(),
        },
    )
}

/// Events from `summary` surfaced in the report.
///
/// Fatal errors and ensures are always promoted; monitored-category
/// warnings and errors only with [`EventVerbosity::AllWarningsAndErrors`].
#[must_use]
pub fn promote_events(
    summary: &LogSummary,
    verbosity: EventVerbosity,
    monitored_categories: &[String],
) -> Vec<TestEvent> {
    let mut events = Vec::new();

    if let Some(fatal) = &summary.fatal_error {
        events.push(TestEvent::FatalError {
            message: fatal.message.clone(),
            callstack: fatal.callstack.clone(),
        });
    }
    events.extend(summary.ensures.iter().map(|ensure| TestEvent::Ensure {
        message: ensure.message.clone(),
        callstack: ensure.callstack.clone(),
    }));

    if verbosity == EventVerbosity::AllWarningsAndErrors {
        events.extend(
            summary
                .entries_in(monitored_categories)
                .filter(|entry| entry.severity.is_warning_or_worse())
                .map(|entry| TestEvent::LogEntry {
                    category: entry.category.clone(),
                    severity: entry.severity,
                    message: entry.message.clone(),
                }),
        );
    }

    events
}

/// Whether any evaluated role promoted an error-severity event.
#[must_use]
pub fn has_promoted_errors(results: &[RoleResult]) -> bool {
    results
        .iter()
        .filter(|r| r.is_evaluated())
        .flat_map(|r| r.events.iter())
        .any(|event| event.severity() == EventSeverity::Error)
}

/// Test verdict from role results and the cancellation flag.
#[must_use]
pub fn aggregate(results: &[RoleResult], cancelled: bool, fail_on_promoted_errors: bool) -> TestResult {
    if cancelled {
        return TestResult::Failed;
    }

    let mut timed_out = false;
    let mut failed = false;
    for result in results.iter().filter(|r| r.is_evaluated()) {
        match result.kind {
            RoleResultKind::ExitOk => {}
            RoleResultKind::TimeOut => timed_out = true,
            _ => failed = true,
        }
    }

    if failed {
        TestResult::Failed
    } else if timed_out {
        TestResult::TimedOut
    } else if fail_on_promoted_errors && has_promoted_errors(results) {
        TestResult::Failed
    } else {
        TestResult::Passed
    }
}

/// Order results best first, worst last, so problem roles end the summary.
pub fn sort_results(results: &mut [RoleResult]) {
    results.sort_by_key(|r| r.kind.severity_rank());
}
