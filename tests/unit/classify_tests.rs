//! Unit tests for role classification and test aggregation.
//!
//! Validates:
//! - The ordered role checks, first match wins
//! - Dummy and install-only roles are never failures
//! - Event promotion honours the configured verbosity
//! - Aggregation precedence: cancelled, failed, timed out, passed

use std::path::PathBuf;

use gauntlet_orchestrator::config::EventVerbosity;
use gauntlet_orchestrator::log_summary::{LogParser, LogSeverity, LogSummarizer, LogSummary};
use gauntlet_orchestrator::models::artifacts::RoleArtifacts;
use gauntlet_orchestrator::models::result::{
    RoleResult, RoleResultKind, StopReason, TestEvent, TestResult,
};
use gauntlet_orchestrator::models::role::{
    BuildConfiguration, CommandLine, Platform, RoleModifier, RoleType, SessionRole,
};
use gauntlet_orchestrator::orchestrator::classify::{
    aggregate, classify_role, has_promoted_errors, promote_events, sort_results, ClassifyOptions,
};

const INITIALIZED: &str = "LogInit: Display: Engine is initialized";

fn client() -> SessionRole {
    SessionRole::new(
        RoleType::Client,
        Platform::new("Linux"),
        BuildConfiguration::Development,
    )
}

fn artifacts(role: SessionRole, log: &str, exit_code: Option<i32>) -> RoleArtifacts {
    RoleArtifacts {
        role,
        role_name: "Client".into(),
        device_name: "dev-1".into(),
        artifact_dir: PathBuf::from("/tmp/artifacts/Client"),
        log_path: PathBuf::from("/tmp/artifacts/ClientOutput.log"),
        screenshot_summary: None,
        exit_code,
        stopped_by_orchestrator: false,
        log_text: log.to_owned(),
    }
}

fn options() -> ClassifyOptions {
    ClassifyOptions {
        treat_ensures_as_fatal: false,
        event_verbosity: EventVerbosity::FatalAndEnsure,
        monitored_categories: Vec::new(),
        stop_reason: StopReason::Completed,
    }
}

fn classify(artifacts: RoleArtifacts, options: &ClassifyOptions) -> RoleResult {
    let parser = LogParser::new().expect("parser");
    classify_role(artifacts, &parser, options)
}

fn result_of(kind: RoleResultKind) -> RoleResult {
    RoleResult {
        kind,
        exit_code: Some(0),
        reason: String::new(),
        summary: LogSummary::default(),
        artifacts: artifacts(client(), "", Some(0)),
        events: Vec::new(),
    }
}

#[test]
fn fatal_error_wins_over_exit_code() {
    let log = format!(
        "{INITIALIZED}\nLogWindows: Error: Fatal error: boom\nGauntlet: Display: **** TEST COMPLETE. EXIT CODE: 0 ****"
    );
    let result = classify(artifacts(client(), &log, Some(0)), &options());
    assert_eq!(result.kind, RoleResultKind::EncounteredFatalError);
    assert!(result.reason.contains("boom"));
    assert_eq!(result.events.len(), 1);
}

#[test]
fn missing_startup_is_initialization_failure() {
    let result = classify(artifacts(client(), "LogInit: Display: loading", Some(1)), &options());
    assert_eq!(result.kind, RoleResultKind::InitializationFailure);

    let result = classify(
        artifacts(client(), "LogOnline: Error: Login failed", Some(1)),
        &options(),
    );
    assert_eq!(result.kind, RoleResultKind::LoginFailed);
}

#[test]
fn ensures_fail_only_when_treated_as_fatal() {
    let log = format!(
        "{INITIALIZED}\nLogOutputDevice: Warning: Ensure condition failed: Ptr\nLogCore: Display: Engine exit requested"
    );

    let lenient = classify(artifacts(client(), &log, Some(0)), &options());
    assert_eq!(lenient.kind, RoleResultKind::ExitOk);
    assert_eq!(lenient.events.len(), 1);

    let strict_options = ClassifyOptions {
        treat_ensures_as_fatal: true,
        ..options()
    };
    let strict = classify(artifacts(client(), &log, Some(0)), &strict_options);
    assert_eq!(strict.kind, RoleResultKind::EncounteredEnsure);
}

#[test]
fn orchestrator_stop_depends_on_stop_reason() {
    let mut stopped = artifacts(client(), INITIALIZED, None);
    stopped.stopped_by_orchestrator = true;

    let timed_out = classify(
        stopped.clone(),
        &ClassifyOptions {
            stop_reason: StopReason::HeartbeatLost,
            ..options()
        },
    );
    assert_eq!(timed_out.kind, RoleResultKind::TimeOut);
    assert!(timed_out.reason.contains("heartbeat lost"));

    let requested = classify(
        stopped,
        &ClassifyOptions {
            stop_reason: StopReason::Requested,
            ..options()
        },
    );
    assert_eq!(requested.kind, RoleResultKind::ExitOk);
}

#[test]
fn explicit_exit_code_decides_result() {
    let passed = classify(
        artifacts(
            client(),
            "Gauntlet: Display: **** TEST COMPLETE. EXIT CODE: 0 ****",
            Some(0),
        ),
        &options(),
    );
    assert_eq!(passed.kind, RoleResultKind::ExitOk);

    let failed = classify(
        artifacts(
            client(),
            "Gauntlet: Display: **** TEST COMPLETE. EXIT CODE: 2 ****",
            Some(0),
        ),
        &options(),
    );
    assert_eq!(failed.kind, RoleResultKind::TestFailure);
    assert!(failed.reason.contains("exit code 2"));
}

#[test]
fn controller_without_exit_code_is_test_failure() {
    let mut line = CommandLine::new();
    line.set_value("gauntlet", "BootTest");
    let role = client().with_command_line(line);

    let result = classify(artifacts(role, INITIALIZED, Some(0)), &options());
    assert_eq!(result.kind, RoleResultKind::TestFailure);
}

#[test]
fn inconclusive_output_is_unknown() {
    let result = classify(artifacts(client(), INITIALIZED, Some(1)), &options());
    assert_eq!(result.kind, RoleResultKind::Unknown);
    assert!(result.reason.contains("code 1"));
}

#[test]
fn dummy_and_install_only_roles_exit_ok() {
    let fatal = "LogWindows: Error: Fatal error: boom";

    let dummy = classify(
        artifacts(client().with_modifier(RoleModifier::Dummy), fatal, Some(1)),
        &options(),
    );
    assert_eq!(dummy.kind, RoleResultKind::ExitOk);
    assert!(!dummy.is_evaluated());

    let install_only = classify(artifacts(client().install_only(), "", None), &options());
    assert_eq!(install_only.kind, RoleResultKind::ExitOk);
    assert!(install_only.is_evaluated());
}

#[test]
fn promotion_respects_verbosity_and_categories() {
    let parser = LogParser::new().expect("parser");
    let summary = parser.summarize(
        "\
LogNet: Warning: packet loss
LogAudio: Error: device lost
LogOutputDevice: Warning: Ensure condition failed: Count > 0",
    );
    let monitored = vec!["LogNet".to_owned()];

    let minimal = promote_events(&summary, EventVerbosity::FatalAndEnsure, &monitored);
    assert_eq!(minimal.len(), 1);
    assert!(matches!(minimal[0], TestEvent::Ensure { .. }));

    let verbose = promote_events(&summary, EventVerbosity::AllWarningsAndErrors, &monitored);
    assert_eq!(verbose.len(), 2);
    assert_eq!(
        verbose[1],
        TestEvent::LogEntry {
            category: "LogNet".into(),
            severity: LogSeverity::Warning,
            message: "packet loss".into(),
        }
    );
}

#[test]
fn role_log_categories_are_monitored() {
    let mut role = client();
    role.log_categories = vec!["LogAudio".into()];
    let log = format!("{INITIALIZED}\nLogAudio: Error: device lost\nLogCore: Display: Engine exit requested");

    let result = classify(
        artifacts(role, &log, Some(0)),
        &ClassifyOptions {
            event_verbosity: EventVerbosity::AllWarningsAndErrors,
            ..options()
        },
    );
    assert_eq!(result.kind, RoleResultKind::ExitOk);
    assert!(has_promoted_errors(std::slice::from_ref(&result)));
}

#[test]
fn aggregate_precedence() {
    let ok = result_of(RoleResultKind::ExitOk);
    let timeout = result_of(RoleResultKind::TimeOut);
    let failure = result_of(RoleResultKind::TestFailure);

    assert_eq!(aggregate(&[ok.clone()], false, false), TestResult::Passed);
    assert_eq!(aggregate(&[ok.clone()], true, false), TestResult::Failed);
    assert_eq!(
        aggregate(&[ok.clone(), timeout.clone()], false, false),
        TestResult::TimedOut
    );
    assert_eq!(
        aggregate(&[timeout, failure, ok], false, false),
        TestResult::Failed
    );
}

#[test]
fn aggregate_ignores_dummy_roles() {
    let mut dummy = result_of(RoleResultKind::EncounteredFatalError);
    dummy.artifacts.role = client().with_modifier(RoleModifier::Dummy);
    let ok = result_of(RoleResultKind::ExitOk);

    assert_eq!(aggregate(&[ok, dummy], false, false), TestResult::Passed);
}

#[test]
fn promoted_errors_fail_only_when_requested() {
    let mut ok = result_of(RoleResultKind::ExitOk);
    ok.events.push(TestEvent::LogEntry {
        category: "LogNet".into(),
        severity: LogSeverity::Error,
        message: "socket closed".into(),
    });
    let results = [ok];

    assert_eq!(aggregate(&results, false, false), TestResult::Passed);
    assert_eq!(aggregate(&results, false, true), TestResult::Failed);
}

#[test]
fn sort_puts_worst_results_last() {
    let mut results = vec![
        result_of(RoleResultKind::EncounteredFatalError),
        result_of(RoleResultKind::ExitOk),
        result_of(RoleResultKind::TimeOut),
    ];
    sort_results(&mut results);
    let kinds: Vec<_> = results.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            RoleResultKind::ExitOk,
            RoleResultKind::TimeOut,
            RoleResultKind::EncounteredFatalError,
        ]
    );
}
