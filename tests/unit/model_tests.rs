//! Unit tests for role, command-line and result models.

use gauntlet_orchestrator::log_summary::LogSeverity;
use gauntlet_orchestrator::models::result::{
    EventSeverity, RoleResultKind, StopReason, TestEvent,
};
use gauntlet_orchestrator::models::role::{
    BuildConfiguration, CommandLine, DeviceConstraint, Platform, RoleModifier, RoleType,
    SessionRole,
};

fn client() -> SessionRole {
    SessionRole::new(
        RoleType::Client,
        Platform::new("Win64"),
        BuildConfiguration::Development,
    )
}

#[test]
fn role_type_capabilities() {
    assert!(RoleType::Client.is_client());
    assert!(!RoleType::Client.is_server());
    assert!(RoleType::ListenServer.is_client());
    assert!(RoleType::ListenServer.is_server());
    assert!(RoleType::EditorServer.uses_editor());
    assert!(RoleType::EditorServer.is_server());
    assert!(!RoleType::Server.uses_editor());
}

#[test]
fn platforms_compare_case_insensitively() {
    assert_eq!(Platform::new("Win64"), Platform::new("win64"));
    assert!(Platform::new("Win64").is_desktop());
    assert!(Platform::new("Linux").is_desktop());
    assert!(!Platform::new("Android").is_desktop());
}

#[test]
fn empty_constraint_accepts_any_device() {
    let any = DeviceConstraint::any();
    assert!(!any.is_constrained());
    assert!(any.accepts(&DeviceConstraint("PS5".into())));

    let ps5 = DeviceConstraint("PS5".into());
    assert!(ps5.accepts(&DeviceConstraint("ps5".into())));
    assert!(!ps5.accepts(&DeviceConstraint("XSX".into())));
    assert!(!ps5.accepts(&DeviceConstraint::any()));
}

#[test]
fn modifiers_control_device_consumption() {
    assert!(client().consumes_device());
    let dummy = client().with_modifier(RoleModifier::Dummy);
    assert!(dummy.is_dummy());
    assert!(!dummy.consumes_device());
    let null = client().with_modifier(RoleModifier::Null);
    assert!(null.is_null());
    assert!(!null.consumes_device());
}

#[test]
fn command_line_parses_flags_values_and_positionals() {
    let line = CommandLine::from(vec![
        "MyMap".to_owned(),
        "-nullrhi".to_owned(),
        "-ExecCmds=\"stat fps\"".to_owned(),
    ]);
    assert_eq!(line.len(), 3);
    assert!(line.has("NullRHI"));
    assert_eq!(line.value("execcmds"), Some("stat fps"));
    assert_eq!(line.to_string(), "MyMap -nullrhi -ExecCmds=\"stat fps\"");
    assert_eq!(
        line.to_args(),
        vec!["MyMap", "-nullrhi", "-ExecCmds=stat fps"]
    );
}

#[test]
fn set_value_replaces_in_place() {
    let mut line = CommandLine::new();
    line.set_value("ServerAddress", "10.0.0.1")
        .add_flag("log")
        .set_value("serveraddress", "10.0.0.2");
    assert_eq!(line.len(), 2);
    assert_eq!(line.value("ServerAddress"), Some("10.0.0.2"));
    assert_eq!(line.to_args()[0], "-serveraddress=10.0.0.2");
}

#[test]
fn add_flag_is_idempotent() {
    let mut line = CommandLine::new();
    line.add_flag("unattended").add_flag("Unattended");
    assert_eq!(line.len(), 1);
}

#[test]
fn controller_flag_is_matched_exactly() {
    let mut line = CommandLine::new();
    line.set_value("gauntlet_session", "abc");
    let role = client().with_command_line(line.clone());
    assert!(!role.uses_test_controller());

    line.set_value("gauntlet", "BootTest");
    let role = client().with_command_line(line);
    assert!(role.uses_test_controller());
}

#[test]
fn role_deserializes_with_defaults() {
    let role: SessionRole = toml::from_str(
        r#"
role_type = "server"
platform = "Linux"
command_line = ["-log", "-port=7777"]
"#,
    )
    .expect("role parses");
    assert_eq!(role.role_type, RoleType::Server);
    assert_eq!(role.configuration, BuildConfiguration::Development);
    assert_eq!(role.modifier, RoleModifier::None);
    assert_eq!(role.command_line.value("port"), Some("7777"));
    assert!(!role.install_only);
}

#[test]
fn severity_rank_orders_worst_last() {
    assert!(
        RoleResultKind::ExitOk.severity_rank() < RoleResultKind::Unknown.severity_rank()
    );
    assert!(
        RoleResultKind::TestFailure.severity_rank()
            < RoleResultKind::EncounteredFatalError.severity_rank()
    );
}

#[test]
fn events_carry_their_severity() {
    let fatal = TestEvent::FatalError {
        message: "boom".into(),
        callstack: vec!["frame".into()],
    };
    let ensure = TestEvent::Ensure {
        message: "x != null".into(),
        callstack: Vec::new(),
    };
    let entry = TestEvent::LogEntry {
        category: "LogNet".into(),
        severity: LogSeverity::Warning,
        message: "packet loss".into(),
    };
    assert_eq!(fatal.severity(), EventSeverity::Error);
    assert_eq!(ensure.severity(), EventSeverity::Warning);
    assert_eq!(entry.severity(), EventSeverity::Warning);
    assert_eq!(entry.summary(), "LogNet: packet loss");
}

#[test]
fn timeout_stop_reasons() {
    assert!(StopReason::HeartbeatLost.is_timeout());
    assert!(StopReason::MaxDurationReached.is_timeout());
    assert!(!StopReason::Completed.is_timeout());
    assert!(!StopReason::Cancelled.is_timeout());
}
