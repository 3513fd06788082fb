//! Unit tests for configuration parsing and validation.
//!
//! Validates:
//! - Minimal configuration fills every default
//! - `artifact_root` is created and canonicalized
//! - Budgets, roles and device names are validated

use gauntlet_orchestrator::config::{EventVerbosity, GlobalConfig};
use gauntlet_orchestrator::log_summary::parser::LogMarkers;
use gauntlet_orchestrator::models::role::{RoleModifier, RoleType};

fn config_with(root: &std::path::Path, body: &str) -> String {
    format!("artifact_root = '{}'\n{body}", root.display())
}

const MINIMAL_TEST: &str = r#"
[test]
name = "BootTest"

[[test.roles]]
role_type = "client"
platform = "Linux"
"#;

#[test]
fn minimal_config_uses_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config =
        GlobalConfig::from_toml_str(&config_with(dir.path(), MINIMAL_TEST)).expect("valid config");

    assert_eq!(config.tick_interval_ms, 500);
    assert_eq!(config.test.max_duration_seconds, 600);
    assert_eq!(config.test.max_retries, 0);
    assert!(config.test.retry_on_initialization_failure);
    assert_eq!(config.test.max_launch_attempts, 2);
    assert_eq!(config.test.reservation_attempts, 5);
    assert_eq!(config.test.exit_grace_period_seconds, 15);
    assert!(!config.test.heartbeat.enabled);
    assert_eq!(config.test.event_verbosity, EventVerbosity::FatalAndEnsure);
    assert_eq!(config.report.file_name, "report.json");
    assert!(config.report.history_dir.is_none());
    assert!(config.devices.is_empty());
    assert_eq!(config.log_markers, LogMarkers::default());
}

#[test]
fn artifact_root_is_created_and_canonicalized() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nested = dir.path().join("runs").join("..").join("artifacts");
    let config =
        GlobalConfig::from_toml_str(&config_with(&nested, MINIMAL_TEST)).expect("valid config");

    let expected = dir
        .path()
        .canonicalize()
        .expect("canonical tempdir")
        .join("artifacts");
    assert_eq!(config.artifact_root, expected);
    assert!(expected.is_dir());
    assert_eq!(config.sandbox_root(), expected.join(".sandbox"));
}

#[test]
fn full_config_parses_every_section() {
    let dir = tempfile::tempdir().expect("tempdir");
    let body = r#"
tick_interval_ms = 250

[test]
name = "ClientServer"
max_duration_seconds = 120
max_retries = 2
event_verbosity = "all_warnings_and_errors"
retain_devices = true

[test.heartbeat]
enabled = true
timeout_for_first_active_heartbeat = 90

[[test.roles]]
role_type = "server"
platform = "Linux"
command_line = ["-log"]

[[test.roles]]
role_type = "client"
platform = "Linux"
modifier = "dummy"

[[devices]]
name = "linux-1"
platform = "Linux"
constraint = "HighEnd"
address = "10.0.0.5"

[report]
file_name = "result.json"

[log_markers]
engine_initialized = "Ready to play"
"#;
    let config =
        GlobalConfig::from_toml_str(&config_with(dir.path(), body)).expect("valid config");

    assert_eq!(config.tick_interval().as_millis(), 250);
    assert_eq!(config.test.max_duration().as_secs(), 120);
    assert!(config.test.retain_devices);
    assert!(config.test.heartbeat.enabled);
    assert_eq!(config.test.heartbeat.timeout_for_first_active_heartbeat, 90);
    assert_eq!(config.test.roles[0].role_type, RoleType::Server);
    assert_eq!(config.test.roles[1].modifier, RoleModifier::Dummy);
    assert_eq!(config.devices[0].address.as_deref(), Some("10.0.0.5"));
    assert_eq!(
        config.device_sandbox(&config.devices[0]),
        config.artifact_root.join(".sandbox").join("linux-1")
    );
    assert_eq!(config.report.file_name, "result.json");
    assert_eq!(config.log_markers.engine_initialized, "Ready to play");
    assert_eq!(config.log_markers.ensure, LogMarkers::default().ensure);
}

fn expect_config_error(body: &str, needle: &str) {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = GlobalConfig::from_toml_str(&config_with(dir.path(), body))
        .expect_err("config should be rejected");
    let message = err.to_string();
    assert!(message.starts_with("config:"), "got {message}");
    assert!(message.contains(needle), "expected '{needle}' in {message}");
}

#[test]
fn rejects_tests_without_roles() {
    expect_config_error(
        "[test]\nname = \"BootTest\"\nroles = []\n",
        "at least one role",
    );
}

#[test]
fn rejects_only_null_roles() {
    expect_config_error(
        r#"
[test]
name = "BootTest"

[[test.roles]]
role_type = "client"
platform = "Linux"
modifier = "null"
"#,
        "not null",
    );
}

#[test]
fn rejects_zero_budgets() {
    expect_config_error(
        &MINIMAL_TEST.replace(
            "name = \"BootTest\"\n",
            "name = \"BootTest\"\nmax_launch_attempts = 0\n",
        ),
        "max_launch_attempts",
    );
    expect_config_error(
        &MINIMAL_TEST.replace(
            "name = \"BootTest\"\n",
            "name = \"BootTest\"\nmax_duration_seconds = 0\n",
        ),
        "max_duration_seconds",
    );
    expect_config_error(&format!("tick_interval_ms = 0\n{MINIMAL_TEST}"), "tick_interval_ms");
}

#[test]
fn rejects_duplicate_device_names() {
    let body = format!(
        "{MINIMAL_TEST}
[[devices]]
name = \"dev\"
platform = \"Linux\"

[[devices]]
name = \"dev\"
platform = \"Win64\"
"
    );
    expect_config_error(&body, "duplicate device name: dev");
}

#[test]
fn rejects_malformed_toml() {
    expect_config_error("[test\nname = ", "invalid config");
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = GlobalConfig::load_from_path(dir.path().join("absent.toml"))
        .expect_err("missing file");
    assert!(err.to_string().contains("failed to read config"));
}
