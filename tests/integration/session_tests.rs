//! Integration tests for session launch, retry, quarantine and shutdown.
//!
//! Validates:
//! - Every non-null role gets exactly one instance
//! - Clients learn the server address; every role carries the session id
//! - Install failures quarantine the device and retry on another one
//! - Launch failures kill already-launched roles before retrying
//! - Reservation exhaustion and desktop disk-space failures are fatal
//! - Retained devices and cached installs survive a restart

use std::sync::Arc;

use gauntlet_orchestrator::device::pool::DeviceState;
use gauntlet_orchestrator::device::{Device, DeviceError, DevicePool, StaticDevicePool};
use gauntlet_orchestrator::models::role::RoleModifier;
use gauntlet_orchestrator::orchestrator::session::{SERVER_ADDRESS_ARG, SESSION_ARG};
use gauntlet_orchestrator::orchestrator::{Session, SessionOptions};
use gauntlet_orchestrator::AppError;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{
    client_role, fast_config, passing_output, server_role, FakeDevice, ProcessScript,
};

fn pool_of(devices: Vec<FakeDevice>) -> Arc<StaticDevicePool> {
    Arc::new(StaticDevicePool::new(
        devices
            .into_iter()
            .map(|d| Arc::new(d) as Arc<dyn Device>)
            .collect(),
    ))
}

fn options() -> SessionOptions {
    SessionOptions::from_test_config(&fast_config(vec![client_role()]))
}

#[tokio::test]
async fn launch_creates_one_instance_per_non_null_role() {
    let pool = pool_of(vec![
        FakeDevice::new("dev-a", ProcessScript::runs_forever(passing_output())),
        FakeDevice::new("dev-b", ProcessScript::runs_forever(passing_output())),
    ]);
    let roles = vec![
        server_role(),
        client_role(),
        client_role().with_modifier(RoleModifier::Null),
        client_role().with_modifier(RoleModifier::Dummy),
    ];
    let mut session = Session::new(roles, pool.clone(), options(), CancellationToken::new());

    let instance = session.launch_session().await.expect("launch");
    assert_eq!(instance.len(), 3);

    let names: Vec<&str> = instance.roles().iter().map(|r| r.role_name()).collect();
    assert_eq!(names, vec!["Server", "Client", "Client3"]);
    let dummy = &instance.roles()[2];
    assert!(dummy.device_name().starts_with("null-"));
    assert_eq!(pool.available_count(), 0);

    session.shutdown_session().await;
    assert_eq!(pool.available_count(), 2);
}

#[tokio::test]
async fn clients_receive_server_address_and_session_id() {
    let server = FakeDevice::new("srv", ProcessScript::runs_forever(Vec::new()));
    let client = FakeDevice::new("cli", ProcessScript::runs_forever(Vec::new()));
    let server_stats = server.stats();
    let client_stats = client.stats();
    let pool = pool_of(vec![server, client]);
    let mut session = Session::new(
        vec![server_role(), client_role()],
        pool,
        options(),
        CancellationToken::new(),
    );

    session.launch_session().await.expect("launch");
    let session_id = session.id().to_owned();

    let server_config = server_stats.last_config().expect("server installed");
    let client_config = client_stats.last_config().expect("client installed");
    assert_eq!(server_config.command_line.value(SESSION_ARG), Some(session_id.as_str()));
    assert_eq!(client_config.command_line.value(SESSION_ARG), Some(session_id.as_str()));
    assert_eq!(client_config.command_line.value(SERVER_ADDRESS_ARG), Some("srv.lab"));
    assert!(server_config.command_line.value(SERVER_ADDRESS_ARG).is_none());

    session.shutdown_session().await;
}

#[tokio::test]
async fn install_failure_quarantines_device_and_retries_elsewhere() {
    let bad = FakeDevice::new("dev-bad", ProcessScript::runs_forever(Vec::new()))
        .failing_install(DeviceError::Failed("adb install failed".into()));
    let good = FakeDevice::new("dev-good", ProcessScript::runs_forever(Vec::new()));
    let bad_stats = bad.stats();
    let pool = pool_of(vec![bad, good]);
    let mut session = Session::new(vec![client_role()], pool.clone(), options(), CancellationToken::new());

    let instance = session.launch_session().await.expect("launch after retry");
    assert_eq!(instance.roles()[0].device_name(), "dev-good");
    assert_eq!(bad_stats.installs(), 1);
    assert_eq!(pool.state_of("dev-bad"), Some(DeviceState::Problem));
    assert_eq!(session.reservation().problem_devices(), ["dev-bad".to_owned()]);

    session.shutdown_session().await;
    assert_eq!(pool.state_of("dev-bad"), Some(DeviceState::Problem));
    assert_eq!(pool.state_of("dev-good"), Some(DeviceState::Available));
}

#[tokio::test]
async fn launch_failure_kills_launched_roles_before_giving_up() {
    let server = FakeDevice::new("srv", ProcessScript::runs_forever(Vec::new()));
    let client = FakeDevice::new("cli", ProcessScript::runs_forever(Vec::new()))
        .failing_launch(DeviceError::Failed("process crashed on start".into()));
    let server_stats = server.stats();
    let pool = pool_of(vec![server, client]);
    let mut opts = options();
    opts.max_launch_attempts = 1;
    let mut session = Session::new(
        vec![server_role(), client_role()],
        pool.clone(),
        opts,
        CancellationToken::new(),
    );

    let err = session.launch_session().await.expect_err("budget exhausted");
    assert!(matches!(err, AppError::Unrecoverable(_)), "got {err}");
    assert!(err.is_fatal());
    assert_eq!(server_stats.kills(), 1);
    assert_eq!(pool.state_of("cli"), Some(DeviceState::Problem));
    assert_eq!(pool.state_of("srv"), Some(DeviceState::Available));
    assert!(session.instance().is_none());
}

#[tokio::test]
async fn reservation_exhaustion_is_fatal_and_never_partial() {
    let pool = pool_of(vec![FakeDevice::new(
        "only",
        ProcessScript::runs_forever(Vec::new()),
    )]);
    let mut opts = options();
    opts.reservation_attempts = 2;
    let mut session = Session::new(
        vec![client_role(), client_role()],
        pool.clone(),
        opts,
        CancellationToken::new(),
    );

    let err = session.launch_session().await.expect_err("too few devices");
    assert!(matches!(err, AppError::Reservation(_)), "got {err}");
    assert!(session.instance().is_none());
    assert!(!session.reservation().has_devices());
    assert_eq!(pool.available_count(), 1);
}

#[tokio::test]
async fn desktop_out_of_space_disables_retries() {
    let host = FakeDevice::new("workstation", ProcessScript::runs_forever(Vec::new()))
        .desktop_host()
        .failing_install(DeviceError::InsufficientSpace("disk full".into()));
    let spare = FakeDevice::new("spare", ProcessScript::runs_forever(Vec::new()));
    let spare_stats = spare.stats();
    let pool = pool_of(vec![host, spare]);
    let mut opts = options();
    opts.max_launch_attempts = 3;
    let mut session = Session::new(vec![client_role()], pool.clone(), opts, CancellationToken::new());

    let err = session.launch_session().await.expect_err("out of space");
    assert!(matches!(err, AppError::Install(_)), "got {err}");
    assert!(session.retries_disabled());
    assert_eq!(spare_stats.installs(), 0);
    assert_eq!(pool.state_of("workstation"), Some(DeviceState::Available));
}

#[tokio::test]
async fn cancelled_launch_returns_cancelled() {
    let pool = pool_of(vec![FakeDevice::new(
        "dev",
        ProcessScript::runs_forever(Vec::new()),
    )]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut session = Session::new(vec![client_role()], pool.clone(), options(), cancel);

    let err = session.launch_session().await.expect_err("cancelled");
    assert!(matches!(err, AppError::Cancelled(_)), "got {err}");
    assert_eq!(pool.available_count(), 1);
}

#[tokio::test]
async fn retained_devices_skip_the_pool() {
    let device = FakeDevice::new("dev", ProcessScript::runs_forever(Vec::new()));
    let stats = device.stats();
    let pool = pool_of(vec![device]);
    let mut opts = options();
    opts.retain_devices = true;
    let mut session = Session::new(vec![client_role()], pool.clone(), opts, CancellationToken::new());

    assert!(session.try_reserve_devices().expect("reserve"));
    assert_eq!(pool.available_count(), 0);
    assert!(session.try_reserve_devices().expect("retained"));

    session.launch_session().await.expect("launch");
    session.shutdown_session().await;
    assert_eq!(pool.available_count(), 0, "retained across shutdown");

    session.restart_session().await.expect("restart");
    assert_eq!(stats.installs(), 1, "cached install reused");
    assert_eq!(stats.launches(), 2);

    session.shutdown_session().await;
    session.release_devices();
    assert_eq!(pool.available_count(), 1);
    assert_eq!(session.cached_install_count(), 0);
}

#[tokio::test]
async fn force_reinstall_bypasses_the_cache() {
    let device = FakeDevice::new("dev", ProcessScript::runs_forever(Vec::new()));
    let stats = device.stats();
    let pool = pool_of(vec![device]);
    let mut opts = options();
    opts.retain_devices = true;
    opts.force_reinstall = true;
    let mut session = Session::new(vec![client_role()], pool, opts, CancellationToken::new());

    session.launch_session().await.expect("launch");
    session.restart_session().await.expect("restart");
    assert_eq!(stats.installs(), 2);
    assert!(stats.last_config().expect("config").force_reinstall);
    session.release_devices();
}

#[tokio::test]
async fn reinstall_per_pass_clears_the_cache() {
    let device = FakeDevice::new("dev", ProcessScript::runs_forever(Vec::new()));
    let stats = device.stats();
    let pool = pool_of(vec![device]);
    let mut opts = options();
    opts.retain_devices = true;
    opts.reinstall_per_pass = true;
    let mut session = Session::new(vec![client_role()], pool, opts, CancellationToken::new());

    session.begin_pass();
    session.launch_session().await.expect("first pass");
    session.shutdown_session().await;
    assert_eq!(session.cached_install_count(), 1);

    session.begin_pass();
    assert_eq!(session.cached_install_count(), 0);
    session.launch_session().await.expect("second pass");
    assert_eq!(stats.installs(), 2);
    session.release_devices();
}

#[tokio::test]
async fn install_only_roles_are_installed_but_not_launched() {
    let device = FakeDevice::new("dev", ProcessScript::runs_forever(Vec::new()));
    let stats = device.stats();
    let pool = pool_of(vec![device]);
    let mut session = Session::new(
        vec![client_role().install_only()],
        pool,
        options(),
        CancellationToken::new(),
    );

    let instance = session.launch_session().await.expect("launch");
    assert_eq!(instance.len(), 1);
    assert!(!instance.roles()[0].has_process());
    assert_eq!(stats.installs(), 1);
    assert_eq!(stats.launches(), 0);
    session.shutdown_session().await;
}

#[tokio::test]
async fn save_role_artifacts_writes_logs_and_copies_saved_dir() {
    let saved = tempfile::tempdir().expect("saved dir");
    std::fs::create_dir_all(saved.path().join("Logs")).expect("logs dir");
    std::fs::write(saved.path().join("Logs/game.log"), "saved log").expect("write");
    let dest = tempfile::tempdir().expect("dest");

    let device = FakeDevice::new("dev", ProcessScript::exits_with(passing_output(), 0))
        .with_artifact_dir(saved.path());
    let pool = pool_of(vec![device]);
    let mut session = Session::new(vec![client_role()], pool, options(), CancellationToken::new());

    session.launch_session().await.expect("launch");
    session.stop_processes().await;
    let artifacts = session.save_role_artifacts(dest.path()).expect("save");

    assert_eq!(artifacts.len(), 1);
    let client = &artifacts[0];
    assert_eq!(client.role_name, "Client");
    assert_eq!(client.log_path, dest.path().join("ClientOutput.log"));
    let log = std::fs::read_to_string(&client.log_path).expect("log");
    assert!(log.contains("TEST COMPLETE"));
    assert_eq!(
        std::fs::read_to_string(dest.path().join("Client/Logs/game.log")).expect("copied"),
        "saved log"
    );
    assert!(client.screenshot_summary.is_none());
    assert!(!client.stopped_by_orchestrator);
    session.shutdown_session().await;
}

#[test]
fn constraint_requests_group_by_platform_and_constraint() {
    let pool: Arc<dyn DevicePool> = pool_of(Vec::new());
    let session = Session::new(
        vec![
            client_role(),
            client_role(),
            client_role().with_constraint("PS5"),
            client_role().with_modifier(RoleModifier::Dummy),
            server_role(),
        ],
        pool,
        options(),
        CancellationToken::new(),
    );

    let requests = session.constraint_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].count, 3);
    assert_eq!(requests[1].constraint.0, "PS5");
    assert_eq!(requests[1].count, 1);
}

#[tokio::test]
async fn instance_answers_liveness_queries() {
    let pool = pool_of(vec![
        FakeDevice::new("dev-a", ProcessScript::runs_forever(Vec::new())),
        FakeDevice::new("dev-b", ProcessScript::runs_forever(Vec::new())),
    ]);
    let roles = vec![
        server_role(),
        client_role(),
        client_role().with_modifier(RoleModifier::Dummy),
    ];
    let mut session = Session::new(roles, pool, options(), CancellationToken::new());
    session.launch_session().await.expect("launch");

    let instance = session.instance_mut().expect("live instance");
    assert!(instance.clients_running());
    assert!(instance.server_running());
    assert!(instance.any_running());
    assert_eq!(instance.launched_count(), 2);
    assert_eq!(instance.exited_count(), 0);
    assert!(!instance.all_exited());

    let client = instance
        .roles_mut()
        .iter_mut()
        .find(|r| r.role_name() == "Client")
        .expect("client role");
    assert!(!client.stopped_by_orchestrator());
    client.stop(std::time::Duration::ZERO).await;
    assert!(client.stopped_by_orchestrator());
    assert!(!instance.clients_running());
    assert!(instance.server_running());
    assert_eq!(instance.exited_count(), 1);
    assert!(!instance.all_exited());

    let server = instance
        .roles_mut()
        .iter_mut()
        .find(|r| r.role_name() == "Server")
        .expect("server role");
    server.stop(std::time::Duration::ZERO).await;
    assert!(!instance.server_running());
    assert!(instance.all_exited());
    assert!(instance.any_running(), "dummy role keeps running until stopped");

    let dummy = &mut instance.roles_mut()[2];
    assert!(dummy.role().is_dummy());
    dummy.stop(std::time::Duration::ZERO).await;
    assert!(dummy.stopped_by_orchestrator());
    assert!(!instance.any_running());

    instance.dispose();
    assert!(!instance.any_running());
    session.shutdown_session().await;
}
