//! Session lifecycle: reserve, install, launch, stop, save artifacts.
//!
//! A [`Session`] owns the device reservation and the install cache of one
//! test. Each launch reserves a device per hardware role, installs and runs
//! every role, and returns the live [`SessionInstance`]. Device-attributable
//! failures quarantine the device and retry within `max_launch_attempts`;
//! exhausting the budget is unrecoverable.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::instance::{RoleInstance, SessionInstance};
use super::reservation::DeviceReservation;
use super::screenshots::{self, SCREENSHOT_DIR_NAME, SUMMARY_FILE_NAME};
use crate::config::TestConfig;
use crate::device::{
    AppConfig, AppInstall, ConstraintRequest, Device, DeviceError, DevicePool, NullDevice,
};
use crate::models::artifacts::RoleArtifacts;
use crate::models::role::SessionRole;
use crate::{AppError, Result};

/// Parameter carrying the session id on every role's command line.
pub const SESSION_ARG: &str = "gauntlet_session";

/// Parameter carrying the server address on client command lines.
pub const SERVER_ADDRESS_ARG: &str = "ServerAddress";

/// Launch and shutdown budgets of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Launch attempts before the session is unrecoverable.
    pub max_launch_attempts: u32,
    /// Reservation attempts per launch attempt.
    pub reservation_attempts: u32,
    /// Delay between reservation attempts.
    pub reservation_retry_delay: Duration,
    /// Time a stopping role gets before it is killed.
    pub shutdown_grace: Duration,
    /// Keep devices across passes and retries.
    pub retain_devices: bool,
    /// Never reuse a cached install.
    pub force_reinstall: bool,
    /// Drop cached installs at the start of every pass.
    pub reinstall_per_pass: bool,
}

impl SessionOptions {
    /// Options taken from a test configuration.
    #[must_use]
    pub fn from_test_config(config: &TestConfig) -> Self {
        Self {
            max_launch_attempts: config.max_launch_attempts,
            reservation_attempts: config.reservation_attempts,
            reservation_retry_delay: config.reservation_retry_delay(),
            shutdown_grace: config.shutdown_grace(),
            retain_devices: config.retain_devices,
            force_reinstall: config.force_reinstall,
            reinstall_per_pass: config.reinstall_per_pass,
        }
    }
}

/// Unique display names for roles: the first of each type keeps the bare
/// type name, later ones get a numeric suffix (`Client`, `Client2`, ...).
#[must_use]
pub fn role_names(roles: &[SessionRole]) -> Vec<String> {
    let mut seen: HashMap<String, u32> = HashMap::new();
    roles
        .iter()
        .map(|role| {
            let base = role.role_type.to_string();
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{base}{count}")
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Install,
    Launch,
}

enum LaunchFailure {
    Retryable(AppError),
    Fatal(AppError),
}

struct CachedInstall {
    device_name: String,
    install: Arc<dyn AppInstall>,
}

/// Installed and running roles of one test, across passes and retries.
pub struct Session {
    id: String,
    roles: Vec<SessionRole>,
    role_names: Vec<String>,
    options: SessionOptions,
    reservation: DeviceReservation,
    install_cache: HashMap<usize, CachedInstall>,
    instance: Option<SessionInstance>,
    cancel: CancellationToken,
    retries_disabled: bool,
}

impl Session {
    /// Session over `roles`, drawing devices from `pool`.
    #[must_use]
    pub fn new(
        roles: Vec<SessionRole>,
        pool: Arc<dyn DevicePool>,
        options: SessionOptions,
        cancel: CancellationToken,
    ) -> Self {
        let role_names = role_names(&roles);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            reservation: DeviceReservation::new(pool, options.retain_devices),
            roles,
            role_names,
            options,
            install_cache: HashMap::new(),
            instance: None,
            cancel,
            retries_disabled: false,
        }
    }

    /// Session id passed to every role.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Configured roles.
    #[must_use]
    pub fn roles(&self) -> &[SessionRole] {
        &self.roles
    }

    /// Unique role names, parallel to [`roles`](Self::roles).
    #[must_use]
    pub fn role_names(&self) -> &[String] {
        &self.role_names
    }

    /// Live instance, if launched.
    #[must_use]
    pub fn instance(&self) -> Option<&SessionInstance> {
        self.instance.as_ref()
    }

    /// Mutable live instance, if launched.
    pub fn instance_mut(&mut self) -> Option<&mut SessionInstance> {
        self.instance.as_mut()
    }

    /// Device reservation.
    #[must_use]
    pub fn reservation(&self) -> &DeviceReservation {
        &self.reservation
    }

    /// Whether a non-retryable failure stopped retries for this session.
    #[must_use]
    pub fn retries_disabled(&self) -> bool {
        self.retries_disabled
    }

    /// Number of cached installs.
    #[must_use]
    pub fn cached_install_count(&self) -> usize {
        self.install_cache.len()
    }

    /// Device requests for every hardware role, grouped by platform and
    /// constraint.
    #[must_use]
    pub fn constraint_requests(&self) -> Vec<ConstraintRequest> {
        let mut requests: Vec<ConstraintRequest> = Vec::new();
        for role in self.roles.iter().filter(|r| r.consumes_device()) {
            if let Some(existing) = requests
                .iter_mut()
                .find(|r| r.platform == role.platform && r.constraint == role.constraint)
            {
                existing.count += 1;
            } else {
                requests.push(ConstraintRequest {
                    platform: role.platform.clone(),
                    constraint: role.constraint.clone(),
                    count: 1,
                });
            }
        }
        requests
    }

    /// Make one reservation attempt for every hardware role.
    ///
    /// Returns `true` immediately when devices are retained from an earlier
    /// pass; `false` means the pool cannot serve the request yet.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Reservation` if the pool fails.
    pub fn try_reserve_devices(&mut self) -> Result<bool> {
        let requests = self.constraint_requests();
        self.reservation.try_reserve(&requests)
    }

    /// Start a new pass: drop cached installs when reinstalling per pass.
    pub fn begin_pass(&mut self) {
        if self.options.reinstall_per_pass && !self.install_cache.is_empty() {
            debug!(session_id = self.id, "discarding cached installs for new pass");
            self.install_cache.clear();
        }
    }

    /// Reserve, install and launch every role.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cancelled` when cancelled, `AppError::Reservation`
    /// when devices cannot be reserved, `AppError::Install` for a
    /// non-retryable install failure, or `AppError::Unrecoverable` once the
    /// launch attempt budget is exhausted.
    pub async fn launch_session(&mut self) -> Result<&SessionInstance> {
        if self.instance.is_some() {
            self.shutdown_session().await;
        }
        let span = info_span!("launch_session", session_id = %self.id);
        let instance = self.launch_with_retry().instrument(span).await?;
        Ok(self.instance.insert(instance))
    }

    /// Shut the session down and launch it again, reusing retained devices.
    ///
    /// # Errors
    ///
    /// Same as [`launch_session`](Self::launch_session).
    pub async fn restart_session(&mut self) -> Result<&SessionInstance> {
        self.shutdown_session().await;
        self.launch_session().await
    }

    async fn launch_with_retry(&mut self) -> Result<SessionInstance> {
        let max_attempts = self.options.max_launch_attempts.max(1);
        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return Err(AppError::Cancelled("session launch cancelled".into()));
            }

            match self.launch_attempt().await {
                Ok(instance) => {
                    info!(attempt, roles = instance.len(), "session launched");
                    return Ok(instance);
                }
                Err(LaunchFailure::Fatal(err)) => {
                    error!(attempt, %err, "session launch failed");
                    return Err(err);
                }
                Err(LaunchFailure::Retryable(err)) => {
                    if self.retries_disabled || attempt >= max_attempts {
                        error!(attempt, %err, "session launch attempts exhausted");
                        return Err(AppError::Unrecoverable(format!(
                            "session launch failed after {attempt} attempt(s): {err}"
                        )));
                    }
                    warn!(attempt, max_attempts, %err, "session launch attempt failed; retrying");
                }
            }
        }
    }

    async fn launch_attempt(&mut self) -> std::result::Result<SessionInstance, LaunchFailure> {
        let requests = self.constraint_requests();
        self.reservation
            .reserve_with_retry(
                &requests,
                self.options.reservation_attempts,
                self.options.reservation_retry_delay,
                &self.cancel,
            )
            .await
            .map_err(LaunchFailure::Fatal)?;

        let assignments = match self.assign_devices() {
            Ok(assignments) => assignments,
            Err(err) => {
                self.reservation.release();
                return Err(LaunchFailure::Fatal(err));
            }
        };

        let server_address = assignments
            .iter()
            .find(|(index, _)| {
                self.roles
                    .get(*index)
                    .is_some_and(|r| r.role_type.is_server())
            })
            .map(|(_, device)| device.address());

        let mut installs = Vec::with_capacity(assignments.len());
        for (index, device) in assignments {
            if self.cancel.is_cancelled() {
                self.reservation.release_unless_retained();
                return Err(LaunchFailure::Fatal(AppError::Cancelled(
                    "session launch cancelled".into(),
                )));
            }
            let (Some(role), Some(role_name)) = (self.roles.get(index), self.role_names.get(index))
            else {
                continue;
            };
            let config = self.app_config(role, role_name, server_address.as_deref());
            match self.install_role(index, device.as_ref(), &config).await {
                Ok(install) => installs.push((index, device, install)),
                Err(err) => return Err(self.device_failure(device.as_ref(), Stage::Install, err)),
            }
        }

        let mut launched: Vec<RoleInstance> = Vec::with_capacity(installs.len());
        for (index, device, install) in installs {
            let (Some(role), Some(role_name)) =
                (self.roles.get(index), self.role_names.get(index))
            else {
                continue;
            };
            if role.install_only {
                info!(role = role_name, device = device.name(), "role installed only");
                launched.push(RoleInstance::install_only(
                    role.clone(),
                    index,
                    role_name.clone(),
                    device.name().to_owned(),
                ));
                continue;
            }

            match install.run().await {
                Ok(process) => {
                    info!(role = role_name, device = device.name(), "role launched");
                    launched.push(RoleInstance::launched(
                        role.clone(),
                        index,
                        role_name.clone(),
                        process,
                    ));
                }
                Err(err) => {
                    let mut partial = SessionInstance::new(self.id.clone(), launched);
                    partial.kill_all().await;
                    drop(partial);
                    return Err(self.device_failure(device.as_ref(), Stage::Launch, err));
                }
            }
        }

        Ok(SessionInstance::new(self.id.clone(), launched))
    }

    /// Pair every non-null role with a device, constrained roles first.
    fn assign_devices(&self) -> Result<Vec<(usize, Arc<dyn Device>)>> {
        let mut order: Vec<usize> = self
            .roles
            .iter()
            .enumerate()
            .filter(|(_, role)| !role.is_null())
            .map(|(index, _)| index)
            .collect();
        order.sort_by_key(|&index| {
            !self
                .roles
                .get(index)
                .is_some_and(SessionRole::is_constrained)
        });

        let mut available: Vec<Arc<dyn Device>> = self.reservation.devices().to_vec();
        let mut assignments = Vec::with_capacity(order.len());
        for index in order {
            let (Some(role), Some(role_name)) = (self.roles.get(index), self.role_names.get(index))
            else {
                continue;
            };
            let device: Arc<dyn Device> = if role.consumes_device() {
                let position = available
                    .iter()
                    .position(|d| {
                        d.platform() == &role.platform && role.constraint.accepts(d.constraint())
                    })
                    .ok_or_else(|| {
                        AppError::Reservation(format!(
                            "no reserved device fits role {role_name} ({})",
                            role.platform
                        ))
                    })?;
                available.remove(position)
            } else {
                Arc::new(NullDevice::new(role_name, role.platform.clone()))
            };
            debug!(role = role_name, device = device.name(), "device assigned");
            assignments.push((index, device));
        }
        Ok(assignments)
    }

    fn app_config(
        &self,
        role: &SessionRole,
        role_name: &str,
        server_address: Option<&str>,
    ) -> AppConfig {
        let mut command_line = role.command_line.clone();
        command_line.set_value(SESSION_ARG, self.id.clone());
        if role.role_type.is_client() {
            if let Some(address) = server_address {
                command_line.set_value(SERVER_ADDRESS_ARG, address);
            }
        }

        AppConfig {
            session_id: self.id.clone(),
            role_name: role_name.to_owned(),
            files_to_copy: role.files_to_copy.clone(),
            executable: role.executable.clone(),
            force_reinstall: self.options.force_reinstall,
            command_line,
            role: role.clone(),
        }
    }

    async fn install_role(
        &mut self,
        index: usize,
        device: &dyn Device,
        config: &AppConfig,
    ) -> std::result::Result<Arc<dyn AppInstall>, DeviceError> {
        if !self.options.force_reinstall {
            if let Some(cached) = self.install_cache.get(&index) {
                if cached.device_name == device.name() {
                    debug!(role = config.role_name, device = device.name(), "reusing cached install");
                    return Ok(Arc::clone(&cached.install));
                }
            }
        }

        let install = device.install(config).await?;
        self.install_cache.insert(
            index,
            CachedInstall {
                device_name: device.name().to_owned(),
                install: Arc::clone(&install),
            },
        );
        Ok(install)
    }

    fn device_failure(&mut self, device: &dyn Device, stage: Stage, err: DeviceError) -> LaunchFailure {
        let message = format!("{} on {}: {err}", stage_name(stage), device.name());

        if matches!(err, DeviceError::InsufficientSpace(_)) && device.is_desktop_host() {
            self.retries_disabled = true;
            self.invalidate_device(device.name());
            self.reservation.release();
            error!(
                device = device.name(),
                %err,
                "desktop host is out of space; retries disabled for this session"
            );
            return LaunchFailure::Fatal(AppError::Install(message));
        }

        let pooled = self
            .reservation
            .devices()
            .iter()
            .any(|d| d.name() == device.name());
        if pooled {
            warn!(device = device.name(), stage = stage_name(stage), %err, "quarantining device");
            self.reservation.mark_problem(device.name());
        }
        self.invalidate_device(device.name());
        self.reservation.release();

        LaunchFailure::Retryable(match stage {
            Stage::Install => AppError::Install(message),
            Stage::Launch => AppError::Launch(message),
        })
    }

    fn invalidate_device(&mut self, device_name: &str) {
        self.install_cache
            .retain(|_, cached| cached.device_name != device_name);
    }

    /// Stop every running role, gracefully first, then by force.
    pub async fn stop_processes(&mut self) {
        if let Some(instance) = self.instance.as_mut() {
            let span = info_span!("stop_processes", session_id = %self.id);
            instance
                .shutdown(self.options.shutdown_grace)
                .instrument(span)
                .await;
        }
    }

    /// Save every role's output under `dest`.
    ///
    /// Writes `dest/<RoleName>/` with a copy of the role's saved directory,
    /// `dest/<RoleName>Output.log` with its captured output, and a
    /// best-effort `screenshots.gif`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Artifact` if a directory cannot be copied or a log
    /// cannot be written.
    pub fn save_role_artifacts(&self, dest: &Path) -> Result<Vec<RoleArtifacts>> {
        let Some(instance) = self.instance.as_ref() else {
            return Ok(Vec::new());
        };
        fs::create_dir_all(dest).map_err(|err| {
            AppError::Artifact(format!("failed to create {}: {err}", dest.display()))
        })?;

        let mut saved = Vec::with_capacity(instance.len());
        for role in instance.roles() {
            let role_dir = dest.join(role.role_name());
            fs::create_dir_all(&role_dir).map_err(|err| {
                AppError::Artifact(format!("failed to create {}: {err}", role_dir.display()))
            })?;

            if let Some(source) = role.artifact_dir().filter(|dir| dir.is_dir()) {
                copy_dir_recursive(&source, &role_dir)?;
            }

            let log_text = role.stdout().map(|out| out.snapshot()).unwrap_or_default();
            let log_path = dest.join(format!("{}Output.log", role.role_name()));
            fs::write(&log_path, &log_text).map_err(|err| {
                AppError::Artifact(format!("failed to write {}: {err}", log_path.display()))
            })?;

            let screenshot_summary = match screenshots::create_summary(
                &role_dir.join(SCREENSHOT_DIR_NAME),
                &role_dir.join(SUMMARY_FILE_NAME),
            ) {
                Ok(summary) => summary,
                Err(err) => {
                    warn!(role = role.role_name(), %err, "screenshot summary skipped");
                    None
                }
            };

            saved.push(RoleArtifacts {
                role: role.role().clone(),
                role_name: role.role_name().to_owned(),
                device_name: role.device_name().to_owned(),
                artifact_dir: role_dir,
                log_path,
                screenshot_summary,
                exit_code: role.exit_code(),
                stopped_by_orchestrator: role.stopped_by_orchestrator(),
                log_text,
            });
        }

        info!(count = saved.len(), dest = %dest.display(), "role artifacts saved");
        Ok(saved)
    }

    /// Stop every role, dispose the instance and release devices unless
    /// they are retained.
    pub async fn shutdown_session(&mut self) {
        self.stop_processes().await;
        if let Some(mut instance) = self.instance.take() {
            instance.dispose();
        }
        if !self.reservation.is_retaining() {
            let released: Vec<String> = self
                .reservation
                .devices()
                .iter()
                .map(|d| d.name().to_owned())
                .collect();
            for name in &released {
                self.invalidate_device(name);
            }
            self.reservation.release();
        }
        debug!(session_id = self.id, "session shut down");
    }

    /// Release every device, retained or not. Called when the test ends.
    pub fn release_devices(&mut self) {
        self.install_cache.clear();
        self.reservation.release();
    }
}

fn stage_name(stage: Stage) -> &'static str {
    match stage {
        Stage::Install => "install",
        Stage::Launch => "launch",
    }
}

fn copy_dir_recursive(source: &Path, dest: &Path) -> Result<()> {
    let entries = fs::read_dir(source).map_err(|err| {
        AppError::Artifact(format!("failed to read {}: {err}", source.display()))
    })?;
    for entry in entries {
        let entry = entry.map_err(|err| {
            AppError::Artifact(format!("failed to read {}: {err}", source.display()))
        })?;
        let path = entry.path();
        let target = dest.join(entry.file_name());
        if path.is_dir() {
            fs::create_dir_all(&target).map_err(|err| {
                AppError::Artifact(format!("failed to create {}: {err}", target.display()))
            })?;
            copy_dir_recursive(&path, &target)?;
        } else {
            fs::copy(&path, &target).map_err(|err| {
                AppError::Artifact(format!("failed to copy {}: {err}", path.display()))
            })?;
        }
    }
    Ok(())
}
