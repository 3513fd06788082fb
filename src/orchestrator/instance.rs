//! Live role processes of one session launch.

use std::path::PathBuf;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::device::{AppProcess, OutputBuffer};
use crate::models::role::SessionRole;

/// One launched (or install-only) role.
#[derive(Debug)]
pub struct RoleInstance {
    role: SessionRole,
    role_index: usize,
    role_name: String,
    device_name: String,
    process: Option<Box<dyn AppProcess>>,
    exit_observed: bool,
}

impl RoleInstance {
    /// Instance holding a running process.
    #[must_use]
    pub fn launched(
        role: SessionRole,
        role_index: usize,
        role_name: String,
        process: Box<dyn AppProcess>,
    ) -> Self {
        Self {
            device_name: process.device_name().to_owned(),
            role,
            role_index,
            role_name,
            process: Some(process),
            exit_observed: false,
        }
    }

    /// Instance for a role that was installed but not launched.
    #[must_use]
    pub fn install_only(
        role: SessionRole,
        role_index: usize,
        role_name: String,
        device_name: String,
    ) -> Self {
        Self {
            role,
            role_index,
            role_name,
            device_name,
            process: None,
            exit_observed: false,
        }
    }

    /// Role description.
    #[must_use]
    pub fn role(&self) -> &SessionRole {
        &self.role
    }

    /// Position of the role in the test's role list.
    #[must_use]
    pub fn role_index(&self) -> usize {
        self.role_index
    }

    /// Unique role name within the session.
    #[must_use]
    pub fn role_name(&self) -> &str {
        &self.role_name
    }

    /// Device hosting the role.
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Whether a process was launched for the role.
    #[must_use]
    pub fn has_process(&self) -> bool {
        self.process.is_some()
    }

    fn is_evaluated_process(&self) -> bool {
        self.process.is_some() && !self.role.is_dummy()
    }

    /// Whether the role's process is alive. Install-only roles never are.
    pub fn is_running(&mut self) -> bool {
        let Some(process) = self.process.as_mut() else {
            return false;
        };
        if process.has_exited() {
            self.exit_observed = true;
            return false;
        }
        true
    }

    /// Whether a liveness query has seen the process exit.
    #[must_use]
    pub fn exit_observed(&self) -> bool {
        self.exit_observed
    }

    /// Captured output, if a process was launched.
    #[must_use]
    pub fn stdout(&self) -> Option<&OutputBuffer> {
        self.process.as_deref().map(AppProcess::stdout)
    }

    /// Exit code of the process, once exited.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.process.as_deref().and_then(AppProcess::exit_code)
    }

    /// Directory holding the process's saved output.
    #[must_use]
    pub fn artifact_dir(&self) -> Option<PathBuf> {
        self.process.as_deref().and_then(AppProcess::artifact_dir)
    }

    /// Whether the orchestrator ended the process.
    #[must_use]
    pub fn stopped_by_orchestrator(&self) -> bool {
        self.process.as_deref().is_some_and(AppProcess::was_killed)
    }

    /// Stop the process: graceful request, bounded wait, then kill.
    ///
    /// A process that already exited is only waited on so its output
    /// readers drain.
    pub async fn stop(&mut self, grace: Duration) {
        let Some(process) = self.process.as_mut() else {
            return;
        };

        if process.has_exited() {
            process.wait_for_exit(grace).await;
            return;
        }

        if let Err(err) = process.request_stop() {
            warn!(role = self.role_name, %err, "graceful stop request failed");
        }
        if process.wait_for_exit(grace).await {
            info!(role = self.role_name, "role stopped gracefully");
            return;
        }

        warn!(
            role = self.role_name,
            grace_secs = grace.as_secs(),
            "role did not stop within grace period; killing"
        );
        if let Err(err) = process.kill().await {
            warn!(role = self.role_name, %err, "failed to kill role process");
        }
    }

    /// Kill a still-running process without waiting for it to exit.
    async fn kill(&mut self) {
        if let Some(process) = self.process.as_mut() {
            if !process.has_exited() {
                if let Err(err) = process.kill().await {
                    warn!(role = self.role_name, %err, "failed to kill role process");
                }
            }
        }
    }
}

/// Every role instance of one launch pass.
#[derive(Debug)]
pub struct SessionInstance {
    session_id: String,
    roles: Vec<RoleInstance>,
}

impl SessionInstance {
    /// Instance over launched roles, ordered by role index.
    #[must_use]
    pub fn new(session_id: String, mut roles: Vec<RoleInstance>) -> Self {
        roles.sort_by_key(RoleInstance::role_index);
        Self { session_id, roles }
    }

    /// Session id.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Role instances.
    #[must_use]
    pub fn roles(&self) -> &[RoleInstance] {
        &self.roles
    }

    /// Mutable role instances.
    pub fn roles_mut(&mut self) -> &mut [RoleInstance] {
        &mut self.roles
    }

    /// Number of role instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Whether the instance has no roles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Whether every launched client role is alive; `false` without clients.
    pub fn clients_running(&mut self) -> bool {
        let mut clients = self
            .roles
            .iter_mut()
            .filter(|r| r.role.role_type.is_client() && r.has_process())
            .peekable();
        if clients.peek().is_none() {
            return false;
        }
        clients.all(RoleInstance::is_running)
    }

    /// Whether any server role is alive.
    pub fn server_running(&mut self) -> bool {
        self.roles
            .iter_mut()
            .filter(|r| r.role.role_type.is_server())
            .any(RoleInstance::is_running)
    }

    /// Whether any role is alive.
    pub fn any_running(&mut self) -> bool {
        self.roles.iter_mut().any(RoleInstance::is_running)
    }

    /// Number of evaluated launched roles whose process has exited.
    /// Dummy roles are not counted.
    pub fn exited_count(&mut self) -> usize {
        self.roles
            .iter_mut()
            .filter(|r| r.is_evaluated_process())
            .map(|r| !r.is_running())
            .filter(|exited| *exited)
            .count()
    }

    /// Number of evaluated launched roles.
    #[must_use]
    pub fn launched_count(&self) -> usize {
        self.roles.iter().filter(|r| r.is_evaluated_process()).count()
    }

    /// Whether every evaluated launched role has exited.
    pub fn all_exited(&mut self) -> bool {
        self.exited_count() == self.launched_count()
    }

    /// Stop every role concurrently within `grace`.
    pub async fn shutdown(&mut self, grace: Duration) {
        join_all(self.roles.iter_mut().map(|r| r.stop(grace))).await;
        debug!(session_id = self.session_id, "session instance shut down");
    }

    /// Kill every role still running, without a graceful stop.
    pub async fn kill_all(&mut self) {
        join_all(self.roles.iter_mut().map(|r| r.kill())).await;
    }

    /// Release every process handle; running processes are killed on drop.
    pub fn dispose(&mut self) {
        let mut running = 0_usize;
        for role in &mut self.roles {
            if let Some(mut process) = role.process.take() {
                if !process.has_exited() {
                    running += 1;
                }
            }
        }
        if running > 0 {
            warn!(
                session_id = self.session_id,
                running, "disposing session instance with running roles"
            );
        }
        self.roles.clear();
    }
}

impl Drop for SessionInstance {
    fn drop(&mut self) {
        self.dispose();
    }
}
