//! Desktop-host device: installs into a sandbox directory and launches roles
//! as local child processes.
//!
//! Each process is spawned with `kill_on_drop(true)` and an allowlisted
//! environment. Background reader tasks append stdout and stderr lines to
//! the process's [`OutputBuffer`] so the orchestrator can read them
//! incrementally without blocking.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    AppConfig, AppInstall, AppProcess, BoxFuture, Device, DeviceError, DeviceResult,
    OutputBuffer,
};
use crate::models::role::{DeviceConstraint, Platform};

/// Environment variables inherited by launched role processes.
///
/// Everything else is stripped via `env_clear()`; orchestrator-specific
/// variables are injected explicitly.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "TMPDIR",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Directory (under the install directory) a role writes its output to.
pub const SAVED_DIR_NAME: &str = "Saved";

/// How long to wait for reader tasks to drain after the process exits.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn io_failure(context: &str, err: &std::io::Error) -> DeviceError {
    if err.kind() == ErrorKind::StorageFull {
        DeviceError::InsufficientSpace(format!("{context}: {err}"))
    } else {
        DeviceError::Failed(format!("{context}: {err}"))
    }
}

/// The orchestrating machine itself, used as a device.
#[derive(Debug, Clone)]
pub struct LocalDevice {
    name: String,
    platform: Platform,
    constraint: DeviceConstraint,
    sandbox_root: PathBuf,
    address: String,
}

impl LocalDevice {
    /// Local device installing under `sandbox_root`.
    #[must_use]
    pub fn new(name: impl Into<String>, platform: Platform, sandbox_root: PathBuf) -> Self {
        Self {
            name: name.into(),
            platform,
            constraint: DeviceConstraint::any(),
            sandbox_root,
            address: "127.0.0.1".into(),
        }
    }

    /// Set the constraint tag.
    #[must_use]
    pub fn with_constraint(mut self, constraint: DeviceConstraint) -> Self {
        self.constraint = constraint;
        self
    }

    /// Set the address advertised to sibling roles.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Install directory for a role of a session.
    #[must_use]
    pub fn install_dir(&self, session_id: &str, role_name: &str) -> PathBuf {
        self.sandbox_root.join(session_id).join(role_name)
    }
}

impl Device for LocalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> &Platform {
        &self.platform
    }

    fn constraint(&self) -> &DeviceConstraint {
        &self.constraint
    }

    fn address(&self) -> String {
        self.address.clone()
    }

    fn is_desktop_host(&self) -> bool {
        true
    }

    fn install<'a>(
        &'a self,
        config: &'a AppConfig,
    ) -> BoxFuture<'a, DeviceResult<Arc<dyn AppInstall>>> {
        Box::pin(async move {
            let dir = self.install_dir(&config.session_id, &config.role_name);

            if config.force_reinstall && dir.exists() {
                tokio::fs::remove_dir_all(&dir)
                    .await
                    .map_err(|err| io_failure("failed to clear previous install", &err))?;
            }

            let saved_dir = dir.join(SAVED_DIR_NAME);
            tokio::fs::create_dir_all(&saved_dir)
                .await
                .map_err(|err| io_failure("failed to create install directory", &err))?;

            let executable = config.executable.clone().ok_or_else(|| {
                DeviceError::Failed(format!("role {} has no executable", config.role_name))
            })?;
            // Bare program names are resolved through PATH at launch.
            if executable.components().count() > 1 && !executable.exists() {
                return Err(DeviceError::Failed(format!(
                    "executable {} does not exist",
                    executable.display()
                )));
            }

            for file in &config.files_to_copy {
                copy_matching(&file.source, &dir.join(&file.destination)).await?;
            }

            info!(
                device = self.name,
                role = config.role_name,
                dir = %dir.display(),
                "role installed on local device"
            );

            let install: Arc<dyn AppInstall> = Arc::new(LocalInstall {
                device_name: self.name.clone(),
                dir,
                saved_dir,
                executable,
                args: config.command_line.to_args(),
                session_id: config.session_id.clone(),
                role_name: config.role_name.clone(),
            });
            Ok(install)
        })
    }
}

/// Copy every file matching `pattern` to `destination`.
///
/// A single literal source is copied to `destination` itself; wildcard
/// patterns copy each match into the `destination` directory.
async fn copy_matching(pattern: &Path, destination: &Path) -> DeviceResult<()> {
    let pattern_str = pattern.to_string_lossy();
    let is_glob = pattern_str.contains(['*', '?', '[']);
    let matches: Vec<PathBuf> = glob::glob(&pattern_str)
        .map_err(|err| DeviceError::Failed(format!("invalid file pattern {pattern_str}: {err}")))?
        .filter_map(std::result::Result::ok)
        .filter(|p| p.is_file())
        .collect();

    if matches.is_empty() {
        return Err(DeviceError::Failed(format!(
            "no files match {pattern_str}"
        )));
    }

    for source in matches {
        let target = if is_glob {
            match source.file_name() {
                Some(name) => destination.join(name),
                None => continue,
            }
        } else {
            destination.to_path_buf()
        };
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| io_failure("failed to create copy destination", &err))?;
        }
        tokio::fs::copy(&source, &target)
            .await
            .map_err(|err| io_failure(&format!("failed to copy {}", source.display()), &err))?;
        debug!(source = %source.display(), target = %target.display(), "copied file");
    }
    Ok(())
}

/// A role installed in a local sandbox directory.
#[derive(Debug)]
pub struct LocalInstall {
    device_name: String,
    dir: PathBuf,
    saved_dir: PathBuf,
    executable: PathBuf,
    args: Vec<String>,
    session_id: String,
    role_name: String,
}

impl AppInstall for LocalInstall {
    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn run(&self) -> BoxFuture<'_, DeviceResult<Box<dyn AppProcess>>> {
        Box::pin(async move {
            let mut cmd = Command::new(&self.executable);
            cmd.args(&self.args);

            // Strip inherited environment, then inject only the safe allowlist.
            cmd.env_clear();
            for &key in ALLOWED_ENV_VARS {
                if let Ok(val) = std::env::var(key) {
                    cmd.env(key, val);
                }
            }
            cmd.env("GAUNTLET_SESSION_ID", &self.session_id)
                .env("GAUNTLET_ROLE", &self.role_name)
                .env("GAUNTLET_SAVED_DIR", &self.saved_dir);

            cmd.current_dir(&self.dir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let mut child = cmd.spawn().map_err(|err| {
                DeviceError::Failed(format!(
                    "failed to spawn {}: {err}",
                    self.executable.display()
                ))
            })?;

            let output = OutputBuffer::new();
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| DeviceError::Failed("failed to capture stdout".into()))?;
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| DeviceError::Failed("failed to capture stderr".into()))?;
            let readers = vec![
                spawn_reader(stdout, output.clone()),
                spawn_reader(stderr, output.clone()),
            ];

            info!(
                device = self.device_name,
                role = self.role_name,
                pid = child.id().unwrap_or(0),
                "role process launched"
            );

            let process: Box<dyn AppProcess> = Box::new(LocalProcess {
                device_name: self.device_name.clone(),
                child,
                output,
                exit_code: None,
                exited: false,
                killed: false,
                saved_dir: self.saved_dir.clone(),
                readers,
            });
            Ok(process)
        })
    }
}

/// Spawn a task that appends every line of `reader` to `buffer`.
fn spawn_reader<R>(reader: R, buffer: OutputBuffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => buffer.append_line(&line),
                Ok(None) => break,
                Err(err) => {
                    debug!(%err, "stopped reading process output");
                    break;
                }
            }
        }
    })
}

/// A role process running on the local host.
#[derive(Debug)]
pub struct LocalProcess {
    device_name: String,
    child: Child,
    output: OutputBuffer,
    exit_code: Option<i32>,
    exited: bool,
    killed: bool,
    saved_dir: PathBuf,
    readers: Vec<JoinHandle<()>>,
}

impl LocalProcess {
    fn record_exit(&mut self, status: std::process::ExitStatus) {
        self.exited = true;
        self.exit_code = status.code();
    }

    async fn drain_readers(&mut self) {
        for handle in self.readers.drain(..) {
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, handle)
                .await
                .is_err()
            {
                warn!(device = self.device_name, "output reader did not drain in time");
            }
        }
    }
}

impl AppProcess for LocalProcess {
    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn has_exited(&mut self) -> bool {
        if self.exited {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.record_exit(status);
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(device = self.device_name, %err, "failed to poll role process status");
                // Treat as exited so the dead entry gets cleaned up.
                self.exited = true;
                true
            }
        }
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    fn stdout(&self) -> &OutputBuffer {
        &self.output
    }

    fn was_killed(&self) -> bool {
        self.killed
    }

    fn artifact_dir(&self) -> Option<PathBuf> {
        Some(self.saved_dir.clone())
    }

    #[cfg(unix)]
    fn request_stop(&mut self) -> DeviceResult<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let pid = i32::try_from(pid)
            .map_err(|err| DeviceError::Failed(format!("invalid pid {pid}: {err}")))?;
        kill(Pid::from_raw(pid), Signal::SIGTERM)
            .map_err(|err| DeviceError::Failed(format!("failed to signal process: {err}")))?;
        self.killed = true;
        Ok(())
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) -> DeviceResult<()> {
        self.child
            .start_kill()
            .map_err(|err| DeviceError::Failed(format!("failed to stop process: {err}")))?;
        self.killed = true;
        Ok(())
    }

    fn kill(&mut self) -> BoxFuture<'_, DeviceResult<()>> {
        Box::pin(async move {
            if self.has_exited() {
                return Ok(());
            }
            self.child
                .kill()
                .await
                .map_err(|err| DeviceError::Failed(format!("failed to kill process: {err}")))?;
            self.killed = true;
            if let Ok(Some(status)) = self.child.try_wait() {
                self.record_exit(status);
            } else {
                self.exited = true;
            }
            self.drain_readers().await;
            Ok(())
        })
    }

    fn wait_for_exit(&mut self, timeout: Duration) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            if !self.exited {
                match tokio::time::timeout(timeout, self.child.wait()).await {
                    Ok(Ok(status)) => self.record_exit(status),
                    Ok(Err(err)) => {
                        warn!(device = self.device_name, %err, "error waiting for role process");
                        self.exited = true;
                    }
                    Err(_elapsed) => return false,
                }
            }
            self.drain_readers().await;
            true
        })
    }
}
