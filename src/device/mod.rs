//! Device abstraction consumed by the session orchestrator.
//!
//! A [`Device`] installs an [`AppConfig`] and yields an [`AppInstall`];
//! running the install yields an [`AppProcess`] that the orchestrator polls
//! for liveness and reads output from. Devices are handed out by a
//! [`DevicePool`], the only resource shared across sessions.

pub mod local;
pub mod null;
pub mod output;
pub mod pool;

use std::fmt::{Debug, Display, Formatter};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::models::role::{CommandLine, DeviceConstraint, FileToCopy, Platform, SessionRole};

pub use local::LocalDevice;
pub use null::NullDevice;
pub use output::OutputBuffer;
pub use pool::StaticDevicePool;

/// Boxed future returned by device operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type of device operations.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Failure reported by a device or device pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device ran out of storage while installing.
    InsufficientSpace(String),
    /// No device (or not enough devices) currently satisfies the request.
    Unavailable(String),
    /// Any other device-attributable failure.
    Failed(String),
}

impl Display for DeviceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientSpace(msg) => write!(f, "insufficient space: {msg}"),
            Self::Unavailable(msg) => write!(f, "unavailable: {msg}"),
            Self::Failed(msg) => write!(f, "device failure: {msg}"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Application configuration installed on a device for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Session the install belongs to.
    pub session_id: String,
    /// Unique, human-readable role name within the session (e.g. `Client2`).
    pub role_name: String,
    /// Role being installed.
    pub role: SessionRole,
    /// Final command line including sibling-role context.
    pub command_line: CommandLine,
    /// Files copied next to the build.
    pub files_to_copy: Vec<FileToCopy>,
    /// Executable launched by [`AppInstall::run`].
    pub executable: Option<PathBuf>,
    /// Discard any previous install of this role.
    pub force_reinstall: bool,
}

/// One device that can host a role.
pub trait Device: Send + Sync + Debug {
    /// Unique device name.
    fn name(&self) -> &str;

    /// Platform of the device.
    fn platform(&self) -> &Platform;

    /// Constraint tag of the device.
    fn constraint(&self) -> &DeviceConstraint;

    /// Network address sibling roles use to reach this device.
    fn address(&self) -> String;

    /// Whether the device is the orchestrating desktop host itself.
    fn is_desktop_host(&self) -> bool;

    /// Install the application described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::InsufficientSpace`] when storage runs out, or
    /// [`DeviceError::Failed`] for any other install failure.
    fn install<'a>(
        &'a self,
        config: &'a AppConfig,
    ) -> BoxFuture<'a, DeviceResult<Arc<dyn AppInstall>>>;
}

/// An installed application, ready to be launched.
pub trait AppInstall: Send + Sync + Debug {
    /// Name of the device holding the install.
    fn device_name(&self) -> &str;

    /// Launch the installed application.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Failed`] if the process cannot be started.
    fn run(&self) -> BoxFuture<'_, DeviceResult<Box<dyn AppProcess>>>;
}

/// A running (or exited) role process.
pub trait AppProcess: Send + Debug {
    /// Name of the device running the process.
    fn device_name(&self) -> &str;

    /// Poll whether the process has exited.
    fn has_exited(&mut self) -> bool;

    /// Exit code, once exited and if the platform reports one.
    fn exit_code(&self) -> Option<i32>;

    /// Append-only captured output of the process.
    fn stdout(&self) -> &OutputBuffer;

    /// Whether the orchestrator ended the process, by a stop request or a
    /// kill.
    fn was_killed(&self) -> bool;

    /// Directory holding the process's saved output, if any.
    fn artifact_dir(&self) -> Option<PathBuf>;

    /// Ask the process to stop on its own.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Failed`] if the stop request cannot be delivered.
    fn request_stop(&mut self) -> DeviceResult<()> {
        Ok(())
    }

    /// Forcefully terminate the process.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Failed`] if the process cannot be killed.
    fn kill(&mut self) -> BoxFuture<'_, DeviceResult<()>>;

    /// Wait up to `timeout` for the process to exit; `true` once exited.
    fn wait_for_exit(&mut self, timeout: Duration) -> BoxFuture<'_, bool>;
}

/// Request for `count` devices of a platform satisfying a constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstraintRequest {
    /// Required platform.
    pub platform: Platform,
    /// Required constraint; empty accepts any device of the platform.
    pub constraint: DeviceConstraint,
    /// Number of devices.
    pub count: usize,
}

impl ConstraintRequest {
    /// Whether `device` satisfies this request's platform and constraint.
    #[must_use]
    pub fn accepts(&self, device: &dyn Device) -> bool {
        device.platform() == &self.platform && self.constraint.accepts(device.constraint())
    }
}

/// Shared pool of devices.
///
/// Reservation is all-or-nothing: either every request is satisfied or no
/// device changes hands.
pub trait DevicePool: Send + Sync {
    /// Reserve devices satisfying every request, skipping `exclude`d names.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Unavailable`] if the requests cannot be met.
    fn reserve(
        &self,
        requests: &[ConstraintRequest],
        exclude: &[String],
    ) -> DeviceResult<Vec<Arc<dyn Device>>>;

    /// Return devices to the pool.
    fn release(&self, devices: &[Arc<dyn Device>]);

    /// Quarantine a device for the rest of the run.
    fn mark_problem(&self, device_name: &str);
}
