//! Synthetic device for roles that consume no hardware.
//!
//! `Dummy` roles are "launched" here: the resulting process produces no
//! output and stays alive until the orchestrator stops it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::{
    AppConfig, AppInstall, AppProcess, BoxFuture, Device, DeviceResult, OutputBuffer,
};
use crate::models::role::{DeviceConstraint, Platform};

/// Device that never touches real hardware.
#[derive(Debug, Clone)]
pub struct NullDevice {
    name: String,
    platform: Platform,
    constraint: DeviceConstraint,
}

impl NullDevice {
    /// Synthetic device standing in for `role_name` on `platform`.
    #[must_use]
    pub fn new(role_name: &str, platform: Platform) -> Self {
        Self {
            name: format!("null-{}", role_name.to_ascii_lowercase()),
            platform,
            constraint: DeviceConstraint::any(),
        }
    }
}

impl Device for NullDevice {
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
        "127.0.0.1".into()
    }

    fn is_desktop_host(&self) -> bool {
        false
    }

    fn install<'a>(
        &'a self,
        _config: &'a AppConfig,
    ) -> BoxFuture<'a, DeviceResult<Arc<dyn AppInstall>>> {
        let install: Arc<dyn AppInstall> = Arc::new(NullInstall {
            device_name: self.name.clone(),
        });
        Box::pin(async move { Ok(install) })
    }
}

/// Install handle on a [`NullDevice`].
#[derive(Debug)]
pub struct NullInstall {
    device_name: String,
}

impl AppInstall for NullInstall {
    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn run(&self) -> BoxFuture<'_, DeviceResult<Box<dyn AppProcess>>> {
        let process: Box<dyn AppProcess> = Box::new(NullProcess {
            device_name: self.device_name.clone(),
            output: OutputBuffer::new(),
            stopped: false,
        });
        Box::pin(async move { Ok(process) })
    }
}

/// Process that idles until stopped.
#[derive(Debug)]
pub struct NullProcess {
    device_name: String,
    output: OutputBuffer,
    stopped: bool,
}

impl AppProcess for NullProcess {
    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn has_exited(&mut self) -> bool {
        self.stopped
    }

    fn exit_code(&self) -> Option<i32> {
        self.stopped.then_some(0)
    }

    fn stdout(&self) -> &OutputBuffer {
        &self.output
    }

    fn was_killed(&self) -> bool {
        self.stopped
    }

    fn artifact_dir(&self) -> Option<PathBuf> {
        None
    }

    fn request_stop(&mut self) -> DeviceResult<()> {
        self.stopped = true;
        Ok(())
    }

    fn kill(&mut self) -> BoxFuture<'_, DeviceResult<()>> {
        self.stopped = true;
        Box::pin(async { Ok(()) })
    }

    fn wait_for_exit(&mut self, _timeout: Duration) -> BoxFuture<'_, bool> {
        let exited = self.stopped;
        Box::pin(async move { exited })
    }
}
