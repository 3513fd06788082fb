//! Global configuration parsing and validation.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::log_summary::parser::LogMarkers;
use crate::models::role::{DeviceConstraint, Platform, SessionRole};
use crate::{AppError, Result};

/// Heartbeat enforcement thresholds (seconds; `0` disables a check).
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HeartbeatConfig {
    /// Whether heartbeat timeouts end the test.
    #[serde(default)]
    pub enabled: bool,
    /// Maximum time from session start to the first active heartbeat.
    #[serde(default)]
    pub timeout_for_first_active_heartbeat: u64,
    /// Maximum time between two active heartbeats.
    #[serde(default)]
    pub timeout_between_active_heartbeats: u64,
    /// Maximum time between any two heartbeats.
    #[serde(default)]
    pub timeout_between_any_heartbeats: u64,
}

/// Which monitored-category log entries are promoted into the report.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventVerbosity {
    /// Only fatal errors and ensures.
    #[default]
    FatalAndEnsure,
    /// Also every warning and error in monitored categories.
    AllWarningsAndErrors,
}

fn default_true() -> bool {
    true
}

fn default_max_duration() -> u64 {
    600
}

fn default_exit_grace_period() -> u64 {
    15
}

fn default_max_launch_attempts() -> u32 {
    2
}

fn default_reservation_attempts() -> u32 {
    5
}

fn default_reservation_retry_delay() -> u64 {
    5
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_tick_interval_ms() -> u64 {
    500
}

fn default_report_file() -> String {
    "report.json".into()
}

/// Configuration of one test: its roles, budgets and evaluation rules.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TestConfig {
    /// Registered test name.
    pub name: String,
    /// Roles participating in every pass.
    pub roles: Vec<SessionRole>,
    /// Longest a pass may run before it is stopped as timed out.
    #[serde(default = "default_max_duration")]
    pub max_duration_seconds: u64,
    /// Number of times a pass may be retried.
    #[serde(default)]
    pub max_retries: u32,
    /// Retry a pass when a role fails to initialize.
    #[serde(default = "default_true")]
    pub retry_on_initialization_failure: bool,
    /// Heartbeat enforcement.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Wait after the first role exits before ending the pass.
    #[serde(default = "default_exit_grace_period")]
    pub exit_grace_period_seconds: u64,
    /// Keep ticking until every role has exited.
    #[serde(default)]
    pub wait_for_all_roles_to_exit: bool,
    /// Classify roles that hit an ensure as failed.
    #[serde(default)]
    pub treat_ensures_as_fatal: bool,
    /// Promotion level for monitored-category entries.
    #[serde(default)]
    pub event_verbosity: EventVerbosity,
    /// Log categories surfaced while ticking, in addition to `Gauntlet`.
    #[serde(default)]
    pub attention_categories: Vec<String>,
    /// Downgrade a pass to failed when an error event was promoted.
    #[serde(default)]
    pub fail_on_promoted_errors: bool,
    /// Keep reserved devices across passes and retries.
    #[serde(default)]
    pub retain_devices: bool,
    /// Session launch attempts before giving up.
    #[serde(default = "default_max_launch_attempts")]
    pub max_launch_attempts: u32,
    /// Device reservation attempts per launch attempt.
    #[serde(default = "default_reservation_attempts")]
    pub reservation_attempts: u32,
    /// Delay between reservation attempts.
    #[serde(default = "default_reservation_retry_delay")]
    pub reservation_retry_delay_seconds: u64,
    /// Time a stopping role gets to exit before it is killed.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
    /// Reinstall every role at the start of each pass.
    #[serde(default)]
    pub reinstall_per_pass: bool,
    /// Discard existing installs on every install.
    #[serde(default)]
    pub force_reinstall: bool,
    /// Project name reported as metadata.
    #[serde(default)]
    pub project: Option<String>,
    /// Build target reported as metadata.
    #[serde(default)]
    pub build_target: Option<String>,
}

impl TestConfig {
    /// Test configuration with default budgets.
    #[must_use]
    pub fn new(name: impl Into<String>, roles: Vec<SessionRole>) -> Self {
        Self {
            name: name.into(),
            roles,
            max_duration_seconds: default_max_duration(),
            max_retries: 0,
            retry_on_initialization_failure: true,
            heartbeat: HeartbeatConfig::default(),
            exit_grace_period_seconds: default_exit_grace_period(),
            wait_for_all_roles_to_exit: false,
            treat_ensures_as_fatal: false,
            event_verbosity: EventVerbosity::default(),
            attention_categories: Vec::new(),
            fail_on_promoted_errors: false,
            retain_devices: false,
            max_launch_attempts: default_max_launch_attempts(),
            reservation_attempts: default_reservation_attempts(),
            reservation_retry_delay_seconds: default_reservation_retry_delay(),
            shutdown_grace_seconds: default_shutdown_grace(),
            reinstall_per_pass: false,
            force_reinstall: false,
            project: None,
            build_target: None,
        }
    }

    /// Maximum pass duration.
    #[must_use]
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_seconds)
    }

    /// Grace window after the first role exits.
    #[must_use]
    pub fn exit_grace_period(&self) -> Duration {
        Duration::from_secs(self.exit_grace_period_seconds)
    }

    /// Delay between reservation attempts.
    #[must_use]
    pub fn reservation_retry_delay(&self) -> Duration {
        Duration::from_secs(self.reservation_retry_delay_seconds)
    }

    /// Grace period for stopping roles.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Validate budgets and roles.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::Config("test name must not be empty".into()));
        }
        if self.roles.is_empty() {
            return Err(AppError::Config("test must declare at least one role".into()));
        }
        if self.roles.iter().all(SessionRole::is_null) {
            return Err(AppError::Config(
                "test must declare at least one role that is not null".into(),
            ));
        }
        if self.max_launch_attempts == 0 {
            return Err(AppError::Config(
                "max_launch_attempts must be greater than zero".into(),
            ));
        }
        if self.reservation_attempts == 0 {
            return Err(AppError::Config(
                "reservation_attempts must be greater than zero".into(),
            ));
        }
        if self.max_duration_seconds == 0 {
            return Err(AppError::Config(
                "max_duration_seconds must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// A device available to the pool.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DeviceConfig {
    /// Unique device name.
    pub name: String,
    /// Device platform.
    pub platform: Platform,
    /// Constraint tag of the device.
    #[serde(default)]
    pub constraint: DeviceConstraint,
    /// Address advertised to sibling roles.
    #[serde(default)]
    pub address: Option<String>,
    /// Install directory; defaults to `<sandbox_root>/<name>`.
    #[serde(default)]
    pub sandbox_root: Option<PathBuf>,
}

/// Report output settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ReportConfig {
    /// File name of the per-pass JSON report.
    #[serde(default = "default_report_file")]
    pub file_name: String,
    /// Directory for the daily JSONL report history; disabled when absent.
    #[serde(default)]
    pub history_dir: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            file_name: default_report_file(),
            history_dir: None,
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Root under which every pass gets its artifact directory.
    pub artifact_root: PathBuf,
    /// Root for local device install directories; defaults to `<artifact_root>/.sandbox`.
    #[serde(default)]
    pub sandbox_root: Option<PathBuf>,
    /// Interval between cooperative ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// The test to run.
    pub test: TestConfig,
    /// Devices in the pool.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    /// Report output.
    #[serde(default)]
    pub report: ReportConfig,
    /// Log marker patterns.
    #[serde(default)]
    pub log_markers: LogMarkers,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Interval between cooperative ticks.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Root for local device install directories.
    #[must_use]
    pub fn sandbox_root(&self) -> PathBuf {
        self.sandbox_root
            .clone()
            .unwrap_or_else(|| self.artifact_root.join(".sandbox"))
    }

    /// Install directory of a configured device.
    #[must_use]
    pub fn device_sandbox(&self, device: &DeviceConfig) -> PathBuf {
        device
            .sandbox_root
            .clone()
            .unwrap_or_else(|| self.sandbox_root().join(&device.name))
    }

    fn validate(&mut self) -> Result<()> {
        self.test.validate()?;

        if self.tick_interval_ms == 0 {
            return Err(AppError::Config(
                "tick_interval_ms must be greater than zero".into(),
            ));
        }

        let mut names = HashSet::new();
        for device in &self.devices {
            if !names.insert(device.name.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate device name: {}",
                    device.name
                )));
            }
        }

        fs::create_dir_all(&self.artifact_root)
            .map_err(|err| AppError::Config(format!("artifact_root invalid: {err}")))?;
        let canonical_root = self
            .artifact_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("artifact_root invalid: {err}")))?;
        self.artifact_root = canonical_root;

        Ok(())
    }
}
