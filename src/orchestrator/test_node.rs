//! Lifecycle of one test across passes and retries.
//!
//! A [`TestNode`] is driven from outside: [`is_ready_to_start`](TestNode::is_ready_to_start)
//! until devices are available, [`start_test`](TestNode::start_test), then
//! [`tick_test`](TestNode::tick_test) while in progress, then
//! [`stop_test`](TestNode::stop_test) for the verdict, and
//! [`restart_test`](TestNode::restart_test) when the verdict is
//! [`TestResult::WantRetry`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::artifact_paths::{canonical_dir_name, ArtifactPathRegistry};
use super::classify::{self, ClassifyOptions, GAUNTLET_CATEGORY};
use super::heartbeat::HeartbeatMonitor;
use super::output_cursor::OutputCursor;
use super::session::{Session, SessionOptions};
use crate::config::TestConfig;
use crate::device::DevicePool;
use crate::log_summary::{same_category, LogEntry, LogSeverity, LogSummarizer};
use crate::models::result::{RoleResult, RoleResultKind, StopReason, TestResult};
use crate::registry::TestDefinition;
use crate::report::{ReportMetadata, ReportSink, TestReport};
use crate::{AppError, Result};

/// Process-wide collaborators shared by every test node.
#[derive(Clone)]
pub struct TestContext {
    /// Device pool.
    pub pool: Arc<dyn DevicePool>,
    /// Log summarizer.
    pub summarizer: Arc<dyn LogSummarizer>,
    /// Primary report destination.
    pub report_sink: Arc<dyn ReportSink>,
    /// Destination used when the primary sink fails.
    pub fallback_sink: Arc<dyn ReportSink>,
    /// Claimed artifact directories.
    pub artifact_paths: Arc<ArtifactPathRegistry>,
    /// Root of every pass directory.
    pub artifact_root: PathBuf,
    /// Run cancellation.
    pub cancel: CancellationToken,
}

/// Progress of the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    /// Not launched yet.
    NotStarted,
    /// Roles are running and being ticked.
    InProgress,
    /// The pass has ended; a verdict is pending or available.
    Complete,
}

/// State machine of one test.
pub struct TestNode {
    config: TestConfig,
    definition: Box<dyn TestDefinition>,
    context: TestContext,
    session: Option<Session>,
    attention_categories: Vec<String>,
    status: TestStatus,
    result: TestResult,
    stop_reason: Option<StopReason>,
    pass: u32,
    total_passes: u32,
    retries: u32,
    artifact_dir: Option<PathBuf>,
    claimed_dirs: Vec<PathBuf>,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    first_exit_at: Option<Instant>,
    heartbeat: HeartbeatMonitor,
    cursors: Vec<OutputCursor>,
    role_results: Vec<RoleResult>,
    last_report: Option<TestReport>,
}

impl TestNode {
    /// Node for `definition` configured by `config`.
    #[must_use]
    pub fn new(
        config: TestConfig,
        definition: Box<dyn TestDefinition>,
        context: TestContext,
    ) -> Self {
        let now = Instant::now();
        Self {
            heartbeat: HeartbeatMonitor::new(&config.heartbeat, now),
            config,
            definition,
            context,
            session: None,
            attention_categories: Vec::new(),
            status: TestStatus::NotStarted,
            result: TestResult::Invalid,
            stop_reason: None,
            pass: 0,
            total_passes: 0,
            retries: 0,
            artifact_dir: None,
            claimed_dirs: Vec::new(),
            started_at: now,
            started_wall: Utc::now(),
            first_exit_at: None,
            cursors: Vec::new(),
            role_results: Vec::new(),
            last_report: None,
        }
    }

    /// Registered test name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> TestStatus {
        self.status
    }

    /// Verdict of the last pass, or [`TestResult::Invalid`] before one.
    #[must_use]
    pub fn test_result(&self) -> TestResult {
        self.result
    }

    /// Why the current pass ended, once it has.
    #[must_use]
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Role results of the last evaluated pass, problem roles last.
    #[must_use]
    pub fn role_results(&self) -> &[RoleResult] {
        &self.role_results
    }

    /// Artifact directory of the current pass.
    #[must_use]
    pub fn artifact_dir(&self) -> Option<&Path> {
        self.artifact_dir.as_deref()
    }

    /// Retries used in the current pass.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Maximum retries per pass.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Maximum duration of one pass.
    #[must_use]
    pub fn max_duration(&self) -> Duration {
        self.config.max_duration()
    }

    /// Log categories surfaced while ticking.
    #[must_use]
    pub fn attention_categories(&self) -> &[String] {
        &self.attention_categories
    }

    /// Report of the last evaluated pass.
    #[must_use]
    pub fn last_report(&self) -> Option<&TestReport> {
        self.last_report.as_ref()
    }

    /// The session, once built.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Build the session on first use and try to reserve its devices.
    ///
    /// `Ok(false)` means devices are not available yet; ask again later.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the test cannot derive its roles, or
    /// `AppError::Reservation` if the pool fails.
    pub fn is_ready_to_start(&mut self) -> Result<bool> {
        if self.session.is_none() {
            let roles = self.definition.roles(&self.config)?;
            self.attention_categories = self.collect_attention_categories();
            info!(
                test = self.definition.name(),
                roles = roles.len(),
                "test session prepared"
            );
            self.session = Some(Session::new(
                roles,
                Arc::clone(&self.context.pool),
                SessionOptions::from_test_config(&self.config),
                self.context.cancel.clone(),
            ));
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(false);
        };
        session.try_reserve_devices()
    }

    fn collect_attention_categories(&self) -> Vec<String> {
        let mut categories = vec![GAUNTLET_CATEGORY.to_owned()];
        for category in self
            .config
            .attention_categories
            .iter()
            .cloned()
            .chain(self.definition.attention_categories())
        {
            if !categories.iter().any(|c| same_category(c, &category)) {
                categories.push(category);
            }
        }
        categories
    }

    /// Start pass `pass` of `total_passes`.
    ///
    /// # Errors
    ///
    /// Returns the launch error; the node is then `Complete` with a
    /// `Failed` (or `Cancelled`) verdict.
    pub async fn start_test(&mut self, pass: u32, total_passes: u32) -> Result<()> {
        if self.session.is_none() {
            self.is_ready_to_start()?;
        }
        self.pass = pass;
        self.total_passes = total_passes;
        self.retries = 0;
        if let Some(session) = self.session.as_mut() {
            session.begin_pass();
        }

        let span = info_span!("start_test", test = self.definition.name(), pass, total_passes);
        self.launch_pass().instrument(span).await
    }

    /// Re-launch the current pass after a retry was granted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when no retry is pending, or the launch
    /// error.
    pub async fn restart_test(&mut self) -> Result<()> {
        if self.result != TestResult::WantRetry {
            return Err(AppError::Config(format!(
                "restart requested for {} without a pending retry",
                self.definition.name()
            )));
        }
        let span = info_span!(
            "restart_test",
            test = self.definition.name(),
            pass = self.pass,
            retry = self.retries
        );
        self.launch_pass().instrument(span).await
    }

    async fn launch_pass(&mut self) -> Result<()> {
        self.status = TestStatus::NotStarted;
        self.result = TestResult::Invalid;
        self.stop_reason = None;
        self.first_exit_at = None;
        self.role_results.clear();
        self.cursors.clear();

        let artifact_dir = self.claim_artifact_dir()?;
        self.artifact_dir = Some(artifact_dir);

        let Some(session) = self.session.as_mut() else {
            return Err(AppError::Config("test session was not prepared".into()));
        };
        let role_count = match session.launch_session().await {
            Ok(instance) => instance.len(),
            Err(err) => {
                self.status = TestStatus::Complete;
                if matches!(err, AppError::Cancelled(_)) {
                    self.result = TestResult::Cancelled;
                    self.stop_reason = Some(StopReason::Cancelled);
                } else {
                    self.result = TestResult::Failed;
                    self.stop_reason = Some(StopReason::Requested);
                }
                error!(%err, "test launch failed");
                if let Some(dir) = self.claimed_dirs.pop() {
                    self.context.artifact_paths.release(&dir);
                }
                return Err(err);
            }
        };

        let now = Instant::now();
        self.cursors = vec![OutputCursor::new(); role_count];
        self.heartbeat.reset(now);
        self.started_at = now;
        self.started_wall = Utc::now();
        self.status = TestStatus::InProgress;
        info!(
            roles = role_count,
            max_duration_secs = self.config.max_duration_seconds,
            max_retries = self.config.max_retries,
            retry = self.retries,
            "test started"
        );
        Ok(())
    }

    fn claim_artifact_dir(&mut self) -> Result<PathBuf> {
        let primary = self
            .config
            .roles
            .iter()
            .find(|r| !r.is_null())
            .or_else(|| self.config.roles.first());
        let canonical = match primary {
            Some(role) => canonical_dir_name(
                self.definition.name(),
                &role.platform,
                role.configuration,
            ),
            None => self.definition.name().to_owned(),
        };
        let dir = self
            .context
            .artifact_paths
            .claim(&self.context.artifact_root, &canonical);
        self.claimed_dirs.push(dir.clone());
        std::fs::create_dir_all(&dir).map_err(|err| {
            AppError::Artifact(format!("failed to create {}: {err}", dir.display()))
        })?;
        Ok(dir)
    }

    /// Process newly captured output and check every end condition.
    pub fn tick_test(&mut self) -> TestStatus {
        if self.status != TestStatus::InProgress {
            return self.status;
        }
        if self.context.cancel.is_cancelled() {
            self.complete(StopReason::Cancelled);
            return self.status;
        }

        let now = Instant::now();
        self.read_output(now);

        if let Some(breach) = self.heartbeat.check(now) {
            warn!(test = self.definition.name(), %breach, "heartbeat timeout");
            self.complete(StopReason::HeartbeatLost);
            return self.status;
        }

        let elapsed = now.saturating_duration_since(self.started_at);
        if elapsed > self.config.max_duration() {
            warn!(
                test = self.definition.name(),
                elapsed_secs = elapsed.as_secs(),
                "test exceeded its maximum duration"
            );
            self.complete(StopReason::MaxDurationReached);
            return self.status;
        }

        self.check_exits(now);
        self.status
    }

    fn read_output(&mut self, now: Instant) {
        let Some(instance) = self.session.as_ref().and_then(Session::instance) else {
            return;
        };
        let summarizer = Arc::clone(&self.context.summarizer);
        for (role, cursor) in instance.roles().iter().zip(self.cursors.iter_mut()) {
            let Some(stdout) = role.stdout() else {
                continue;
            };
            let mut lines = cursor.read_new_lines(stdout);
            if role.exit_observed() {
                lines.extend(cursor.flush());
            }
            for line in lines {
                if let Some(kind) = summarizer.heartbeat(&line) {
                    debug!(role = role.role_name(), ?kind, "heartbeat");
                    self.heartbeat.record(kind, now);
                    continue;
                }
                let Some(entry) = summarizer.parse_line(&line) else {
                    continue;
                };
                let monitored = self
                    .attention_categories
                    .iter()
                    .chain(role.role().log_categories.iter())
                    .any(|c| same_category(c, &entry.category));
                if monitored {
                    surface_entry(role.role_name(), &entry);
                }
            }
        }
    }

    fn check_exits(&mut self, now: Instant) {
        let Some(instance) = self.session.as_mut().and_then(Session::instance_mut) else {
            self.complete(StopReason::Completed);
            return;
        };

        let launched = instance.launched_count();
        let exited = instance.exited_count();
        if exited == launched {
            info!(test = self.definition.name(), "all roles exited");
            self.read_output(now);
            self.complete(StopReason::Completed);
            return;
        }
        if exited == 0 || self.config.wait_for_all_roles_to_exit {
            return;
        }

        let first_exit = *self.first_exit_at.get_or_insert_with(|| {
            info!(
                exited,
                launched,
                grace_secs = self.config.exit_grace_period_seconds,
                "role exited; waiting for the rest within the grace period"
            );
            now
        });
        if now.saturating_duration_since(first_exit) >= self.config.exit_grace_period() {
            info!(exited, launched, "exit grace period elapsed");
            self.read_output(now);
            self.complete(StopReason::Completed);
        }
    }

    fn complete(&mut self, reason: StopReason) {
        self.status = TestStatus::Complete;
        self.stop_reason = Some(reason);
        info!(test = self.definition.name(), %reason, "test pass ended");
    }

    /// Stop every role, save artifacts, classify and report.
    ///
    /// A stop reason recorded while ticking takes precedence over `reason`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Artifact` if role artifacts cannot be saved; the
    /// verdict is then `Failed`.
    pub async fn stop_test(&mut self, reason: StopReason) -> Result<TestResult> {
        let span = info_span!("stop_test", test = self.definition.name(), pass = self.pass);
        self.stop_and_evaluate(reason).instrument(span).await
    }

    async fn stop_and_evaluate(&mut self, reason: StopReason) -> Result<TestResult> {
        let reason = *self.stop_reason.get_or_insert(reason);
        self.status = TestStatus::Complete;

        let Some(session) = self.session.as_mut() else {
            self.result = TestResult::Failed;
            return Ok(self.result);
        };
        session.stop_processes().await;

        let artifact_dir = match self.artifact_dir.clone() {
            Some(dir) => dir,
            None => self.claim_artifact_dir()?,
        };
        let Some(session) = self.session.as_mut() else {
            self.result = TestResult::Failed;
            return Ok(self.result);
        };
        let artifacts = match session.save_role_artifacts(&artifact_dir) {
            Ok(artifacts) => artifacts,
            Err(err) => {
                error!(%err, "failed to save role artifacts");
                session.shutdown_session().await;
                self.result = TestResult::Failed;
                return Err(err);
            }
        };

        let options = ClassifyOptions {
            treat_ensures_as_fatal: self.config.treat_ensures_as_fatal,
            event_verbosity: self.config.event_verbosity,
            monitored_categories: self.attention_categories.clone(),
            stop_reason: reason,
        };
        let summarizer = Arc::clone(&self.context.summarizer);
        let mut results: Vec<RoleResult> = artifacts
            .into_iter()
            .map(|a| classify::classify_role(a, summarizer.as_ref(), &options))
            .collect();
        classify::sort_results(&mut results);

        let cancelled = reason == StopReason::Cancelled || self.context.cancel.is_cancelled();
        let mut result =
            classify::aggregate(&results, cancelled, self.config.fail_on_promoted_errors);
        if !cancelled && reason.is_timeout() {
            result = TestResult::TimedOut;
        }
        self.result = result;
        self.role_results = results;

        if result == TestResult::Failed
            && !cancelled
            && self.config.retry_on_initialization_failure
            && self.role_results.iter().any(|r| {
                r.is_evaluated() && r.kind == RoleResultKind::InitializationFailure
            })
        {
            self.set_to_retry_if_possible();
        }

        self.submit_report(artifact_dir, reason);

        if let Some(session) = self.session.as_mut() {
            session.shutdown_session().await;
        }

        info!(result = %self.result, %reason, "test evaluated");
        Ok(self.result)
    }

    fn submit_report(&mut self, artifact_dir: PathBuf, reason: StopReason) {
        let primary = self.config.roles.iter().find(|r| !r.is_null());
        let metadata = ReportMetadata {
            platform: primary.map(|r| r.platform.clone()),
            configuration: primary.map(|r| r.configuration),
            project: self.config.project.clone(),
            build_target: self.config.build_target.clone(),
        };
        let report = TestReport::new(
            self.definition.name(),
            self.pass,
            self.total_passes,
            self.retries,
            self.result,
            reason,
            self.started_wall,
            artifact_dir,
            metadata,
            &self.role_results,
        );

        if let Err(err) = self.context.report_sink.submit(&report) {
            warn!(%err, "report submission failed; using fallback");
            if let Err(err) = self.context.fallback_sink.submit(&report) {
                warn!(%err, "fallback report submission failed");
            }
        }
        self.last_report = Some(report);
    }

    /// Grant a retry if the budget allows, setting the verdict to
    /// [`TestResult::WantRetry`].
    pub fn set_to_retry_if_possible(&mut self) -> bool {
        if self.retries >= self.config.max_retries {
            info!(
                retries = self.retries,
                max_retries = self.config.max_retries,
                "retry budget exhausted"
            );
            return false;
        }
        self.retries += 1;
        self.result = TestResult::WantRetry;
        info!(
            retry = self.retries,
            max_retries = self.config.max_retries,
            "test will be retried"
        );
        true
    }

    /// Release every device and artifact directory claim held by the test.
    /// Called once all passes ran.
    pub fn finish(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.release_devices();
        }
        for dir in self.claimed_dirs.drain(..) {
            self.context.artifact_paths.release(&dir);
        }
    }
}

fn surface_entry(role_name: &str, entry: &LogEntry) {
    match entry.severity {
        LogSeverity::Error | LogSeverity::Fatal => {
            error!(role = role_name, category = entry.category, "{}", entry.message);
        }
        LogSeverity::Warning => {
            warn!(role = role_name, category = entry.category, "{}", entry.message);
        }
        _ => info!(role = role_name, category = entry.category, "{}", entry.message),
    }
}
