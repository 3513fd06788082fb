//! Cooperative driver running a test node through all of its passes.

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::test_node::{TestNode, TestStatus};
use crate::models::result::{StopReason, TestResult};
use crate::{AppError, Result};

/// Verdict of one pass.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PassOutcome {
    /// One-based pass number.
    pub pass: u32,
    /// Final verdict of the pass.
    pub result: TestResult,
    /// Retries used.
    pub retries: u32,
}

/// Verdicts of every pass that ran.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    /// Outcomes in pass order.
    pub passes: Vec<PassOutcome>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
}

impl RunSummary {
    /// Overall verdict: `Passed` only if every requested pass passed.
    #[must_use]
    pub fn overall(&self, requested_passes: u32) -> TestResult {
        if self.cancelled {
            return TestResult::Cancelled;
        }
        let ran = u32::try_from(self.passes.len()).unwrap_or(u32::MAX);
        if ran < requested_passes {
            return TestResult::Failed;
        }
        if let Some(failed) = self
            .passes
            .iter()
            .find(|p| p.result != TestResult::Passed)
        {
            return failed.result;
        }
        TestResult::Passed
    }
}

/// Drives a [`TestNode`] with periodic ticks.
pub struct Executor {
    tick_interval: Duration,
    ready_attempts: u32,
    ready_retry_delay: Duration,
    cancel: CancellationToken,
}

impl Executor {
    /// Executor ticking every `tick_interval`, giving up on device
    /// availability after `ready_attempts` checks `ready_retry_delay` apart.
    #[must_use]
    pub fn new(
        tick_interval: Duration,
        ready_attempts: u32,
        ready_retry_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tick_interval,
            ready_attempts: ready_attempts.max(1),
            ready_retry_delay,
            cancel,
        }
    }

    /// Run `passes` passes of `node`, retrying each as the node allows.
    ///
    /// Devices are released when the run ends, successfully or not.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Reservation` if devices never became available,
    /// the launch error if a pass could not be started, or
    /// `AppError::Artifact` if artifacts could not be saved.
    pub async fn run(&self, node: &mut TestNode, passes: u32) -> Result<RunSummary> {
        let span = info_span!("run_test", test = node.name(), passes);
        let outcome = self.run_passes(node, passes).instrument(span).await;
        node.finish();
        outcome
    }

    async fn run_passes(&self, node: &mut TestNode, passes: u32) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for pass in 1..=passes {
            if !self.wait_until_ready(node).await? {
                summary.cancelled = true;
                break;
            }

            match self.run_pass(node, pass, passes).await {
                Ok(result) => {
                    info!(pass, %result, retries = node.retries(), "pass finished");
                    summary.passes.push(PassOutcome {
                        pass,
                        result,
                        retries: node.retries(),
                    });
                }
                Err(AppError::Cancelled(reason)) => {
                    warn!(pass, %reason, "pass cancelled");
                    summary.cancelled = true;
                    break;
                }
                Err(err) => {
                    error!(pass, %err, "pass aborted");
                    return Err(err);
                }
            }

            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
        }
        Ok(summary)
    }

    /// Poll readiness; `Ok(false)` when cancelled first.
    async fn wait_until_ready(&self, node: &mut TestNode) -> Result<bool> {
        for attempt in 1..=self.ready_attempts {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }
            if node.is_ready_to_start()? {
                return Ok(true);
            }
            if attempt < self.ready_attempts {
                info!(attempt, "devices not available yet; waiting");
                tokio::select! {
                    () = self.cancel.cancelled() => return Ok(false),
                    () = tokio::time::sleep(self.ready_retry_delay) => {}
                }
            }
        }
        Err(AppError::Reservation(format!(
            "devices for {} did not become available after {} check(s)",
            node.name(),
            self.ready_attempts
        )))
    }

    async fn run_pass(&self, node: &mut TestNode, pass: u32, passes: u32) -> Result<TestResult> {
        node.start_test(pass, passes).await?;
        let mut result = self.tick_and_stop(node).await?;

        while result == TestResult::WantRetry {
            info!(pass, retry = node.retries(), "restarting pass");
            node.restart_test().await?;
            result = self.tick_and_stop(node).await?;
        }
        Ok(result)
    }

    async fn tick_and_stop(&self, node: &mut TestNode) -> Result<TestResult> {
        while node.tick_test() == TestStatus::InProgress {
            tokio::select! {
                () = self.cancel.cancelled() => {}
                () = tokio::time::sleep(self.tick_interval) => {}
            }
        }
        let reason = node.stop_reason().unwrap_or(StopReason::Requested);
        node.stop_test(reason).await
    }
}
