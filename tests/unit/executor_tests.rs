//! Unit tests for the overall run verdict.

use gauntlet_orchestrator::models::result::TestResult;
use gauntlet_orchestrator::orchestrator::executor::{PassOutcome, RunSummary};

fn outcome(pass: u32, result: TestResult) -> PassOutcome {
    PassOutcome {
        pass,
        result,
        retries: 0,
    }
}

#[test]
fn every_requested_pass_must_pass() {
    let summary = RunSummary {
        passes: vec![outcome(1, TestResult::Passed), outcome(2, TestResult::Passed)],
        cancelled: false,
    };
    assert_eq!(summary.overall(2), TestResult::Passed);
    assert_eq!(summary.overall(3), TestResult::Failed);
}

#[test]
fn first_non_passing_verdict_wins() {
    let summary = RunSummary {
        passes: vec![
            outcome(1, TestResult::Passed),
            outcome(2, TestResult::TimedOut),
            outcome(3, TestResult::Failed),
        ],
        cancelled: false,
    };
    assert_eq!(summary.overall(3), TestResult::TimedOut);
}

#[test]
fn cancellation_overrides_results() {
    let summary = RunSummary {
        passes: vec![outcome(1, TestResult::Passed)],
        cancelled: true,
    };
    assert_eq!(summary.overall(1), TestResult::Cancelled);
    assert_eq!(RunSummary::default().overall(1), TestResult::Failed);
}
