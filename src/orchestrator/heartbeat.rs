//! Heartbeat liveness monitor.
//!
//! Instrumented processes log `GauntletHeartbeat: Active` while the test is
//! making progress and `GauntletHeartbeat: Idle` while alive but waiting,
//! usually through their own log category. The summarizer recognises the
//! markers; the [`HeartbeatMonitor`] records them and, when enforcement is
//! on, reports the first threshold breached. All timing uses
//! [`tokio::time::Instant`] so paused-clock tests can drive it.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::HeartbeatConfig;
pub use crate::log_summary::HeartbeatKind;

/// A breached heartbeat threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatBreach {
    /// No active heartbeat arrived within the first-heartbeat window.
    NoFirstActive {
        /// Time since monitoring started.
        waited: Duration,
    },
    /// Too long since the last active heartbeat.
    ActiveGap {
        /// Time since the last active heartbeat.
        elapsed: Duration,
    },
    /// Too long since any heartbeat (or since start, if none arrived).
    AnyGap {
        /// Time since the last heartbeat of any kind.
        elapsed: Duration,
    },
}

impl Display for HeartbeatBreach {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoFirstActive { waited } => write!(
                f,
                "no active heartbeat after {}s",
                waited.as_secs()
            ),
            Self::ActiveGap { elapsed } => write!(
                f,
                "no active heartbeat for {}s",
                elapsed.as_secs()
            ),
            Self::AnyGap { elapsed } => {
                write!(f, "no heartbeat for {}s", elapsed.as_secs())
            }
        }
    }
}

/// Tracks heartbeat timestamps and evaluates the three thresholds.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    enabled: bool,
    first_active: Option<Duration>,
    between_active: Option<Duration>,
    between_any: Option<Duration>,
    started_at: Instant,
    last_any: Option<Instant>,
    last_active: Option<Instant>,
}

fn threshold(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

impl HeartbeatMonitor {
    /// Monitor starting at `now`. Zero thresholds disable their check.
    #[must_use]
    pub fn new(config: &HeartbeatConfig, now: Instant) -> Self {
        Self {
            enabled: config.enabled,
            first_active: threshold(config.timeout_for_first_active_heartbeat),
            between_active: threshold(config.timeout_between_active_heartbeats),
            between_any: threshold(config.timeout_between_any_heartbeats),
            started_at: now,
            last_any: None,
            last_active: None,
        }
    }

    /// Forget recorded heartbeats and restart the clock at `now`.
    pub fn reset(&mut self, now: Instant) {
        self.started_at = now;
        self.last_any = None;
        self.last_active = None;
    }

    /// Record a heartbeat seen at `now`.
    pub fn record(&mut self, kind: HeartbeatKind, now: Instant) {
        self.last_any = Some(now);
        if kind == HeartbeatKind::Active {
            self.last_active = Some(now);
        }
    }

    /// When the last heartbeat of any kind was seen.
    #[must_use]
    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.last_any
    }

    /// When the last active heartbeat was seen.
    #[must_use]
    pub fn last_active_heartbeat(&self) -> Option<Instant> {
        self.last_active
    }

    /// First breached threshold at `now`, if enforcement is on.
    #[must_use]
    pub fn check(&self, now: Instant) -> Option<HeartbeatBreach> {
        if !self.enabled {
            return None;
        }

        match self.last_active {
            None => {
                let waited = now.saturating_duration_since(self.started_at);
                if self.first_active.is_some_and(|limit| waited > limit) {
                    return Some(HeartbeatBreach::NoFirstActive { waited });
                }
            }
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                if self.between_active.is_some_and(|limit| elapsed > limit) {
                    return Some(HeartbeatBreach::ActiveGap { elapsed });
                }
            }
        }

        let since = self.last_any.unwrap_or(self.started_at);
        let elapsed = now.saturating_duration_since(since);
        if self.between_any.is_some_and(|limit| elapsed > limit) {
            return Some(HeartbeatBreach::AnyGap { elapsed });
        }

        None
    }
}
