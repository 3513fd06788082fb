//! Regex-driven log summarizer.
//!
//! Marker patterns are configurable through [`LogMarkers`] so builds with
//! customised logging can still be evaluated; the defaults follow the
//! engine's standard output conventions.

use regex::Regex;
use serde::Deserialize;

use super::{
    EnsureRecord, FatalErrorRecord, HeartbeatKind, LogEntry, LogSeverity, LogSummarizer,
    LogSummary,
};
use crate::{AppError, Result};

/// Category prefix, optional severity token, message.
const LINE_PATTERN: &str = r"^(?:\[[^\]]*\]\[\s*\d+\])?\s*([A-Za-z_][A-Za-z0-9_]*):\s+(?:(VeryVerbose|Verbose|Log|Display|Warning|Error|Fatal):\s*)?(.*)$";

fn default_fatal_error() -> String {
    r"(?:Fatal error!?:?|Unhandled Exception:|Assertion failed:)\s*(.*)$".into()
}

fn default_ensure() -> String {
    r"Ensure condition failed:\s*(.*)$".into()
}

fn default_callstack() -> String {
    r"(?:\[Callstack\]\s*(.+)$)|(?:^\s*(0x[0-9A-Fa-f]+\s.+)$)".into()
}

fn default_test_exit_code() -> String {
    r"\*{4}\s*TEST COMPLETE\. EXIT CODE:\s*(-?\d+)\s*\*{4}".into()
}

fn default_requested_exit() -> String {
    r"Engine exit requested|RequestExit\(".into()
}

fn default_engine_initialized() -> String {
    r"Engine is initialized".into()
}

fn default_heartbeat() -> String {
    r"GauntletHeartbeat:\s*(Active|Idle)\b".into()
}

fn default_login_failed() -> String {
    r"(?i)login\s?failed".into()
}

/// Regex patterns recognised in role output.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LogMarkers {
    /// Start of a fatal error; group 1 captures the message.
    #[serde(default = "default_fatal_error")]
    pub fatal_error: String,
    /// An ensure; group 1 captures the failed condition.
    #[serde(default = "default_ensure")]
    pub ensure: String,
    /// A callstack frame following a fatal error or ensure.
    #[serde(default = "default_callstack")]
    pub callstack: String,
    /// Explicit test exit code; group 1 captures the code.
    #[serde(default = "default_test_exit_code")]
    pub test_exit_code: String,
    /// Deliberate, non-fatal exit request.
    #[serde(default = "default_requested_exit")]
    pub requested_exit: String,
    /// Startup completed.
    #[serde(default = "default_engine_initialized")]
    pub engine_initialized: String,
    /// Login failure.
    #[serde(default = "default_login_failed")]
    pub login_failed: String,
    /// Liveness heartbeat anywhere in the line; group 1 captures `Active`
    /// or `Idle`.
    #[serde(default = "default_heartbeat")]
    pub heartbeat: String,
}

impl Default for LogMarkers {
    fn default() -> Self {
        Self {
            fatal_error: default_fatal_error(),
            ensure: default_ensure(),
            callstack: default_callstack(),
            test_exit_code: default_test_exit_code(),
            requested_exit: default_requested_exit(),
            engine_initialized: default_engine_initialized(),
            login_failed: default_login_failed(),
            heartbeat: default_heartbeat(),
        }
    }
}

/// Record being assembled while its callstack lines are read.
enum Pending {
    Fatal(FatalErrorRecord),
    Ensure(EnsureRecord),
}

/// Default [`LogSummarizer`] built from compiled [`LogMarkers`].
#[derive(Debug, Clone)]
pub struct LogParser {
    line: Regex,
    fatal_error: Regex,
    ensure: Regex,
    callstack: Regex,
    test_exit_code: Regex,
    requested_exit: Regex,
    engine_initialized: Regex,
    login_failed: Regex,
    heartbeat: Regex,
}

fn compile(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|err| AppError::Config(format!("invalid {name} log marker pattern: {err}")))
}

impl LogParser {
    /// Parser with the default markers.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a built-in pattern fails to compile.
    pub fn new() -> Result<Self> {
        Self::from_markers(&LogMarkers::default())
    }

    /// Parser with custom markers.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first marker that is not a
    /// valid regular expression.
    pub fn from_markers(markers: &LogMarkers) -> Result<Self> {
        Ok(Self {
            line: compile("line", LINE_PATTERN)?,
            fatal_error: compile("fatal_error", &markers.fatal_error)?,
            ensure: compile("ensure", &markers.ensure)?,
            callstack: compile("callstack", &markers.callstack)?,
            test_exit_code: compile("test_exit_code", &markers.test_exit_code)?,
            requested_exit: compile("requested_exit", &markers.requested_exit)?,
            engine_initialized: compile("engine_initialized", &markers.engine_initialized)?,
            login_failed: compile("login_failed", &markers.login_failed)?,
            heartbeat: compile("heartbeat", &markers.heartbeat)?,
        })
    }

    fn callstack_frame(&self, line: &str) -> Option<String> {
        let caps = self.callstack.captures(line)?;
        let frame = caps
            .iter()
            .skip(1)
            .flatten()
            .next()
            .map_or_else(|| line.trim(), |m| m.as_str().trim());
        Some(frame.to_owned())
    }

    fn first_capture(regex: &Regex, line: &str) -> Option<String> {
        regex.captures(line).map(|caps| {
            caps.get(1)
                .map_or_else(String::new, |m| m.as_str().trim().to_owned())
        })
    }
}

impl LogSummarizer for LogParser {
    fn summarize(&self, text: &str) -> LogSummary {
        let mut summary = LogSummary::default();
        let mut pending: Option<Pending> = None;

        for line in text.lines() {
            if pending.is_some() {
                if let Some(frame) = self.callstack_frame(line) {
                    match pending.as_mut() {
                        Some(Pending::Fatal(record)) => record.callstack.push(frame),
                        Some(Pending::Ensure(record)) => record.callstack.push(frame),
                        None => {}
                    }
                    continue;
                }
                // Error lines between a fatal error and its callstack extend the message.
                if let Some(Pending::Fatal(record)) = pending.as_mut() {
                    let continuation = self.parse_line(line).filter(|e| {
                        record.callstack.is_empty()
                            && e.severity == LogSeverity::Error
                            && !e.message.trim().is_empty()
                            && !self.ensure.is_match(line)
                    });
                    if let Some(entry) = continuation {
                        if !record.message.is_empty() {
                            record.message.push('\n');
                        }
                        record.message.push_str(entry.message.trim());
                        continue;
                    }
                }
                match pending.take() {
                    Some(Pending::Fatal(record)) => summary.fatal_error = Some(record),
                    Some(Pending::Ensure(record)) => summary.ensures.push(record),
                    None => {}
                }
            }

            if let Some(message) = Self::first_capture(&self.fatal_error, line) {
                if summary.fatal_error.is_none() {
                    pending = Some(Pending::Fatal(FatalErrorRecord {
                        message,
                        callstack: Vec::new(),
                    }));
                }
                continue;
            }

            if let Some(message) = Self::first_capture(&self.ensure, line) {
                pending = Some(Pending::Ensure(EnsureRecord {
                    message,
                    callstack: Vec::new(),
                }));
                continue;
            }

            if let Some(code) = Self::first_capture(&self.test_exit_code, line) {
                if let Ok(code) = code.parse::<i32>() {
                    summary.test_exit_code = Some(code);
                }
            }

            if self.requested_exit.is_match(line) {
                summary.requested_exit = true;
            }
            if self.login_failed.is_match(line) {
                summary.login_failed = true;
            }

            if self.heartbeat.is_match(line) {
                summary.engine_initialized = true;
            }
            if let Some(entry) = self.parse_line(line) {
                if entry.severity.is_warning_or_worse() {
                    summary.entries.push(entry);
                }
            }

            if self.engine_initialized.is_match(line) {
                summary.engine_initialized = true;
            }
        }

        match pending {
            Some(Pending::Fatal(record)) => summary.fatal_error = Some(record),
            Some(Pending::Ensure(record)) => summary.ensures.push(record),
            None => {}
        }

        // A process that reported a test verdict necessarily finished startup.
        if summary.test_exit_code.is_some() {
            summary.engine_initialized = true;
        }

        summary
    }

    fn parse_line(&self, line: &str) -> Option<LogEntry> {
        let caps = self.line.captures(line)?;
        let category = caps.get(1)?.as_str().to_owned();
        let severity = caps
            .get(2)
            .and_then(|m| LogSeverity::from_token(m.as_str()))
            .unwrap_or(LogSeverity::Log);
        let message = caps
            .get(3)
            .map_or_else(String::new, |m| m.as_str().to_owned());
        Some(LogEntry {
            category,
            severity,
            message,
        })
    }

    fn heartbeat(&self, line: &str) -> Option<HeartbeatKind> {
        let caps = self.heartbeat.captures(line)?;
        match caps.get(1).map(|m| m.as_str()) {
            Some(kind) if kind.eq_ignore_ascii_case("active") => Some(HeartbeatKind::Active),
            Some(kind) if kind.eq_ignore_ascii_case("idle") => Some(HeartbeatKind::Idle),
            _ => None,
        }
    }
}
