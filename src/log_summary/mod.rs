//! Structured summaries of role process output.
//!
//! Provides the [`LogSummarizer`] trait consumed by classification and the
//! tick loop, plus the record types it produces. The default
//! implementation, [`LogParser`], understands the
//! `[timestamp][frame]Category: Severity: message` line format.

pub mod parser;

use serde::{Deserialize, Serialize};

pub use parser::LogParser;

/// Severity of a single log line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LogSeverity {
    /// Verbose or very-verbose output.
    Verbose,
    /// Plain log output without an explicit severity.
    Log,
    /// Display-level output.
    Display,
    /// Warning.
    Warning,
    /// Error.
    Error,
    /// Fatal error.
    Fatal,
}

impl LogSeverity {
    /// Parse the severity token of a log line.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "Verbose" | "VeryVerbose" => Some(Self::Verbose),
            "Log" => Some(Self::Log),
            "Display" => Some(Self::Display),
            "Warning" => Some(Self::Warning),
            "Error" => Some(Self::Error),
            "Fatal" => Some(Self::Fatal),
            _ => None,
        }
    }

    /// Whether this severity is a warning or worse.
    #[must_use]
    pub fn is_warning_or_worse(self) -> bool {
        self >= Self::Warning
    }
}

/// Kind of heartbeat marker logged by instrumented processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatKind {
    /// The test is actively progressing.
    Active,
    /// The process is alive but idle.
    Idle,
}

/// Whether two log categories name the same channel.
///
/// Comparison is case-insensitive and a `Log` prefix is ignored, so
/// `Gauntlet` matches `LogGauntlet`. The prefix only counts when it is
/// followed by an upper-case letter, which keeps `Login` distinct.
#[must_use]
pub fn same_category(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || category_stem(a).eq_ignore_ascii_case(category_stem(b))
}

fn category_stem(category: &str) -> &str {
    match category.get(..3) {
        Some(prefix)
            if prefix.eq_ignore_ascii_case("log")
                && category[3..].starts_with(|c: char| c.is_ascii_uppercase()) =>
        {
            &category[3..]
        }
        _ => category,
    }
}

/// One categorized log line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// Log category (e.g. `LogInit`, `Gauntlet`).
    pub category: String,
    /// Line severity.
    pub severity: LogSeverity,
    /// Message text after the category and severity tokens.
    pub message: String,
}

/// A fatal error with the callstack lines that followed it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FatalErrorRecord {
    /// Error message.
    pub message: String,
    /// Callstack frames, outermost last.
    pub callstack: Vec<String>,
}

/// A non-fatal ensure with the callstack lines that followed it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnsureRecord {
    /// Failed condition text.
    pub message: String,
    /// Callstack frames.
    pub callstack: Vec<String>,
}

/// Everything classification needs to know about one role's output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogSummary {
    /// First fatal error in the log, if any.
    pub fatal_error: Option<FatalErrorRecord>,
    /// Every ensure recorded in the log.
    pub ensures: Vec<EnsureRecord>,
    /// Categorized warnings and errors.
    pub entries: Vec<LogEntry>,
    /// Value of the last explicit test exit-code marker.
    pub test_exit_code: Option<i32>,
    /// Whether the process asked to exit deliberately.
    pub requested_exit: bool,
    /// Whether the process completed startup.
    pub engine_initialized: bool,
    /// Whether the process reported a failed login.
    pub login_failed: bool,
}

impl LogSummary {
    /// Entries in any of `categories`, matched with [`same_category`].
    pub fn entries_in<'a>(
        &'a self,
        categories: &'a [String],
    ) -> impl Iterator<Item = &'a LogEntry> + 'a {
        self.entries.iter().filter(move |e| {
            categories
                .iter()
                .any(|c| same_category(c, &e.category))
        })
    }
}

/// Turns raw process output into structured records.
///
/// Implementations must be [`Send`] and [`Sync`] so one instance can be
/// shared by every test node through [`std::sync::Arc`].
pub trait LogSummarizer: Send + Sync {
    /// Summarize the full output of one process.
    fn summarize(&self, text: &str) -> LogSummary;

    /// Parse a single line into a categorized entry, if it has a category.
    fn parse_line(&self, line: &str) -> Option<LogEntry>;

    /// Heartbeat marker carried by a single line, whatever its category.
    fn heartbeat(&self, line: &str) -> Option<HeartbeatKind>;
}
