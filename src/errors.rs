//! Error types shared across the orchestrator.

use std::fmt::{Display, Formatter};

/// Shared orchestrator result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Orchestrator error enumeration covering all domain failure modes.
///
/// Failures of the application under test are never represented here; they
/// are captured as [`RoleResult`](crate::models::result::RoleResult) data.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Device reservation could not be satisfied within the retry budget.
    Reservation(String),
    /// Installing a role build onto a device failed.
    Install(String),
    /// Launching an installed role failed.
    Launch(String),
    /// Retry budget exhausted or a non-retryable failure; the run cannot continue.
    Unrecoverable(String),
    /// Copying or writing role artifacts failed.
    Artifact(String),
    /// Report generation or submission failed.
    Report(String),
    /// The run was cancelled while the operation was in progress.
    Cancelled(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether the error ends the run without any further retry.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unrecoverable(_) | Self::Reservation(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Reservation(msg) => write!(f, "reservation: {msg}"),
            Self::Install(msg) => write!(f, "install: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Unrecoverable(msg) => write!(f, "unrecoverable: {msg}"),
            Self::Artifact(msg) => write!(f, "artifact: {msg}"),
            Self::Report(msg) => write!(f, "report: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Report(format!("serialization failed: {err}"))
    }
}
