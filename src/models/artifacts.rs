//! Artifacts captured from one role after its process ended.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::role::SessionRole;

/// Files and facts saved for one role of a finished session pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleArtifacts {
    /// Role the artifacts belong to.
    pub role: SessionRole,
    /// Unique role name within the session (e.g. `Client2`).
    pub role_name: String,
    /// Device the role ran on.
    pub device_name: String,
    /// Copy of the role's working/output directory.
    pub artifact_dir: PathBuf,
    /// `<Role>Output.log` holding the full captured output.
    pub log_path: PathBuf,
    /// Animated screenshot summary, when one could be produced.
    pub screenshot_summary: Option<PathBuf>,
    /// Process exit code, if the process exited on its own terms.
    pub exit_code: Option<i32>,
    /// Whether the orchestrator stopped the process.
    pub stopped_by_orchestrator: bool,
    /// Full captured output.
    #[serde(skip)]
    pub log_text: String,
}
