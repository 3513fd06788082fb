//! Process-scoped registry of claimed artifact directories.
//!
//! Concurrent passes that compute the same canonical directory name are
//! given distinct directories by numeric suffix (`_2`, `_3`, ...). A name is
//! taken if it is claimed in this process or already exists on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::models::role::{BuildConfiguration, Platform};

/// Canonical artifact directory name of one test pass.
#[must_use]
pub fn canonical_dir_name(
    test_name: &str,
    platform: &Platform,
    configuration: BuildConfiguration,
) -> String {
    let raw = format!("{test_name}_{platform}_{configuration}");
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Claimed artifact directories, shared by every test node of the process.
#[derive(Debug, Default)]
pub struct ArtifactPathRegistry {
    claimed: Mutex<HashSet<PathBuf>>,
}

impl ArtifactPathRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.claimed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a directory under `root` named `canonical`, disambiguating
    /// against earlier claims and existing directories.
    #[must_use]
    pub fn claim(&self, root: &Path, canonical: &str) -> PathBuf {
        let mut claimed = self.lock();
        let mut candidate = root.join(canonical);
        let mut suffix = 2_u32;
        while claimed.contains(&candidate) || candidate.exists() {
            candidate = root.join(format!("{canonical}_{suffix}"));
            suffix += 1;
        }
        claimed.insert(candidate.clone());
        debug!(path = %candidate.display(), "artifact directory claimed");
        candidate
    }

    /// Whether `path` is currently claimed.
    #[must_use]
    pub fn is_claimed(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    /// Drop a claim. The directory itself is left in place.
    pub fn release(&self, path: &Path) {
        self.lock().remove(path);
    }

    /// Forget every claim. Called between independent runs.
    pub fn clear(&self) {
        self.lock().clear();
    }
}
