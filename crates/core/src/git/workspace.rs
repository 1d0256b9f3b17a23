//! Task-scoped working directories for mirror clones.
//!
//! Each in-flight task owns exactly one directory below the work root. The
//! name is derived from the source repository (`<org>__<name>.git`); when
//! two in-flight tasks mirror the same source, the later one gets a numeric
//! suffix. The [`ScopedDir`] guard removes the directory when dropped, which
//! covers success, failure, timeout and task cancellation alike.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::errors::TransportError;
use crate::models::RepoRef;

/// Allocator for task-scoped directories under a shared root.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    claimed: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            claimed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if needed.
    pub fn prepare(&self) -> Result<(), TransportError> {
        std::fs::create_dir_all(&self.root).map_err(|e| TransportError::Workspace {
            path: self.root.display().to_string(),
            detail: e.to_string(),
        })
    }

    /// Claim a fresh directory for mirroring `source`.
    ///
    /// The returned path does not exist yet (a stale leftover from an earlier
    /// run is removed first), so `git clone --mirror` can create it.
    pub fn allocate(&self, source: &RepoRef) -> Result<ScopedDir, TransportError> {
        let base = format!("{}__{}", source.org, source.name);
        let path = {
            let mut claimed = self
                .claimed
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut suffix = 1u32;
            loop {
                let candidate = if suffix == 1 {
                    self.root.join(format!("{}.git", base))
                } else {
                    self.root.join(format!("{}-{}.git", base, suffix))
                };
                if claimed.insert(candidate.clone()) {
                    break candidate;
                }
                suffix += 1;
            }
        };

        let guard = ScopedDir {
            path,
            claimed: Arc::clone(&self.claimed),
        };

        if guard.path.exists() {
            warn!(path = %guard.path.display(), "removing stale working directory");
            std::fs::remove_dir_all(&guard.path).map_err(|e| TransportError::Workspace {
                path: guard.path.display().to_string(),
                detail: e.to_string(),
            })?;
        }

        debug!(path = %guard.path.display(), "allocated working directory");
        Ok(guard)
    }

    /// Number of directories currently claimed by in-flight tasks.
    pub fn in_use(&self) -> usize {
        self.claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// A claimed directory, deleted and released on drop.
#[derive(Debug)]
pub struct ScopedDir {
    path: PathBuf,
    claimed: Arc<Mutex<HashSet<PathBuf>>>,
}

impl ScopedDir {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScopedDir {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to remove working directory");
            } else {
                debug!(path = %self.path.display(), "removed working directory");
            }
        }
        self.claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.path);
    }
}
