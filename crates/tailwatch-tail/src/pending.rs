use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::Result;
use crate::handler::SharedLineHandler;

/// Files that are configured for tailing but do not exist yet.
///
/// Each entry keeps the handler it was registered with, so promotion starts
/// tailing with exactly the same callback.
#[derive(Clone, Default)]
pub struct PendingFileRegistry {
    entries: Arc<RwLock<HashMap<PathBuf, SharedLineHandler>>>,
}

impl PendingFileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending file. Returns `false` (and changes nothing) if the
    /// path is already pending.
    pub fn add(&self, path: impl Into<PathBuf>, handler: SharedLineHandler) -> bool {
        let path = path.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&path) {
            return false;
        }
        warn!(
            path = %path.display(),
            "Log file does not exist yet, will start tailing when it is created"
        );
        entries.insert(path, handler);
        true
    }

    /// Drop a pending entry
    pub fn remove(&self, path: &Path) -> bool {
        self.entries.write().remove(path).is_some()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.entries.read().contains_key(path)
    }

    pub fn count(&self) -> usize {
        self.entries.read().len()
    }

    /// Pending paths, sorted
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.entries.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Hand every entry whose file now exists to `promote`.
    ///
    /// An entry leaves the registry only if `promote` succeeds; otherwise it
    /// stays pending for the next sweep. Returns the number promoted.
    pub fn promote_ready_entries<F>(&self, mut promote: F) -> usize
    where
        F: FnMut(&Path, SharedLineHandler) -> Result<()>,
    {
        let mut entries = self.entries.write();
        if entries.is_empty() {
            return 0;
        }

        let ready: Vec<PathBuf> = entries
            .keys()
            .filter(|path| path.exists())
            .cloned()
            .collect();

        let mut promoted = 0;
        for path in ready {
            let Some(handler) = entries.get(&path).cloned() else {
                continue;
            };

            info!(path = %path.display(), "Pending file now exists, starting to tail");
            match promote(&path, handler) {
                Ok(()) => {
                    entries.remove(&path);
                    promoted += 1;
                }
                Err(e) if e.is_not_found() => {
                    // Gone again between the existence check and the start
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to promote pending file");
                }
            }
        }

        promoted
    }
}

impl std::fmt::Debug for PendingFileRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingFileRegistry")
            .field("paths", &self.paths())
            .finish()
    }
}
