//! Filesystem-backed mutual exclusion, one lock per revision.
//!
//! Atomic directory creation is the sole correctness mechanism: if the
//! directory already exists, someone else is building that revision.
//! No separate locking primitive is involved, so the registry works
//! unchanged across concurrent workers and survives process crashes
//! (as stale directories, see DESIGN.md).

use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use verifier_core::RevisionId;

/// Registry rooted at a directory private to one (project, branch)
/// daemon instance.
#[derive(Clone, Debug)]
pub struct LockRegistry {
    root: PathBuf,
}

impl LockRegistry {
    /// Creates the working root. Fails if the root already exists, so
    /// two daemon instances can never share one project/branch pair
    /// and debris from a crashed instance is surfaced immediately.
    pub fn create(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        if let Some(parent) = root.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir(&root)?;
        Ok(Self { root })
    }

    /// Atomic create-if-absent. `Ok(None)` means the revision is
    /// already being handled elsewhere; callers drop it silently.
    pub fn try_acquire(&self, revision: &RevisionId) -> io::Result<Option<BuildLock>> {
        let dir = self.root.join(revision.as_str());
        match std::fs::create_dir(&dir) {
            Ok(()) => Ok(Some(BuildLock { dir })),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Best-effort teardown at normal shutdown. Abrupt termination
    /// leaves the root behind; that is an accepted trade-off.
    pub fn remove_root(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            warn!(root = %self.root.display(), error = %e, "failed to remove work root");
        }
    }
}

/// Exclusive claim on one revision for the duration of one build
/// attempt. Owns a working directory for the attempt's artifacts and
/// removes it on drop, regardless of how the attempt ended.
#[derive(Debug)]
pub struct BuildLock {
    dir: PathBuf,
}

impl BuildLock {
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            warn!(dir = %self.dir.display(), error = %e, "failed to remove lock directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, LockRegistry) {
        let tmp = tempfile::tempdir().unwrap();
        let registry = LockRegistry::create(tmp.path().join("work")).unwrap();
        (tmp, registry)
    }

    #[test]
    fn create_refuses_existing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("work");
        LockRegistry::create(&root).unwrap();
        assert!(LockRegistry::create(&root).is_err());
    }

    #[test]
    fn second_acquire_is_contended() {
        let (_tmp, registry) = registry();
        let rev = RevisionId::from_str("abc123");
        let lock = registry.try_acquire(&rev).unwrap();
        assert!(lock.is_some());
        assert!(registry.try_acquire(&rev).unwrap().is_none());
    }

    #[test]
    fn drop_releases_and_allows_reacquire() {
        let (_tmp, registry) = registry();
        let rev = RevisionId::from_str("abc123");
        let dir = {
            let lock = registry.try_acquire(&rev).unwrap().unwrap();
            let dir = lock.dir().to_path_buf();
            assert!(dir.is_dir());
            dir
        };
        assert!(!dir.exists());
        assert!(registry.try_acquire(&rev).unwrap().is_some());
    }

    #[test]
    fn concurrent_acquires_yield_exactly_one_lock() {
        let (_tmp, registry) = registry();
        let rev = RevisionId::from_str("abc123");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let rev = rev.clone();
                std::thread::spawn(move || registry.try_acquire(&rev).unwrap().is_some())
            })
            .collect();

        let acquired = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|acquired| *acquired)
            .count();
        assert_eq!(acquired, 1);
    }
}
