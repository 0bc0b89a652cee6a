//! Directory-backed state store.
//!
//! Each run is stored as `<dir>/<run_id>.json`. A compare-and-write holds
//! the run's in-process lock and an exclusive `flock(2)` on
//! `<dir>/<run_id>.lock`, so separate CLI invocations crafting the same
//! run serialize on it. Blobs are replaced atomically via rename, and
//! `reset` removes both files.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::canonical::sha256_hex;
use crate::error::StoreError;

use super::{RowLocks, StateStore, StoredState, compare_digest, lock_row};

/// A [`StateStore`] keeping one file per run in a directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    rows: RowLocks<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            rows: RowLocks::default(),
        })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state_path(&self, run_id: &str) -> Result<PathBuf, StoreError> {
        validate_run_id(run_id)?;
        Ok(self.dir.join(format!("{run_id}.json")))
    }

    fn lock_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.lock"))
    }

    /// Take the exclusive `flock` on the run's sidecar file.
    ///
    /// `reset` unlinks the sidecar while holding it, so a waiter may wake
    /// up locking an orphaned inode. The lock only counts once the path
    /// still names the locked file.
    fn lock_file(&self, run_id: &str) -> Result<Flock<File>, StoreError> {
        let path = self.lock_path(run_id);
        loop {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;

            let locked = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
                StoreError::Lock {
                    run_id: run_id.to_owned(),
                    reason: errno.to_string(),
                }
            })?;

            let held = locked.metadata()?;
            match fs::metadata(&path) {
                Ok(current) if current.dev() == held.dev() && current.ino() == held.ino() => {
                    return Ok(locked);
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::IoError(e)),
            }
            debug!(run_id, "lock file replaced while waiting, retrying");
        }
    }
}

/// Run ids become file names, so only a conservative character set is allowed.
fn validate_run_id(run_id: &str) -> Result<(), StoreError> {
    let valid = !run_id.is_empty()
        && !run_id.starts_with('.')
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidRunId(run_id.to_owned()))
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path) {
        Ok(blob) => Ok(Some(blob)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::IoError(e)),
    }
}

impl StateStore for FileStore {
    fn initialized(&self, run_id: &str) -> Result<bool, StoreError> {
        Ok(self.state_path(run_id)?.is_file())
    }

    fn read(&self, run_id: &str) -> Result<StoredState, StoreError> {
        let path = self.state_path(run_id)?;
        let blob = read_optional(&path)?.ok_or_else(|| StoreError::NotFound {
            run_id: run_id.to_owned(),
        })?;
        debug!(run_id, path = %path.display(), "read crafting state");
        Ok(StoredState::new(blob))
    }

    fn save(
        &self,
        run_id: &str,
        blob: &[u8],
        base_digest: Option<&str>,
    ) -> Result<String, StoreError> {
        let path = self.state_path(run_id)?;

        // Write the candidate before taking the locks so the critical
        // section is only compare + rename.
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(blob)?;
        tmp.as_file().sync_all()?;

        let row = self.rows.row(run_id)?;
        let _row = lock_row(&row, run_id)?;
        let _flock = self.lock_file(run_id)?;

        let current = read_optional(&path)?;
        compare_digest(run_id, current.as_deref(), base_digest)?;
        tmp.persist(&path).map_err(|e| StoreError::IoError(e.error))?;

        Ok(sha256_hex(blob))
    }

    fn reset(&self, run_id: &str) -> Result<(), StoreError> {
        let path = self.state_path(run_id)?;
        let not_found = || StoreError::NotFound {
            run_id: run_id.to_owned(),
        };
        if !path.is_file() {
            return Err(not_found());
        }

        let row = self.rows.row(run_id)?;
        let guard = lock_row(&row, run_id)?;
        let flock = self.lock_file(run_id)?;

        let removed = match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(StoreError::IoError(e)),
        };
        if removed.is_ok() {
            fs::remove_file(self.lock_path(run_id))?;
        }
        drop(flock);
        drop(guard);
        self.rows.forget(run_id)?;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_like_run_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        for bad in ["", "../escape", "a/b", ".hidden", "a\\b"] {
            assert!(
                matches!(store.read(bad), Err(StoreError::InvalidRunId(_))),
                "run id {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn save_read_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("state")).unwrap();

        assert!(!store.initialized("run-1").unwrap());
        let d0 = store.save("run-1", b"{}", None).unwrap();
        assert!(store.initialized("run-1").unwrap());

        let stored = store.read("run-1").unwrap();
        assert_eq!(stored.blob(), b"{}");
        assert_eq!(stored.digest(), d0);

        store.reset("run-1").unwrap();
        assert!(matches!(
            store.read("run-1"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.reset("run-1"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn reset_leaves_no_lock_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert!(matches!(
            store.reset("never"),
            Err(StoreError::NotFound { .. })
        ));
        let d0 = store.save("r", b"v0", None).unwrap();
        store.save("r", b"v1", Some(&d0)).unwrap();
        store.reset("r").unwrap();

        let left: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert!(left.is_empty(), "left behind: {left:?}");

        // The run can be crafted again after a reset.
        store.save("r", b"v2", None).unwrap();
        assert_eq!(store.read("r").unwrap().blob(), b"v2");
    }

    #[test]
    fn stale_base_is_rejected_and_blob_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let d0 = store.save("run-1", b"v0", None).unwrap();
        let d1 = store.save("run-1", b"v1", Some(&d0)).unwrap();

        let err = store.save("run-1", b"v2", Some(&d0)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict { ref stored_digest, .. } if *stored_digest == d1
        ));
        assert_eq!(store.read("run-1").unwrap().blob(), b"v1");
    }

    #[test]
    fn digest_tracks_external_modification() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let d0 = store.save("run-1", b"v0", None).unwrap();

        // Another writer bypassing this handle still invalidates the base.
        std::fs::write(dir.path().join("run-1.json"), b"tampered").unwrap();
        assert!(matches!(
            store.save("run-1", b"v1", Some(&d0)),
            Err(StoreError::Conflict { .. })
        ));
    }

    #[test]
    fn two_handles_share_the_register() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileStore::open(dir.path()).unwrap();
        let b = FileStore::open(dir.path()).unwrap();

        let d0 = a.save("run-1", b"v0", None).unwrap();
        b.save("run-1", b"v1", Some(&d0)).unwrap();
        assert!(matches!(
            a.save("run-1", b"v2", Some(&d0)),
            Err(StoreError::Conflict { .. })
        ));
    }
}
