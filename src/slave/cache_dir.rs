//! Exclusive cache-directory acquisition. The runner binary keeps a
//! content-addressed cache on disk; running two slaves against the same
//! cache directory corrupts it, so each slave process locks one of a fixed
//! pool of candidate directories before doing anything else.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::fcntl::{flock, FlockArg};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheDirError {
    #[error("unable to lock any of {0} candidate cache directories under {1}")]
    NoneAvailable(u32, PathBuf),

    #[error("io error preparing cache directory {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
}

/// An acquired, exclusively-locked cache directory. The lock is released
/// (and the lockfile closed) when this value is dropped.
pub struct ExclusiveCacheDir {
    pub path: PathBuf,
    _lockfile: File,
}

/// Try `root.0`, `root.1`, ... `root.{num_dirs - 1}` in order, taking the
/// first one whose `.lock` sibling file can be locked non-blocking. Mirrors
/// the original's `fcntl.lockf(LOCK_EX | LOCK_NB)` loop.
pub fn acquire(root: &Path, num_dirs: u32) -> Result<ExclusiveCacheDir, CacheDirError> {
    for i in 0..num_dirs {
        let dir = candidate_path(root, i);
        std::fs::create_dir_all(&dir).map_err(|e| CacheDirError::Io(dir.clone(), e))?;

        let lock_path = lock_path_for(&dir);
        let lockfile = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| CacheDirError::Io(lock_path.clone(), e))?;

        match flock(&lockfile, FlockArg::LockExclusiveNonblock) {
            Ok(()) => {
                tracing::info!(cache_dir = %dir.display(), "acquired exclusive cache directory");
                return Ok(ExclusiveCacheDir {
                    path: dir,
                    _lockfile: lockfile,
                });
            }
            Err(nix::errno::Errno::EACCES | nix::errno::Errno::EAGAIN) => {
                tracing::debug!(cache_dir = %dir.display(), "cache directory already locked by another slave");
                continue;
            }
            Err(e) => return Err(CacheDirError::Io(lock_path, e.into())),
        }
    }
    Err(CacheDirError::NoneAvailable(num_dirs, root.to_path_buf()))
}

fn candidate_path(root: &Path, index: u32) -> PathBuf {
    let mut path = root.as_os_str().to_owned();
    path.push(format!(".{index}"));
    PathBuf::from(path)
}

fn lock_path_for(dir: &Path) -> PathBuf {
    let mut path = dir.as_os_str().to_owned();
    path.push(".lock");
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_first_free_candidate() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("cache");
        let held = acquire(&root, 4).unwrap();
        assert_eq!(held.path, candidate_path(&root, 0));
    }

    #[test]
    fn skips_a_dir_locked_by_another_process() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("cache");
        let first = acquire(&root, 4).unwrap();
        let second = acquire(&root, 4).unwrap();
        assert_ne!(first.path, second.path);
        assert_eq!(second.path, candidate_path(&root, 1));
    }

    #[test]
    fn exhausting_all_candidates_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("cache");
        let _held = acquire(&root, 1).unwrap();
        let err = acquire(&root, 1).unwrap_err();
        assert!(matches!(err, CacheDirError::NoneAvailable(1, _)));
    }
}
