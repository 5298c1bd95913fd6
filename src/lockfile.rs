//! Single-writer guarantee on the home directory: an exclusive non-blocking
//! `flock` plus a pid file. See SPEC_FULL.md 5 and 6.

use crate::error::RemailerError;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

pub struct LockFile {
    _file: File,
    lock_path: PathBuf,
    pid_path: PathBuf,
}

impl LockFile {
    /// Acquire the exclusive, non-blocking `flock` on `lock_path` and write
    /// our pid to `pid_path`. Lock contention is fatal (SPEC_FULL.md 4.2's
    /// failure semantics and 5's "failure is fatal").
    pub fn acquire(lock_path: PathBuf, pid_path: PathBuf) -> Result<Self, RemailerError> {
        let file = OpenOptions::new().create(true).write(true).mode(0o600).open(&lock_path)?;

        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            return Err(RemailerError::ConfigInvalid(format!(
                "another mixnode process already holds the lock at {}",
                lock_path.display()
            )));
        }

        fs::set_permissions(&lock_path, fs::Permissions::from_mode(0o600))?;

        let mut pid_file = OpenOptions::new().create(true).write(true).truncate(true).mode(0o600).open(&pid_path)?;
        writeln!(pid_file, "{}", std::process::id())?;

        Ok(Self { _file: file, lock_path, pid_path })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
        let _ = fs::remove_file(&self.pid_path);
    }
}

pub fn is_locked(lock_path: &Path) -> bool {
    let Ok(file) = OpenOptions::new().write(true).open(lock_path) else { return false };
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if ret == 0 {
        unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        false
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_drop_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("lock");
        let pid_path = dir.path().join("pid");

        {
            let _lock = LockFile::acquire(lock_path.clone(), pid_path.clone()).unwrap();
            assert!(is_locked(&lock_path));
        }
        assert!(!lock_path.exists());
        assert!(!pid_path.exists());
    }

    #[test]
    fn second_acquire_fails_while_first_holds_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("lock");
        let pid_path = dir.path().join("pid");

        let _first = LockFile::acquire(lock_path.clone(), pid_path.clone()).unwrap();
        let second = LockFile::acquire(lock_path.clone(), dir.path().join("pid2"));
        assert!(second.is_err());
    }
}
