use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A PID lock file: its presence with a live PID denies a second start.
pub struct LockFile {
	path: PathBuf,
	held: bool,
}

impl LockFile {
	/// Acquire the lock at `path`, or fail with [`Error::LockConflict`] if a
	/// live process already holds it. A lock file naming a dead process is
	/// declared stale and overwritten.
	pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
		let path = path.into();

		if let Ok(contents) = fs::read_to_string(&path) {
			if let Ok(pid) = contents.trim().parse::<u32>() {
				if process_is_alive(pid) {
					return Err(Error::LockConflict { pid, path });
				}
				tracing::warn!(pid, path = %path.display(), "stale lock file, overwriting");
			}
		}

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(&path, std::process::id().to_string())?;
		Ok(Self { path, held: true })
	}

	pub fn release(mut self) {
		self.remove();
		self.held = false;
	}

	fn remove(&self) {
		let _ = fs::remove_file(&self.path);
	}
}

impl Drop for LockFile {
	fn drop(&mut self) {
		if self.held {
			self.remove();
		}
	}
}

#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
	// signal 0: no signal is sent, but error reporting still happens, so
	// this is the standard way to probe liveness without disturbing the
	// process.
	unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
	// best-effort: on non-unix targets we cannot signal-probe, so treat any
	// recorded PID as live and require manual lock removal.
	true
}

pub fn lock_file_path(project_root: &Path) -> PathBuf {
	project_root.join(".backup-handler.lock")
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn acquires_when_absent() {
		let dir = tempdir().unwrap();
		let path = dir.path().join(".lock");
		let lock = LockFile::acquire(&path).unwrap();
		assert!(path.is_file());
		lock.release();
		assert!(!path.is_file());
	}

	#[test]
	fn conflicts_with_live_pid() {
		let dir = tempdir().unwrap();
		let path = dir.path().join(".lock");
		fs::write(&path, std::process::id().to_string()).unwrap();
		let err = LockFile::acquire(&path).unwrap_err();
		match err {
			Error::LockConflict { pid, .. } => assert_eq!(pid, std::process::id()),
			other => panic!("expected LockConflict, got {other:?}"),
		}
		assert!(path.is_file(), "lock file must not be removed on conflict");
	}

	#[test]
	fn stale_lock_is_overwritten() {
		let dir = tempdir().unwrap();
		let path = dir.path().join(".lock");
		// PID 0 is never a real userspace process.
		fs::write(&path, "999999999").unwrap_or(());
		// Use a PID that is guaranteed dead: kill(pid, 0) on an implausibly
		// large number should fail on every real system.
		fs::write(&path, "2147483647").unwrap();
		let lock = LockFile::acquire(&path);
		assert!(lock.is_ok());
	}
}
