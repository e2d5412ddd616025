use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Serialize, Deserialize)]
struct LastBackupDoc {
	last_backup_time: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LastFullBackupDoc {
	last_full_backup_time: u64,
}

/// Persisted last-backup and last-full-backup wall times.
///
/// Modelled as an explicit value rather than ambient global files, so callers
/// (and tests) can point it at a scratch directory.
#[derive(Debug, Clone)]
pub struct TimestampStore {
	root: PathBuf,
}

impl TimestampStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	fn last_backup_path(&self) -> PathBuf {
		self.root.join("BackupTimestamp").join("backup_timestamp.json")
	}

	fn last_full_backup_path(&self) -> PathBuf {
		self.root
			.join("BackupTimestamp")
			.join("full_backup_timestamp.json")
	}

	pub fn get_last_backup(&self) -> u64 {
		read_json::<LastBackupDoc>(&self.last_backup_path())
			.map(|d| d.last_backup_time)
			.unwrap_or(0)
	}

	pub fn get_last_full_backup(&self) -> u64 {
		read_json::<LastFullBackupDoc>(&self.last_full_backup_path())
			.map(|d| d.last_full_backup_time)
			.unwrap_or(0)
	}

	pub fn update_last_backup(&self) -> Result<()> {
		write_json(
			&self.last_backup_path(),
			&LastBackupDoc {
				last_backup_time: now_epoch(),
			},
		)
	}

	pub fn update_last_full_backup(&self) -> Result<()> {
		write_json(
			&self.last_full_backup_path(),
			&LastFullBackupDoc {
				last_full_backup_time: now_epoch(),
			},
		)
	}
}

fn now_epoch() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
	let contents = std::fs::read_to_string(path).ok()?;
	serde_json::from_str(&contents).ok()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	let file = std::fs::File::create(path)?;
	serde_json::to_writer_pretty(file, value)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn missing_file_returns_zero() {
		let dir = tempdir().unwrap();
		let store = TimestampStore::new(dir.path());
		assert_eq!(store.get_last_backup(), 0);
		assert_eq!(store.get_last_full_backup(), 0);
	}

	#[test]
	fn update_then_get_roundtrips() {
		let dir = tempdir().unwrap();
		let store = TimestampStore::new(dir.path());
		store.update_last_backup().unwrap();
		assert!(store.get_last_backup() > 0);
		assert_eq!(store.get_last_full_backup(), 0);
	}

	#[test]
	fn parent_directory_created_on_write() {
		let dir = tempdir().unwrap();
		let nested = dir.path().join("nested").join("project");
		let store = TimestampStore::new(&nested);
		store.update_last_full_backup().unwrap();
		assert!(nested.join("BackupTimestamp").is_dir());
	}
}
