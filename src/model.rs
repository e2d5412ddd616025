use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// A file discovered under the source root.
///
/// Directories are not represented: they are implied by the parent of each
/// file and created on demand by the copy engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
	/// Path relative to the source root.
	pub relative_path: PathBuf,
	pub kind: EntryKind,
	pub size: u64,
	pub mtime: SystemTime,
	pub mode: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
	Regular,
	Symlink,
}

/// One backup target. All destinations consume the same source enumeration.
#[derive(Debug, Clone)]
pub enum Destination {
	LocalDir(PathBuf),
	Sftp(SftpTarget),
	ObjectStore(ObjectBucket),
}

#[derive(Debug, Clone)]
pub struct SftpTarget {
	pub host: String,
	pub port: u16,
	pub user: String,
	pub auth: SshAuth,
	pub remote_root: PathBuf,
	/// 0 disables shaping.
	pub bandwidth_limit_kbps: u64,
}

#[derive(Debug, Clone)]
pub enum SshAuth {
	Password(String),
	PrivateKey {
		path: PathBuf,
		passphrase: Option<String>,
	},
}

#[derive(Debug, Clone)]
pub struct ObjectBucket {
	pub bucket: String,
	pub prefix: String,
	pub region: Option<String>,
	pub access_key: Option<String>,
	pub secret_key: Option<String>,
}

/// Which mode a run operates under. Fixes the per-file "should copy?"
/// predicate; see [`BackupMode::should_copy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
	Full,
	Incremental,
	Differential,
}

impl BackupMode {
	/// Decide whether `entry` should be copied, given the relevant timestamp
	/// cutoff and whether the destination counterpart already exists.
	///
	/// `cutoff` is `last_backup_time` for incremental, `last_full_backup_time`
	/// for differential, and is ignored for full.
	pub fn should_copy(self, entry_mtime: SystemTime, cutoff_epoch: u64, dest_exists: bool) -> bool {
		match self {
			BackupMode::Full => true,
			BackupMode::Incremental => {
				!dest_exists || epoch_secs(entry_mtime) > cutoff_epoch
			}
			BackupMode::Differential => epoch_secs(entry_mtime) > cutoff_epoch,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			BackupMode::Full => "full",
			BackupMode::Incremental => "incremental",
			BackupMode::Differential => "differential",
		}
	}
}

/// Whether backup directories additionally get a ZIP archive of the source
/// tree, and whether that archive is password-protected. Compression is a
/// separate artifact alongside the plain copied files, not a replacement for
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressType {
	None,
	Zip,
	ZipPw,
}

impl CompressType {
	pub fn as_str(self) -> &'static str {
		match self {
			CompressType::None => "none",
			CompressType::Zip => "zip",
			CompressType::ZipPw => "zip_pw",
		}
	}
}

pub fn epoch_secs(t: SystemTime) -> u64 {
	t.duration_since(SystemTime::UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[test]
	fn incremental_copies_when_dest_missing() {
		let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
		assert!(BackupMode::Incremental.should_copy(mtime, 1_000, false));
	}

	#[test]
	fn incremental_skips_unchanged_existing() {
		let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
		assert!(!BackupMode::Incremental.should_copy(mtime, 1_000, true));
	}

	#[test]
	fn differential_uses_full_backup_cutoff() {
		let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(2_000);
		assert!(BackupMode::Differential.should_copy(mtime, 1_000, true));
		assert!(!BackupMode::Differential.should_copy(mtime, 3_000, true));
	}

	#[test]
	fn full_always_copies() {
		let mtime = SystemTime::UNIX_EPOCH;
		assert!(BackupMode::Full.should_copy(mtime, u64::MAX, true));
	}
}
