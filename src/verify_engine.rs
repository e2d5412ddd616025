use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::crypto::Credential;
use crate::error::Result;
use crate::manifest::load_latest;

const MAX_DETAIL_LINES: usize = 20;

#[derive(Debug, Default, Clone, Serialize)]
pub struct VerifyCounts {
	pub verified: usize,
	pub missing: usize,
	pub corrupted: usize,
	pub errors: usize,
}

impl VerifyCounts {
	fn merge(&mut self, other: &VerifyCounts) {
		self.verified += other.verified;
		self.missing += other.missing;
		self.corrupted += other.corrupted;
		self.errors += other.errors;
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryReport {
	pub directory: PathBuf,
	pub counts: VerifyCounts,
	pub details: Vec<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct VerifyReport {
	pub overall: VerifyCounts,
	pub directories: Vec<DirectoryReport>,
}

/// Audit every configured local destination: for each `copied` entry in its
/// latest manifest, confirm the file (or its encrypted counterpart) exists
/// and is the recorded size. Never re-hashes; trusts the copy-time
/// post-copy verification.
pub fn verify_backup_integrity(
	backup_dirs: &[PathBuf],
	decrypt_credential: Option<&Credential>,
) -> Result<VerifyReport> {
	let mut report = VerifyReport::default();
	for dir in backup_dirs {
		let dir_report = verify_one_directory(dir, decrypt_credential)?;
		report.overall.merge(&dir_report.counts);
		report.directories.push(dir_report);
	}
	Ok(report)
}

fn verify_one_directory(dir: &Path, decrypt_credential: Option<&Credential>) -> Result<DirectoryReport> {
	let mut counts = VerifyCounts::default();
	let mut details = Vec::new();

	let Some(manifest) = load_latest(dir)? else {
		return Ok(verify_files_exist(dir));
	};

	for entry in &manifest.copied {
		match locate_and_check(dir, &entry.path, entry.size, decrypt_credential) {
			CheckResult::Verified => counts.verified += 1,
			CheckResult::Missing => {
				counts.missing += 1;
				push_detail(&mut details, format!("MISSING: {}", entry.path));
			}
			CheckResult::Corrupted { actual } => {
				counts.corrupted += 1;
				push_detail(
					&mut details,
					format!("CORRUPTED: {} (expected {} bytes, found {actual})", entry.path, entry.size),
				);
			}
			CheckResult::Error(reason) => {
				counts.errors += 1;
				push_detail(&mut details, format!("ERROR: {}: {reason}", entry.path));
			}
		}
	}

	Ok(DirectoryReport {
		directory: dir.to_path_buf(),
		counts,
		details,
	})
}

fn push_detail(details: &mut Vec<String>, line: String) {
	if details.len() < MAX_DETAIL_LINES {
		details.push(line);
	}
}

enum CheckResult {
	Verified,
	Missing,
	Corrupted { actual: u64 },
	Error(String),
}

fn locate_and_check(
	dir: &Path,
	rel_path: &str,
	expected_size: u64,
	decrypt_credential: Option<&Credential>,
) -> CheckResult {
	let direct = dir.join(rel_path);
	if let Ok(meta) = fs::metadata(&direct) {
		return if meta.len() == expected_size {
			CheckResult::Verified
		} else {
			CheckResult::Corrupted { actual: meta.len() }
		};
	}

	let Some(basename) = Path::new(rel_path).file_name() else {
		return CheckResult::Missing;
	};
	let found = find_by_name(dir, basename, None).or_else(|| {
		let mut enc_name = basename.to_os_string();
		enc_name.push(".enc");
		find_by_name(dir, basename, Some(&enc_name))
	});

	match found {
		Some(path) if path.extension().map(|e| e == "enc").unwrap_or(false) => {
			match decrypt_credential {
				Some(credential) => verify_encrypted(&path, expected_size, credential),
				None => CheckResult::Verified, // presence confirmed; no credential to measure plaintext size
			}
		}
		Some(path) => match fs::metadata(&path) {
			Ok(meta) if meta.len() == expected_size => CheckResult::Verified,
			Ok(meta) => CheckResult::Corrupted { actual: meta.len() },
			Err(err) => CheckResult::Error(err.to_string()),
		},
		None => CheckResult::Missing,
	}
}

fn find_by_name(dir: &Path, plain_name: &std::ffi::OsStr, enc_name: Option<&std::ffi::OsStr>) -> Option<PathBuf> {
	walkdir::WalkDir::new(dir)
		.into_iter()
		.filter_map(|e| e.ok())
		.find(|e| {
			e.file_type().is_file()
				&& (e.file_name() == plain_name || enc_name.map(|n| e.file_name() == n).unwrap_or(false))
		})
		.map(|e| e.path().to_path_buf())
}

fn verify_encrypted(enc_path: &Path, expected_size: u64, credential: &Credential) -> CheckResult {
	let scratch = match tempfile::NamedTempFile::new() {
		Ok(f) => f,
		Err(err) => return CheckResult::Error(err.to_string()),
	};
	match crate::crypto::decrypt_file_to(enc_path, credential, scratch.path()) {
		Ok(_) => match fs::metadata(scratch.path()) {
			Ok(meta) if meta.len() == expected_size => CheckResult::Verified,
			Ok(meta) => CheckResult::Corrupted { actual: meta.len() },
			Err(err) => CheckResult::Error(err.to_string()),
		},
		Err(err) => CheckResult::Error(err.to_string()),
	}
}

/// Fallback when no manifest exists: a plain readability probe of every file.
fn verify_files_exist(dir: &Path) -> DirectoryReport {
	let mut counts = VerifyCounts::default();
	let mut details = Vec::new();

	for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
		if !entry.file_type().is_file() {
			continue;
		}
		let name = entry.file_name().to_string_lossy();
		if crate::manifest::is_manifest_name(&name) {
			continue;
		}
		match fs::File::open(entry.path()) {
			Ok(_) => counts.verified += 1,
			Err(err) => {
				counts.errors += 1;
				push_detail(&mut details, format!("ERROR: {}: {err}", entry.path().display()));
				warn!(path = %entry.path().display(), %err, "unreadable during fallback verify");
			}
		}
	}

	DirectoryReport {
		directory: dir.to_path_buf(),
		counts,
		details,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::manifest::Manifest;
	use crate::model::BackupMode;
	use tempfile::tempdir;

	#[test]
	fn detects_corruption_by_size() {
		let dir = tempdir().unwrap();
		fs::write(dir.path().join("file1.txt"), b"12345678").unwrap();
		let manifest = Manifest::new(BackupMode::Full);
		manifest.record_copy("file1.txt", 8);
		manifest.save(dir.path()).unwrap();

		fs::write(dir.path().join("file1.txt"), b"longer contents").unwrap();

		let report = verify_backup_integrity(&[dir.path().to_path_buf()], None).unwrap();
		assert_eq!(report.overall.corrupted, 1);
		assert_eq!(report.overall.verified, 0);
	}

	#[test]
	fn reports_missing_file() {
		let dir = tempdir().unwrap();
		let manifest = Manifest::new(BackupMode::Full);
		manifest.record_copy("gone.txt", 3);
		manifest.save(dir.path()).unwrap();

		let report = verify_backup_integrity(&[dir.path().to_path_buf()], None).unwrap();
		assert_eq!(report.overall.missing, 1);
	}

	#[test]
	fn verifies_matching_size() {
		let dir = tempdir().unwrap();
		fs::write(dir.path().join("a.txt"), b"aaa").unwrap();
		let manifest = Manifest::new(BackupMode::Full);
		manifest.record_copy("a.txt", 3);
		manifest.save(dir.path()).unwrap();

		let report = verify_backup_integrity(&[dir.path().to_path_buf()], None).unwrap();
		assert_eq!(report.overall.verified, 1);
		assert_eq!(report.overall.corrupted, 0);
	}
}
