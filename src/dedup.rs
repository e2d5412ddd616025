use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::checksum::sha256_of;
use crate::manifest::is_manifest_name;

/// Summary of one deduplication pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct DedupSummary {
	pub files_checked: usize,
	pub duplicates_found: usize,
	pub bytes_saved: u64,
}

impl DedupSummary {
	fn merge(&mut self, other: DedupSummary) {
		self.files_checked += other.files_checked;
		self.duplicates_found += other.duplicates_found;
		self.bytes_saved += other.bytes_saved;
	}
}

fn eligible(path: &Path) -> bool {
	let meta = match fs::symlink_metadata(path) {
		Ok(m) => m,
		Err(_) => return false,
	};
	if meta.file_type().is_symlink() || !meta.is_file() {
		return false;
	}
	if meta.len() == 0 {
		return false;
	}
	if meta.nlink() > 1 {
		return false;
	}
	let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
	if is_manifest_name(name) || name.ends_with(".enc") {
		return false;
	}
	true
}

fn sorted_files(dir: &Path) -> Vec<PathBuf> {
	let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(dir)
		.into_iter()
		.filter_map(|e| e.ok())
		.filter(|e| e.file_type().is_file())
		.map(|e| e.path().to_path_buf())
		.collect();
	paths.sort();
	paths
}

/// Pass 1: within `dir`, hardlink files with identical SHA-256 content onto
/// the first file seen with that hash.
pub fn deduplicate_directory(dir: &Path) -> DedupSummary {
	let mut summary = DedupSummary::default();
	let mut hash_to_path: HashMap<String, PathBuf> = HashMap::new();

	for path in sorted_files(dir) {
		if !eligible(&path) {
			continue;
		}
		summary.files_checked += 1;

		let Some(hash) = sha256_of(&path) else {
			continue;
		};

		match hash_to_path.get(&hash) {
			Some(original) => {
				if same_inode(original, &path) {
					continue;
				}
				let Ok(size) = fs::metadata(&path).map(|m| m.len()) else {
					continue;
				};
				if fs::remove_file(&path).is_err() {
					continue;
				}
				if fs::hard_link(original, &path).is_err() {
					tracing::warn!(path = %path.display(), "failed to hardlink duplicate, content lost intent only, not data");
					continue;
				}
				summary.duplicates_found += 1;
				summary.bytes_saved += size;
			}
			None => {
				hash_to_path.insert(hash, path);
			}
		}
	}

	summary
}

fn same_inode(a: &Path, b: &Path) -> bool {
	match (fs::metadata(a), fs::metadata(b)) {
		(Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
		_ => false,
	}
}

/// Pass 2: for backup directories sharing the same filesystem device, build
/// the hash index from the first directory in each device group and
/// hardlink matches found in the others.
fn cross_directory_dedup(backup_dirs: &[PathBuf]) -> DedupSummary {
	let mut summary = DedupSummary::default();

	let mut device_groups: HashMap<u64, Vec<PathBuf>> = HashMap::new();
	for dir in backup_dirs {
		if let Ok(meta) = fs::metadata(dir) {
			device_groups.entry(meta.dev()).or_default().push(dir.clone());
		}
	}

	for dirs in device_groups.values() {
		if dirs.len() < 2 {
			continue;
		}
		let mut hash_to_path: HashMap<String, PathBuf> = HashMap::new();
		for path in sorted_files(&dirs[0]) {
			if !eligible(&path) {
				continue;
			}
			if let Some(hash) = sha256_of(&path) {
				hash_to_path.entry(hash).or_insert(path);
			}
		}

		for dir in &dirs[1..] {
			for path in sorted_files(dir) {
				if !eligible(&path) {
					continue;
				}
				summary.files_checked += 1;
				let Some(hash) = sha256_of(&path) else {
					continue;
				};
				if let Some(original) = hash_to_path.get(&hash) {
					if same_inode(original, &path) {
						continue;
					}
					let Ok(size) = fs::metadata(&path).map(|m| m.len()) else {
						continue;
					};
					if fs::remove_file(&path).is_err() {
						continue;
					}
					if fs::hard_link(original, &path).is_err() {
						continue;
					}
					summary.duplicates_found += 1;
					summary.bytes_saved += size;
				}
			}
		}
	}

	summary
}

/// Run the full two-pass dedup over all configured local destinations.
pub fn deduplicate_backup_dirs(backup_dirs: &[PathBuf]) -> DedupSummary {
	let mut summary = DedupSummary::default();
	for dir in backup_dirs {
		summary.merge(deduplicate_directory(dir));
	}
	if backup_dirs.len() > 1 {
		summary.merge(cross_directory_dedup(backup_dirs));
	}
	summary
}
