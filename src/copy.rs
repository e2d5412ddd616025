use std::fs;
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use filetime::{set_file_mtime, FileTime};
use walkdir::WalkDir;

use crate::checksum::{checksums_equal, sha256_of};
use crate::exclude::ExcludeSet;
use crate::manifest::{is_manifest_name, Manifest};
use crate::model::{EntryKind, SourceEntry};

/// Enumerate regular files and symlinks under `source_root`, skipping
/// excluded paths and manifest documents. Never follows into directories
/// reached via a symlink.
pub fn enumerate(source_root: &Path, excludes: &ExcludeSet) -> Vec<SourceEntry> {
	let mut entries = Vec::new();

	for entry in WalkDir::new(source_root)
		.follow_links(false)
		.into_iter()
		.filter_entry(|e| {
			// never descend through a directory symlink
			!(e.file_type().is_symlink() && e.path().is_dir())
		})
		.filter_map(|e| e.ok())
	{
		if entry.path() == source_root {
			continue;
		}
		let file_type = entry.file_type();
		if !file_type.is_file() && !file_type.is_symlink() {
			continue;
		}

		let relative_path = match entry.path().strip_prefix(source_root) {
			Ok(p) => p.to_path_buf(),
			Err(_) => continue,
		};

		if is_manifest_name(&relative_path.to_string_lossy()) {
			continue;
		}
		if excludes.should_exclude(&relative_path) {
			continue;
		}

		let Ok(meta) = fs::symlink_metadata(entry.path()) else {
			continue;
		};

		entries.push(SourceEntry {
			relative_path,
			kind: if file_type.is_symlink() {
				EntryKind::Symlink
			} else {
				EntryKind::Regular
			},
			size: meta.len(),
			mtime: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
			mode: meta.mode(),
		});
	}

	entries
}

/// Outcome of copying one file, recorded into the manifest by the caller.
/// An explicit value rather than an exception, per the per-file result
/// sum-type pattern.
#[derive(Debug)]
pub enum CopyOutcome {
	Copied { size: u64 },
	Skipped,
	Failed { reason: String },
}

/// Copy (or replicate, for symlinks) `src` to `dst`, creating parent
/// directories as needed. For regular files, verifies the copy by comparing
/// SHA-256 of source and destination.
pub fn copy_one(src: &Path, dst: &Path, kind: EntryKind) -> CopyOutcome {
	if let Some(parent) = dst.parent() {
		if let Err(err) = fs::create_dir_all(parent) {
			return CopyOutcome::Failed {
				reason: format!("mkdir -p {}: {err}", parent.display()),
			};
		}
	}

	match kind {
		EntryKind::Symlink => match fs::read_link(src) {
			Ok(target) => {
				let _ = fs::remove_file(dst);
				match symlink(&target, dst) {
					Ok(()) => CopyOutcome::Copied { size: 0 },
					Err(err) => CopyOutcome::Failed {
						reason: format!("symlink {}: {err}", dst.display()),
					},
				}
			}
			Err(err) => CopyOutcome::Failed {
				reason: format!("readlink {}: {err}", src.display()),
			},
		},
		EntryKind::Regular => {
			if let Err(err) = fs::copy(src, dst) {
				return CopyOutcome::Failed {
					reason: format!("copy to {}: {err}", dst.display()),
				};
			}
			if let Ok(meta) = fs::metadata(src) {
				let _ = fs::set_permissions(dst, fs::Permissions::from_mode(meta.mode()));
				if let Ok(modified) = meta.modified() {
					let _ = set_file_mtime(dst, FileTime::from_system_time(modified));
				}
			}

			let src_hash = sha256_of(src);
			let dst_hash = sha256_of(dst);
			if !checksums_equal(&src_hash, &dst_hash) {
				return CopyOutcome::Failed {
					reason: "checksum mismatch after copy".into(),
				};
			}

			let size = fs::metadata(dst).map(|m| m.len()).unwrap_or(0);
			CopyOutcome::Copied { size }
		}
	}
}

/// Copy `entries` (already mode-filtered by the orchestrator) from
/// `src_root` to `dst_root`, recording every outcome into `manifest`.
///
/// `workers == 1` copies in enumeration order on the calling thread;
/// `workers > 1` runs a bounded thread pool.
pub fn copy_all(
	entries: &[SourceEntry],
	src_root: &Path,
	dst_root: &Path,
	manifest: &Manifest,
	workers: usize,
) {
	if workers <= 1 {
		for entry in entries {
			run_one(entry, src_root, dst_root, manifest);
		}
		return;
	}

	let entries = Arc::new(entries.to_vec());
	let src_root = Arc::new(src_root.to_path_buf());
	let dst_root = Arc::new(dst_root.to_path_buf());
	let next = Arc::new(std::sync::atomic::AtomicUsize::new(0));

	thread::scope(|scope| {
		for _ in 0..workers.min(entries.len().max(1)) {
			let entries = Arc::clone(&entries);
			let src_root = Arc::clone(&src_root);
			let dst_root = Arc::clone(&dst_root);
			let next = Arc::clone(&next);
			scope.spawn(move || loop {
				let i = next.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
				if i >= entries.len() {
					break;
				}
				run_one(&entries[i], &src_root, &dst_root, manifest);
			});
		}
	});
}

fn run_one(entry: &SourceEntry, src_root: &Path, dst_root: &Path, manifest: &Manifest) {
	let src = src_root.join(&entry.relative_path);
	let dst = dst_root.join(&entry.relative_path);
	let rel = entry.relative_path.to_string_lossy().into_owned();

	match copy_one(&src, &dst, entry.kind) {
		CopyOutcome::Copied { size } => manifest.record_copy(rel, size),
		CopyOutcome::Skipped => manifest.record_skip(rel),
		CopyOutcome::Failed { reason } => manifest.record_failure(rel, reason),
	}
}

/// Whether a destination counterpart for `entry` already exists, for
/// incremental/differential mode-predicate decisions.
pub fn dest_exists(dst_root: &Path, entry: &SourceEntry) -> bool {
	dst_root.join(&entry.relative_path).exists()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::BackupMode;
	use tempfile::tempdir;

	#[test]
	fn enumerate_skips_manifests_and_excludes() {
		let dir = tempdir().unwrap();
		fs::write(dir.path().join("a.txt"), b"aaa").unwrap();
		fs::write(dir.path().join("backup_manifest_20200101_000000.json"), b"{}").unwrap();
		fs::create_dir_all(dir.path().join("b")).unwrap();
		fs::write(dir.path().join("b/c.txt"), b"ccc").unwrap();
		fs::write(dir.path().join("skip.tmp"), b"x").unwrap();

		let excludes = ExcludeSet::new(["*.tmp"]);
		let mut entries = enumerate(dir.path(), &excludes);
		entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

		let paths: Vec<_> = entries
			.iter()
			.map(|e| e.relative_path.to_string_lossy().into_owned())
			.collect();
		assert_eq!(paths, vec!["a.txt", "b/c.txt"]);
	}

	#[test]
	fn copy_one_verifies_checksum() {
		let dir = tempdir().unwrap();
		let src = dir.path().join("src.txt");
		let dst = dir.path().join("out/dst.txt");
		fs::write(&src, b"payload").unwrap();

		match copy_one(&src, &dst, EntryKind::Regular) {
			CopyOutcome::Copied { size } => assert_eq!(size, 7),
			other => panic!("expected Copied, got {other:?}"),
		}
		assert_eq!(fs::read(&dst).unwrap(), b"payload");
	}

	#[test]
	fn copy_one_replicates_symlink_verbatim() {
		let dir = tempdir().unwrap();
		let target = dir.path().join("target.txt");
		fs::write(&target, b"real file").unwrap();
		let link = dir.path().join("link.txt");
		symlink(&target, &link).unwrap();

		let dst = dir.path().join("out/link.txt");
		match copy_one(&link, &dst, EntryKind::Symlink) {
			CopyOutcome::Copied { .. } => {}
			other => panic!("expected Copied, got {other:?}"),
		}
		assert_eq!(fs::read_link(&dst).unwrap(), target);
	}

	#[test]
	fn full_backup_end_to_end_two_destinations() {
		let src = tempdir().unwrap();
		let d1 = tempdir().unwrap();
		let d2 = tempdir().unwrap();
		fs::write(src.path().join("a.txt"), b"aaa").unwrap();
		fs::create_dir_all(src.path().join("b")).unwrap();
		fs::write(src.path().join("b/c.txt"), b"ccc").unwrap();

		let excludes = ExcludeSet::default();
		let entries = enumerate(src.path(), &excludes);

		for dst in [d1.path(), d2.path()] {
			let manifest = Manifest::new(BackupMode::Full);
			copy_all(&entries, src.path(), dst, &manifest, 1);
			let (copied, _, failed) = manifest.counts();
			assert_eq!(copied, 2);
			assert_eq!(failed, 0);
			assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"aaa");
			assert_eq!(fs::read(dst.join("b/c.txt")).unwrap(), b"ccc");
		}
	}
}
