use std::fs;
use std::path::Path;
use std::time::SystemTime;

use tracing::warn;

use crate::manifest::is_manifest_name;

/// Remove top-level, non-manifest entries from `backup_dir` older than
/// `max_age_days`, then trim survivors to the newest `max_count`. Either rule
/// is disabled at 0. Per-entry failures are logged and do not abort.
pub fn cleanup_old_backups(backup_dir: &Path, max_age_days: u64, max_count: usize) {
	if max_age_days == 0 && max_count == 0 {
		return;
	}

	let mut entries: Vec<(std::path::PathBuf, SystemTime)> = match fs::read_dir(backup_dir) {
		Ok(iter) => iter
			.filter_map(|e| e.ok())
			.filter(|e| {
				let name = e.file_name();
				!is_manifest_name(&name.to_string_lossy())
			})
			.filter_map(|e| {
				let mtime = e.metadata().ok()?.modified().ok()?;
				Some((e.path(), mtime))
			})
			.collect(),
		Err(_) => return,
	};

	// newest first
	entries.sort_by(|a, b| b.1.cmp(&a.1));

	let now = SystemTime::now();
	let survivors: Vec<_> = if max_age_days > 0 {
		let max_age = std::time::Duration::from_secs(max_age_days * 86_400);
		entries
			.into_iter()
			.filter(|(path, mtime)| {
				let age = now.duration_since(*mtime).unwrap_or_default();
				if age > max_age {
					remove_entry(path);
					false
				} else {
					true
				}
			})
			.collect()
	} else {
		entries
	};

	if max_count > 0 && survivors.len() > max_count {
		for (path, _) in &survivors[max_count..] {
			remove_entry(path);
		}
	}
}

fn remove_entry(path: &Path) {
	let result = if path.is_dir() {
		fs::remove_dir_all(path)
	} else {
		fs::remove_file(path)
	};
	if let Err(err) = result {
		warn!(path = %path.display(), %err, "failed to reap backup entry");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use filetime::{set_file_mtime, FileTime};
	use tempfile::tempdir;

	fn touch_with_age(path: &Path, days_old: u64) {
		fs::write(path, b"x").unwrap();
		let mtime = SystemTime::now() - std::time::Duration::from_secs(days_old * 86_400);
		set_file_mtime(path, FileTime::from_system_time(mtime)).unwrap();
	}

	#[test]
	fn disabled_when_both_zero() {
		let dir = tempdir().unwrap();
		touch_with_age(&dir.path().join("old"), 1000);
		cleanup_old_backups(dir.path(), 0, 0);
		assert!(dir.path().join("old").exists());
	}

	#[test]
	fn age_rule_removes_old_entries() {
		let dir = tempdir().unwrap();
		touch_with_age(&dir.path().join("old"), 10);
		touch_with_age(&dir.path().join("new"), 1);
		cleanup_old_backups(dir.path(), 5, 0);
		assert!(!dir.path().join("old").exists());
		assert!(dir.path().join("new").exists());
	}

	#[test]
	fn count_rule_keeps_newest_n() {
		let dir = tempdir().unwrap();
		for (name, age) in [("a", 3), ("b", 2), ("c", 1), ("d", 0)] {
			touch_with_age(&dir.path().join(name), age);
		}
		cleanup_old_backups(dir.path(), 0, 2);
		let mut remaining: Vec<_> = fs::read_dir(dir.path())
			.unwrap()
			.filter_map(|e| e.ok().map(|e| e.file_name().to_string_lossy().into_owned()))
			.collect();
		remaining.sort();
		assert_eq!(remaining, vec!["c", "d"]);
	}

	#[test]
	fn manifests_are_never_reaped() {
		let dir = tempdir().unwrap();
		touch_with_age(&dir.path().join("backup_manifest_20200101_000000.json"), 1000);
		cleanup_old_backups(dir.path(), 1, 0);
		assert!(dir.path().join("backup_manifest_20200101_000000.json").exists());
	}
}
